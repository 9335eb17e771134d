// src/models/selectors.rs

//! Extraction policy table for listing cards.
//!
//! Every field that drifted between page versions is an ordered list of
//! strategies; the extractor takes the first non-empty result.

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Where to find a detail link inside a card.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LinkStrategy {
    /// Selector for the element carrying the link
    pub selector: String,

    /// Attribute holding the link value
    #[serde(default = "default_attr_name")]
    pub attr: String,
}

impl LinkStrategy {
    pub fn new(selector: impl Into<String>, attr: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            attr: attr.into(),
        }
    }
}

fn default_attr_name() -> String {
    "href".to_string()
}

/// CSS selectors and fact keys for scraping the offers page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionSelectors {
    /// Listing container; each direct element child is one card
    #[serde(default = "defaults::container")]
    pub container: String,

    /// Optional selector a direct child must match to count as a card
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_filter: Option<String>,

    /// Title strategies, primary first
    #[serde(default = "defaults::title")]
    pub title: Vec<String>,

    /// Location strategies, primary first
    #[serde(default = "defaults::location")]
    pub location: Vec<String>,

    /// Link strategies; data attributes are preferred over anchors
    #[serde(default = "defaults::link")]
    pub link: Vec<LinkStrategy>,

    /// One label/value pair of the fact block
    #[serde(default = "defaults::fact_row")]
    pub fact_row: String,

    /// Label element within a fact row
    #[serde(default = "defaults::fact_label")]
    pub fact_label: String,

    /// Value element within a fact row
    #[serde(default = "defaults::fact_value")]
    pub fact_value: String,

    /// Lowercase fact labels for living space
    #[serde(default = "defaults::area_keys")]
    pub area_keys: Vec<String>,

    /// Lowercase fact labels for rent
    #[serde(default = "defaults::price_keys")]
    pub price_keys: Vec<String>,

    /// Lowercase fact labels for the availability date
    #[serde(default = "defaults::available_keys")]
    pub available_keys: Vec<String>,
}

impl Default for ExtractionSelectors {
    fn default() -> Self {
        Self {
            container: defaults::container(),
            card_filter: None,
            title: defaults::title(),
            location: defaults::location(),
            link: defaults::link(),
            fact_row: defaults::fact_row(),
            fact_label: defaults::fact_label(),
            fact_value: defaults::fact_value(),
            area_keys: defaults::area_keys(),
            price_keys: defaults::price_keys(),
            available_keys: defaults::available_keys(),
        }
    }
}

impl ExtractionSelectors {
    /// Check that every chain has at least one strategy and every selector parses.
    pub fn validate(&self) -> Result<()> {
        if self.title.is_empty() {
            return Err(AppError::validation("selectors.title has no strategies"));
        }
        if self.location.is_empty() {
            return Err(AppError::validation("selectors.location has no strategies"));
        }
        if self.link.is_empty() {
            return Err(AppError::validation("selectors.link has no strategies"));
        }

        let singles = [
            &self.container,
            &self.fact_row,
            &self.fact_label,
            &self.fact_value,
        ];
        let chains = self.title.iter().chain(self.location.iter());
        let links = self.link.iter().map(|l| &l.selector);
        let filter = self.card_filter.iter();

        for selector in singles.into_iter().chain(chains).chain(links).chain(filter) {
            scraper::Selector::parse(selector)
                .map_err(|e| AppError::selector(selector.as_str(), format!("{e:?}")))?;
        }
        Ok(())
    }
}

mod defaults {
    use super::LinkStrategy;

    pub fn container() -> String {
        "#residential-offer-list".into()
    }
    pub fn title() -> Vec<String> {
        vec!["h5.headline-5".into(), ".teaser__title".into()]
    }
    pub fn location() -> Vec<String> {
        vec![
            ".teaser-header .subheader-5".into(),
            ".teaser__meta span".into(),
        ]
    }
    pub fn link() -> Vec<LinkStrategy> {
        vec![
            LinkStrategy::new(".teaser.js-link-area", "data-href"),
            LinkStrategy::new("a.teaser", "href"),
        ]
    }
    pub fn fact_row() -> String {
        ".residential-offer-card-facts > div".into()
    }
    pub fn fact_label() -> String {
        ".subheader-4".into()
    }
    pub fn fact_value() -> String {
        ".headline-4".into()
    }
    pub fn area_keys() -> Vec<String> {
        vec!["living space".into(), "wohnfläche".into()]
    }
    pub fn price_keys() -> Vec<String> {
        vec!["all-inclusive rent".into(), "rent".into(), "miete".into()]
    }
    pub fn available_keys() -> Vec<String> {
        vec!["available from".into(), "verfügbar ab".into()]
    }
}
