// src/services/extractor.rs

//! Offer extractor.
//!
//! Parses the offers page into `Offer` records using the extraction policy
//! table from the configuration.

use std::collections::HashMap;

use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{Config, ExtractionSelectors, Offer};
use crate::utils::{absolutize, normalize_whitespace};

/// Compiled extraction policy for one page structure.
pub struct OfferExtractor {
    origin: Url,
    container: Selector,
    card_filter: Option<Selector>,
    title: Vec<Selector>,
    location: Vec<Selector>,
    link: Vec<(Selector, String)>,
    fact_row: Selector,
    fact_label: Selector,
    fact_value: Selector,
    area_keys: Vec<String>,
    price_keys: Vec<String>,
    available_keys: Vec<String>,
}

impl OfferExtractor {
    /// Compile the selectors once; an invalid selector is a configuration error.
    pub fn new(selectors: &ExtractionSelectors, origin: &str) -> Result<Self> {
        let parse_all = |chain: &[String]| -> Result<Vec<Selector>> {
            chain.iter().map(|s| Self::parse_selector(s)).collect()
        };

        Ok(Self {
            origin: Url::parse(origin)?,
            container: Self::parse_selector(&selectors.container)?,
            card_filter: selectors
                .card_filter
                .as_deref()
                .map(Self::parse_selector)
                .transpose()?,
            title: parse_all(&selectors.title)?,
            location: parse_all(&selectors.location)?,
            link: selectors
                .link
                .iter()
                .map(|l| Ok((Self::parse_selector(&l.selector)?, l.attr.clone())))
                .collect::<Result<_>>()?,
            fact_row: Self::parse_selector(&selectors.fact_row)?,
            fact_label: Self::parse_selector(&selectors.fact_label)?,
            fact_value: Self::parse_selector(&selectors.fact_value)?,
            area_keys: lowercase_all(&selectors.area_keys),
            price_keys: lowercase_all(&selectors.price_keys),
            available_keys: lowercase_all(&selectors.available_keys),
        })
    }

    /// Build the extractor described by the application configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(&config.selectors, &config.source.origin)
    }

    /// Extract offers in document order.
    ///
    /// A missing listing container yields no offers; only a blank document
    /// is an error. Duplicate cards produce duplicate offers.
    pub fn extract(&self, html: &str) -> Result<Vec<Offer>> {
        if html.trim().is_empty() {
            return Err(AppError::parse("response body is empty"));
        }

        let document = Html::parse_document(html);
        let Some(container) = document.select(&self.container).next() else {
            log::warn!("Listing container not found, treating page as zero offers");
            return Ok(Vec::new());
        };

        let offers: Vec<Offer> = container
            .children()
            .filter_map(ElementRef::wrap)
            .filter(|card| self.card_filter.as_ref().is_none_or(|f| f.matches(card)))
            .map(|card| self.parse_card(&card))
            .collect();

        log::debug!("Extracted {} offers", offers.len());
        Ok(offers)
    }

    fn parse_card(&self, card: &ElementRef) -> Offer {
        let title = first_text(card, &self.title);
        let location = first_text(card, &self.location);
        let link = self
            .link
            .iter()
            .filter_map(|(sel, attr)| card.select(sel).next()?.value().attr(attr))
            .map(str::trim)
            .find(|value| !value.is_empty())
            .map(|raw| absolutize(&self.origin, raw))
            .unwrap_or_default();

        let facts = self.collect_facts(card);
        let area = lookup(&facts, &self.area_keys);
        let price = lookup(&facts, &self.price_keys);
        let available_from = lookup(&facts, &self.available_keys);

        Offer::new(title, location, link, area, price, available_from)
    }

    /// Lowercase-keyed label/value map of the card's fact block.
    fn collect_facts(&self, card: &ElementRef) -> HashMap<String, String> {
        let mut facts = HashMap::new();
        for row in card.select(&self.fact_row) {
            let label = row
                .select(&self.fact_label)
                .next()
                .map(element_text)
                .unwrap_or_default()
                .to_lowercase();
            if label.is_empty() {
                continue;
            }
            let value = row
                .select(&self.fact_value)
                .next()
                .map(element_text)
                .unwrap_or_default();
            facts.insert(label, value);
        }
        facts
    }

    fn parse_selector(s: &str) -> Result<Selector> {
        Selector::parse(s).map_err(|e| AppError::selector(s, format!("{e:?}")))
    }
}

fn lowercase_all(keys: &[String]) -> Vec<String> {
    keys.iter().map(|k| k.trim().to_lowercase()).collect()
}

fn element_text(element: ElementRef) -> String {
    normalize_whitespace(&element.text().collect::<String>())
}

/// Text of the first element matched by the first strategy that yields
/// non-empty text.
fn first_text(card: &ElementRef, strategies: &[Selector]) -> String {
    strategies
        .iter()
        .filter_map(|sel| card.select(sel).next())
        .map(element_text)
        .find(|text| !text.is_empty())
        .unwrap_or_default()
}

fn lookup(facts: &HashMap<String, String>, keys: &[String]) -> String {
    keys.iter()
        .filter_map(|key| facts.get(key))
        .find(|value| !value.is_empty())
        .cloned()
        .unwrap_or_default()
}
