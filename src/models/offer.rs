//! Offer data structure.

use serde::{Deserialize, Serialize};

use crate::utils::hash::identity_hash;

/// Placeholder rendered for blank display fields.
pub const PLACEHOLDER: &str = "-";

/// One housing listing as seen on the page during a single run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Offer {
    /// Stable identifier derived from the link (or title + location)
    pub id: String,

    /// Listing title
    pub title: String,

    /// Listing location
    pub location: String,

    /// Absolute URL of the detail page, empty when the card has none
    pub link: String,

    /// Living space as printed on the page
    pub area: String,

    /// Rent as printed on the page
    pub price: String,

    /// Availability date as printed on the page
    pub available_from: String,
}

impl Offer {
    /// Build an offer and derive its identifier.
    pub fn new(
        title: impl Into<String>,
        location: impl Into<String>,
        link: impl Into<String>,
        area: impl Into<String>,
        price: impl Into<String>,
        available_from: impl Into<String>,
    ) -> Self {
        let mut offer = Self {
            id: String::new(),
            title: title.into(),
            location: location.into(),
            link: link.into(),
            area: area.into(),
            price: price.into(),
            available_from: available_from.into(),
        };
        offer.id = identity_hash(&offer.identity_key());
        offer
    }

    /// Key the identifier is derived from: the link, or title + location
    /// when the card carries no link.
    pub fn identity_key(&self) -> String {
        if self.link.is_empty() {
            format!("{}{}", self.title, self.location)
        } else {
            self.link.clone()
        }
    }
}

/// Return the value, or the placeholder when it is blank.
pub fn or_placeholder(value: &str) -> &str {
    if value.trim().is_empty() {
        PLACEHOLDER
    } else {
        value
    }
}
