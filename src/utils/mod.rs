//! Utility functions and helpers.

pub mod hash;
pub mod http;

use url::Url;

/// Make a link absolute against the site origin.
///
/// Links that already carry a scheme are returned unchanged and an empty
/// link stays empty.
pub fn absolutize(origin: &Url, link: &str) -> String {
    let link = link.trim();
    if link.is_empty() {
        return String::new();
    }
    if link.starts_with("http://") || link.starts_with("https://") {
        return link.to_string();
    }
    origin
        .join(link)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| format!("{}{}", origin.as_str().trim_end_matches('/'), link))
}

/// Collapse runs of whitespace into single spaces and trim the ends.
pub fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
