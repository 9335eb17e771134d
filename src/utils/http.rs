// src/utils/http.rs

//! HTTP client utilities.

use std::time::Duration;

use reqwest::header::{ACCEPT_LANGUAGE, HeaderMap, HeaderValue};

use crate::error::{AppError, Result};
use crate::models::{SourceConfig, TelegramConfig};

/// Create the client used to fetch the watched page.
///
/// Carries a browser User-Agent because the site rejects default client
/// identifiers.
pub fn create_page_client(config: &SourceConfig) -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    let language = HeaderValue::from_str(&config.accept_language)
        .map_err(|e| AppError::config(format!("source.accept_language: {e}")))?;
    headers.insert(ACCEPT_LANGUAGE, language);

    let client = reqwest::Client::builder()
        .user_agent(&config.user_agent)
        .default_headers(headers)
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;
    Ok(client)
}

/// Create the client used for the messaging API.
///
/// The timeout must outlast a long poll, so it is the larger of the
/// per-call timeout and the poll timeout plus a margin; individual sends
/// are additionally bounded by the notifier.
pub fn create_api_client(config: &TelegramConfig) -> Result<reqwest::Client> {
    let timeout = config.timeout_secs.max(config.poll_timeout_secs + 5);
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout))
        .build()?;
    Ok(client)
}
