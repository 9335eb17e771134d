// src/error.rs

//! Unified error handling for the watcher.

use std::fmt;

use thiserror::Error;

/// Result type alias for watcher operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization failed
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// CSS selector parsing failed
    #[error("Invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Source page could not be fetched (network, timeout, status)
    #[error("Fetch error for {url}: {message}")]
    Fetch { url: String, message: String },

    /// Page content defeated the structural assumptions of the extractor
    #[error("Parse error: {0}")]
    Parse(String),

    /// Persisted state could not be read or written
    #[error("Persistence error for {key}: {message}")]
    Persistence { key: String, message: String },

    /// Message delivery to a single recipient failed
    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    /// Messaging API call other than delivery failed
    #[error("Telegram API error in {method}: {message}")]
    Telegram { method: String, message: String },
}

impl AppError {
    /// Create a selector parsing error.
    pub fn selector(selector: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Selector {
            selector: selector.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a fetch error for the given URL.
    pub fn fetch(url: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Fetch {
            url: url.into(),
            message: message.to_string(),
        }
    }

    /// Create a parse error.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    /// Create a persistence error for a storage key.
    pub fn persistence(key: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Persistence {
            key: key.into(),
            message: message.to_string(),
        }
    }

    /// Create a messaging API error.
    pub fn telegram(method: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Telegram {
            method: method.into(),
            message: message.to_string(),
        }
    }
}

/// Failure to deliver a message to one recipient.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Recipient can never be reached again through this channel binding
    #[error("permanent failure (status {status}): {description}")]
    Permanent { status: u16, description: String },

    /// Timeout, rate limit, server error or anything else worth retrying later
    #[error("transient failure: {0}")]
    Transient(String),
}

impl DeliveryError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent { .. })
    }

    /// Classify a failed API response by status code and description.
    ///
    /// Authorization and not-found failures mean the recipient blocked the
    /// bot or no longer exists. Telegram reports a missing chat as a 400, so
    /// the description is consulted for that status too.
    pub fn from_response(status: u16, description: impl Into<String>) -> Self {
        let description = description.into();
        let permanent = match status {
            401 | 403 | 404 => true,
            400 => {
                let lower = description.to_lowercase();
                lower.contains("chat not found") || lower.contains("user is deactivated")
            }
            _ => false,
        };

        if permanent {
            Self::Permanent {
                status,
                description,
            }
        } else {
            Self::Transient(format!("status {status}: {description}"))
        }
    }
}
