//! Application configuration structures.

use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::ExtractionSelectors;

/// Environment variable that supplies the bot token.
pub const BOT_TOKEN_ENV: &str = "TELEGRAM_BOT_TOKEN";

/// Environment variable that overrides the watched page URL.
pub const SOURCE_URL_ENV: &str = "OFFERWATCH_SOURCE_URL";

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Watched page and HTTP fetch settings
    #[serde(default)]
    pub source: SourceConfig,

    /// Extraction policy table for listing cards
    #[serde(default)]
    pub selectors: ExtractionSelectors,

    /// Outbound messaging API settings
    #[serde(default)]
    pub telegram: TelegramConfig,

    /// Message formatting settings
    #[serde(default)]
    pub notifier: NotifierConfig,

    /// Run cadence
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Replies for subscription commands
    #[serde(default)]
    pub bot: BotMessages,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Apply environment overrides for secrets and the watched URL.
    pub fn apply_env(&mut self) {
        self.apply_overrides(
            std::env::var(BOT_TOKEN_ENV).ok(),
            std::env::var(SOURCE_URL_ENV).ok(),
        );
    }

    fn apply_overrides(&mut self, token: Option<String>, source_url: Option<String>) {
        if let Some(token) = token.filter(|t| !t.trim().is_empty()) {
            self.telegram.bot_token = Some(token.trim().to_string());
        }
        if let Some(url) = source_url.filter(|u| !u.trim().is_empty()) {
            self.source.url = url.trim().to_string();
        }
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.source.user_agent.trim().is_empty() {
            return Err(AppError::validation("source.user_agent is empty"));
        }
        if self.source.timeout_secs == 0 {
            return Err(AppError::validation("source.timeout_secs must be > 0"));
        }
        url::Url::parse(&self.source.url)
            .map_err(|e| AppError::validation(format!("source.url is invalid: {e}")))?;
        url::Url::parse(&self.source.origin)
            .map_err(|e| AppError::validation(format!("source.origin is invalid: {e}")))?;
        if self.telegram.timeout_secs == 0 {
            return Err(AppError::validation("telegram.timeout_secs must be > 0"));
        }
        if self.telegram.max_concurrent == 0 {
            return Err(AppError::validation("telegram.max_concurrent must be > 0"));
        }
        if self.notifier.max_message_len < 64 {
            return Err(AppError::validation(
                "notifier.max_message_len must be at least 64",
            ));
        }
        if self.schedule.interval_secs == 0 {
            return Err(AppError::validation("schedule.interval_secs must be > 0"));
        }
        self.selectors.validate()?;
        if let Some(token) = &self.telegram.bot_token {
            check_token_format(token)?;
        }
        Ok(())
    }

    /// Bot token required by every command that talks to the messaging API.
    pub fn require_bot_token(&self) -> Result<&str> {
        let token = self.telegram.bot_token.as_deref().ok_or_else(|| {
            AppError::config(format!(
                "missing bot token: set {BOT_TOKEN_ENV} or telegram.bot_token"
            ))
        })?;
        check_token_format(token)?;
        Ok(token)
    }
}

/// Bot token shape, compiled once
static TOKEN_PATTERN: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();

fn check_token_format(token: &str) -> Result<()> {
    let pattern = TOKEN_PATTERN
        .get_or_init(|| Regex::new(r"^\d+:[A-Za-z0-9_-]+$"))
        .as_ref()
        .map_err(|e| AppError::config(format!("token pattern: {e}")))?;
    if pattern.is_match(token) {
        Ok(())
    } else {
        Err(AppError::validation("telegram.bot_token has an invalid format"))
    }
}

/// Watched page and HTTP fetch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// URL of the listings page
    #[serde(default = "defaults::source_url")]
    pub url: String,

    /// Site origin used to absolutize relative offer links
    #[serde(default = "defaults::origin")]
    pub origin: String,

    /// User-Agent header; the site rejects default client identifiers
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Accept-Language header
    #[serde(default = "defaults::accept_language")]
    pub accept_language: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::source_timeout")]
    pub timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: defaults::source_url(),
            origin: defaults::origin(),
            user_agent: defaults::user_agent(),
            accept_language: defaults::accept_language(),
            timeout_secs: defaults::source_timeout(),
        }
    }
}

/// Outbound messaging API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot API base URL
    #[serde(default = "defaults::api_base")]
    pub api_base: String,

    /// Bot token (usually supplied through the environment)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_token: Option<String>,

    /// Rich-text mode for offer notifications
    #[serde(default = "defaults::parse_mode")]
    pub parse_mode: String,

    /// Suppress link-preview expansion
    #[serde(default = "defaults::disable_preview")]
    pub disable_web_page_preview: bool,

    /// Per-call timeout in seconds
    #[serde(default = "defaults::telegram_timeout")]
    pub timeout_secs: u64,

    /// Maximum concurrent deliveries within one run
    #[serde(default = "defaults::max_concurrent")]
    pub max_concurrent: usize,

    /// Long-poll timeout for fetching pending updates
    #[serde(default = "defaults::poll_timeout")]
    pub poll_timeout_secs: u64,

    /// Pause between update polls in milliseconds
    #[serde(default = "defaults::poll_interval")]
    pub poll_interval_ms: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            api_base: defaults::api_base(),
            bot_token: None,
            parse_mode: defaults::parse_mode(),
            disable_web_page_preview: defaults::disable_preview(),
            timeout_secs: defaults::telegram_timeout(),
            max_concurrent: defaults::max_concurrent(),
            poll_timeout_secs: defaults::poll_timeout(),
            poll_interval_ms: defaults::poll_interval(),
        }
    }
}

/// Message formatting settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    /// Label shown in the notification header
    #[serde(default = "defaults::header_label")]
    pub header_label: String,

    /// Maximum characters per outbound message
    #[serde(default = "defaults::max_message_len")]
    pub max_message_len: usize,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            header_label: defaults::header_label(),
            max_message_len: defaults::max_message_len(),
        }
    }
}

/// Run cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Seconds between pipeline runs
    #[serde(default = "defaults::interval")]
    pub interval_secs: u64,

    /// Run once immediately on startup
    #[serde(default = "defaults::run_on_start")]
    pub run_on_start: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_secs: defaults::interval(),
            run_on_start: defaults::run_on_start(),
        }
    }
}

/// Replies sent in response to subscription commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotMessages {
    #[serde(default = "defaults::welcome")]
    pub welcome_message: String,
    #[serde(default = "defaults::subscribed")]
    pub subscribed_message: String,
    #[serde(default = "defaults::unsubscribed")]
    pub unsubscribed_message: String,
}

impl Default for BotMessages {
    fn default() -> Self {
        Self {
            welcome_message: defaults::welcome(),
            subscribed_message: defaults::subscribed(),
            unsubscribed_message: defaults::unsubscribed(),
        }
    }
}

mod defaults {
    // Source defaults
    pub fn source_url() -> String {
        "https://www.stwdo.de/en/living-houses-application/current-housing-offers".into()
    }
    pub fn origin() -> String {
        "https://www.stwdo.de".into()
    }
    pub fn user_agent() -> String {
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko)".into()
    }
    pub fn accept_language() -> String {
        "en".into()
    }
    pub fn source_timeout() -> u64 {
        15
    }

    // Telegram defaults
    pub fn api_base() -> String {
        "https://api.telegram.org".into()
    }
    pub fn parse_mode() -> String {
        "Markdown".into()
    }
    pub fn disable_preview() -> bool {
        true
    }
    pub fn telegram_timeout() -> u64 {
        10
    }
    pub fn max_concurrent() -> usize {
        8
    }
    pub fn poll_timeout() -> u64 {
        25
    }
    pub fn poll_interval() -> u64 {
        3000
    }

    // Notifier defaults
    pub fn header_label() -> String {
        "STWDO Housing".into()
    }
    pub fn max_message_len() -> usize {
        4096
    }

    // Schedule defaults
    pub fn interval() -> u64 {
        60
    }
    pub fn run_on_start() -> bool {
        true
    }

    // Bot replies
    pub fn welcome() -> String {
        "Hello! This bot notifies you about new dormitory listings published by the \
         Studierendenwerk Dortmund.\n\n\
         Please note that this bot *DOES NOT* register or apply on your behalf. It only \
         reminds you when new housing offers appear on the website.\n\n\
         You must still submit your dorm application manually."
            .into()
    }
    pub fn subscribed() -> String {
        "✅ Subscribed. You will receive new housing offers.\n\n\
         If you wish to stop receiving notifications, type /stop."
            .into()
    }
    pub fn unsubscribed() -> String {
        "🛑 Unsubscribed. Send /start to subscribe again.".into()
    }
}
