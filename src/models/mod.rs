// src/models/mod.rs

//! Domain models for the watcher.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod offer;
mod selectors;
mod subscriber;

// Re-export all public types
pub use config::{
    BOT_TOKEN_ENV, BotMessages, Config, NotifierConfig, SOURCE_URL_ENV, ScheduleConfig,
    SourceConfig, TelegramConfig,
};
pub use offer::{Offer, PLACEHOLDER, or_placeholder};
pub use selectors::{ExtractionSelectors, LinkStrategy};
pub use subscriber::Subscriber;
