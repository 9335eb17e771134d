//! Service layer for the offer watcher.
//!
//! This module contains the business logic for:
//! - Page fetching (`PageSource`, `HttpPageSource`)
//! - Offer extraction (`OfferExtractor`)
//! - Notification fan-out (`Notifier`)
//! - Subscription commands (`CommandHandler`)
//! - The messaging transport (`TelegramClient`)

mod commands;
mod extractor;
mod notifier;
mod source;
mod telegram;

pub use commands::{Command, CommandHandler};
pub use extractor::OfferExtractor;
pub use notifier::{
    DeliveryReport, Notifier, bold, escape_markdown, format_offers, split_message,
};
pub use source::{HttpPageSource, PageSource};
pub use telegram::{
    Chat, Message, Messenger, OutboundMessage, TelegramClient, Update, UpdateSource,
};
