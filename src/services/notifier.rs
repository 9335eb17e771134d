// src/services/notifier.rs

//! Offer notifier.
//!
//! Formats new offers into one message and fans it out to every active
//! subscriber. Recipients are isolated from each other: a failing or slow
//! chat never blocks the rest, and a permanent failure deactivates only
//! that subscriber.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use unicode_segmentation::UnicodeSegmentation;

use crate::error::DeliveryError;
use crate::models::{Config, Offer, Subscriber, or_placeholder};
use crate::services::telegram::{Messenger, OutboundMessage};
use crate::storage::SubscriberStore;

/// Result of one notify call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Active subscribers a delivery was attempted for
    pub attempted: usize,
    /// Subscribers that received every part of the message
    pub delivered: usize,
    /// Chat ids deactivated after a permanent failure
    pub deactivated: Vec<String>,
    /// Chat ids with a transient failure, left active
    pub transient_failures: Vec<String>,
    /// Number of messages the notification was split into
    pub parts: usize,
}

enum RecipientOutcome {
    Delivered,
    Deactivated,
    Failed,
}

/// Delivers offer notifications through a messenger.
pub struct Notifier {
    messenger: Arc<dyn Messenger>,
    subscribers: Arc<dyn SubscriberStore>,
    header_label: String,
    parse_mode: Option<String>,
    disable_web_page_preview: bool,
    max_message_len: usize,
    max_concurrent: usize,
    send_timeout: Duration,
}

impl Notifier {
    pub fn new(
        messenger: Arc<dyn Messenger>,
        subscribers: Arc<dyn SubscriberStore>,
        config: &Config,
    ) -> Self {
        let parse_mode = Some(config.telegram.parse_mode.trim())
            .filter(|m| !m.is_empty())
            .map(str::to_string);

        Self {
            messenger,
            subscribers,
            header_label: config.notifier.header_label.clone(),
            parse_mode,
            disable_web_page_preview: config.telegram.disable_web_page_preview,
            max_message_len: config.notifier.max_message_len,
            max_concurrent: config.telegram.max_concurrent.max(1),
            send_timeout: Duration::from_secs(config.telegram.timeout_secs),
        }
    }

    /// Format a notification for the given offers.
    pub fn format_message(&self, offers: &[Offer]) -> String {
        format_offers(&self.header_label, offers)
    }

    /// Send the offers to every active subscriber.
    ///
    /// Returns immediately without any network call when there are no
    /// offers. Resolves only after every delivery attempt has settled.
    pub async fn notify(&self, offers: &[Offer], subscribers: &[Subscriber]) -> DeliveryReport {
        if offers.is_empty() {
            return DeliveryReport::default();
        }

        let text = self.format_message(offers);
        let parts = split_message(&text, self.max_message_len);
        let chat_ids: Vec<String> = subscribers
            .iter()
            .filter(|s| s.active)
            .map(|s| s.chat_id.clone())
            .collect();

        let mut report = DeliveryReport {
            attempted: chat_ids.len(),
            parts: parts.len(),
            ..DeliveryReport::default()
        };

        if chat_ids.is_empty() {
            log::info!("No active subscribers, skipping delivery");
            return report;
        }

        log::info!(
            "Delivering {} offer(s) to {} subscriber(s) in {} message(s)",
            offers.len(),
            chat_ids.len(),
            parts.len()
        );

        let parts = &parts;
        let mut deliveries = stream::iter(chat_ids)
            .map(|chat_id| async move {
                let outcome = self.deliver_to(&chat_id, parts).await;
                (chat_id, outcome)
            })
            .buffer_unordered(self.max_concurrent);

        while let Some((chat_id, outcome)) = deliveries.next().await {
            match outcome {
                RecipientOutcome::Delivered => report.delivered += 1,
                RecipientOutcome::Deactivated => report.deactivated.push(chat_id),
                RecipientOutcome::Failed => report.transient_failures.push(chat_id),
            }
        }

        log::info!(
            "Delivery finished: {} delivered, {} deactivated, {} transient failures",
            report.delivered,
            report.deactivated.len(),
            report.transient_failures.len()
        );
        report
    }

    async fn deliver_to(&self, chat_id: &str, parts: &[String]) -> RecipientOutcome {
        match self.send_parts(chat_id, parts).await {
            Ok(()) => RecipientOutcome::Delivered,
            Err(error @ DeliveryError::Permanent { .. }) => {
                log::warn!("Deactivating subscriber {}: {}", chat_id, error);
                if let Err(e) = self.subscribers.deactivate(chat_id).await {
                    log::error!("Failed to deactivate subscriber {}: {}", chat_id, e);
                }
                RecipientOutcome::Deactivated
            }
            Err(error) => {
                log::warn!("Delivery to {} failed: {}", chat_id, error);
                RecipientOutcome::Failed
            }
        }
    }

    /// Send the parts in order, stopping at the first failure.
    async fn send_parts(&self, chat_id: &str, parts: &[String]) -> Result<(), DeliveryError> {
        for part in parts {
            let message = OutboundMessage {
                text: part.clone(),
                parse_mode: self.parse_mode.clone(),
                disable_web_page_preview: self.disable_web_page_preview,
            };
            tokio::time::timeout(
                self.send_timeout,
                self.messenger.send_message(chat_id, &message),
            )
            .await
            .map_err(|_| {
                DeliveryError::Transient(format!(
                    "timed out after {}s",
                    self.send_timeout.as_secs()
                ))
            })??;
        }
        Ok(())
    }
}

/// Render the notification text.
pub fn format_offers(header_label: &str, offers: &[Offer]) -> String {
    let plural = if offers.len() == 1 { "" } else { "s" };
    let header = format!(
        "🚨 {} {} new offer{}:",
        bold(&format!("[{header_label}]")),
        offers.len(),
        plural
    );

    let blocks: Vec<String> = offers.iter().map(format_offer).collect();
    format!("{}\n\n{}", header, blocks.join("\n\n"))
}

fn format_offer(offer: &Offer) -> String {
    let field = |value: &str| escape_markdown(or_placeholder(value));
    format!(
        "🏠 {} ({})\n📐 {} | 💶 {} | 📅 {}\n🔗 {}",
        bold(or_placeholder(&offer.title)),
        field(&offer.location),
        field(&offer.area),
        field(&offer.price),
        field(&offer.available_from),
        field(&offer.link),
    )
}

/// Render text in bold.
///
/// Legacy Markdown allows no escapes inside an entity, so every `*` in the
/// text closes the bold, appears escaped between two bold runs, and the
/// bold is reopened after it. Empty runs are left out.
pub fn bold(text: &str) -> String {
    let mut rendered = String::with_capacity(text.len() + 2);
    for (i, run) in text.split('*').enumerate() {
        if i > 0 {
            rendered.push_str("\\*");
        }
        if !run.is_empty() {
            rendered.push('*');
            rendered.push_str(run);
            rendered.push('*');
        }
    }
    rendered
}

/// Escape the characters legacy Markdown treats as entity delimiters.
///
/// Only valid outside entities.
pub fn escape_markdown(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '_' | '*' | '`' | '[') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Split a message at blank-line block boundaries so that no part exceeds
/// `limit` characters. A single oversized block is truncated.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for block in text.split("\n\n") {
        let block = truncate_graphemes(block, limit);
        let block_len = block.chars().count();

        if current.is_empty() {
            current = block;
            current_len = block_len;
        } else if current_len + 2 + block_len <= limit {
            current.push_str("\n\n");
            current.push_str(&block);
            current_len += 2 + block_len;
        } else {
            parts.push(std::mem::replace(&mut current, block));
            current_len = block_len;
        }
    }

    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

/// Cut text to at most `limit` characters without splitting a grapheme,
/// marking the cut with an ellipsis.
fn truncate_graphemes(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }

    let budget = limit.saturating_sub(1);
    let mut truncated = String::new();
    let mut used = 0;
    for grapheme in text.graphemes(true) {
        let len = grapheme.chars().count();
        if used + len > budget {
            break;
        }
        truncated.push_str(grapheme);
        used += len;
    }
    truncated.push('…');
    truncated
}
