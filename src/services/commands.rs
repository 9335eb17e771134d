// src/services/commands.rs

//! Subscription commands received from chats.

use std::sync::Arc;

use crate::error::Result;
use crate::models::{BotMessages, Config, Subscriber};
use crate::services::telegram::{Chat, Messenger, OutboundMessage, Update};
use crate::storage::SubscriberStore;

/// A recognized chat command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
}

impl Command {
    /// Parse the leading command of a message text.
    ///
    /// Accepts an optional `@botname` suffix and trailing payload
    /// (`/start@offer_bot ref42`). Anything else yields `None`.
    pub fn parse(text: &str) -> Option<Self> {
        let token = text.split_whitespace().next()?;
        let name = token.strip_prefix('/')?;
        let name = name.split('@').next().unwrap_or(name);

        match name.to_ascii_lowercase().as_str() {
            "start" => Some(Self::Start),
            "stop" => Some(Self::Stop),
            _ => None,
        }
    }
}

/// Applies `/start` and `/stop` to the subscriber store and replies.
pub struct CommandHandler {
    messenger: Arc<dyn Messenger>,
    subscribers: Arc<dyn SubscriberStore>,
    messages: BotMessages,
    parse_mode: String,
}

impl CommandHandler {
    pub fn new(
        messenger: Arc<dyn Messenger>,
        subscribers: Arc<dyn SubscriberStore>,
        config: &Config,
    ) -> Self {
        Self {
            messenger,
            subscribers,
            messages: config.bot.clone(),
            parse_mode: config.telegram.parse_mode.clone(),
        }
    }

    /// Handle one inbound update; returns the command that was applied.
    pub async fn handle(&self, update: &Update) -> Result<Option<Command>> {
        let Some(message) = update.message() else {
            return Ok(None);
        };
        let Some(command) = message.text.as_deref().and_then(Command::parse) else {
            return Ok(None);
        };

        match command {
            Command::Start => self.start(&message.chat).await?,
            Command::Stop => self.stop(&message.chat).await?,
        }
        Ok(Some(command))
    }

    async fn start(&self, chat: &Chat) -> Result<()> {
        let chat_id = chat.id.to_string();
        let subscriber = Subscriber {
            username: chat.username.clone(),
            first_name: chat.first_name.clone(),
            last_name: chat.last_name.clone(),
            ..Subscriber::new(chat_id.as_str())
        };
        self.subscribers.upsert_active(subscriber).await?;
        log::info!("Subscriber {} started", chat_id);

        let welcome = if self.parse_mode.trim().is_empty() {
            OutboundMessage::plain(&self.messages.welcome_message)
        } else {
            OutboundMessage::formatted(&self.messages.welcome_message, self.parse_mode.trim())
        };
        self.messenger.send_message(&chat_id, &welcome).await?;
        self.messenger
            .send_message(
                &chat_id,
                &OutboundMessage::plain(&self.messages.subscribed_message),
            )
            .await?;
        Ok(())
    }

    async fn stop(&self, chat: &Chat) -> Result<()> {
        let chat_id = chat.id.to_string();
        if self.subscribers.deactivate(&chat_id).await? {
            log::info!("Subscriber {} stopped", chat_id);
        }
        self.messenger
            .send_message(
                &chat_id,
                &OutboundMessage::plain(&self.messages.unsubscribed_message),
            )
            .await?;
        Ok(())
    }
}
