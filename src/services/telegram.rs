// src/services/telegram.rs

//! Telegram Bot API client.
//!
//! Two operations are consumed: `sendMessage` for notifications and command
//! replies, and `getUpdates` for pending inbound messages since a cursor.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, DeliveryError, Result};
use crate::models::TelegramConfig;
use crate::utils::http::create_api_client;

/// A text message ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub text: String,
    /// Rich-text mode (e.g. `Markdown`); plain text when `None`
    pub parse_mode: Option<String>,
    pub disable_web_page_preview: bool,
}

impl OutboundMessage {
    /// Plain text without formatting, previews enabled.
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            parse_mode: None,
            disable_web_page_preview: false,
        }
    }

    /// Text rendered with the given parse mode.
    pub fn formatted(text: impl Into<String>, parse_mode: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            parse_mode: Some(parse_mode.into()),
            disable_web_page_preview: false,
        }
    }
}

/// Outbound delivery of a text message to one recipient.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_message(
        &self,
        chat_id: &str,
        message: &OutboundMessage,
    ) -> std::result::Result<(), DeliveryError>;
}

/// Pending inbound messages since a cursor.
#[async_trait]
pub trait UpdateSource: Send + Sync {
    async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>>;
}

/// Envelope of every Bot API response.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    error_code: Option<u16>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

/// One inbound update.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub edited_message: Option<Message>,
    #[serde(default)]
    pub channel_post: Option<Message>,
}

impl Update {
    /// The carried message, whichever kind it is.
    pub fn message(&self) -> Option<&Message> {
        self.message
            .as_ref()
            .or(self.edited_message.as_ref())
            .or(self.channel_post.as_ref())
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Message {
    #[serde(default)]
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Chat {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'a str>,
    disable_web_page_preview: bool,
}

/// HTTP client for the Bot API.
pub struct TelegramClient {
    client: Client,
    bot_url: String,
}

impl TelegramClient {
    pub fn new(client: Client, api_base: &str, token: &str) -> Self {
        Self {
            client,
            bot_url: format!("{}/bot{}", api_base.trim_end_matches('/'), token),
        }
    }

    /// Build a client from the messaging settings; the token must be present.
    pub fn from_config(config: &TelegramConfig) -> Result<Self> {
        let token = config
            .bot_token
            .as_deref()
            .ok_or_else(|| AppError::config("missing bot token"))?;
        Ok(Self::new(create_api_client(config)?, &config.api_base, token))
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{}", self.bot_url, method)
    }
}

/// Strip the request URL, which embeds the bot token.
fn redact(error: reqwest::Error) -> String {
    error.without_url().to_string()
}

#[async_trait]
impl Messenger for TelegramClient {
    async fn send_message(
        &self,
        chat_id: &str,
        message: &OutboundMessage,
    ) -> std::result::Result<(), DeliveryError> {
        let body = SendMessageRequest {
            chat_id,
            text: &message.text,
            parse_mode: message.parse_mode.as_deref(),
            disable_web_page_preview: message.disable_web_page_preview,
        };

        let response = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&body)
            .send()
            .await
            .map_err(|e| DeliveryError::Transient(redact(e)))?;

        let status = response.status();
        let api: Option<ApiResponse<serde_json::Value>> = response.json().await.ok();

        if status.is_success() && api.as_ref().is_none_or(|a| a.ok) {
            return Ok(());
        }

        let code = api
            .as_ref()
            .and_then(|a| a.error_code)
            .unwrap_or(status.as_u16());
        let mut description = api
            .as_ref()
            .and_then(|a| a.description.clone())
            .unwrap_or_else(|| status.to_string());
        if let Some(retry) = api
            .as_ref()
            .and_then(|a| a.parameters.as_ref())
            .and_then(|p| p.retry_after)
        {
            description = format!("{description} (retry after {retry}s)");
        }

        Err(DeliveryError::from_response(code, description))
    }
}

#[async_trait]
impl UpdateSource for TelegramClient {
    async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>> {
        let response = self
            .client
            .get(self.method_url("getUpdates"))
            .query(&[("offset", offset), ("timeout", timeout_secs as i64)])
            .send()
            .await
            .map_err(|e| AppError::telegram("getUpdates", redact(e)))?;

        let status = response.status();
        let api: ApiResponse<Vec<Update>> = response
            .json()
            .await
            .map_err(|e| AppError::telegram("getUpdates", redact(e)))?;

        if !api.ok {
            return Err(AppError::telegram(
                "getUpdates",
                format!(
                    "status {}: {}",
                    status,
                    api.description.unwrap_or_default()
                ),
            ));
        }
        Ok(api.result.unwrap_or_default())
    }
}
