//! Notification recipient.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One chat that may receive offer notifications.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Subscriber {
    /// Chat identifier on the messaging platform, unique key
    pub chat_id: String,

    /// Eligible for delivery
    #[serde(default = "default_active")]
    pub active: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

impl Subscriber {
    /// Create an active subscriber without display metadata.
    pub fn new(chat_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            chat_id: chat_id.into(),
            active: true,
            username: None,
            first_name: None,
            last_name: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Human-readable name for reports.
    pub fn display_name(&self) -> String {
        let name = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        if name.is_empty() {
            "-".to_string()
        } else {
            name
        }
    }
}
