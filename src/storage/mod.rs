//! Storage abstractions for watcher state.
//!
//! Run state is a handful of small documents, each replaced as a whole:
//!
//! ```text
//! storage/
//! ├── config.toml           # Watcher configuration
//! ├── last_offers.json      # Seen-Set: ids present at the end of the last run
//! ├── last_status.json      # Whether offers were present last run
//! ├── poll_cursor.json      # Next update offset for the command poller
//! ├── run.lock              # Held for the length of a run
//! └── subscribers.json      # Notification recipients
//! ```

pub mod local;
pub mod lock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::Subscriber;

// Re-export for convenience
pub use local::LocalStorage;
pub use lock::RunLock;

/// Last observed presence of offers on the page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunStatus {
    pub offers_present: bool,
    pub checked_at: DateTime<Utc>,
}

impl RunStatus {
    pub fn new(offers_present: bool) -> Self {
        Self {
            offers_present,
            checked_at: Utc::now(),
        }
    }
}

/// Position of the command poller in the inbound update stream.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PollCursor {
    /// Next update id to request; updates below it are acknowledged
    pub offset: i64,
}

/// Durable run state owned by the orchestrator and the command poller.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Seen-Set ids in document order; `None` when never written.
    async fn load_seen(&self) -> Result<Option<Vec<String>>>;

    /// Replace the Seen-Set.
    async fn save_seen(&self, ids: &[String]) -> Result<()>;

    async fn load_status(&self) -> Result<Option<RunStatus>>;

    async fn save_status(&self, status: &RunStatus) -> Result<()>;

    /// Poll cursor, starting at zero when never written.
    async fn load_cursor(&self) -> Result<PollCursor>;

    async fn save_cursor(&self, cursor: PollCursor) -> Result<()>;
}

/// Subscriber records, keyed by chat id. Never physically deleted.
#[async_trait]
pub trait SubscriberStore: Send + Sync {
    async fn find_active(&self) -> Result<Vec<Subscriber>>;

    /// Mark a subscriber inactive; returns whether a record was changed.
    async fn deactivate(&self, chat_id: &str) -> Result<bool>;

    /// Create or reactivate a subscriber, refreshing display metadata.
    async fn upsert_active(&self, subscriber: Subscriber) -> Result<()>;

    async fn all(&self) -> Result<Vec<Subscriber>>;
}
