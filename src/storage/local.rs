//! Local filesystem storage implementation.
//!
//! Every document is written to a temporary file and renamed into place, so
//! a crash mid-write leaves the previous version intact.
//!
//! ## Storage Layout
//!
//! ```text
//! {root}/
//! ├── last_offers.json      # ["<id>", ...]
//! ├── last_status.json      # {"offers_present": true, "checked_at": "..."}
//! ├── poll_cursor.json      # {"offset": 0}
//! ├── run.lock              # empty, flock'd during a run
//! └── subscribers.json      # [{"chatId": "...", "active": true, ...}]
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Serialize, de::DeserializeOwned};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::models::Subscriber;
use crate::storage::{PollCursor, RunLock, RunStatus, StateStore, SubscriberStore};

const SEEN_KEY: &str = "last_offers.json";
const STATUS_KEY: &str = "last_status.json";
const CURSOR_KEY: &str = "poll_cursor.json";
const SUBSCRIBERS_KEY: &str = "subscribers.json";
const RUN_LOCK_KEY: &str = "run.lock";

/// Local filesystem storage backend.
#[derive(Clone)]
pub struct LocalStorage {
    root_dir: PathBuf,
    /// Serializes read-modify-write cycles on the subscriber document.
    subscribers_lock: Arc<Mutex<()>>,
}

impl LocalStorage {
    /// Create a new LocalStorage rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            subscribers_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Lock file guarding runs against this directory.
    pub fn run_lock(&self) -> RunLock {
        RunLock::new(self.path(RUN_LOCK_KEY))
    }

    /// Get the full path for a relative key.
    fn path(&self, key: &str) -> PathBuf {
        self.root_dir.join(key)
    }

    /// Ensure parent directory exists.
    async fn ensure_dir(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(key);
        self.ensure_dir(&path).await?;

        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Write JSON data.
    async fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write_bytes(key, &bytes).await
    }

    /// Read bytes, returning None if file doesn't exist.
    async fn read_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    /// Read JSON data.
    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.read_bytes(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Read a state document, reporting any failure as a persistence error.
    async fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.read_json(key)
            .await
            .map_err(|e| AppError::persistence(key, e))
    }

    /// Replace a state document, reporting any failure as a persistence error.
    async fn store<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        self.write_json(key, value)
            .await
            .map_err(|e| AppError::persistence(key, e))
    }
}

#[async_trait]
impl StateStore for LocalStorage {
    async fn load_seen(&self) -> Result<Option<Vec<String>>> {
        self.load(SEEN_KEY).await
    }

    async fn save_seen(&self, ids: &[String]) -> Result<()> {
        self.store(SEEN_KEY, ids).await?;
        log::debug!("Seen-Set: {} ids written to {}", ids.len(), SEEN_KEY);
        Ok(())
    }

    async fn load_status(&self) -> Result<Option<RunStatus>> {
        self.load(STATUS_KEY).await
    }

    async fn save_status(&self, status: &RunStatus) -> Result<()> {
        self.store(STATUS_KEY, status).await
    }

    async fn load_cursor(&self) -> Result<PollCursor> {
        Ok(self.load(CURSOR_KEY).await?.unwrap_or_default())
    }

    async fn save_cursor(&self, cursor: PollCursor) -> Result<()> {
        self.store(CURSOR_KEY, &cursor).await
    }
}

#[async_trait]
impl SubscriberStore for LocalStorage {
    async fn find_active(&self) -> Result<Vec<Subscriber>> {
        Ok(self
            .all()
            .await?
            .into_iter()
            .filter(|s| s.active)
            .collect())
    }

    async fn deactivate(&self, chat_id: &str) -> Result<bool> {
        let _guard = self.subscribers_lock.lock().await;
        let mut subscribers: Vec<Subscriber> =
            self.load(SUBSCRIBERS_KEY).await?.unwrap_or_default();

        let Some(subscriber) = subscribers.iter_mut().find(|s| s.chat_id == chat_id) else {
            log::warn!("Cannot deactivate unknown subscriber {}", chat_id);
            return Ok(false);
        };
        if !subscriber.active {
            return Ok(false);
        }
        subscriber.active = false;
        subscriber.updated_at = Utc::now();

        self.store(SUBSCRIBERS_KEY, &subscribers).await?;
        Ok(true)
    }

    async fn upsert_active(&self, subscriber: Subscriber) -> Result<()> {
        let _guard = self.subscribers_lock.lock().await;
        let mut subscribers: Vec<Subscriber> =
            self.load(SUBSCRIBERS_KEY).await?.unwrap_or_default();

        match subscribers
            .iter_mut()
            .find(|s| s.chat_id == subscriber.chat_id)
        {
            Some(existing) => {
                existing.active = true;
                existing.username = subscriber.username;
                existing.first_name = subscriber.first_name;
                existing.last_name = subscriber.last_name;
                existing.updated_at = Utc::now();
            }
            None => subscribers.push(Subscriber {
                active: true,
                ..subscriber
            }),
        }

        self.store(SUBSCRIBERS_KEY, &subscribers).await
    }

    async fn all(&self) -> Result<Vec<Subscriber>> {
        Ok(self.load(SUBSCRIBERS_KEY).await?.unwrap_or_default())
    }
}
