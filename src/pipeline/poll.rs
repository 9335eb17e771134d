// src/pipeline/poll.rs

//! Inbound command polling.
//!
//! The cursor is explicit state: `poll_once` takes the current cursor and
//! returns the next one, and the loop persists it after every batch so a
//! restart resumes where it stopped instead of replaying commands.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::error::Result;
use crate::models::Config;
use crate::services::{CommandHandler, TelegramClient, UpdateSource};
use crate::storage::{LocalStorage, PollCursor, StateStore};

pub struct CommandPoller {
    updates: Arc<dyn UpdateSource>,
    handler: CommandHandler,
    state: Arc<dyn StateStore>,
    timeout_secs: u64,
    interval: Duration,
}

impl CommandPoller {
    pub fn new(
        updates: Arc<dyn UpdateSource>,
        handler: CommandHandler,
        state: Arc<dyn StateStore>,
        timeout_secs: u64,
        interval: Duration,
    ) -> Self {
        Self {
            updates,
            handler,
            state,
            timeout_secs,
            interval,
        }
    }

    pub fn from_config(
        config: &Config,
        storage: Arc<LocalStorage>,
        client: Arc<TelegramClient>,
    ) -> Self {
        let handler = CommandHandler::new(client.clone(), storage.clone(), config);
        Self::new(
            client,
            handler,
            storage,
            config.telegram.poll_timeout_secs,
            Duration::from_millis(config.telegram.poll_interval_ms),
        )
    }

    /// Fetch and handle one batch of updates.
    ///
    /// Failures handling a single update are logged and skipped; the cursor
    /// still moves past it.
    pub async fn poll_once(&self, cursor: PollCursor) -> Result<PollCursor> {
        let updates = self
            .updates
            .get_updates(cursor.offset, self.timeout_secs)
            .await?;

        let mut next = cursor;
        for update in &updates {
            match self.handler.handle(update).await {
                Ok(Some(command)) => {
                    log::debug!("Handled {:?} from update {}", command, update.update_id)
                }
                Ok(None) => {}
                Err(e) => log::warn!("Failed to handle update {}: {}", update.update_id, e),
            }
            next.offset = next.offset.max(update.update_id + 1);
        }
        Ok(next)
    }

    /// Poll until shutdown is signalled.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<PollCursor> {
        let mut cursor = self.state.load_cursor().await?;
        log::info!("Command polling started at offset {}", cursor.offset);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                result = self.poll_once(cursor) => match result {
                    Ok(next) if next != cursor => {
                        if let Err(e) = self.state.save_cursor(next).await {
                            log::error!("Failed to persist poll cursor: {}", e);
                        }
                        cursor = next;
                    }
                    Ok(_) => {}
                    Err(e) => log::warn!("Polling for updates failed: {}", e),
                },
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        log::info!("Command polling stopped at offset {}", cursor.offset);
        Ok(cursor)
    }
}
