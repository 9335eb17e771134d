// src/pipeline/schedule.rs

//! Recurring run trigger.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};

use crate::models::ScheduleConfig;
use crate::pipeline::run::Orchestrator;

/// Trigger a run every `interval_secs` until shutdown is signalled.
///
/// Ticks missed while a run is in flight are skipped, never queued up. An
/// in-flight run is allowed to settle before the loop exits. Returns the
/// number of runs executed.
pub async fn run_schedule(
    orchestrator: Arc<Orchestrator>,
    config: &ScheduleConfig,
    mut shutdown: watch::Receiver<bool>,
) -> usize {
    let period = Duration::from_secs(config.interval_secs.max(1));
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    if !config.run_on_start {
        // The first tick completes immediately.
        ticker.tick().await;
    }

    log::info!("Scheduler started, checking every {}s", period.as_secs());
    let mut runs = 0;

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = ticker.tick() => {
                if orchestrator.try_run().await.is_some() {
                    runs += 1;
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    log::info!("Scheduler stopped after {} run(s)", runs);
    runs
}
