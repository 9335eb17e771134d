// src/pipeline/run.rs

//! One watcher run: fetch, parse, diff, notify, persist.
//!
//! A run either completes or aborts at the stage that failed. Fetch and
//! parse failures leave all persisted state untouched; once diffing has
//! succeeded the new state is always persisted, however delivery went.
//!
//! The run status is written before the Seen-Set, so the Seen-Set is only
//! committed by a run that persisted everything else. A failed status
//! write aborts with the previous Seen-Set intact.
//!
//! Runs are serialized in-process by a mutex and across processes by the
//! storage directory's run lock.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::models::{Config, Subscriber};
use crate::pipeline::diff::{SeenState, calculate_diff};
use crate::services::{
    DeliveryReport, HttpPageSource, Messenger, Notifier, OfferExtractor, PageSource,
};
use crate::storage::{LocalStorage, RunLock, RunStatus, StateStore, SubscriberStore};

/// Poll interval while waiting on a run lock held by another process.
const LOCK_RETRY: Duration = Duration::from_millis(250);

/// Stage a run is in. `Idle` covers acquiring the run lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    Idle,
    Fetching,
    Parsing,
    Diffing,
    Notifying,
    Persisting,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStage::Idle => "idle",
            RunStage::Fetching => "fetching",
            RunStage::Parsing => "parsing",
            RunStage::Diffing => "diffing",
            RunStage::Notifying => "notifying",
            RunStage::Persisting => "persisting",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub enum RunOutcome {
    Completed,
    Aborted { stage: RunStage, error: AppError },
}

/// Summary of one run.
#[derive(Debug)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: RunOutcome,
    /// Offers extracted from the page
    pub offer_count: usize,
    /// Offers announced to subscribers
    pub new_offers: usize,
    /// Present when a notification was attempted
    pub delivery: Option<DeliveryReport>,
}

impl RunReport {
    fn started() -> Self {
        let now = Utc::now();
        Self {
            started_at: now,
            finished_at: now,
            outcome: RunOutcome::Completed,
            offer_count: 0,
            new_offers: 0,
            delivery: None,
        }
    }

    fn aborted(stage: RunStage, error: AppError) -> Self {
        log::error!("Run aborted while {}: {}", stage, error);
        Self {
            outcome: RunOutcome::Aborted { stage, error },
            ..Self::started()
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.outcome, RunOutcome::Completed)
    }

    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

type StageResult<T> = std::result::Result<T, (RunStage, AppError)>;

fn at(stage: RunStage) -> impl FnOnce(AppError) -> (RunStage, AppError) {
    move |error| (stage, error)
}

/// Drives runs and serializes them behind a single gate.
pub struct Orchestrator {
    source: Arc<dyn PageSource>,
    extractor: OfferExtractor,
    state: Arc<dyn StateStore>,
    subscribers: Arc<dyn SubscriberStore>,
    notifier: Notifier,
    gate: Mutex<()>,
    run_lock: Option<RunLock>,
}

impl Orchestrator {
    pub fn new(
        source: Arc<dyn PageSource>,
        extractor: OfferExtractor,
        state: Arc<dyn StateStore>,
        subscribers: Arc<dyn SubscriberStore>,
        notifier: Notifier,
    ) -> Self {
        Self {
            source,
            extractor,
            state,
            subscribers,
            notifier,
            gate: Mutex::new(()),
            run_lock: None,
        }
    }

    /// Also hold `run_lock` for the length of every run.
    pub fn with_run_lock(mut self, run_lock: RunLock) -> Self {
        self.run_lock = Some(run_lock);
        self
    }

    /// Wire the production components around local storage.
    pub fn from_config(
        config: &Config,
        storage: Arc<LocalStorage>,
        messenger: Arc<dyn Messenger>,
    ) -> Result<Self> {
        let source = HttpPageSource::from_config(&config.source)?;
        let extractor = OfferExtractor::from_config(config)?;
        let notifier = Notifier::new(messenger, storage.clone(), config);
        let run_lock = storage.run_lock();

        Ok(Self::new(
            Arc::new(source),
            extractor,
            storage.clone(),
            storage,
            notifier,
        )
        .with_run_lock(run_lock))
    }

    /// Execute one run, waiting for an in-flight run to finish first.
    pub async fn run_once(&self) -> RunReport {
        let _gate = self.gate.lock().await;
        match self.locked_execute(true).await {
            Some(report) => report,
            None => RunReport::aborted(
                RunStage::Idle,
                AppError::persistence("run.lock", "lock not acquired"),
            ),
        }
    }

    /// Execute one run unless another is in flight, here or in another
    /// process sharing the storage directory.
    pub async fn try_run(&self) -> Option<RunReport> {
        let Ok(_gate) = self.gate.try_lock() else {
            log::warn!("Previous run still in flight, skipping this tick");
            return None;
        };
        self.locked_execute(false).await
    }

    /// Run under the cross-process lock. `None` when the lock is held
    /// elsewhere and `wait` is false.
    async fn locked_execute(&self, wait: bool) -> Option<RunReport> {
        let Some(run_lock) = &self.run_lock else {
            return Some(self.execute().await);
        };
        let mut lock = match run_lock.open() {
            Ok(lock) => lock,
            Err(e) => return Some(RunReport::aborted(RunStage::Idle, e)),
        };

        let mut announced = false;
        let _guard = loop {
            let error = match lock.try_write() {
                Ok(guard) => break guard,
                Err(e) => e,
            };
            if error.kind() != io::ErrorKind::WouldBlock {
                return Some(RunReport::aborted(RunStage::Idle, run_lock.error(error)));
            }
            if !wait {
                log::warn!(
                    "Run lock {} held by another process, skipping this tick",
                    run_lock.path().display()
                );
                return None;
            }
            if !announced {
                log::info!(
                    "Waiting for run lock {} held by another process",
                    run_lock.path().display()
                );
                announced = true;
            }
            tokio::time::sleep(LOCK_RETRY).await;
        };

        Some(self.execute().await)
    }

    async fn execute(&self) -> RunReport {
        let mut report = RunReport::started();
        log::debug!("Run started at {}", report.started_at);

        if let Err((stage, error)) = self.run_stages(&mut report).await {
            log::error!("Run aborted while {}: {}", stage, error);
            report.outcome = RunOutcome::Aborted { stage, error };
        }

        report.finished_at = Utc::now();
        if report.is_completed() {
            log::info!(
                "Run completed in {}ms: {} offer(s) on page, {} new",
                report.duration_ms(),
                report.offer_count,
                report.new_offers
            );
        }
        report
    }

    async fn run_stages(&self, report: &mut RunReport) -> StageResult<()> {
        log::debug!("Fetching {}", self.source.url());
        let html = self.source.fetch().await.map_err(at(RunStage::Fetching))?;

        let offers = self.extractor.extract(&html).map_err(at(RunStage::Parsing))?;
        report.offer_count = offers.len();

        let seen = self
            .state
            .load_seen()
            .await
            .map(SeenState::from)
            .map_err(at(RunStage::Diffing))?;
        let previous = self
            .state
            .load_status()
            .await
            .map_err(at(RunStage::Diffing))?;

        if !seen.is_initialized() {
            log::info!(
                "No Seen-Set yet, recording {} offer(s) without notifying",
                offers.len()
            );
        }
        let diff = calculate_diff(&offers, &seen);
        report.new_offers = diff.to_notify.len();

        if diff.has_new() {
            let recipients = self.active_subscribers().await;
            report.delivery = Some(self.notifier.notify(&diff.to_notify, &recipients).await);
        }

        let status = RunStatus::new(!offers.is_empty());
        log_transition(previous.as_ref(), &status);
        self.state
            .save_status(&status)
            .await
            .map_err(at(RunStage::Persisting))?;
        self.state
            .save_seen(&diff.next_seen)
            .await
            .map_err(at(RunStage::Persisting))?;

        Ok(())
    }

    async fn active_subscribers(&self) -> Vec<Subscriber> {
        match self.subscribers.find_active().await {
            Ok(subscribers) => subscribers,
            Err(e) => {
                log::error!("Failed to load subscribers, skipping delivery: {}", e);
                Vec::new()
            }
        }
    }
}

fn log_transition(previous: Option<&RunStatus>, current: &RunStatus) {
    match (previous.map(|s| s.offers_present), current.offers_present) {
        (Some(false) | None, true) => log::info!("Offers are available on the page"),
        (Some(true), false) => log::info!("No offers on the page anymore"),
        (None, false) => log::info!("No offers on the page"),
        _ => log::debug!("Offer presence unchanged"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeliveryError;
    use crate::storage::PollCursor;
    use crate::test_support::{
        FetchGate, FixtureCard, RecordingMessenger, ScriptedSource, page_html,
    };
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct Harness {
        orchestrator: Orchestrator,
        messenger: Arc<RecordingMessenger>,
        storage: Arc<LocalStorage>,
    }

    async fn harness(tmp: &TempDir, source: ScriptedSource, messenger: RecordingMessenger) -> Harness {
        let config = Config::default();
        let storage = Arc::new(LocalStorage::new(tmp.path()));
        for id in ["100", "200"] {
            storage.upsert_active(Subscriber::new(id)).await.unwrap();
        }
        let messenger = Arc::new(messenger);
        let notifier = Notifier::new(messenger.clone(), storage.clone(), &config);
        let orchestrator = Orchestrator::new(
            Arc::new(source),
            OfferExtractor::from_config(&config).unwrap(),
            storage.clone(),
            storage.clone(),
            notifier,
        )
        .with_run_lock(storage.run_lock());
        Harness {
            orchestrator,
            messenger,
            storage,
        }
    }

    fn cards(range: std::ops::RangeInclusive<u32>) -> String {
        let cards: Vec<_> = range.map(FixtureCard::numbered).collect();
        page_html(&cards)
    }

    fn read(tmp: &TempDir, key: &str) -> Option<String> {
        std::fs::read_to_string(tmp.path().join(key)).ok()
    }

    #[tokio::test]
    async fn test_first_run_records_without_notifying() {
        let tmp = TempDir::new().unwrap();
        let source = ScriptedSource::default().then_page(cards(1..=3));
        let h = harness(&tmp, source, RecordingMessenger::default()).await;

        let report = h.orchestrator.run_once().await;
        assert!(report.is_completed());
        assert_eq!(report.offer_count, 3);
        assert_eq!(report.new_offers, 0);
        assert!(report.delivery.is_none());
        assert!(h.messenger.sent().is_empty());

        assert_eq!(h.storage.load_seen().await.unwrap().unwrap().len(), 3);
        assert!(h.storage.load_status().await.unwrap().unwrap().offers_present);
    }

    #[tokio::test]
    async fn test_second_run_announces_only_the_new_offer() {
        let tmp = TempDir::new().unwrap();
        let source = ScriptedSource::default()
            .then_page(cards(1..=3))
            .then_page(cards(1..=4));
        let h = harness(&tmp, source, RecordingMessenger::default()).await;

        h.orchestrator.run_once().await;
        let report = h.orchestrator.run_once().await;

        assert!(report.is_completed());
        assert_eq!(report.new_offers, 1);
        let delivery = report.delivery.unwrap();
        assert_eq!(delivery.delivered, 2);

        let sent = h.messenger.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].1.text.contains("Apartment 4"));
        assert!(!sent[0].1.text.contains("Apartment 3"));
        assert_eq!(h.storage.load_seen().await.unwrap().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_fetch_failure_leaves_state_untouched() {
        let tmp = TempDir::new().unwrap();
        let source = ScriptedSource::default()
            .then_page(cards(1..=2))
            .then_status(500);
        let h = harness(&tmp, source, RecordingMessenger::default()).await;

        h.orchestrator.run_once().await;
        let seen_before = read(&tmp, "last_offers.json");
        let status_before = read(&tmp, "last_status.json");

        let report = h.orchestrator.run_once().await;
        assert!(matches!(
            report.outcome,
            RunOutcome::Aborted {
                stage: RunStage::Fetching,
                error: AppError::Fetch { .. }
            }
        ));
        assert_eq!(read(&tmp, "last_offers.json"), seen_before);
        assert_eq!(read(&tmp, "last_status.json"), status_before);
    }

    #[tokio::test]
    async fn test_missing_container_is_a_zero_offer_run() {
        let tmp = TempDir::new().unwrap();
        let source = ScriptedSource::default()
            .then_page(cards(1..=2))
            .then_page("<html><body><p>Maintenance</p></body></html>");
        let h = harness(&tmp, source, RecordingMessenger::default()).await;

        h.orchestrator.run_once().await;
        let report = h.orchestrator.run_once().await;

        assert!(report.is_completed());
        assert_eq!(report.offer_count, 0);
        assert_eq!(h.storage.load_seen().await.unwrap(), Some(Vec::new()));
        assert!(!h.storage.load_status().await.unwrap().unwrap().offers_present);
    }

    #[tokio::test]
    async fn test_blank_body_aborts_while_parsing() {
        let tmp = TempDir::new().unwrap();
        let source = ScriptedSource::default().then_page("   ");
        let h = harness(&tmp, source, RecordingMessenger::default()).await;

        let report = h.orchestrator.run_once().await;
        assert!(matches!(
            report.outcome,
            RunOutcome::Aborted {
                stage: RunStage::Parsing,
                ..
            }
        ));
        assert!(read(&tmp, "last_offers.json").is_none());
    }

    #[tokio::test]
    async fn test_corrupt_seen_set_aborts_before_notifying() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("last_offers.json"), "[oops").unwrap();
        let source = ScriptedSource::default().then_page(cards(1..=2));
        let h = harness(&tmp, source, RecordingMessenger::default()).await;

        let report = h.orchestrator.run_once().await;
        assert!(matches!(
            report.outcome,
            RunOutcome::Aborted {
                stage: RunStage::Diffing,
                error: AppError::Persistence { .. }
            }
        ));
        assert!(h.messenger.sent().is_empty());
        assert!(read(&tmp, "last_status.json").is_none());
    }

    #[tokio::test]
    async fn test_delivery_failures_still_persist() {
        let tmp = TempDir::new().unwrap();
        let source = ScriptedSource::default()
            .then_page(cards(1..=1))
            .then_page(cards(1..=2));
        let messenger = RecordingMessenger::default()
            .fail_for("100", DeliveryError::from_response(403, "Forbidden: bot was blocked by the user"))
            .fail_for("200", DeliveryError::Transient("Too Many Requests".into()));
        let h = harness(&tmp, source, messenger).await;

        h.orchestrator.run_once().await;
        let report = h.orchestrator.run_once().await;

        assert!(report.is_completed());
        let delivery = report.delivery.unwrap();
        assert_eq!(delivery.deactivated, vec!["100"]);
        assert_eq!(delivery.transient_failures, vec!["200"]);
        assert_eq!(h.storage.load_seen().await.unwrap().unwrap().len(), 2);

        let active = h.storage.find_active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].chat_id, "200");
    }

    #[tokio::test]
    async fn test_try_run_skips_while_a_run_is_in_flight() {
        let tmp = TempDir::new().unwrap();
        let source = ScriptedSource::default().then_page(cards(1..=1));
        let h = harness(&tmp, source, RecordingMessenger::default()).await;

        let held = h.orchestrator.gate.lock().await;
        assert!(h.orchestrator.try_run().await.is_none());
        drop(held);

        let report = h.orchestrator.try_run().await.unwrap();
        assert!(report.is_completed());
    }

    fn assert_send<T: Send>(_: T) {}

    #[tokio::test]
    async fn test_run_futures_are_send() {
        let tmp = TempDir::new().unwrap();
        let h = harness(&tmp, ScriptedSource::default(), RecordingMessenger::default()).await;

        assert_send(h.orchestrator.run_once());
        assert_send(h.orchestrator.try_run());
    }

    #[tokio::test]
    async fn test_run_lock_serializes_orchestrators_on_one_directory() {
        let tmp = TempDir::new().unwrap();
        let gate = Arc::new(FetchGate::default());
        let first = Arc::new(
            harness(
                &tmp,
                ScriptedSource::default()
                    .then_page(cards(1..=2))
                    .gated(gate.clone()),
                RecordingMessenger::default(),
            )
            .await,
        );
        let second = Arc::new(
            harness(
                &tmp,
                ScriptedSource::default().then_page(cards(1..=3)),
                RecordingMessenger::default(),
            )
            .await,
        );

        let in_flight = {
            let first = first.clone();
            tokio::spawn(async move { first.orchestrator.run_once().await })
        };
        gate.started.notified().await;

        // Different orchestrator, same directory: the file lock decides.
        assert!(second.orchestrator.try_run().await.is_none());

        let waiting = {
            let second = second.clone();
            tokio::spawn(async move { second.orchestrator.run_once().await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!waiting.is_finished());

        gate.release.notify_one();
        let first_report = in_flight.await.unwrap();
        assert!(first_report.is_completed());
        assert_eq!(first_report.offer_count, 2);

        let second_report = waiting.await.unwrap();
        assert!(second_report.is_completed());
        assert_eq!(second_report.new_offers, 1);
        assert_eq!(seen_count(&second).await, 3);
    }

    async fn seen_count(h: &Harness) -> usize {
        h.storage.load_seen().await.unwrap().map_or(0, |ids| ids.len())
    }

    #[tokio::test]
    async fn test_unusable_run_lock_aborts_while_idle() {
        let tmp = TempDir::new().unwrap();
        // A directory where the lock file should be cannot be opened for writing.
        std::fs::create_dir_all(tmp.path().join("run.lock")).unwrap();
        let h = harness(
            &tmp,
            ScriptedSource::default().then_page(cards(1..=1)),
            RecordingMessenger::default(),
        )
        .await;

        let report = h.orchestrator.run_once().await;
        assert!(matches!(
            report.outcome,
            RunOutcome::Aborted {
                stage: RunStage::Idle,
                error: AppError::Persistence { .. }
            }
        ));
        assert!(read(&tmp, "last_offers.json").is_none());
    }

    /// Delegates to local storage but refuses to write the run status.
    struct StatusWriteFails(Arc<LocalStorage>);

    #[async_trait]
    impl StateStore for StatusWriteFails {
        async fn load_seen(&self) -> Result<Option<Vec<String>>> {
            self.0.load_seen().await
        }

        async fn save_seen(&self, ids: &[String]) -> Result<()> {
            self.0.save_seen(ids).await
        }

        async fn load_status(&self) -> Result<Option<RunStatus>> {
            self.0.load_status().await
        }

        async fn save_status(&self, _status: &RunStatus) -> Result<()> {
            Err(AppError::persistence("last_status.json", "disk full"))
        }

        async fn load_cursor(&self) -> Result<PollCursor> {
            self.0.load_cursor().await
        }

        async fn save_cursor(&self, cursor: PollCursor) -> Result<()> {
            self.0.save_cursor(cursor).await
        }
    }

    #[tokio::test]
    async fn test_failed_status_write_keeps_previous_seen_set() {
        let tmp = TempDir::new().unwrap();
        let h = harness(
            &tmp,
            ScriptedSource::default().then_page(cards(1..=1)),
            RecordingMessenger::default(),
        )
        .await;
        h.orchestrator.run_once().await;
        let seen_before = read(&tmp, "last_offers.json");
        assert!(seen_before.is_some());

        let config = Config::default();
        let notifier = Notifier::new(h.messenger.clone(), h.storage.clone(), &config);
        let failing = Orchestrator::new(
            Arc::new(ScriptedSource::default().then_page(cards(1..=2))),
            OfferExtractor::from_config(&config).unwrap(),
            Arc::new(StatusWriteFails(h.storage.clone())),
            h.storage.clone(),
            notifier,
        );

        let report = failing.run_once().await;
        assert!(matches!(
            report.outcome,
            RunOutcome::Aborted {
                stage: RunStage::Persisting,
                error: AppError::Persistence { .. }
            }
        ));
        assert_eq!(read(&tmp, "last_offers.json"), seen_before);
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(RunStage::Fetching.to_string(), "fetching");
        assert_eq!(RunStage::Persisting.to_string(), "persisting");
        assert_eq!(RunStage::Idle.to_string(), "idle");
    }
}
