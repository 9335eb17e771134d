//! Pipeline entry points for the watcher.
//!
//! - `Orchestrator`: one fetch, parse, diff, notify, persist run
//! - `run_schedule`: recurring runs on a fixed interval
//! - `CommandPoller`: `/start` and `/stop` handling from inbound updates

pub mod diff;
pub mod poll;
pub mod run;
pub mod schedule;

pub use diff::{DiffResult, SeenState, calculate_diff};
pub use poll::CommandPoller;
pub use run::{Orchestrator, RunOutcome, RunReport, RunStage};
pub use schedule::run_schedule;
