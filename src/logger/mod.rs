//! Run logging: JSONL writer with graceful degradation plus a threaded event handle.

pub mod jsonl;
pub mod run_log;

pub use run_log::{EventLog, RunEvent, spawn_run_logger};
