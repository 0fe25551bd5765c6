//! Run-event logging: a dedicated logger thread owns the [`JsonlWriter`];
//! scenarios, the provider and the runner send [`RunEvent`]s through a
//! bounded crossbeam channel via a cloneable [`EventLog`] handle.
//!
//! Sending never blocks. When the channel is full the event is dropped and
//! counted; the count is reported in the log on the next write.

#![allow(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::errors::{HarnessError, Result};
use crate::logger::jsonl::{EventType, JsonlWriter, LogEntry, Severity};

const CHANNEL_CAPACITY: usize = 1024;

/// Events emitted during a certification run.
#[derive(Debug, Clone)]
pub enum RunEvent {
    RunStarted {
        seed: u64,
        scale: String,
        config_hash: String,
        scenarios: Vec<String>,
    },
    ScenarioStarted {
        scenario: String,
    },
    PhaseEntered {
        scenario: String,
        state: String,
    },
    ScenarioFinished {
        scenario: String,
        state: String,
        duration_ms: u64,
        error_code: Option<String>,
        error_message: Option<String>,
    },
    ProviderRetry {
        operation: String,
        attempt: u32,
        delay_ms: u64,
        details: String,
    },
    GateFailed {
        gate: String,
        observed: Option<f64>,
    },
    RunCompleted {
        score: f64,
        pass: bool,
        duration_ms: u64,
    },
    Error {
        code: String,
        message: String,
    },
    /// Sentinel asking the logger thread to flush and exit.
    Shutdown,
}

impl RunEvent {
    /// Build an error event from a harness error.
    pub fn from_error(err: &HarnessError) -> Self {
        Self::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Cheaply cloneable handle for sending run events.
///
/// A disabled handle drops everything, so code paths never need to check
/// whether logging is configured.
#[derive(Clone, Default)]
pub struct EventLog {
    tx: Option<Sender<RunEvent>>,
    dropped_events: Arc<AtomicU64>,
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog")
            .field("enabled", &self.is_enabled())
            .field("dropped_events", &self.dropped_events())
            .finish()
    }
}

impl EventLog {
    /// Handle that discards every event.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Send an event to the logger thread. Non-blocking.
    pub fn send(&self, event: RunEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        if let Err(TrySendError::Full(_)) = tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Number of events dropped due to back-pressure.
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Request graceful shutdown. Pair with joining the logger thread.
    pub fn shutdown(&self) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(RunEvent::Shutdown);
        }
    }
}

/// Spawn the logger thread writing to `path`.
pub fn spawn_run_logger(path: PathBuf) -> Result<(EventLog, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<RunEvent>(CHANNEL_CAPACITY);
    let dropped = Arc::new(AtomicU64::new(0));
    let dropped_clone = Arc::clone(&dropped);

    let handle = EventLog {
        tx: Some(tx),
        dropped_events: dropped,
    };

    let join = thread::Builder::new()
        .name("ech-logger".to_string())
        .spawn(move || logger_thread_main(&rx, path, &dropped_clone))
        .map_err(|e| HarnessError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((handle, join))
}

fn logger_thread_main(rx: &Receiver<RunEvent>, path: PathBuf, dropped: &AtomicU64) {
    let mut jsonl = JsonlWriter::open(path);

    while let Ok(event) = rx.recv() {
        let d = dropped.swap(0, Ordering::Relaxed);
        if d > 0 {
            let warn = LogEntry::new(EventType::Error, Severity::Warning)
                .details(format!("{d} log events dropped due to back-pressure"));
            jsonl.write_entry(&warn);
        }

        if matches!(event, RunEvent::Shutdown) {
            break;
        }
        jsonl.write_entry(&event_to_log_entry(&event));
    }

    jsonl.flush();
}

fn event_to_log_entry(event: &RunEvent) -> LogEntry {
    match event {
        RunEvent::RunStarted {
            seed,
            scale,
            config_hash,
            scenarios,
        } => {
            let mut e = LogEntry::new(EventType::RunStart, Severity::Info);
            e.seed = Some(*seed);
            e.scale = Some(scale.clone());
            e.details = Some(format!(
                "config_hash={config_hash} scenarios={}",
                scenarios.join(",")
            ));
            e
        }
        RunEvent::ScenarioStarted { scenario } => {
            LogEntry::new(EventType::ScenarioStart, Severity::Info).scenario(scenario.clone())
        }
        RunEvent::PhaseEntered { scenario, state } => {
            let mut e =
                LogEntry::new(EventType::ScenarioPhase, Severity::Info).scenario(scenario.clone());
            e.state = Some(state.clone());
            e
        }
        RunEvent::ScenarioFinished {
            scenario,
            state,
            duration_ms,
            error_code,
            error_message,
        } => {
            let severity = if error_code.is_some() {
                Severity::Warning
            } else {
                Severity::Info
            };
            let mut e = LogEntry::new(EventType::ScenarioEnd, severity).scenario(scenario.clone());
            e.state = Some(state.clone());
            e.duration_ms = Some(*duration_ms);
            e.ok = Some(error_code.is_none());
            e.error_code.clone_from(error_code);
            e.error_message.clone_from(error_message);
            e
        }
        RunEvent::ProviderRetry {
            operation,
            attempt,
            delay_ms,
            details,
        } => {
            let mut e = LogEntry::new(EventType::ProviderRetry, Severity::Warning);
            e.attempt = Some(*attempt);
            e.duration_ms = Some(*delay_ms);
            e.details = Some(format!("{operation}: {details}"));
            e
        }
        RunEvent::GateFailed { gate, observed } => {
            let mut e = LogEntry::new(EventType::GateFailure, Severity::Critical);
            e.gate = Some(gate.clone());
            e.observed = *observed;
            e.ok = Some(false);
            e
        }
        RunEvent::RunCompleted {
            score,
            pass,
            duration_ms,
        } => {
            let mut e = LogEntry::new(EventType::RunComplete, Severity::Info);
            e.score = Some(*score);
            e.ok = Some(*pass);
            e.duration_ms = Some(*duration_ms);
            e
        }
        RunEvent::Error { code, message } => {
            let mut e = LogEntry::new(EventType::Error, Severity::Critical);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e.ok = Some(false);
            e
        }
        RunEvent::Shutdown => LogEntry::new(EventType::RunComplete, Severity::Info),
    }
}
