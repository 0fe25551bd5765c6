//! Scenario contract, its state machine and the built-in scenarios.
//!
//! A scenario materializes generator fixtures into the engine (`setup`),
//! issues the operations under test (`execute`), compares what it saw with
//! ground truth (`verify`) and releases what it created (`teardown`).
//! `verify` gets no engine access at all, so it cannot mutate the engine.
//!
//! [`drive`] runs the first three phases on a worker thread and waits at
//! most the scenario budget for them. A run stuck in an engine or provider
//! call is abandoned: it is reported as timed out and its namespaces are
//! released from the driver's side.

pub mod atomicity;
pub mod context;
pub mod context_budget;
pub mod crash_recovery;
pub mod graph;
pub mod isolation;
pub mod ledger;
pub mod policy;
pub mod ranking;
pub mod registry;
pub mod runner;
pub mod semantic_cache;
pub mod temporal;

use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{self as channel, RecvTimeoutError, SendError, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::config::ScaleParams;
use crate::core::errors::{HarnessError, Result};
use crate::generator::SyntheticGenerator;
use crate::logger::{EventLog, RunEvent};
use crate::metrics::{MetricsSnapshot, RecorderPhase, ScenarioMetrics};

pub use context::{Deadline, OwnedNamespaces, RunEnv, ScenarioContext};
pub use registry::ScenarioRegistry;
pub use runner::run_scenarios;

/// How long past its budget a run may take to notice the deadline itself
/// before the driver abandons it.
pub const ABANDON_GRACE: Duration = Duration::from_millis(250);

/// Lifecycle of one scenario run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioState {
    /// Not started.
    Created,
    /// Loading fixtures.
    Setup,
    /// Issuing the operations under test.
    Executing,
    /// Comparing results with ground truth.
    Verifying,
    /// Verified with every gate counter at zero.
    Passed,
    /// Verified, but a gate counter is non-zero.
    Failed,
    /// A phase returned an error, panicked or timed out.
    Errored,
    /// Teardown ran; always the last state.
    TornDown,
}

impl ScenarioState {
    /// Snake-case name used in reports and events.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Setup => "setup",
            Self::Executing => "executing",
            Self::Verifying => "verifying",
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Errored => "errored",
            Self::TornDown => "torn_down",
        }
    }

    /// Outcome states, before teardown.
    #[must_use]
    pub const fn is_outcome(self) -> bool {
        matches!(self, Self::Passed | Self::Failed | Self::Errored)
    }

    /// Legal transitions of the lifecycle.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Setup)
                | (Self::Setup, Self::Executing)
                | (Self::Executing, Self::Verifying)
                | (Self::Verifying, Self::Passed | Self::Failed)
                | (
                    Self::Created | Self::Setup | Self::Executing | Self::Verifying,
                    Self::Errored
                )
                | (Self::Passed | Self::Failed | Self::Errored, Self::TornDown)
        )
    }
}

impl fmt::Display for ScenarioState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Error captured at the scenario boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioError {
    /// Stable `ECH-xxxx` code.
    pub code: String,
    /// Rendered error message.
    pub message: String,
}

impl From<&HarnessError> for ScenarioError {
    fn from(err: &HarnessError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// What one scenario run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioReport {
    /// Scenario id.
    pub id: String,
    /// Outcome state (passed, failed or errored).
    pub state: ScenarioState,
    /// Every state the run went through, ending in `torn_down`.
    pub trace: Vec<ScenarioState>,
    /// Wall time of the whole lifecycle.
    pub duration_ms: u64,
    /// Set when the run errored.
    pub error: Option<ScenarioError>,
    /// Everything the recorder collected.
    pub metrics: MetricsSnapshot,
}

impl ScenarioReport {
    /// Whether the outcome was [`ScenarioState::Passed`].
    #[must_use]
    pub fn passed(&self) -> bool {
        self.state == ScenarioState::Passed
    }
}

/// The polymorphic scenario contract.
pub trait Scenario: Send {
    /// Ground truth built from the generator.
    type Fixtures;
    /// Handles and inputs prepared by `setup` for `execute`.
    type WorkingSet;
    /// What `execute` observed, handed to `verify`.
    type RawResults;

    /// Stable id used on the command line and in reports.
    fn id(&self) -> &'static str;
    /// One-line summary for `ech list`.
    fn description(&self) -> &'static str;

    /// Whether this scenario only touches its own namespaces and may run
    /// alongside others.
    fn parallel_safe(&self) -> bool {
        false
    }

    /// Build this scenario's ground truth. Pure: no engine access.
    fn fixtures(&self, generator: &SyntheticGenerator, scale: &ScaleParams)
    -> Result<Self::Fixtures>;

    /// Load fixtures into the engine.
    fn setup(&mut self, ctx: &mut ScenarioContext, fixtures: &Self::Fixtures)
    -> Result<Self::WorkingSet>;

    /// Issue the operations under test.
    fn execute(
        &mut self,
        ctx: &mut ScenarioContext,
        working_set: &Self::WorkingSet,
    ) -> Result<Self::RawResults>;

    /// Compare results with ground truth and record metrics.
    fn verify(
        &self,
        raw: &Self::RawResults,
        fixtures: &Self::Fixtures,
        metrics: &mut ScenarioMetrics,
    ) -> Result<()>;

    /// Release what the run created. Runs whatever the outcome.
    fn teardown(&mut self, ctx: &mut ScenarioContext) -> Result<()> {
        ctx.release_namespaces()
    }
}

/// Object-safe face of [`Scenario`] used by the registry and runner.
pub trait DynScenario: Send {
    /// See [`Scenario::id`].
    fn id(&self) -> &'static str;
    /// See [`Scenario::description`].
    fn description(&self) -> &'static str;
    /// See [`Scenario::parallel_safe`].
    fn parallel_safe(&self) -> bool;
    /// Drive the scenario through its lifecycle.
    fn run(self: Box<Self>, env: &RunEnv) -> ScenarioReport;
}

impl<S: Scenario + 'static> DynScenario for S {
    fn id(&self) -> &'static str {
        Scenario::id(self)
    }

    fn description(&self) -> &'static str {
        Scenario::description(self)
    }

    fn parallel_safe(&self) -> bool {
        Scenario::parallel_safe(self)
    }

    fn run(self: Box<Self>, env: &RunEnv) -> ScenarioReport {
        drive(*self, env)
    }
}

/// Records the state trace and mirrors every transition to the run log.
///
/// Clones share the trace. [`Tracker::detach`] moves it out, after which
/// the other clones stop recording.
#[derive(Clone)]
struct Tracker {
    scenario: &'static str,
    log: EventLog,
    trace: Arc<Mutex<Option<Vec<ScenarioState>>>>,
}

impl Tracker {
    fn new(scenario: &'static str, log: EventLog) -> Self {
        Self {
            scenario,
            log,
            trace: Arc::new(Mutex::new(Some(vec![ScenarioState::Created]))),
        }
    }

    fn enter(&self, next: ScenarioState) {
        let mut guard = self.trace.lock();
        let Some(trace) = guard.as_mut() else {
            return;
        };
        let current = trace.last().copied().unwrap_or(ScenarioState::Created);
        debug_assert!(current.can_transition_to(next), "{current} -> {next}");
        trace.push(next);
        self.log.send(RunEvent::PhaseEntered {
            scenario: self.scenario.to_string(),
            state: next.as_str().to_string(),
        });
    }

    fn detach(&self) -> Self {
        let trace = self
            .trace
            .lock()
            .take()
            .unwrap_or_else(|| vec![ScenarioState::Created]);
        Self {
            scenario: self.scenario,
            log: self.log.clone(),
            trace: Arc::new(Mutex::new(Some(trace))),
        }
    }

    fn into_trace(self) -> Vec<ScenarioState> {
        self.trace.lock().take().unwrap_or_default()
    }
}

/// What the worker hands back once the phases are over.
type Finished<S> = (S, ScenarioContext, Result<()>);

/// Run one scenario through its full lifecycle. Never panics and never
/// returns an error: faults become an `Errored` report.
///
/// Setup, execute and verify run on a worker thread. When they are not done
/// within the budget plus [`ABANDON_GRACE`], the run is reported as timed
/// out, its namespaces are dropped and the worker is left to finish on its
/// own; the scenario's own `teardown` then runs on the worker.
pub fn drive<S: Scenario + 'static>(scenario: S, env: &RunEnv) -> ScenarioReport {
    let started = Instant::now();
    let id = Scenario::id(&scenario);
    env.log.send(RunEvent::ScenarioStarted {
        scenario: id.to_string(),
    });

    let ctx = ScenarioContext::new(id, env.clone());
    let deadline = *ctx.deadline();
    let namespaces = ctx.namespaces();
    let tracker = Tracker::new(id, env.log.clone());

    let (tx, rx) = channel::bounded::<Finished<S>>(1);
    let worker_tracker = tracker.clone();
    let spawned = thread::Builder::new()
        .name(format!("ech-{id}"))
        .spawn(move || run_worker(scenario, ctx, &worker_tracker, &tx));

    let joined = match spawned {
        Ok(_) => rx
            .recv_timeout(deadline.remaining().saturating_add(ABANDON_GRACE))
            .map_err(|err| match err {
                RecvTimeoutError::Timeout => deadline.timeout_error(id),
                RecvTimeoutError::Disconnected => HarnessError::Runtime {
                    details: format!("worker for {id} exited without a result"),
                },
            }),
        Err(err) => Err(HarnessError::Runtime {
            details: format!("could not start worker for {id}: {err}"),
        }),
    };

    let (state, error, metrics, tracker) = match joined {
        Ok((mut scenario, mut ctx, outcome)) => {
            let (state, error) = conclude(&mut scenario, &mut ctx, outcome, &tracker, env);
            (state, error, ctx.take_metrics(), tracker)
        }
        Err(err) => {
            let tracker = tracker.detach();
            let (state, error, metrics) = abandon(id, &err, &namespaces, &tracker, env);
            (state, error, metrics, tracker)
        }
    };

    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    env.log.send(RunEvent::ScenarioFinished {
        scenario: id.to_string(),
        state: state.as_str().to_string(),
        duration_ms,
        error_code: error.as_ref().map(|e| e.code.clone()),
        error_message: error.as_ref().map(|e| e.message.clone()),
    });

    ScenarioReport {
        id: id.to_string(),
        state,
        trace: tracker.into_trace(),
        duration_ms,
        error,
        metrics: metrics.freeze(),
    }
}

fn run_worker<S: Scenario>(
    mut scenario: S,
    mut ctx: ScenarioContext,
    tracker: &Tracker,
    tx: &Sender<Finished<S>>,
) {
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        run_phases(&mut scenario, &mut ctx, tracker)
    }))
    .unwrap_or_else(|panic| Err(panic_error(&*panic)));

    if let Err(SendError((mut scenario, mut ctx, _))) = tx.send((scenario, ctx, outcome)) {
        // The driver already gave up on this run.
        let _ = catch_unwind(AssertUnwindSafe(|| scenario.teardown(&mut ctx)));
    }
}

fn run_phases<S: Scenario>(
    scenario: &mut S,
    ctx: &mut ScenarioContext,
    tracker: &Tracker,
) -> Result<()> {
    tracker.enter(ScenarioState::Setup);
    ctx.metrics().set_phase(RecorderPhase::Setup);
    let fixtures = scenario.fixtures(ctx.generator(), ctx.scale())?;
    let working_set = scenario.setup(ctx, &fixtures)?;
    ctx.check_deadline()?;

    tracker.enter(ScenarioState::Executing);
    ctx.metrics().set_phase(RecorderPhase::Executing);
    let raw = scenario.execute(ctx, &working_set)?;
    ctx.check_deadline()?;

    tracker.enter(ScenarioState::Verifying);
    ctx.metrics().set_phase(RecorderPhase::Verifying);
    scenario.verify(&raw, &fixtures, ctx.metrics())?;
    ctx.check_deadline()
}

fn panic_error(panic: &(dyn Any + Send)) -> HarnessError {
    let details = panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "scenario panicked".to_string());
    HarnessError::Runtime { details }
}

/// Outcome and teardown for a run whose phases returned.
fn conclude<S: Scenario>(
    scenario: &mut S,
    ctx: &mut ScenarioContext,
    outcome: Result<()>,
    tracker: &Tracker,
    env: &RunEnv,
) -> (ScenarioState, Option<ScenarioError>) {
    let (state, error) = match outcome {
        Ok(()) => {
            let violations = scenario_gate_violations(ctx);
            let state = if violations.is_empty() {
                ScenarioState::Passed
            } else {
                ctx.metrics().note(format!("gate violations: {}", violations.join(", ")));
                ScenarioState::Failed
            };
            (state, None)
        }
        Err(err) => {
            ctx.metrics().note(err.to_string());
            env.log.send(RunEvent::from_error(&err));
            (ScenarioState::Errored, Some(ScenarioError::from(&err)))
        }
    };
    tracker.enter(state);

    let teardown = catch_unwind(AssertUnwindSafe(|| scenario.teardown(ctx)));
    match teardown {
        Ok(Ok(())) => {}
        Ok(Err(err)) => ctx.metrics().note(format!("teardown: {err}")),
        Err(_) => ctx.metrics().note("teardown panicked"),
    }
    tracker.enter(ScenarioState::TornDown);
    (state, error)
}

/// Outcome and teardown for a run the driver stopped waiting for. Whatever
/// the worker recorded stays with the worker.
fn abandon(
    id: &'static str,
    err: &HarnessError,
    namespaces: &OwnedNamespaces,
    tracker: &Tracker,
    env: &RunEnv,
) -> (ScenarioState, Option<ScenarioError>, ScenarioMetrics) {
    let mut metrics = ScenarioMetrics::new(id);
    metrics.note(err.to_string());
    metrics.note("run abandoned; measurements taken before the cutoff are not reported");
    env.log.send(RunEvent::from_error(err));
    tracker.enter(ScenarioState::Errored);

    if let Err(teardown) = namespaces.release() {
        metrics.note(format!("teardown: {teardown}"));
    }
    tracker.enter(ScenarioState::TornDown);
    (ScenarioState::Errored, Some(ScenarioError::from(err)), metrics)
}

/// Hard-gate counters that must stay at zero inside any single scenario.
pub const GATE_COUNTERS: &[&str] = &[
    "leakage_count",
    "atomicity_failures",
    "double_post_count",
    "time_travel_mismatches",
    "crash_consistency_violations",
    "schema_validation_failures",
];

fn scenario_gate_violations(ctx: &ScenarioContext) -> Vec<String> {
    GATE_COUNTERS
        .iter()
        .filter_map(|name| {
            ctx.counter(name)
                .filter(|v| *v > 0)
                .map(|v| format!("{name}={v}"))
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;
    use std::time::Duration;

    use super::RunEnv;
    use crate::core::config::{GeneratorConfig, ProviderConfig, Scale, Thresholds};
    use crate::engine::{MemoryEngine, TargetEngine};
    use crate::generator::SyntheticGenerator;
    use crate::logger::EventLog;
    use crate::provider::{DeterministicProvider, RetryPolicy, RetryingProvider};

    pub(crate) fn test_env(budget: Duration) -> RunEnv {
        env_with_engine(Arc::new(MemoryEngine::new()), budget)
    }

    pub(crate) fn env_with_engine(engine: Arc<dyn TargetEngine>, budget: Duration) -> RunEnv {
        let generator = SyntheticGenerator::new(
            7,
            &GeneratorConfig {
                topic_count: 40,
                embedding_dim: 32,
                ..GeneratorConfig::default()
            },
        )
        .unwrap();
        RunEnv {
            seed: 7,
            engine,
            provider: RetryingProvider::new(
                Arc::new(DeterministicProvider::new(7, 32)),
                RetryPolicy::from(&ProviderConfig::default()),
                EventLog::disabled(),
            ),
            generator: Arc::new(generator),
            scale: Scale::Small.params(),
            thresholds: Thresholds::default(),
            budget,
            log: EventLog::disabled(),
        }
    }
}
