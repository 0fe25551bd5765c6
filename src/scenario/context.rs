//! Everything a scenario run may touch, bundled per run.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::core::config::{ScaleParams, Thresholds};
use crate::core::errors::{HarnessError, Result};
use crate::engine::{EngineError, EngineResult, NamespaceHandle, TargetEngine};
use crate::generator::SyntheticGenerator;
use crate::logger::EventLog;
use crate::metrics::ScenarioMetrics;
use crate::provider::RetryingProvider;

/// Wall-clock budget for one scenario.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    budget: Duration,
}

impl Deadline {
    /// Start the clock now.
    #[must_use]
    pub fn new(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    /// Time since the clock started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Budget left, zero once spent.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.elapsed())
    }

    /// Whether the budget is spent.
    #[must_use]
    pub fn expired(&self) -> bool {
        self.elapsed() >= self.budget
    }

    /// The full budget.
    #[must_use]
    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// `ScenarioTimeout` once the budget is spent.
    pub fn check(&self, scenario: &str) -> Result<()> {
        if self.expired() {
            return Err(self.timeout_error(scenario));
        }
        Ok(())
    }

    /// The error reported when `scenario` runs past this budget.
    #[must_use]
    pub fn timeout_error(&self, scenario: &str) -> HarnessError {
        HarnessError::ScenarioTimeout {
            scenario: scenario.to_string(),
            budget_ms: u64::try_from(self.budget.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// Namespaces one run created. Clones share the same list, so the driver
/// can release them while the run itself is stuck in an engine call.
#[derive(Debug, Clone, Default)]
pub struct OwnedNamespaces(Arc<Mutex<Vec<NamespaceHandle>>>);

impl OwnedNamespaces {
    fn push(&self, handle: NamespaceHandle) {
        self.0.lock().push(handle);
    }

    /// Names still held, in creation order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.0
            .lock()
            .iter()
            .map(|h| h.namespace().to_string())
            .collect()
    }

    /// Drop every namespace still held. Keeps going past failures and
    /// reports the first one; a namespace already gone is not a failure.
    pub fn release(&self) -> Result<()> {
        let handles = std::mem::take(&mut *self.0.lock());
        let mut first_err = None;
        for handle in handles {
            match handle.drop_namespace() {
                Ok(())
                | Err(HarnessError::TargetEngine {
                    source: EngineError::NamespaceNotFound { .. },
                    ..
                }) => {}
                Err(err) => {
                    if first_err.is_none() {
                        first_err = Some(err);
                    }
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

/// Shared, read-only inputs every scenario run receives.
#[derive(Clone)]
pub struct RunEnv {
    /// Run seed; also part of every namespace name.
    pub seed: u64,
    /// Engine under test.
    pub engine: Arc<dyn TargetEngine>,
    /// Provider behind the retry policy.
    pub provider: RetryingProvider,
    /// Fixture source shared by every scenario.
    pub generator: Arc<SyntheticGenerator>,
    /// Sizes for the configured scale.
    pub scale: ScaleParams,
    /// Quality thresholds, for scenarios that report against them.
    pub thresholds: Thresholds,
    /// Wall-clock budget of each scenario.
    pub budget: Duration,
    /// Structured event sink.
    pub log: EventLog,
}

impl std::fmt::Debug for RunEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunEnv")
            .field("seed", &self.seed)
            .field("engine", &self.engine.name())
            .field("provider", &self.provider)
            .field("scale", &self.scale)
            .field("budget", &self.budget)
            .finish_non_exhaustive()
    }
}

/// Per-run view handed to `setup`, `execute` and `teardown`.
///
/// Owns the scenario's recorder and remembers the namespaces it created so
/// teardown can release them even after a failure.
#[derive(Debug)]
pub struct ScenarioContext {
    scenario: &'static str,
    env: RunEnv,
    deadline: Deadline,
    metrics: ScenarioMetrics,
    namespaces: OwnedNamespaces,
}

impl ScenarioContext {
    /// Fresh context for `scenario`; its deadline starts now.
    #[must_use]
    pub fn new(scenario: &'static str, env: RunEnv) -> Self {
        let deadline = Deadline::new(env.budget);
        Self {
            scenario,
            env,
            deadline,
            metrics: ScenarioMetrics::new(scenario),
            namespaces: OwnedNamespaces::default(),
        }
    }

    /// Id of the scenario this context serves.
    #[must_use]
    pub const fn scenario(&self) -> &'static str {
        self.scenario
    }

    /// Engine under test.
    #[must_use]
    pub fn engine(&self) -> &Arc<dyn TargetEngine> {
        &self.env.engine
    }

    /// Provider behind the retry policy.
    #[must_use]
    pub fn provider(&self) -> &RetryingProvider {
        &self.env.provider
    }

    /// Fixture source.
    #[must_use]
    pub fn generator(&self) -> &SyntheticGenerator {
        &self.env.generator
    }

    /// Sizes for the configured scale.
    #[must_use]
    pub fn scale(&self) -> &ScaleParams {
        &self.env.scale
    }

    /// Configured quality thresholds.
    #[must_use]
    pub fn thresholds(&self) -> &Thresholds {
        &self.env.thresholds
    }

    /// Structured event sink.
    #[must_use]
    pub fn log(&self) -> &EventLog {
        &self.env.log
    }

    /// This run's budget clock.
    #[must_use]
    pub const fn deadline(&self) -> &Deadline {
        &self.deadline
    }

    /// `ScenarioTimeout` once this run's budget is spent.
    pub fn check_deadline(&self) -> Result<()> {
        self.deadline.check(self.scenario)
    }

    /// The run's recorder.
    pub fn metrics(&mut self) -> &mut ScenarioMetrics {
        &mut self.metrics
    }

    /// Current value of a recorder counter.
    #[must_use]
    pub fn counter(&self, name: &str) -> Option<u64> {
        self.metrics.counter(name)
    }

    /// Hand the recorder over, leaving an empty one behind.
    pub fn take_metrics(&mut self) -> ScenarioMetrics {
        std::mem::replace(&mut self.metrics, ScenarioMetrics::new(self.scenario))
    }

    /// Shared view of the namespaces this run created.
    #[must_use]
    pub fn namespaces(&self) -> OwnedNamespaces {
        self.namespaces.clone()
    }

    /// Namespace name unique to this scenario and seed.
    #[must_use]
    pub fn namespace_name(&self, suffix: &str) -> String {
        format!("{}_{}_{suffix}", self.scenario, self.env.seed)
    }

    /// Create (or recreate) a namespace owned by this run.
    pub fn create_namespace(&mut self, suffix: &str) -> Result<NamespaceHandle> {
        let name = self.namespace_name(suffix);
        let engine = Arc::clone(&self.env.engine);
        let id = self.metrics.mutation("create_namespace", &name);
        let handle = match NamespaceHandle::create(Arc::clone(&engine), name.clone()) {
            Ok(handle) => handle,
            Err(HarnessError::TargetEngine {
                source: EngineError::NamespaceExists { .. },
                ..
            }) => {
                let stale = NamespaceHandle::bind(Arc::clone(&engine), name.clone());
                stale.drop_namespace()?;
                NamespaceHandle::create(engine, name)?
            }
            Err(err) => return Err(err),
        };
        self.metrics.audit(id, "ok");
        self.namespaces.push(handle.clone());
        Ok(handle)
    }

    /// Issue a mutation through `f`, recording it and, when the engine
    /// answered, its audit event.
    pub fn mutate<T>(
        &mut self,
        operation: &str,
        target: &str,
        f: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        let id = self.metrics.mutation(operation, target);
        let out = f();
        match &out {
            Ok(_) => self.metrics.audit(id, "ok"),
            Err(HarnessError::TargetEngine { source, .. }) => {
                if let Some(outcome) = answered_outcome(source) {
                    self.metrics.audit(id, outcome);
                }
            }
            Err(_) => {}
        }
        out
    }

    /// Like [`Self::mutate`] for calls that return raw engine results,
    /// such as commits whose conflicts the caller handles.
    pub fn mutate_raw<T>(
        &mut self,
        operation: &str,
        target: &str,
        f: impl FnOnce() -> EngineResult<T>,
    ) -> EngineResult<T> {
        let id = self.metrics.mutation(operation, target);
        let out = f();
        match &out {
            Ok(_) => self.metrics.audit(id, "ok"),
            Err(err) => {
                if let Some(outcome) = answered_outcome(err) {
                    self.metrics.audit(id, outcome);
                }
            }
        }
        out
    }

    /// Time `f` under `operation`; only counts while executing.
    pub fn timed<T>(&mut self, operation: &str, f: impl FnOnce() -> T) -> T {
        self.metrics.timed(operation, f)
    }

    /// Drop every namespace this run created. Keeps going past failures and
    /// reports the first one.
    pub fn release_namespaces(&mut self) -> Result<()> {
        self.namespaces.release()
    }

    /// Names of the namespaces this run still holds.
    #[must_use]
    pub fn owned_namespaces(&self) -> Vec<String> {
        self.namespaces.names()
    }
}

/// Outcome label for engine errors that still count as a definite answer.
const fn answered_outcome(err: &EngineError) -> Option<&'static str> {
    match err {
        EngineError::Conflict { .. } => Some("conflict"),
        EngineError::Rejected { .. } => Some("rejected"),
        _ => None,
    }
}
