//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use engine_cert_harness::prelude::*;
//! ```

// Core
pub use crate::core::config::{HarnessConfig, Scale, ScaleParams, Thresholds};
pub use crate::core::errors::{HarnessError, Result};

// Engine
pub use crate::engine::{EngineError, EngineFaults, MemoryEngine, NamespaceHandle, TargetEngine};

// Provider
pub use crate::provider::{DeterministicProvider, Provider, RetryingProvider};

// Generator
pub use crate::generator::{FixtureSet, SyntheticGenerator};

// Metrics
pub use crate::metrics::{MetricsSnapshot, Provenance, ScenarioMetrics};

// Scenarios
pub use crate::scenario::{
    DynScenario, RunEnv, Scenario, ScenarioContext, ScenarioRegistry, ScenarioReport,
    ScenarioState, run_scenarios,
};

// Scorecard
pub use crate::certify::Certification;
pub use crate::scorecard::{Gate, GateResult, Grade, Scorecard};
