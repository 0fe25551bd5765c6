//! Metric recording and the exact derived computations scoring relies on.

pub mod audit;
pub mod latency;
pub mod ranking;
pub mod recorder;

pub use audit::{AuditEvent, MutationRecord, audit_coverage};
pub use latency::{LatencySummary, percentile};
pub use ranking::{mrr_at_k, ndcg_at_k, precision_at_k, recall_at_k};
pub use recorder::{
    LATENCY_OUTSIDE_EXECUTE, MetricsSnapshot, Provenance, RecordedValue, RecorderPhase,
    ScenarioMetrics,
};
