//! Zero-tolerance gates over the union of every scenario's metrics.
//!
//! The list is fixed. A gate passes only on positive evidence: a counter
//! that no scenario ever observed fails with `observed_value: null`.

#![allow(clippy::cast_precision_loss)]

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::metrics::MetricsSnapshot;

// ──────────────────── gate catalog ────────────────────

/// One of the seven hard gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gate {
    /// G1: no cross-namespace reads.
    #[serde(rename = "G1")]
    Leakage,
    /// G2: transactions are all-or-nothing.
    #[serde(rename = "G2")]
    Atomicity,
    /// G3: reposting never creates a second entry.
    #[serde(rename = "G3")]
    DoublePost,
    /// G4: as-of reads match the version oracle.
    #[serde(rename = "G4")]
    TimeTravel,
    /// G5: acknowledged writes survive an unclean close.
    #[serde(rename = "G5")]
    CrashConsistency,
    /// G6: every mutation has an attributed audit event.
    #[serde(rename = "G6")]
    AuditCoverage,
    /// G7: every engine answer is well-formed.
    #[serde(rename = "G7")]
    SchemaValidation,
}

impl Gate {
    /// Every gate, in report order.
    pub const ALL: [Self; 7] = [
        Self::Leakage,
        Self::Atomicity,
        Self::DoublePost,
        Self::TimeTravel,
        Self::CrashConsistency,
        Self::AuditCoverage,
        Self::SchemaValidation,
    ];

    /// `G1` to `G7`.
    #[must_use]
    pub const fn id(self) -> &'static str {
        match self {
            Self::Leakage => "G1",
            Self::Atomicity => "G2",
            Self::DoublePost => "G3",
            Self::TimeTravel => "G4",
            Self::CrashConsistency => "G5",
            Self::AuditCoverage => "G6",
            Self::SchemaValidation => "G7",
        }
    }

    /// Metric the gate reads.
    #[must_use]
    pub const fn metric(self) -> &'static str {
        match self {
            Self::Leakage => "leakage_count",
            Self::Atomicity => "atomicity_failures",
            Self::DoublePost => "double_post_count",
            Self::TimeTravel => "time_travel_mismatches",
            Self::CrashConsistency => "crash_consistency_violations",
            Self::AuditCoverage => "audit_coverage",
            Self::SchemaValidation => "schema_validation_failures",
        }
    }

    /// Required value: zero for counters, 1.0 (100%) for audit coverage.
    #[must_use]
    pub const fn threshold(self) -> f64 {
        match self {
            Self::AuditCoverage => 1.0,
            _ => 0.0,
        }
    }

    fn observe(self, snapshots: &[&MetricsSnapshot]) -> Option<f64> {
        match self {
            Self::AuditCoverage => union_audit_coverage(snapshots),
            _ => snapshots
                .iter()
                .filter_map(|s| s.counter(self.metric()))
                .reduce(u64::saturating_add)
                .map(|total| total as f64),
        }
    }

    fn holds(self, observed: f64) -> bool {
        match self {
            Self::AuditCoverage => (observed - 1.0).abs() < f64::EPSILON,
            _ => observed == 0.0,
        }
    }
}

impl fmt::Display for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.id(), self.metric())
    }
}

/// Covered mutations over all mutations, pooled across scenarios.
///
/// Mutation ids are scenario-local, so coverage is counted per snapshot and
/// then summed.
fn union_audit_coverage(snapshots: &[&MetricsSnapshot]) -> Option<f64> {
    let mut total = 0_usize;
    let mut covered = 0.0_f64;
    for snapshot in snapshots {
        let n = snapshot.mutations.len();
        if let Some(share) = snapshot.audit_coverage() {
            total += n;
            covered += share * n as f64;
        }
    }
    (total > 0).then(|| covered / total as f64)
}

// ──────────────────── evaluation ────────────────────

/// Verdict for one gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateResult {
    /// Which gate.
    pub id: Gate,
    /// The metric it reads.
    pub name: String,
    /// Whether the evidence met the threshold.
    pub pass: bool,
    /// `None` when no scenario produced evidence.
    pub observed_value: Option<f64>,
    /// Required value.
    pub threshold: f64,
}

/// Evaluate every gate. Never fails; missing or non-finite evidence fails
/// the gate.
#[must_use]
pub fn evaluate_gates(snapshots: &[&MetricsSnapshot]) -> Vec<GateResult> {
    Gate::ALL
        .iter()
        .map(|&gate| {
            let observed_value = gate.observe(snapshots).filter(|v| v.is_finite());
            GateResult {
                id: gate,
                name: gate.metric().to_string(),
                pass: observed_value.is_some_and(|v| gate.holds(v)),
                observed_value,
                threshold: gate.threshold(),
            }
        })
        .collect()
}
