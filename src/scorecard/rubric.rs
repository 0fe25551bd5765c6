//! Weighted 100-point rubric with partial credit.
//!
//! Every scored metric belongs to exactly one category. A metric earns its
//! full points at its threshold, half inside the partial band and nothing
//! otherwise. A metric nobody measured earns nothing.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::aggregate::MergedMetrics;
use crate::core::config::Thresholds;
use crate::metrics::Provenance;

/// Partial credit floor for higher-is-better metrics, as a share of threshold.
pub const PARTIAL_FLOOR: f64 = 0.7;
/// Partial credit ceiling for lower-is-better metrics, as a multiple of threshold.
pub const PARTIAL_CEILING: f64 = 1.5;

// ──────────────────── categories ────────────────────

/// Rubric category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Retrieval and graph answer quality.
    Quality,
    /// Context budgeting.
    Context,
    /// Conflict and abort behavior.
    Transactions,
    /// Latency and throughput.
    Performance,
    /// Recovery, policy, isolation and caching.
    Operational,
    /// Behavior under concurrent load.
    Concurrency,
}

impl Category {
    /// Every category, in report order.
    pub const ALL: [Self; 6] = [
        Self::Quality,
        Self::Context,
        Self::Transactions,
        Self::Performance,
        Self::Operational,
        Self::Concurrency,
    ];

    /// Snake-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Quality => "quality",
            Self::Context => "context",
            Self::Transactions => "transactions",
            Self::Performance => "performance",
            Self::Operational => "operational",
            Self::Concurrency => "concurrency",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

// ──────────────────── metric table ────────────────────

/// Which side of the threshold earns credit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// At or above the threshold.
    HigherIsBetter,
    /// At or below the threshold.
    LowerIsBetter,
}

/// Where a metric's observed number comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// A recorded value, sample mean or counter of this name.
    Named,
    /// p95 of the pooled latency samples of this operation.
    P95(&'static str),
}

/// One rubric line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricSpec {
    /// Metric name, also its threshold key.
    pub name: &'static str,
    /// Category the points count towards.
    pub category: Category,
    /// Points at full credit.
    pub points: u32,
    /// Which side of the threshold earns credit.
    pub direction: Direction,
    /// Where the observed number comes from.
    pub source: Source,
}

const fn higher(name: &'static str, category: Category, points: u32) -> MetricSpec {
    MetricSpec {
        name,
        category,
        points,
        direction: Direction::HigherIsBetter,
        source: Source::Named,
    }
}

const fn lower(name: &'static str, category: Category, points: u32) -> MetricSpec {
    MetricSpec {
        name,
        category,
        points,
        direction: Direction::LowerIsBetter,
        source: Source::Named,
    }
}

const fn p95(name: &'static str, op: &'static str, points: u32) -> MetricSpec {
    MetricSpec {
        name,
        category: Category::Performance,
        points,
        direction: Direction::LowerIsBetter,
        source: Source::P95(op),
    }
}

/// The rubric. Points sum to 100.
pub const RUBRIC: [MetricSpec; 22] = [
    higher("ndcg_at_10", Category::Quality, 10),
    higher("recall_at_10", Category::Quality, 8),
    higher("keyword_precision", Category::Quality, 7),
    higher("mrr_at_10", Category::Quality, 5),
    higher("graph_consistency", Category::Quality, 5),
    lower("context_budget_violations", Category::Context, 5),
    lower("strict_truncation_failures", Category::Context, 3),
    higher("token_reduction_pct", Category::Context, 3),
    lower("txn_abort_rate", Category::Transactions, 4),
    lower("avg_retries_on_conflict", Category::Transactions, 3),
    lower("conflict_rate", Category::Transactions, 4),
    p95("p95_hybrid_search_ms", "hybrid_search", 5),
    p95("p95_graph_query_ms", "graph_query", 4),
    p95("p95_temporal_query_ms", "temporal_query", 4),
    higher("throughput_ops_per_sec", Category::Performance, 3),
    higher("batch_speedup", Category::Performance, 3),
    higher("recovery_replayed_entries", Category::Operational, 4),
    higher("policy_accuracy", Category::Operational, 4),
    higher("deny_with_explanation_pct", Category::Operational, 2),
    lower("namespace_isolation_violations", Category::Operational, 4),
    higher("cache_hit_rate", Category::Operational, 4),
    higher("concurrent_search_success_rate", Category::Concurrency, 6),
];

/// Configured threshold for a rubric metric.
#[must_use]
pub fn threshold_for(thresholds: &Thresholds, name: &str) -> Option<f64> {
    thresholds
        .entries()
        .into_iter()
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}

// ──────────────────── scoring ────────────────────

/// Credit a rubric line earned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Credit {
    /// Threshold met.
    Full,
    /// Inside the partial band: half the points.
    Partial,
    /// Outside the band.
    None,
    /// Nothing was measured.
    NoData,
}

/// Scored line of the rubric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricScore {
    /// Metric name.
    pub name: String,
    /// Its category.
    pub category: Category,
    /// Which side of the threshold earns credit.
    pub direction: Direction,
    /// Pooled observation; `None` when nothing was measured.
    pub observed: Option<f64>,
    /// Configured threshold.
    pub threshold: f64,
    /// Points at full credit.
    pub points_possible: f64,
    /// Points earned.
    pub points_earned: f64,
    /// Credit band.
    pub credit: Credit,
    /// Whether any contributing number was simulated.
    pub simulated: bool,
}

/// Earned over possible points for one category.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CategoryScore {
    /// Points earned.
    pub earned: f64,
    /// Points available.
    pub possible: f64,
}

/// Credit for one observation against its threshold.
#[must_use]
pub fn credit(direction: Direction, observed: f64, threshold: f64) -> Credit {
    if !observed.is_finite() {
        return Credit::NoData;
    }
    match direction {
        Direction::HigherIsBetter if observed >= threshold => Credit::Full,
        Direction::HigherIsBetter if observed >= PARTIAL_FLOOR * threshold => Credit::Partial,
        Direction::LowerIsBetter if observed <= threshold => Credit::Full,
        Direction::LowerIsBetter if observed <= PARTIAL_CEILING * threshold => Credit::Partial,
        _ => Credit::None,
    }
}

fn score_one(spec: &MetricSpec, merged: &MergedMetrics, thresholds: &Thresholds) -> MetricScore {
    let threshold = threshold_for(thresholds, spec.name).unwrap_or(f64::NAN);
    let (observed, simulated) = match spec.source {
        Source::Named => merged.resolve(spec.name).map_or((None, false), |v| {
            (Some(v.value), v.provenance == Provenance::Simulated)
        }),
        Source::P95(op) => (merged.latency(op).map(|s| s.p95_ms), false),
    };
    let credit = match observed {
        Some(value) if threshold.is_finite() => credit(spec.direction, value, threshold),
        _ => Credit::NoData,
    };
    let possible = f64::from(spec.points);
    let earned = match credit {
        Credit::Full => possible,
        Credit::Partial => possible / 2.0,
        Credit::None | Credit::NoData => 0.0,
    };
    MetricScore {
        name: spec.name.to_string(),
        category: spec.category,
        direction: spec.direction,
        observed,
        threshold,
        points_possible: possible,
        points_earned: earned,
        credit,
        simulated,
    }
}

/// Score every rubric line and roll up per category.
#[must_use]
pub fn score_rubric(
    merged: &MergedMetrics,
    thresholds: &Thresholds,
) -> (Vec<MetricScore>, BTreeMap<Category, CategoryScore>) {
    let lines: Vec<MetricScore> = RUBRIC
        .iter()
        .map(|spec| score_one(spec, merged, thresholds))
        .collect();
    let mut categories: BTreeMap<Category, CategoryScore> =
        Category::ALL.iter().map(|c| (*c, CategoryScore::default())).collect();
    for line in &lines {
        let slot = categories.entry(line.category).or_default();
        slot.earned += line.points_earned;
        slot.possible += line.points_possible;
    }
    (lines, categories)
}

/// Letter grade. Any failing gate is an F regardless of score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Grade {
    /// Gates pass and the score is at least 85.
    A,
    /// Gates pass and the score reaches the pass threshold.
    B,
    /// Gates pass but the score falls short.
    C,
    /// A gate failed.
    F,
}

impl Grade {
    /// Grade for a score, given the gate verdict.
    #[must_use]
    pub fn assign(score: f64, gate_pass: bool, pass_threshold: f64) -> Self {
        if !gate_pass {
            Self::F
        } else if score >= 85.0 {
            Self::A
        } else if score >= pass_threshold {
            Self::B
        } else {
            Self::C
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letter = match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::F => "F",
        };
        f.write_str(letter)
    }
}
