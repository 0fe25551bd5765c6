//! Gate evaluation and weighted scoring of a completed run.
//!
//! [`Scorecard::build`] is pure: the same reports and settings always give
//! the same scorecard, and it never fails. Errored scenarios still count as
//! gate evidence but are left out of the rubric.

pub mod aggregate;
pub mod gates;
pub mod rubric;

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::config::{Scale, Thresholds};
use crate::core::errors::{HarnessError, Result};
use crate::metrics::{LatencySummary, MetricsSnapshot, RecordedValue};
use crate::scenario::{ScenarioError, ScenarioReport, ScenarioState};

pub use aggregate::MergedMetrics;
pub use gates::{Gate, GateResult, evaluate_gates};
pub use rubric::{Category, CategoryScore, Credit, Grade, MetricScore, RUBRIC, score_rubric};

/// Run identity and timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMeta {
    /// Seed every fixture was derived from.
    pub seed: u64,
    /// Fixture scale.
    pub scale: Scale,
    /// RFC 3339, UTC.
    pub started_at: String,
    /// Wall time of the whole run.
    pub duration_s: f64,
    /// Hash of the effective configuration.
    pub config_hash: String,
    /// Engine label.
    pub engine: String,
    /// Provider label.
    pub provider: String,
    /// Scenario ids, in run order.
    pub scenarios: Vec<String>,
}

/// Compact, human-auditable view of one scenario's metrics.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScenarioMetricsView {
    /// Every counter the scenario observed.
    pub counters: BTreeMap<String, u64>,
    /// Named values with provenance.
    pub values: BTreeMap<String, RecordedValue>,
    /// Mean of each sample series.
    pub sample_means: BTreeMap<String, f64>,
    /// Percentiles per operation.
    pub latency: BTreeMap<String, LatencySummary>,
    /// Named booleans.
    pub flags: BTreeMap<String, bool>,
    /// Number of mutations issued.
    pub mutations: usize,
    /// Share of mutations with an attributed audit event.
    pub audit_coverage: Option<f64>,
    /// Provider calls made.
    pub provider_calls: u64,
    /// Diagnostics.
    pub notes: Vec<String>,
}

impl From<&MetricsSnapshot> for ScenarioMetricsView {
    fn from(snapshot: &MetricsSnapshot) -> Self {
        Self {
            counters: snapshot.counters.clone(),
            values: snapshot.values.clone(),
            sample_means: snapshot
                .samples
                .keys()
                .filter_map(|name| Some((name.clone(), snapshot.sample_mean(name)?)))
                .collect(),
            latency: snapshot
                .latency_ms
                .keys()
                .filter_map(|op| Some((op.clone(), snapshot.latency(op)?)))
                .collect(),
            flags: snapshot.flags.clone(),
            mutations: snapshot.mutations.len(),
            audit_coverage: snapshot.audit_coverage(),
            provider_calls: snapshot.usage.calls,
            notes: snapshot.notes.clone(),
        }
    }
}

/// One scenario's line in the scorecard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioScore {
    /// Whether the scenario ended [`ScenarioState::Passed`].
    pub pass: bool,
    /// Outcome state.
    pub state: ScenarioState,
    /// Wall time of its lifecycle.
    pub duration_ms: u64,
    /// Why it errored, if it did.
    pub error: Option<ScenarioError>,
    /// Its metrics, summarized.
    pub metrics: ScenarioMetricsView,
}

/// Provider usage across the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UsageTotals {
    /// Provider calls.
    pub calls: u64,
    /// Prompt plus completion tokens.
    pub tokens: u64,
}

/// The verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Overall {
    /// Every gate passed and the score reached the threshold.
    pub pass: bool,
    /// Every gate passed.
    pub gate_pass: bool,
    /// Weighted rubric score.
    pub score_0_100: f64,
    /// Letter grade; `F` whenever a gate failed.
    pub grade: Grade,
    /// Score needed to pass.
    pub pass_threshold: f64,
}

/// The run's sole durable artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scorecard {
    /// Run identity and timing.
    pub run_meta: RunMeta,
    /// G1 to G7, in order.
    pub gate_results: Vec<GateResult>,
    /// Per-scenario outcome and metrics, by id.
    pub scenario_scores: BTreeMap<String, ScenarioScore>,
    /// Points per rubric category.
    pub category_scores: BTreeMap<Category, CategoryScore>,
    /// Points per rubric metric.
    pub metric_scores: Vec<MetricScore>,
    /// Percentiles per operation over the scored scenarios.
    pub latency: BTreeMap<String, LatencySummary>,
    /// Provider usage.
    pub usage: UsageTotals,
    /// The verdict.
    pub overall: Overall,
}

impl Scorecard {
    /// Evaluate gates and rubric over the reports of one run.
    #[must_use]
    pub fn build(
        run_meta: RunMeta,
        reports: &[ScenarioReport],
        thresholds: &Thresholds,
        pass_threshold: f64,
    ) -> Self {
        let all: Vec<&MetricsSnapshot> = reports.iter().map(|r| &r.metrics).collect();
        let gate_results = evaluate_gates(&all);
        let gate_pass = gate_results.iter().all(|g| g.pass);

        let scored = MergedMetrics::merge(
            reports
                .iter()
                .filter(|r| r.state != ScenarioState::Errored)
                .map(|r| &r.metrics),
        );
        let (metric_scores, category_scores) = score_rubric(&scored, thresholds);
        let earned: f64 = category_scores.values().map(|c| c.earned).sum();
        let possible: f64 = category_scores.values().map(|c| c.possible).sum();
        let score = if possible > 0.0 {
            (earned / possible * 100.0).clamp(0.0, 100.0)
        } else {
            0.0
        };

        let everything = MergedMetrics::merge(all.iter().copied());
        let scenario_scores = reports
            .iter()
            .map(|r| {
                (
                    r.id.clone(),
                    ScenarioScore {
                        pass: r.passed(),
                        state: r.state,
                        duration_ms: r.duration_ms,
                        error: r.error.clone(),
                        metrics: ScenarioMetricsView::from(&r.metrics),
                    },
                )
            })
            .collect();

        Self {
            run_meta,
            gate_results,
            scenario_scores,
            category_scores,
            metric_scores,
            latency: scored.latency_summaries(),
            usage: UsageTotals {
                calls: everything.usage.calls,
                tokens: everything.usage.total_tokens(),
            },
            overall: Overall {
                pass: gate_pass && score >= pass_threshold,
                gate_pass,
                score_0_100: score,
                grade: Grade::assign(score, gate_pass, pass_threshold),
                pass_threshold,
            },
        }
    }

    /// Process exit code: 0 iff the run passed.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        if self.overall.pass { 0 } else { 4 }
    }

    /// Gates that did not pass.
    #[must_use]
    pub fn failed_gates(&self) -> Vec<&GateResult> {
        self.gate_results.iter().filter(|g| !g.pass).collect()
    }

    /// One-line verdict for terminals and logs.
    #[must_use]
    pub fn summary_line(&self) -> String {
        let verdict = if self.overall.pass { "PASS" } else { "FAIL" };
        let failed: Vec<String> = self.failed_gates().iter().map(|g| g.id.id().to_string()).collect();
        let gates = if failed.is_empty() {
            "all gates pass".to_string()
        } else {
            format!("failed gates: {}", failed.join(", "))
        };
        format!(
            "{verdict} score={:.1} grade={} ({gates})",
            self.overall.score_0_100, self.overall.grade
        )
    }

    /// Pretty-printed JSON.
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write as pretty JSON, creating parent directories.
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| HarnessError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let body = self.to_json_pretty()?;
        fs::write(path, body + "\n").map_err(|source| HarnessError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load a scorecard written by [`Scorecard::write`].
    pub fn read(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|source| HarnessError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{AuditEvent, MutationRecord, Provenance};

    fn meta() -> RunMeta {
        RunMeta {
            seed: 1,
            scale: Scale::Small,
            started_at: "2026-01-01T00:00:00Z".into(),
            duration_s: 1.0,
            config_hash: "0".into(),
            engine: "memory".into(),
            provider: "deterministic".into(),
            scenarios: vec!["synthetic".into()],
        }
    }

    /// Every rubric metric at its threshold and every gate clean.
    fn perfect() -> MetricsSnapshot {
        let t = Thresholds::default();
        let mut s = MetricsSnapshot::default();
        for spec in &RUBRIC {
            let threshold = rubric::threshold_for(&t, spec.name).unwrap();
            match spec.source {
                rubric::Source::P95(op) => {
                    s.latency_ms.insert(op.into(), vec![threshold / 2.0]);
                }
                rubric::Source::Named => {
                    s.values.insert(
                        spec.name.into(),
                        RecordedValue {
                            value: threshold,
                            provenance: Provenance::Measured,
                        },
                    );
                }
            }
        }
        for gate in Gate::ALL.iter().filter(|g| **g != Gate::AuditCoverage) {
            s.counters.insert(gate.metric().into(), 0);
        }
        s.mutations.push(MutationRecord {
            id: 0,
            operation: "put".into(),
            target: "k".into(),
        });
        s.audit_events.push(AuditEvent {
            mutation_id: 0,
            operation: "put".into(),
            target: "k".into(),
            actor: "synthetic".into(),
            outcome: "ok".into(),
            ts: String::new(),
        });
        s
    }

    fn report(state: ScenarioState, metrics: MetricsSnapshot) -> ScenarioReport {
        ScenarioReport {
            id: "synthetic".into(),
            state,
            trace: vec![ScenarioState::Created, state, ScenarioState::TornDown],
            duration_ms: 1,
            error: None,
            metrics,
        }
    }

    #[test]
    fn perfect_run_scores_one_hundred() {
        let card = Scorecard::build(
            meta(),
            &[report(ScenarioState::Passed, perfect())],
            &Thresholds::default(),
            70.0,
        );
        assert!((card.overall.score_0_100 - 100.0).abs() < 1e-9);
        assert!(card.overall.pass);
        assert_eq!(card.overall.grade, Grade::A);
        assert_eq!(card.exit_code(), 0);
    }

    #[test]
    fn one_leak_fails_a_perfect_score() {
        let mut metrics = perfect();
        metrics.counters.insert("leakage_count".into(), 1);
        let card = Scorecard::build(
            meta(),
            &[report(ScenarioState::Failed, metrics)],
            &Thresholds::default(),
            70.0,
        );
        assert!((card.overall.score_0_100 - 100.0).abs() < 1e-9);
        assert!(!card.overall.gate_pass);
        assert!(!card.overall.pass);
        assert_eq!(card.overall.grade, Grade::F);
        assert_eq!(card.exit_code(), 4);
        assert_eq!(card.failed_gates()[0].id, Gate::Leakage);
        assert!(card.summary_line().contains("G1"));
    }

    #[test]
    fn errored_scenarios_give_evidence_but_no_points() {
        let card = Scorecard::build(
            meta(),
            &[report(ScenarioState::Errored, perfect())],
            &Thresholds::default(),
            70.0,
        );
        assert!(card.overall.gate_pass);
        assert_eq!(card.overall.score_0_100, 0.0);
        assert_eq!(card.overall.grade, Grade::C);
        assert!(!card.overall.pass);
    }

    #[test]
    fn empty_run_fails_every_gate() {
        let card = Scorecard::build(meta(), &[], &Thresholds::default(), 70.0);
        assert_eq!(card.gate_results.len(), 7);
        assert!(card.gate_results.iter().all(|g| g.observed_value.is_none()));
        assert_eq!(card.category_scores.len(), 6);
        assert!(!card.overall.pass);
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("scorecard.json");
        let card = Scorecard::build(
            meta(),
            &[report(ScenarioState::Passed, perfect())],
            &Thresholds::default(),
            70.0,
        );
        card.write(&path).unwrap();
        let back = Scorecard::read(&path).unwrap();
        assert_eq!(back.overall, card.overall);
        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"observed_value\""));
        assert!(raw.contains("\"quality\""));
    }
}
