//! Per-scenario metric recorder and its frozen snapshot.
//!
//! A [`ScenarioMetrics`] is owned by exactly one scenario run; nothing in it
//! is shared. Latency is only accepted while the recorder is in the
//! executing phase.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::audit::{AuditEvent, MutationRecord, audit_coverage};
use super::latency::LatencySummary;
use crate::provider::ProviderUsage;

/// Counter incremented when latency is offered outside the executing phase.
pub const LATENCY_OUTSIDE_EXECUTE: &str = "latency_outside_execute";

/// Where a number came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// Observed from the engine under test.
    #[default]
    Measured,
    /// Stands in for an engine feature the harness models itself.
    Simulated,
}

/// A single named value with its provenance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecordedValue {
    /// The number itself.
    pub value: f64,
    /// Whether the engine produced it or the harness modeled it.
    pub provenance: Provenance,
}

/// Recorder phase, driven by the scenario state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecorderPhase {
    /// Fixtures are being loaded.
    #[default]
    Setup,
    /// Operations under test; the only phase that accepts latency.
    Executing,
    /// Results are being compared with ground truth.
    Verifying,
}

/// Mutable recorder owned by one scenario run.
#[derive(Debug)]
pub struct ScenarioMetrics {
    actor: String,
    phase: RecorderPhase,
    counters: BTreeMap<String, u64>,
    samples: BTreeMap<String, Vec<f64>>,
    values: BTreeMap<String, RecordedValue>,
    latency: BTreeMap<String, Vec<Duration>>,
    flags: BTreeMap<String, bool>,
    mutations: Vec<MutationRecord>,
    audit_events: Vec<AuditEvent>,
    usage: ProviderUsage,
    notes: Vec<String>,
    next_mutation: u64,
}

impl ScenarioMetrics {
    /// Empty recorder whose audit events name `actor`.
    #[must_use]
    pub fn new(actor: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            phase: RecorderPhase::default(),
            counters: BTreeMap::new(),
            samples: BTreeMap::new(),
            values: BTreeMap::new(),
            latency: BTreeMap::new(),
            flags: BTreeMap::new(),
            mutations: Vec::new(),
            audit_events: Vec::new(),
            usage: ProviderUsage::default(),
            notes: Vec::new(),
            next_mutation: 0,
        }
    }

    /// Name stamped on every audit event.
    #[must_use]
    pub fn actor(&self) -> &str {
        &self.actor
    }

    /// Follow the scenario state machine into `phase`.
    pub fn set_phase(&mut self, phase: RecorderPhase) {
        self.phase = phase;
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> RecorderPhase {
        self.phase
    }

    // ──────────────────── counters ────────────────────

    /// Add to a counter, creating it at zero first.
    pub fn incr(&mut self, name: &str, by: u64) {
        let slot = self.counters.entry(name.to_string()).or_insert(0);
        *slot = slot.saturating_add(by);
    }

    /// Make a counter present (with its current value, or 0) so that
    /// "observed zero" is distinguishable from "never observed".
    pub fn observe(&mut self, name: &str) {
        self.counters.entry(name.to_string()).or_insert(0);
    }

    /// Current value of a counter; `None` when never observed.
    #[must_use]
    pub fn counter(&self, name: &str) -> Option<u64> {
        self.counters.get(name).copied()
    }

    // ──────────────────── samples & values ────────────────────

    /// Append a quality sample. Non-finite samples are noted and dropped.
    pub fn sample(&mut self, name: &str, value: f64) {
        if value.is_finite() {
            self.samples.entry(name.to_string()).or_default().push(value);
        } else {
            self.note(format!("dropped non-finite sample for {name}"));
        }
    }

    /// Set a named value. Non-finite values are noted and dropped.
    pub fn value(&mut self, name: &str, value: f64, provenance: Provenance) {
        if value.is_finite() {
            self.values
                .insert(name.to_string(), RecordedValue { value, provenance });
        } else {
            self.note(format!("dropped non-finite value for {name}"));
        }
    }

    /// Shorthand for a [`Provenance::Measured`] value.
    pub fn measured(&mut self, name: &str, value: f64) {
        self.value(name, value, Provenance::Measured);
    }

    /// Shorthand for a [`Provenance::Simulated`] value.
    pub fn simulated(&mut self, name: &str, value: f64) {
        self.value(name, value, Provenance::Simulated);
    }

    /// Set a named boolean, such as "every query ran".
    pub fn flag(&mut self, name: &str, value: bool) {
        self.flags.insert(name.to_string(), value);
    }

    // ──────────────────── latency ────────────────────

    /// Record a latency sample; returns whether it was accepted.
    pub fn latency(&mut self, operation: &str, elapsed: Duration) -> bool {
        if self.phase == RecorderPhase::Executing {
            self.latency
                .entry(operation.to_string())
                .or_default()
                .push(elapsed);
            true
        } else {
            self.incr(LATENCY_OUTSIDE_EXECUTE, 1);
            false
        }
    }

    /// Run `f` and record its wall time under `operation`.
    pub fn timed<T>(&mut self, operation: &str, f: impl FnOnce() -> T) -> T {
        let started = Instant::now();
        let out = f();
        self.latency(operation, started.elapsed());
        out
    }

    // ──────────────────── audit ────────────────────

    /// Register a mutation about to be issued; returns its id.
    pub fn mutation(&mut self, operation: &str, target: &str) -> u64 {
        let id = self.next_mutation;
        self.next_mutation += 1;
        self.mutations.push(MutationRecord {
            id,
            operation: operation.to_string(),
            target: target.to_string(),
        });
        id
    }

    /// Record the engine's answer to mutation `id`, attributed to this
    /// recorder's actor.
    pub fn audit(&mut self, id: u64, outcome: &str) {
        let Some(m) = self.mutations.iter().find(|m| m.id == id) else {
            self.note(format!("audit for unknown mutation {id}"));
            return;
        };
        self.audit_events.push(AuditEvent {
            mutation_id: id,
            operation: m.operation.clone(),
            target: m.target.clone(),
            actor: self.actor.clone(),
            outcome: outcome.to_string(),
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        });
    }

    // ──────────────────── usage & notes ────────────────────

    /// Accumulate provider usage.
    pub fn add_usage(&mut self, usage: ProviderUsage) {
        self.usage += usage;
    }

    /// Attach a free-form diagnostic to the report.
    pub fn note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }

    /// Freeze into an immutable snapshot for aggregation.
    #[must_use]
    pub fn freeze(self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: self.counters,
            samples: self.samples,
            values: self.values,
            latency_ms: self
                .latency
                .into_iter()
                .map(|(op, durations)| {
                    (
                        op,
                        durations.iter().map(|d| d.as_secs_f64() * 1_000.0).collect(),
                    )
                })
                .collect(),
            flags: self.flags,
            mutations: self.mutations,
            audit_events: self.audit_events,
            usage: self.usage,
            notes: self.notes,
        }
    }
}

/// Immutable view of one scenario's measurements.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Gate and diagnostic counters.
    pub counters: BTreeMap<String, u64>,
    /// Per-query quality samples, averaged by the scorecard.
    pub samples: BTreeMap<String, Vec<f64>>,
    /// Single named values.
    pub values: BTreeMap<String, RecordedValue>,
    /// Latency samples in milliseconds, per operation.
    pub latency_ms: BTreeMap<String, Vec<f64>>,
    /// Named booleans.
    pub flags: BTreeMap<String, bool>,
    /// Every mutation issued, in order.
    pub mutations: Vec<MutationRecord>,
    /// Engine answers to those mutations.
    pub audit_events: Vec<AuditEvent>,
    /// Provider usage.
    pub usage: ProviderUsage,
    /// Diagnostics collected along the way.
    pub notes: Vec<String>,
}

impl MetricsSnapshot {
    /// Counter value; `None` when never observed.
    #[must_use]
    pub fn counter(&self, name: &str) -> Option<u64> {
        self.counters.get(name).copied()
    }

    /// Mean of a sample series; `None` when absent or empty.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn sample_mean(&self, name: &str) -> Option<f64> {
        let samples = self.samples.get(name)?;
        if samples.is_empty() {
            return None;
        }
        Some(samples.iter().sum::<f64>() / samples.len() as f64)
    }

    /// Named value with its provenance.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<RecordedValue> {
        self.values.get(name).copied()
    }

    /// Percentile summary of one operation's latency.
    #[must_use]
    pub fn latency(&self, operation: &str) -> Option<LatencySummary> {
        LatencySummary::from_samples(self.latency_ms.get(operation)?)
    }

    /// See [`audit_coverage`].
    #[must_use]
    pub fn audit_coverage(&self) -> Option<f64> {
        audit_coverage(&self.mutations, &self.audit_events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latency_only_accepted_while_executing() {
        let mut m = ScenarioMetrics::new("unit");
        assert!(!m.latency("search", Duration::from_millis(3)));
        m.set_phase(RecorderPhase::Executing);
        assert!(m.latency("search", Duration::from_millis(5)));
        m.set_phase(RecorderPhase::Verifying);
        assert!(!m.latency("search", Duration::from_millis(7)));
        let snap = m.freeze();
        assert_eq!(snap.latency_ms["search"].len(), 1);
        assert_eq!(snap.counter(LATENCY_OUTSIDE_EXECUTE), Some(2));
    }

    #[test]
    fn observed_zero_differs_from_missing() {
        let mut m = ScenarioMetrics::new("unit");
        m.observe("leakage_count");
        assert_eq!(m.counter("leakage_count"), Some(0));
        assert_eq!(m.counter("atomicity_failures"), None);
        m.incr("leakage_count", 2);
        m.observe("leakage_count");
        assert_eq!(m.counter("leakage_count"), Some(2));
    }

    #[test]
    fn non_finite_values_are_dropped_and_noted() {
        let mut m = ScenarioMetrics::new("unit");
        m.sample("ndcg_at_10", f64::NAN);
        m.measured("throughput_ops_per_sec", f64::INFINITY);
        let snap = m.freeze();
        assert!(snap.samples.is_empty());
        assert!(snap.values.is_empty());
        assert_eq!(snap.notes.len(), 2);
    }

    #[test]
    fn audit_links_to_mutation() {
        let mut m = ScenarioMetrics::new("unit");
        let a = m.mutation("put", "k1");
        let _b = m.mutation("put", "k2");
        m.audit(a, "ok");
        m.audit(99, "ok");
        let snap = m.freeze();
        assert_eq!(snap.audit_events.len(), 1);
        assert_eq!(snap.audit_events[0].target, "k1");
        assert_eq!(snap.audit_events[0].actor, "unit");
        assert_eq!(snap.audit_coverage(), Some(0.5));
    }

    #[test]
    fn snapshot_helpers() {
        let mut m = ScenarioMetrics::new("unit");
        m.sample("recall_at_10", 0.5);
        m.sample("recall_at_10", 1.0);
        m.simulated("cache_hit_rate", 0.9);
        let snap = m.freeze();
        assert!((snap.sample_mean("recall_at_10").unwrap() - 0.75).abs() < 1e-12);
        assert_eq!(
            snap.value("cache_hit_rate").unwrap().provenance,
            Provenance::Simulated
        );
        assert!(snap.audit_coverage().is_none());
    }
}
