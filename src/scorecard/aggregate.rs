//! Pooling of per-scenario snapshots into one view for scoring.
//!
//! Counters are summed, quality samples pooled, latency samples pooled
//! (percentiles are taken over the pool, never averaged), single values
//! averaged. Non-finite numbers are discarded on the way in.

#![allow(clippy::cast_precision_loss)]

use std::collections::BTreeMap;

use crate::metrics::{LatencySummary, MetricsSnapshot, Provenance, RecordedValue};
use crate::provider::ProviderUsage;

/// Union of several scenarios' measurements.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergedMetrics {
    /// Summed counters.
    pub counters: BTreeMap<String, u64>,
    /// Pooled quality samples.
    pub samples: BTreeMap<String, Vec<f64>>,
    values: BTreeMap<String, (Vec<f64>, Provenance)>,
    /// Pooled latency samples in milliseconds.
    pub latency_ms: BTreeMap<String, Vec<f64>>,
    /// Summed provider usage.
    pub usage: ProviderUsage,
}

impl MergedMetrics {
    /// Pool `snapshots`.
    #[must_use]
    pub fn merge<'a>(snapshots: impl IntoIterator<Item = &'a MetricsSnapshot>) -> Self {
        let mut merged = Self::default();
        for snapshot in snapshots {
            merged.absorb(snapshot);
        }
        merged
    }

    fn absorb(&mut self, snapshot: &MetricsSnapshot) {
        for (name, value) in &snapshot.counters {
            let slot = self.counters.entry(name.clone()).or_default();
            *slot = slot.saturating_add(*value);
        }
        for (name, samples) in &snapshot.samples {
            self.samples
                .entry(name.clone())
                .or_default()
                .extend(samples.iter().copied().filter(|v| v.is_finite()));
        }
        for (name, recorded) in &snapshot.values {
            if !recorded.value.is_finite() {
                continue;
            }
            let slot = self
                .values
                .entry(name.clone())
                .or_insert_with(|| (Vec::new(), Provenance::Measured));
            slot.0.push(recorded.value);
            if recorded.provenance == Provenance::Simulated {
                slot.1 = Provenance::Simulated;
            }
        }
        for (op, samples) in &snapshot.latency_ms {
            self.latency_ms
                .entry(op.clone())
                .or_default()
                .extend(samples.iter().copied().filter(|v| v.is_finite()));
        }
        self.usage += snapshot.usage;
    }

    /// Averaged single value. Simulated if any contributor was.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<RecordedValue> {
        let (values, provenance) = self.values.get(name)?;
        if values.is_empty() {
            return None;
        }
        Some(RecordedValue {
            value: values.iter().sum::<f64>() / values.len() as f64,
            provenance: *provenance,
        })
    }

    /// Mean over the pooled samples.
    #[must_use]
    pub fn sample_mean(&self, name: &str) -> Option<f64> {
        let samples = self.samples.get(name)?;
        if samples.is_empty() {
            return None;
        }
        Some(samples.iter().sum::<f64>() / samples.len() as f64)
    }

    /// Percentiles over the pooled latency of `op`.
    #[must_use]
    pub fn latency(&self, op: &str) -> Option<LatencySummary> {
        LatencySummary::from_samples(self.latency_ms.get(op)?)
    }

    /// Every latency operation with a summary.
    #[must_use]
    pub fn latency_summaries(&self) -> BTreeMap<String, LatencySummary> {
        self.latency_ms
            .iter()
            .filter_map(|(op, samples)| Some((op.clone(), LatencySummary::from_samples(samples)?)))
            .collect()
    }

    /// Resolve a named metric: recorded value, then sample mean, then counter.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<RecordedValue> {
        if let Some(value) = self.value(name) {
            return Some(value);
        }
        if let Some(mean) = self.sample_mean(name) {
            return Some(RecordedValue {
                value: mean,
                provenance: Provenance::Measured,
            });
        }
        self.counters.get(name).map(|count| RecordedValue {
            value: *count as f64,
            provenance: Provenance::Measured,
        })
    }
}
