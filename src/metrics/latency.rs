//! Percentile latency over raw samples.

#![allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]

use serde::{Deserialize, Serialize};

/// Value at index `ceil(p * n) - 1` of the sorted samples; `None` when empty.
///
/// `p` is clamped to `[0, 1]`; `p = 0` returns the minimum.
#[must_use]
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let n = sorted.len();
    let rank = (p.clamp(0.0, 1.0) * n as f64).ceil() as usize;
    Some(sorted[rank.saturating_sub(1).min(n - 1)])
}

/// Summary of one operation's latency samples, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    /// Number of samples.
    pub count: usize,
    /// Median.
    pub p50_ms: f64,
    /// 95th percentile.
    pub p95_ms: f64,
    /// 99th percentile.
    pub p99_ms: f64,
    /// Slowest sample.
    pub max_ms: f64,
    /// Arithmetic mean.
    pub mean_ms: f64,
}

impl LatencySummary {
    /// Summarize samples; non-finite samples are ignored. `None` when no
    /// usable sample remains.
    #[must_use]
    pub fn from_samples(samples: &[f64]) -> Option<Self> {
        let mut sorted: Vec<f64> = samples.iter().copied().filter(|v| v.is_finite()).collect();
        if sorted.is_empty() {
            return None;
        }
        sorted.sort_by(f64::total_cmp);
        let n = sorted.len();
        Some(Self {
            count: n,
            p50_ms: percentile(&sorted, 0.50)?,
            p95_ms: percentile(&sorted, 0.95)?,
            p99_ms: percentile(&sorted, 0.99)?,
            max_ms: sorted[n - 1],
            mean_ms: sorted.iter().sum::<f64>() / n as f64,
        })
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn nearest_rank_definition() {
        let samples: Vec<f64> = (1..=20).map(f64::from).collect();
        // ceil(0.95 * 20) - 1 = 18 -> 19.0
        assert_eq!(percentile(&samples, 0.95), Some(19.0));
        // ceil(0.5 * 20) - 1 = 9 -> 10.0
        assert_eq!(percentile(&samples, 0.50), Some(10.0));
        assert_eq!(percentile(&samples, 1.0), Some(20.0));
        assert_eq!(percentile(&samples, 0.0), Some(1.0));
    }

    #[test]
    fn single_sample_is_every_percentile() {
        let s = LatencySummary::from_samples(&[4.0]).unwrap();
        assert_eq!(s.count, 1);
        assert!((s.p50_ms - 4.0).abs() < f64::EPSILON);
        assert!((s.p99_ms - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_or_nan_only_gives_none() {
        assert!(percentile(&[], 0.5).is_none());
        assert!(LatencySummary::from_samples(&[f64::NAN]).is_none());
    }

    proptest! {
        #[test]
        fn percentiles_are_ordered(samples in proptest::collection::vec(0.0_f64..1e4, 1..200)) {
            let s = LatencySummary::from_samples(&samples).unwrap();
            prop_assert!(s.p50_ms <= s.p95_ms);
            prop_assert!(s.p95_ms <= s.p99_ms);
            prop_assert!(s.p99_ms <= s.max_ms);
        }
    }
}
