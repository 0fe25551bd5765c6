//! Temporal version chains and their closed-form point-in-time oracle.

use rand::seq::index;
use serde::{Deserialize, Serialize};

use super::rng::{label_salt, substream};

/// Fixed epoch all synthetic timestamps are offset from (2024-01-01T00:00:00Z).
pub const BASE_EPOCH: i64 = 1_704_067_200;

/// Longest span whose timestamps still fit in an `i64` after [`BASE_EPOCH`].
pub const MAX_TIME_SPAN: i64 = i64::MAX - BASE_EPOCH;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporalVersion {
    pub timestamp: i64,
    pub payload: String,
}

/// Versions of one logical record, timestamps strictly increasing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporalVersionChain {
    pub record_id: String,
    pub versions: Vec<TemporalVersion>,
}

impl TemporalVersionChain {
    /// Last version with `timestamp <= t`, or `None` before the first version.
    #[must_use]
    pub fn value_at(&self, t: i64) -> Option<&TemporalVersion> {
        let after = self.versions.partition_point(|v| v.timestamp <= t);
        after.checked_sub(1).map(|i| &self.versions[i])
    }

    /// Versions with `t1 <= timestamp <= t2`; empty when `t1 > t2`.
    #[must_use]
    pub fn versions_between(&self, t1: i64, t2: i64) -> &[TemporalVersion] {
        if t1 > t2 {
            return &[];
        }
        let start = self.versions.partition_point(|v| v.timestamp < t1);
        let end = self.versions.partition_point(|v| v.timestamp <= t2);
        &self.versions[start..end]
    }

    #[must_use]
    pub fn first_timestamp(&self) -> Option<i64> {
        self.versions.first().map(|v| v.timestamp)
    }

    #[must_use]
    pub fn last_timestamp(&self) -> Option<i64> {
        self.versions.last().map(|v| v.timestamp)
    }
}

/// `version_count` strictly increasing versions spread over `time_span` seconds.
///
/// When the span is shorter than the version count it is widened so that
/// timestamps stay distinct. Spans past [`MAX_TIME_SPAN`] are clamped to it.
#[must_use]
pub fn build_temporal_chain(
    seed: u64,
    record_id: &str,
    version_count: usize,
    time_span: i64,
) -> TemporalVersionChain {
    let mut versions = Vec::with_capacity(version_count);
    if version_count > 0 {
        let span = usize::try_from(time_span.clamp(0, MAX_TIME_SPAN))
            .unwrap_or(usize::MAX)
            .max(version_count);
        let mut rng = substream(seed, "temporal", &[label_salt(record_id)]);
        let mut offsets = index::sample(&mut rng, span, version_count).into_vec();
        offsets.sort_unstable();
        for (n, offset) in offsets.into_iter().enumerate() {
            let Some(timestamp) = i64::try_from(offset)
                .ok()
                .and_then(|offset| BASE_EPOCH.checked_add(offset))
            else {
                break;
            };
            versions.push(TemporalVersion {
                timestamp,
                payload: format!("{record_id}@v{n}"),
            });
        }
    }
    TemporalVersionChain {
        record_id: record_id.to_string(),
        versions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn chain(ts: &[i64]) -> TemporalVersionChain {
        TemporalVersionChain {
            record_id: "doc".to_string(),
            versions: ts
                .iter()
                .map(|t| TemporalVersion {
                    timestamp: *t,
                    payload: format!("v{t}"),
                })
                .collect(),
        }
    }

    #[test]
    fn oracle_matches_reference_points() {
        let c = chain(&[10, 20, 30]);
        assert_eq!(c.value_at(15).unwrap().payload, "v10");
        assert!(c.value_at(5).is_none());
        assert_eq!(c.value_at(30).unwrap().payload, "v30");
        assert_eq!(c.value_at(1_000).unwrap().payload, "v30");
    }

    #[test]
    fn range_oracle_is_inclusive() {
        let c = chain(&[10, 20, 30]);
        let hits: Vec<i64> = c.versions_between(10, 20).iter().map(|v| v.timestamp).collect();
        assert_eq!(hits, vec![10, 20]);
        assert!(c.versions_between(21, 29).is_empty());
        assert!(c.versions_between(30, 10).is_empty());
    }

    #[test]
    fn generated_chain_is_strictly_increasing() {
        let c = build_temporal_chain(11, "rec-1", 50, 3_600);
        assert_eq!(c.versions.len(), 50);
        assert!(c.versions.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        assert!(c.first_timestamp().unwrap() >= BASE_EPOCH);
        assert!(c.last_timestamp().unwrap() < BASE_EPOCH + 3_600);
    }

    #[test]
    fn short_span_is_widened() {
        let c = build_temporal_chain(11, "rec-2", 10, 3);
        assert_eq!(c.versions.len(), 10);
        assert!(c.versions.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn zero_versions_is_empty_not_error() {
        let c = build_temporal_chain(11, "rec-3", 0, 100);
        assert!(c.versions.is_empty());
        assert!(c.value_at(BASE_EPOCH).is_none());
    }

    #[test]
    fn extreme_spans_stay_in_range() {
        let c = build_temporal_chain(11, "rec-4", 5, i64::MAX);
        assert_eq!(c.versions.len(), 5);
        assert!(c.versions.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        assert!(c.first_timestamp().unwrap() >= BASE_EPOCH);
        assert_eq!(
            c.value_at(i64::MAX).map(|v| v.timestamp),
            c.last_timestamp()
        );

        let negative = build_temporal_chain(11, "rec-5", 3, i64::MIN);
        assert_eq!(negative.versions.len(), 3);
        assert!(negative.last_timestamp().unwrap() < BASE_EPOCH + 3);
    }

    proptest! {
        #[test]
        fn oracle_agrees_with_linear_scan(
            seed in any::<u64>(),
            count in 0usize..40,
            span in 0i64..5_000,
            offset in -10i64..6_000,
        ) {
            let c = build_temporal_chain(seed, "prop", count, span);
            let t = BASE_EPOCH + offset;
            let expected = c.versions.iter().rev().find(|v| v.timestamp <= t);
            prop_assert_eq!(c.value_at(t), expected);
            let upto = c.versions_between(i64::MIN, t).len();
            prop_assert_eq!(upto, c.versions.iter().filter(|v| v.timestamp <= t).count());
        }
    }
}
