//! Point-in-time reads over version chains.
//!
//! Every version is written with `put_at`; reads at chosen times must match
//! the chain's closed-form oracle, including "nothing yet" before the first
//! version. Range reads use the engine's own history read and must return
//! exactly the oracle's inclusive range, timestamps included.

use super::{Scenario, ScenarioContext};
use crate::core::config::ScaleParams;
use crate::core::errors::Result;
use crate::engine::NamespaceHandle;
use crate::generator::{SyntheticGenerator, TemporalVersionChain};
use crate::metrics::ScenarioMetrics;

/// Seconds a chain's versions are spread over.
const CHAIN_SPAN: i64 = 86_400;

/// As-of reads and history ranges over version chains.
#[derive(Debug, Clone, Default)]
pub struct TemporalScenario;

/// One point-in-time read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsOfQuery {
    /// Record the read is for.
    pub record_id: String,
    /// Read time, in epoch seconds.
    pub at: i64,
}

/// One inclusive history range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeQuery {
    /// Record the range is for.
    pub record_id: String,
    /// First timestamp included.
    pub from: i64,
    /// Last timestamp included.
    pub to: i64,
}

/// Version chains and the reads made against them.
#[derive(Debug, Clone)]
pub struct TemporalFixtures {
    /// One chain per record.
    pub chains: Vec<TemporalVersionChain>,
    /// Point-in-time reads.
    pub as_of: Vec<AsOfQuery>,
    /// History range reads.
    pub ranges: Vec<RangeQuery>,
}

/// The history namespace and the read plan.
#[derive(Debug)]
pub struct TemporalWorkingSet {
    handle: NamespaceHandle,
    as_of: Vec<AsOfQuery>,
    ranges: Vec<RangeQuery>,
}

/// Values seen by each read.
#[derive(Debug, Clone, Default)]
pub struct TemporalResults {
    /// Value per as-of read; `None` before the first version.
    pub as_of: Vec<Option<String>>,
    /// `(timestamp, payload)` rows per range query, as returned.
    pub ranges: Vec<Vec<(i64, String)>>,
}

fn record_key(record_id: &str) -> String {
    format!("rec/{record_id}")
}

/// Query times: before the first version, at each version, between
/// consecutive versions and after the last.
fn query_times(chain: &TemporalVersionChain) -> Vec<i64> {
    let (Some(first), Some(last)) = (chain.first_timestamp(), chain.last_timestamp()) else {
        return Vec::new();
    };
    let mut at = vec![first - 1];
    for pair in chain.versions.windows(2) {
        at.push(pair[0].timestamp);
        at.push(pair[0].timestamp + (pair[1].timestamp - pair[0].timestamp) / 2);
    }
    at.push(last);
    at.push(last + 3_600);
    at
}

fn ranges_for(chain: &TemporalVersionChain) -> Vec<(i64, i64)> {
    let (Some(first), Some(last)) = (chain.first_timestamp(), chain.last_timestamp()) else {
        return Vec::new();
    };
    let mid = first + (last - first) / 2;
    vec![(first, mid), (mid + 1, last), (first - 10, last + 10), (last + 1, last + 100)]
}

impl Scenario for TemporalScenario {
    type Fixtures = TemporalFixtures;
    type WorkingSet = TemporalWorkingSet;
    type RawResults = TemporalResults;

    fn id(&self) -> &'static str {
        "temporal"
    }

    fn description(&self) -> &'static str {
        "as-of reads and version ranges must match the version-chain oracle"
    }

    fn parallel_safe(&self) -> bool {
        true
    }

    fn fixtures(&self, generator: &SyntheticGenerator, scale: &ScaleParams) -> Result<Self::Fixtures> {
        let chains: Vec<TemporalVersionChain> = (0..scale.temporal_records)
            .map(|i| {
                generator.build_temporal_chain(
                    &format!("record_{i:04}"),
                    scale.versions_per_record,
                    CHAIN_SPAN,
                )
            })
            .collect();
        let as_of = chains
            .iter()
            .flat_map(|chain| {
                query_times(chain).into_iter().map(|at| AsOfQuery {
                    record_id: chain.record_id.clone(),
                    at,
                })
            })
            .collect();
        let ranges = chains
            .iter()
            .flat_map(|chain| {
                ranges_for(chain).into_iter().map(|(from, to)| RangeQuery {
                    record_id: chain.record_id.clone(),
                    from,
                    to,
                })
            })
            .collect();
        Ok(TemporalFixtures {
            chains,
            as_of,
            ranges,
        })
    }

    fn setup(&mut self, ctx: &mut ScenarioContext, fixtures: &Self::Fixtures) -> Result<Self::WorkingSet> {
        let handle = ctx.create_namespace("history")?;
        for chain in &fixtures.chains {
            ctx.check_deadline()?;
            let key = record_key(&chain.record_id);
            for version in &chain.versions {
                let payload = version.payload.as_bytes();
                ctx.mutate("put_at", &key, || handle.put_at(&key, version.timestamp, payload))?;
            }
        }
        Ok(TemporalWorkingSet {
            handle,
            as_of: fixtures.as_of.clone(),
            ranges: fixtures.ranges.clone(),
        })
    }

    fn execute(&mut self, ctx: &mut ScenarioContext, ws: &Self::WorkingSet) -> Result<Self::RawResults> {
        let handle = &ws.handle;
        let mut out = TemporalResults::default();
        for query in &ws.as_of {
            ctx.check_deadline()?;
            let key = record_key(&query.record_id);
            let value = ctx.timed("temporal_query", || handle.get_as_of(&key, query.at))?;
            out.as_of
                .push(value.map(|v| String::from_utf8_lossy(&v).into_owned()));
        }
        for query in &ws.ranges {
            ctx.check_deadline()?;
            let key = record_key(&query.record_id);
            let rows = ctx.timed("temporal_range", || {
                handle.history_between(&key, query.from, query.to)
            })?;
            out.ranges.push(
                rows.into_iter()
                    .map(|(ts, value)| (ts, String::from_utf8_lossy(&value).into_owned()))
                    .collect(),
            );
        }
        Ok(out)
    }

    fn verify(
        &self,
        raw: &Self::RawResults,
        fixtures: &Self::Fixtures,
        metrics: &mut ScenarioMetrics,
    ) -> Result<()> {
        metrics.observe("time_travel_mismatches");
        let chain_of = |id: &str| fixtures.chains.iter().find(|c| c.record_id == id);

        for (query, seen) in fixtures.as_of.iter().zip(&raw.as_of) {
            let expected = chain_of(&query.record_id)
                .and_then(|c| c.value_at(query.at))
                .map(|v| v.payload.as_str());
            if seen.as_deref() != expected {
                metrics.incr("time_travel_mismatches", 1);
                metrics.note(format!(
                    "{} as of {}: expected {expected:?}, got {seen:?}",
                    query.record_id, query.at
                ));
            }
        }

        for (query, seen) in fixtures.ranges.iter().zip(&raw.ranges) {
            let expected = chain_of(&query.record_id)
                .map(|c| c.versions_between(query.from, query.to))
                .unwrap_or_default();
            let matches = seen.len() == expected.len()
                && seen
                    .iter()
                    .zip(expected)
                    .all(|((ts, payload), v)| *ts == v.timestamp && *payload == v.payload);
            if !matches {
                metrics.incr("time_travel_mismatches", 1);
                metrics.incr("temporal_range_mismatches", 1);
                metrics.note(format!(
                    "{} between {} and {}: expected {} versions, got {}",
                    query.record_id,
                    query.from,
                    query.to,
                    expected.len(),
                    seen.len()
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::engine::{EngineFaults, MemoryEngine};
    use crate::generator::TemporalVersion;
    use crate::scenario::drive;
    use crate::scenario::testing::{env_with_engine, test_env};

    #[test]
    fn query_times_cover_before_between_and_after() {
        let chain = TemporalVersionChain {
            record_id: "r".into(),
            versions: [100, 200]
                .iter()
                .map(|t| TemporalVersion {
                    timestamp: *t,
                    payload: format!("v{t}"),
                })
                .collect(),
        };
        assert_eq!(query_times(&chain), vec![99, 100, 150, 200, 3_800]);
    }

    #[test]
    fn reference_engine_matches_oracle() {
        let report = drive(TemporalScenario, &test_env(Duration::from_secs(30)));
        assert!(report.passed(), "{:?}", report.metrics.notes);
        assert_eq!(report.metrics.counter("time_travel_mismatches"), Some(0));
        assert!(report.metrics.latency("temporal_query").unwrap().count > 0);
        assert!(report.metrics.latency("temporal_range").unwrap().count > 0);
        assert_eq!(report.metrics.counter("temporal_range_mismatches"), None);
        assert!(report.metrics.mutations.iter().all(|m| m.operation != "put"));
    }

    #[test]
    fn stale_reads_are_caught() {
        let engine = Arc::new(MemoryEngine::with_faults(EngineFaults {
            stale_time_travel: true,
            ..EngineFaults::default()
        }));
        let report = drive(TemporalScenario, &env_with_engine(engine, Duration::from_secs(30)));
        assert!(!report.passed());
        assert!(report.metrics.counter("time_travel_mismatches").unwrap() > 0);
        assert!(report.metrics.counter("temporal_range_mismatches").unwrap() > 0);
    }
}
