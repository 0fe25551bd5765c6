//! Unclean shutdown and recovery.
//!
//! Half the records are written and checkpointed, the other half are only
//! acknowledged; then the engine is closed uncleanly and reopened. Every
//! acknowledged write must survive with intact vectors and links. The crash
//! is engine-wide, so this scenario never runs alongside others.

#![allow(clippy::cast_precision_loss)]

use super::{Scenario, ScenarioContext};
use crate::core::config::ScaleParams;
use crate::core::errors::{HarnessError, Result};
use crate::engine::{
    DistanceMetric, EngineError, GraphEdge, GraphNode, NamespaceHandle, VectorRecord,
};
use crate::generator::SyntheticGenerator;
use crate::metrics::ScenarioMetrics;

const COLLECTION: &str = "docs";
const LINK: &str = "follows";

/// Acknowledged writes survive an unclean close.
#[derive(Debug, Clone, Default)]
pub struct CrashRecoveryScenario;

/// One record written before the crash.
#[derive(Debug, Clone)]
pub struct CrashRecord {
    /// Key of the value write.
    pub key: String,
    /// Value written under `key`.
    pub value: String,
    /// Vector written alongside the value.
    pub vector: VectorRecord,
}

/// Records split around the flush point.
#[derive(Debug, Clone)]
pub struct CrashFixtures {
    /// Written and checkpointed before the crash.
    pub durable: Vec<CrashRecord>,
    /// Acknowledged after the checkpoint; only the log has them.
    pub unflushed: Vec<CrashRecord>,
    /// Vector dimension.
    pub dimension: usize,
}

impl CrashFixtures {
    fn all(&self) -> impl Iterator<Item = &CrashRecord> {
        self.durable.iter().chain(&self.unflushed)
    }
}

/// The namespace that was crashed and reopened.
#[derive(Debug)]
pub struct CrashWorkingSet {
    handle: NamespaceHandle,
    unflushed: Vec<CrashRecord>,
    /// Node ids in write order; each links to its predecessor.
    written: Vec<String>,
    keys: Vec<String>,
}

/// What the reopened engine returned.
#[derive(Debug, Clone, Default)]
pub struct CrashResults {
    /// Log entries the engine reports replaying.
    pub replayed_entries: u64,
    /// `(key, value read back)` per record.
    pub values: Vec<(String, Option<String>)>,
    /// `(id, dimension read back)` per vector; `None` when the vector is gone.
    pub vectors: Vec<(String, Option<usize>)>,
    /// Neighbor sets of every node, `None` when the node itself is gone.
    pub links: Vec<(String, Option<Vec<String>>)>,
}

fn write_record(
    ctx: &mut ScenarioContext,
    handle: &NamespaceHandle,
    record: &CrashRecord,
    previous: Option<&str>,
) -> Result<()> {
    ctx.mutate("put", &record.key, || handle.put(&record.key, record.value.as_bytes()))?;
    ctx.mutate("insert_vector", &record.vector.id, || {
        handle.insert_vector(COLLECTION, record.vector.clone())
    })?;
    let node = GraphNode {
        id: record.vector.id.clone(),
        kind: "doc".to_string(),
        properties: Default::default(),
    };
    ctx.mutate("add_node", &record.vector.id, || handle.add_node(node))?;
    if let Some(prev) = previous {
        let edge = GraphEdge {
            from: record.vector.id.clone(),
            to: prev.to_string(),
            kind: LINK.to_string(),
        };
        ctx.mutate("add_edge", &record.vector.id, || handle.add_edge(edge))?;
    }
    Ok(())
}

impl Scenario for CrashRecoveryScenario {
    type Fixtures = CrashFixtures;
    type WorkingSet = CrashWorkingSet;
    type RawResults = CrashResults;

    fn id(&self) -> &'static str {
        "crash_recovery"
    }

    fn description(&self) -> &'static str {
        "acknowledged writes survive an unclean shutdown with vectors and links intact"
    }

    fn fixtures(&self, generator: &SyntheticGenerator, scale: &ScaleParams) -> Result<Self::Fixtures> {
        let corpus = generator.build_corpus("tenant_000", "crash", scale.docs_per_collection.max(2));
        let mut records: Vec<CrashRecord> = corpus
            .items
            .iter()
            .map(|item| CrashRecord {
                key: format!("ack/{}", item.id),
                value: item.content.clone(),
                vector: item.to_record(),
            })
            .collect();
        let unflushed = records.split_off(records.len() / 2);
        Ok(CrashFixtures {
            durable: records,
            unflushed,
            dimension: generator.dimension(),
        })
    }

    fn setup(&mut self, ctx: &mut ScenarioContext, fixtures: &Self::Fixtures) -> Result<Self::WorkingSet> {
        let handle = ctx.create_namespace("main")?;
        ctx.mutate("create_collection", COLLECTION, || {
            handle.create_collection(COLLECTION, fixtures.dimension, DistanceMetric::Cosine)
        })?;
        let mut written: Vec<String> = Vec::new();
        for record in &fixtures.durable {
            ctx.check_deadline()?;
            write_record(ctx, &handle, record, written.last().map(String::as_str))?;
            written.push(record.vector.id.clone());
        }
        let engine = handle.engine().clone();
        ctx.mutate("checkpoint", "engine", || {
            engine
                .checkpoint()
                .map_err(|e| HarnessError::engine("checkpoint", e))
        })?;
        Ok(CrashWorkingSet {
            handle,
            unflushed: fixtures.unflushed.clone(),
            written,
            keys: fixtures.all().map(|r| r.key.clone()).collect(),
        })
    }

    fn execute(&mut self, ctx: &mut ScenarioContext, ws: &Self::WorkingSet) -> Result<Self::RawResults> {
        let handle = &ws.handle;
        let mut nodes = ws.written.clone();
        for record in &ws.unflushed {
            ctx.check_deadline()?;
            write_record(ctx, handle, record, nodes.last().map(String::as_str))?;
            nodes.push(record.vector.id.clone());
        }

        let engine = handle.engine().clone();
        ctx.mutate("close_unclean", "engine", || {
            engine
                .close_unclean()
                .map_err(|e| HarnessError::engine("close_unclean", e))
        })?;
        let stats = ctx.mutate("reopen", "engine", || {
            engine.reopen().map_err(|e| HarnessError::engine("reopen", e))
        })?;

        let mut out = CrashResults {
            replayed_entries: stats.replayed_entries,
            ..CrashResults::default()
        };
        for key in &ws.keys {
            let value = handle.get(key)?;
            out.values
                .push((key.clone(), value.map(|v| String::from_utf8_lossy(&v).into_owned())));
        }
        for id in &nodes {
            let dimension = handle.get_vector(COLLECTION, id)?.map(|r| r.vector.len());
            out.vectors.push((id.clone(), dimension));
            let links = match handle.neighbors(id, Some(LINK)) {
                Ok(found) => Some(found),
                Err(HarnessError::TargetEngine {
                    source: EngineError::NodeNotFound { .. },
                    ..
                }) => None,
                Err(err) => return Err(err),
            };
            out.links.push((id.clone(), links));
        }
        Ok(out)
    }

    fn verify(
        &self,
        raw: &Self::RawResults,
        fixtures: &Self::Fixtures,
        metrics: &mut ScenarioMetrics,
    ) -> Result<()> {
        metrics.observe("crash_consistency_violations");
        let expected: Vec<&CrashRecord> = fixtures.all().collect();

        for (record, (_, seen)) in expected.iter().zip(&raw.values) {
            if seen.as_deref() != Some(record.value.as_str()) {
                metrics.incr("crash_consistency_violations", 1);
                metrics.incr("crash_lost_writes", 1);
            }
        }
        for (_, dimension) in &raw.vectors {
            if *dimension != Some(fixtures.dimension) {
                metrics.incr("crash_consistency_violations", 1);
                metrics.incr("crash_bad_vectors", 1);
            }
        }
        for (i, (id, links)) in raw.links.iter().enumerate() {
            let mut want: Vec<&str> = Vec::new();
            if i > 0 {
                want.push(expected[i - 1].vector.id.as_str());
            }
            if let Some(next) = expected.get(i + 1) {
                want.push(next.vector.id.as_str());
            }
            want.sort_unstable();
            let intact = links.as_ref().is_some_and(|found| {
                let mut found: Vec<&str> = found.iter().map(String::as_str).collect();
                found.sort_unstable();
                found == want
            });
            if !intact {
                metrics.incr("crash_consistency_violations", 1);
                metrics.note(format!("links of {id} not restored"));
            }
        }

        let lost = metrics.counter("crash_lost_writes").unwrap_or(0);
        if lost > 0 {
            metrics.note(format!("{lost} acknowledged writes missing after reopen"));
        }
        metrics.measured("recovery_replayed_entries", raw.replayed_entries as f64);
        Ok(())
    }
}
