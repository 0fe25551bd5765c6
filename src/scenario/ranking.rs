//! Retrieval quality and search performance against a topic-clustered corpus.
//!
//! Quality is judged against generator ground truth: every document of the
//! query's topic is relevant, nothing else is. Keyword precision is reported
//! relative to the ceiling the generator's injection rates allow.

#![allow(clippy::cast_precision_loss)]

use std::collections::BTreeSet;
use std::thread;
use std::time::{Duration, Instant};

use super::{Scenario, ScenarioContext};
use crate::core::config::ScaleParams;
use crate::core::errors::{HarnessError, Result};
use crate::engine::{DistanceMetric, NamespaceHandle, SearchHit, VectorRecord};
use crate::generator::{Corpus, QuerySpec, SyntheticGenerator};
use crate::metrics::{ScenarioMetrics, mrr_at_k, ndcg_at_k, recall_at_k};

const COLLECTION: &str = "docs";
const SINGLE_INGEST: &str = "ingest_single";
const BATCH_INGEST: &str = "ingest_batch";
const TOP_K: usize = 10;
const HYBRID_ALPHA: f32 = 0.5;
const SEARCHES_PER_CLIENT: usize = 5;

/// Vector and hybrid search quality against graded relevance.
#[derive(Debug, Clone, Default)]
pub struct RankingScenario;

/// Corpus, queries and load settings.
#[derive(Debug, Clone)]
pub struct RankingFixtures {
    /// Documents to index.
    pub corpus: Corpus,
    /// Queries with graded relevance.
    pub queries: Vec<QuerySpec>,
    /// Loaded one record at a time and again as a single batch.
    pub ingest: Vec<VectorRecord>,
    /// Vector dimension.
    pub dimension: usize,
    /// Concurrent clients in the load phase.
    pub clients: usize,
}

/// The indexed namespace and the query plan.
#[derive(Debug)]
pub struct RankingWorkingSet {
    handle: NamespaceHandle,
    queries: Vec<(Vec<f32>, String)>,
    keyword_queries: Vec<String>,
    ingest: Vec<VectorRecord>,
    corpus_len: usize,
    dimension: usize,
    clients: usize,
}

/// Rankings and timings from the execute phase.
#[derive(Debug, Clone, Default)]
pub struct RankingResults {
    /// Hybrid search hits per query.
    pub hybrid: Vec<Vec<String>>,
    /// Vector-only search hits per query.
    pub vector: Vec<Vec<String>>,
    /// Ids with a non-zero keyword score, per keyword signal.
    pub keyword: Vec<Vec<String>>,
    /// Searches issued in the load phase.
    pub search_ops: u64,
    /// Wall time of the load phase.
    pub search_elapsed: Duration,
    /// Time to insert the sample one record at a time.
    pub single_insert: Duration,
    /// Time to insert the same sample as one batch.
    pub batch_insert: Duration,
    /// Searches attempted by concurrent clients.
    pub concurrent_attempts: u64,
    /// Concurrent searches that returned.
    pub concurrent_successes: u64,
}

fn ids(hits: Vec<SearchHit>) -> Vec<String> {
    hits.into_iter().map(|h| h.id).collect()
}

/// Fire `clients` threads of searches at the same collection at once.
fn concurrent_searches(
    handle: &NamespaceHandle,
    queries: &[(Vec<f32>, String)],
    clients: usize,
) -> (u64, u64) {
    if queries.is_empty() {
        return (0, 0);
    }
    thread::scope(|scope| {
        let workers: Vec<_> = (0..clients)
            .map(|client| {
                let handle = handle.clone();
                scope.spawn(move || {
                    (0..SEARCHES_PER_CLIENT)
                        .filter(|i| {
                            let (vector, _) = &queries[(client + i) % queries.len()];
                            handle
                                .vector_search(COLLECTION, vector, TOP_K)
                                .is_ok_and(|hits| !hits.is_empty())
                        })
                        .count() as u64
                })
            })
            .collect();
        let attempts = (clients * SEARCHES_PER_CLIENT) as u64;
        let successes = workers
            .into_iter()
            .map(|w| w.join().unwrap_or(0))
            .sum();
        (attempts, successes)
    })
}

impl Scenario for RankingScenario {
    type Fixtures = RankingFixtures;
    type WorkingSet = RankingWorkingSet;
    type RawResults = RankingResults;

    fn id(&self) -> &'static str {
        "ranking"
    }

    fn description(&self) -> &'static str {
        "hybrid and vector search quality, keyword precision, latency, ingest and concurrency"
    }

    fn parallel_safe(&self) -> bool {
        true
    }

    fn fixtures(&self, generator: &SyntheticGenerator, scale: &ScaleParams) -> Result<Self::Fixtures> {
        let tenant = generator
            .build_tenants(1)
            .pop()
            .ok_or_else(|| HarnessError::Runtime {
                details: "generator produced no tenant".to_string(),
            })?;
        let corpus = generator.build_corpus(&tenant, COLLECTION, scale.docs_per_collection);
        let queries = generator.build_queries(&corpus, scale.queries);
        let ingest = generator
            .build_corpus(&tenant, "ingest", scale.docs_per_collection)
            .items
            .iter()
            .map(|item| item.to_record())
            .collect();
        Ok(RankingFixtures {
            corpus,
            queries,
            ingest,
            dimension: generator.dimension(),
            clients: scale.concurrency_clients.max(1),
        })
    }

    fn setup(&mut self, ctx: &mut ScenarioContext, fixtures: &Self::Fixtures) -> Result<Self::WorkingSet> {
        let handle = ctx.create_namespace("main")?;
        for collection in [COLLECTION, SINGLE_INGEST, BATCH_INGEST] {
            ctx.mutate("create_collection", collection, || {
                handle.create_collection(collection, fixtures.dimension, DistanceMetric::Cosine)
            })?;
        }
        let records = fixtures.corpus.items.iter().map(|i| i.to_record()).collect();
        ctx.mutate("insert_vectors", COLLECTION, || {
            handle.insert_vectors(COLLECTION, records)
        })?;
        Ok(RankingWorkingSet {
            handle,
            queries: fixtures
                .queries
                .iter()
                .map(|q| (q.vector.clone(), q.text.clone()))
                .collect(),
            keyword_queries: fixtures
                .corpus
                .keyword_signals
                .iter()
                .map(|s| s.keyword.clone())
                .collect(),
            ingest: fixtures.ingest.clone(),
            corpus_len: fixtures.corpus.items.len(),
            dimension: fixtures.dimension,
            clients: fixtures.clients,
        })
    }

    fn execute(&mut self, ctx: &mut ScenarioContext, ws: &Self::WorkingSet) -> Result<Self::RawResults> {
        let handle = &ws.handle;
        let mut out = RankingResults::default();

        let started = Instant::now();
        for (vector, text) in &ws.queries {
            ctx.check_deadline()?;
            let hybrid = ctx.timed("hybrid_search", || {
                handle.hybrid_search(COLLECTION, vector, text, TOP_K, HYBRID_ALPHA)
            })?;
            out.hybrid.push(ids(hybrid));
            let vector_hits = ctx.timed("vector_search", || handle.vector_search(COLLECTION, vector, TOP_K))?;
            out.vector.push(ids(vector_hits));
            out.search_ops += 2;
        }
        out.search_elapsed = started.elapsed();

        // Pure keyword ranking: alpha 0 ignores the (zero) query vector.
        let blank = vec![0.0_f32; ws.dimension];
        for keyword in &ws.keyword_queries {
            let hits = ctx.timed("keyword_search", || {
                handle.hybrid_search(COLLECTION, &blank, keyword, ws.corpus_len.max(1), 0.0)
            })?;
            out.keyword
                .push(hits.into_iter().filter(|h| h.score > 0.0).map(|h| h.id).collect());
        }

        for record in &ws.ingest {
            ctx.check_deadline()?;
            let single = &mut out.single_insert;
            ctx.mutate("insert_vector", &record.id, || {
                let t = Instant::now();
                let r = handle.insert_vector(SINGLE_INGEST, record.clone());
                *single += t.elapsed();
                r
            })?;
        }
        let batch = ws.ingest.clone();
        let batch_elapsed = &mut out.batch_insert;
        ctx.mutate("insert_vectors", BATCH_INGEST, || {
            let t = Instant::now();
            let r = handle.insert_vectors(BATCH_INGEST, batch);
            *batch_elapsed = t.elapsed();
            r
        })?;

        let (attempts, successes) = concurrent_searches(handle, &ws.queries, ws.clients);
        out.concurrent_attempts = attempts;
        out.concurrent_successes = successes;
        Ok(out)
    }

    fn verify(
        &self,
        raw: &Self::RawResults,
        fixtures: &Self::Fixtures,
        metrics: &mut ScenarioMetrics,
    ) -> Result<()> {
        for (query, ranked) in fixtures.queries.iter().zip(&raw.hybrid) {
            metrics.sample("ndcg_at_10", ndcg_at_k(ranked, &query.relevant, TOP_K));
            metrics.sample("recall_at_10", recall_at_k(ranked, &query.relevant, TOP_K));
            metrics.sample("mrr_at_10", mrr_at_k(ranked, &query.relevant, TOP_K));
        }
        for (query, ranked) in fixtures.queries.iter().zip(&raw.vector) {
            metrics.sample("vector_ndcg_at_10", ndcg_at_k(ranked, &query.relevant, TOP_K));
        }

        for (signal, returned) in fixtures.corpus.keyword_signals.iter().zip(&raw.keyword) {
            if signal.expected_precision <= 0.0 {
                continue;
            }
            let relevant = fixtures.corpus.relevant(signal.topic_id);
            let returned: BTreeSet<&String> = returned.iter().collect();
            let precision = if returned.is_empty() {
                0.0
            } else {
                returned.iter().filter(|id| relevant.contains(**id)).count() as f64
                    / returned.len() as f64
            };
            metrics.sample("keyword_precision_raw", precision);
            metrics.sample(
                "keyword_precision",
                (precision / signal.expected_precision).clamp(0.0, 1.0),
            );
        }

        let elapsed = raw.search_elapsed.as_secs_f64();
        if raw.search_ops > 0 && elapsed > 0.0 {
            metrics.measured("throughput_ops_per_sec", raw.search_ops as f64 / elapsed);
        }
        let batch = raw.batch_insert.as_secs_f64();
        if batch > 0.0 {
            metrics.measured("batch_speedup", raw.single_insert.as_secs_f64() / batch);
        }
        if raw.concurrent_attempts > 0 {
            metrics.measured(
                "concurrent_search_success_rate",
                raw.concurrent_successes as f64 / raw.concurrent_attempts as f64,
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::scenario::drive;
    use crate::scenario::testing::test_env;

    #[test]
    fn reference_engine_ranks_topic_members_first() {
        let report = drive(RankingScenario, &test_env(Duration::from_secs(60)));
        assert!(report.passed(), "{:?}", report.metrics.notes);
        let m = &report.metrics;
        assert!(m.sample_mean("vector_ndcg_at_10").unwrap() > 0.9);
        assert!(m.sample_mean("ndcg_at_10").unwrap() > 0.6);
        assert!(m.sample_mean("recall_at_10").unwrap() > 0.5);
        assert!(m.sample_mean("keyword_precision").unwrap() > 0.8);
        assert_eq!(m.value("concurrent_search_success_rate").unwrap().value, 1.0);
        assert!(m.value("throughput_ops_per_sec").is_some());
        assert!(m.latency("hybrid_search").unwrap().count > 0);
        assert_eq!(m.audit_coverage(), Some(1.0));
    }

    #[test]
    fn ids_keep_rank_order() {
        let hits = vec![
            SearchHit {
                id: "b".into(),
                score: 0.9,
                metadata: Default::default(),
            },
            SearchHit {
                id: "a".into(),
                score: 0.5,
                metadata: Default::default(),
            },
        ];
        assert_eq!(ids(hits), vec!["b".to_string(), "a".to_string()]);
    }
}
