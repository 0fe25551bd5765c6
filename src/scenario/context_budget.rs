//! Token-budgeted context assembly over retrieved documents.
//!
//! Candidates come from the engine (vector search, then point reads); the
//! assembly itself is harness code, so every number here is reported as
//! simulated. Token counts use the words × 1.3 approximation.

#![allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]

use rand::Rng;
use rand::seq::IndexedRandom;
use serde_json::json;

use super::{Scenario, ScenarioContext};
use crate::core::config::ScaleParams;
use crate::core::errors::{HarnessError, Result};
use crate::engine::{DistanceMetric, NamespaceHandle, VectorRecord};
use crate::generator::SyntheticGenerator;
use crate::generator::rng::substream;
use crate::metrics::ScenarioMetrics;
use crate::provider::count_tokens;

const COLLECTION: &str = "context_documents";
const DOCUMENTS: usize = 30;
const BUDGETS: [usize; 3] = [500, 1_000, 2_000];
const BUILDS_PER_BUDGET: usize = 5;
const BUILD_CANDIDATES: usize = 10;
const STRICT_BUDGET: usize = 300;
const STRICT_BUILDS: usize = 10;
const STRICT_CANDIDATES: usize = 15;
const EFFICIENCY_SAMPLE: usize = 5;

/// Context assembly stays inside its token budget.
#[derive(Debug, Clone, Default)]
pub struct ContextBudgetScenario;

/// Approximate model tokens for `text`.
#[must_use]
pub fn approx_tokens(text: &str) -> usize {
    (count_tokens(text) as f64 * 1.3) as usize
}

/// A stored document as a context candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextDoc {
    /// Document id.
    pub id: String,
    /// Text as stored.
    pub content: String,
    /// Approximate token cost of `content`.
    pub tokens: usize,
    /// Higher priorities are packed first.
    pub priority: u8,
}

/// What [`assemble`] does when the candidates overflow the budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetMode {
    /// Stop before the first document that would not fit.
    Truncate,
    /// Refuse the whole build when the candidates do not fit.
    Strict,
}

/// An assembled context: document ids in order and their token total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assembly {
    /// Selected document ids, in packing order.
    pub ids: Vec<String>,
    /// Token total of the selected documents.
    pub tokens: usize,
}

/// Pack `candidates` by descending priority into `budget` tokens.
pub fn assemble(candidates: &[ContextDoc], budget: usize, mode: BudgetMode) -> Result<Assembly> {
    let mut ordered: Vec<&ContextDoc> = candidates.iter().collect();
    ordered.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
    let mut out = Assembly {
        ids: Vec::new(),
        tokens: 0,
    };
    for doc in ordered {
        if out.tokens + doc.tokens > budget {
            return match mode {
                BudgetMode::Truncate => Ok(out),
                BudgetMode::Strict => Err(HarnessError::Runtime {
                    details: format!(
                        "context needs more than {budget} tokens ({} before {})",
                        out.tokens, doc.id
                    ),
                }),
            };
        }
        out.tokens += doc.tokens;
        out.ids.push(doc.id.clone());
    }
    Ok(out)
}

/// Full stored-record JSON against the compact `id|content` line.
fn encodings(doc: &ContextDoc) -> Result<(usize, usize)> {
    let record = json!({
        "id": doc.id,
        "content": doc.content,
        "metadata": {
            "content": doc.content,
            "token_count": doc.tokens,
            "priority": doc.priority,
        },
    });
    let verbose = serde_json::to_string_pretty(&record).map_err(|e| HarnessError::Serialization {
        context: "context record",
        details: e.to_string(),
    })?;
    let compact = format!("{}|{}", doc.id, doc.content);
    Ok((approx_tokens(&verbose), approx_tokens(&compact)))
}

/// Documents and the queries that build contexts from them.
#[derive(Debug, Clone)]
pub struct ContextFixtures {
    /// `(id, body, priority)`; bodies are sentences from one topic.
    pub documents: Vec<(String, String, u8)>,
    /// Query text per build, in build order.
    pub queries: Vec<String>,
    /// Queries for the strict builds.
    pub strict_queries: Vec<String>,
    /// Document ids whose encodings are compared.
    pub efficiency_sample: Vec<String>,
}

/// The stored documents and the build plan.
#[derive(Debug)]
pub struct ContextWorkingSet {
    handle: NamespaceHandle,
    queries: Vec<String>,
    strict_queries: Vec<String>,
    efficiency_sample: Vec<String>,
}

/// Budgets and token totals seen per build.
#[derive(Debug, Clone, Default)]
pub struct ContextResults {
    /// `(budget, assembled tokens)` per truncating build.
    pub builds: Vec<(usize, usize)>,
    /// `(candidate tokens, outcome tokens)`; `None` when the build refused.
    pub strict: Vec<(usize, Option<usize>)>,
    /// `(verbose, compact)` token counts per sampled document.
    pub encodings: Vec<(usize, usize)>,
}

impl ContextBudgetScenario {
    /// Embed `query`, search, and read the candidates back from the engine.
    fn candidates(
        ctx: &mut ScenarioContext,
        handle: &NamespaceHandle,
        query: &str,
        k: usize,
    ) -> Result<Vec<ContextDoc>> {
        let embedding = ctx.provider().embed(query)?;
        ctx.metrics().add_usage(embedding.usage);
        let hits = ctx.timed("context_search", || handle.vector_search(COLLECTION, &embedding.vector, k))?;
        let mut docs = Vec::with_capacity(hits.len());
        for hit in hits {
            let Some(record) = handle.get_vector(COLLECTION, &hit.id)? else {
                continue;
            };
            let priority = record
                .metadata
                .get("priority")
                .and_then(|p| p.parse().ok())
                .unwrap_or(0);
            docs.push(ContextDoc {
                tokens: approx_tokens(&record.content),
                id: record.id,
                content: record.content,
                priority,
            });
        }
        Ok(docs)
    }
}

impl Scenario for ContextBudgetScenario {
    type Fixtures = ContextFixtures;
    type WorkingSet = ContextWorkingSet;
    type RawResults = ContextResults;

    fn id(&self) -> &'static str {
        "context_budget"
    }

    fn description(&self) -> &'static str {
        "context assembly respects token budgets and strict mode refuses to overflow (simulated)"
    }

    fn parallel_safe(&self) -> bool {
        true
    }

    fn fixtures(&self, generator: &SyntheticGenerator, scale: &ScaleParams) -> Result<Self::Fixtures> {
        let corpus = generator.build_corpus("tenant_000", "context", scale.docs_per_collection.max(DOCUMENTS));
        let mut rng = substream(generator.seed(), "context-docs", &[]);
        let mut documents = Vec::with_capacity(DOCUMENTS);
        for i in 0..DOCUMENTS {
            let Some(topic) = corpus.active_topics.get(i % corpus.active_topics.len().max(1)) else {
                break;
            };
            let sentences: Vec<&str> = corpus
                .items
                .iter()
                .filter(|item| item.topic_id == *topic)
                .map(|item| item.content.as_str())
                .cycle()
                .skip(i)
                .take(3 + i % 8)
                .collect();
            documents.push((format!("ctx_{i:03}"), sentences.join(" "), rng.random_range(1..=10_u8)));
        }

        let topics: Vec<String> = corpus
            .active_topics
            .iter()
            .filter_map(|t| generator.topic(*t))
            .map(|t| t.keywords.join(" "))
            .collect();
        let mut pick = |n: usize| -> Vec<String> {
            (0..n)
                .filter_map(|_| topics.choose(&mut rng).cloned())
                .collect()
        };
        let queries = pick(BUDGETS.len() * BUILDS_PER_BUDGET);
        let strict_queries = pick(STRICT_BUILDS);
        let efficiency_sample = documents
            .choose_multiple(&mut rng, EFFICIENCY_SAMPLE)
            .map(|(id, _, _)| id.clone())
            .collect();
        Ok(ContextFixtures {
            documents,
            queries,
            strict_queries,
            efficiency_sample,
        })
    }

    fn setup(&mut self, ctx: &mut ScenarioContext, fixtures: &Self::Fixtures) -> Result<Self::WorkingSet> {
        let handle = ctx.create_namespace("context")?;
        let mut records = Vec::with_capacity(fixtures.documents.len());
        for (id, body, priority) in &fixtures.documents {
            let embedding = ctx.provider().embed(body)?;
            ctx.metrics().add_usage(embedding.usage);
            records.push(VectorRecord {
                id: id.clone(),
                vector: embedding.vector,
                content: body.clone(),
                metadata: [("priority".to_string(), priority.to_string())].into(),
            });
        }
        let dimension = records.first().map_or(1, |r| r.vector.len());
        ctx.mutate("create_collection", COLLECTION, || {
            handle.create_collection(COLLECTION, dimension, DistanceMetric::Cosine)
        })?;
        ctx.mutate("insert_vectors", COLLECTION, || handle.insert_vectors(COLLECTION, records))?;
        Ok(ContextWorkingSet {
            handle,
            queries: fixtures.queries.clone(),
            strict_queries: fixtures.strict_queries.clone(),
            efficiency_sample: fixtures.efficiency_sample.clone(),
        })
    }

    fn execute(&mut self, ctx: &mut ScenarioContext, ws: &Self::WorkingSet) -> Result<Self::RawResults> {
        let handle = &ws.handle;
        let mut out = ContextResults::default();

        let budgets = BUDGETS.iter().flat_map(|b| std::iter::repeat_n(*b, BUILDS_PER_BUDGET));
        for (budget, query) in budgets.zip(&ws.queries) {
            ctx.check_deadline()?;
            let docs = Self::candidates(ctx, handle, query, BUILD_CANDIDATES)?;
            let assembly = ctx.timed("context_build", || assemble(&docs, budget, BudgetMode::Truncate))?;
            out.builds.push((budget, assembly.tokens));
        }

        for query in &ws.strict_queries {
            ctx.check_deadline()?;
            let docs = Self::candidates(ctx, handle, query, STRICT_CANDIDATES)?;
            let needed = docs.iter().map(|d| d.tokens).sum();
            let outcome = assemble(&docs, STRICT_BUDGET, BudgetMode::Strict).ok().map(|a| a.tokens);
            out.strict.push((needed, outcome));
        }

        for id in &ws.efficiency_sample {
            if let Some(record) = handle.get_vector(COLLECTION, id)? {
                let doc = ContextDoc {
                    tokens: approx_tokens(&record.content),
                    id: record.id,
                    content: record.content,
                    priority: 0,
                };
                out.encodings.push(encodings(&doc)?);
            }
        }
        Ok(out)
    }

    fn verify(
        &self,
        raw: &Self::RawResults,
        _fixtures: &Self::Fixtures,
        metrics: &mut ScenarioMetrics,
    ) -> Result<()> {
        let violations = raw.builds.iter().filter(|(budget, used)| used > budget).count();
        metrics.simulated("context_budget_violations", violations as f64);

        let mut strict_failures = 0_usize;
        for (needed, outcome) in &raw.strict {
            match outcome {
                Some(used) if *used > STRICT_BUDGET => strict_failures += 1,
                Some(_) if *needed > STRICT_BUDGET => strict_failures += 1,
                Some(_) => {}
                None => metrics.incr("strict_refusals", 1),
            }
        }
        metrics.simulated("strict_truncation_failures", strict_failures as f64);

        let (verbose, compact) = raw
            .encodings
            .iter()
            .fold((0, 0), |(v, c), (dv, dc)| (v + dv, c + dc));
        if verbose > 0 {
            let reduction = (verbose as f64 - compact as f64) / verbose as f64 * 100.0;
            metrics.simulated("token_reduction_pct", reduction);
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

    fn doc(id: &str, tokens: usize, priority: u8) -> ContextDoc {
        ContextDoc {
            id: id.into(),
            content: String::new(),
            tokens,
            priority,
        }
    }

    #[test]
    fn truncation_stops_at_the_budget() {
        let docs = [doc("a", 200, 1), doc("b", 250, 9), doc("c", 100, 5)];
        let built = assemble(&docs, 400, BudgetMode::Truncate).unwrap();
        assert_eq!(built.ids, vec!["b", "c"]);
        assert_eq!(built.tokens, 350);
    }

    #[test]
    fn strict_mode_refuses_instead_of_overflowing() {
        let docs = [doc("a", 200, 1), doc("b", 250, 9)];
        assert!(assemble(&docs, 300, BudgetMode::Strict).is_err());
        assert_eq!(assemble(&docs, 450, BudgetMode::Strict).unwrap().tokens, 450);
    }

    #[test]
    fn token_approximation() {
        assert_eq!(approx_tokens("one two three four five six seven eight nine ten"), 13);
        assert_eq!(approx_tokens(""), 0);
    }

    #[test]
    fn compact_encoding_saves_tokens() {
        let d = ContextDoc {
            id: "ctx_000".into(),
            content: "alpha beta gamma delta epsilon zeta eta theta".into(),
            tokens: 10,
            priority: 3,
        };
        let (verbose, compact) = encodings(&d).unwrap();
        assert!(compact * 2 <= verbose, "{compact} vs {verbose}");
    }

    #[test]
    fn scenario_reports_simulated_budget_metrics() {
        let report = drive(ContextBudgetScenario, &test_env(Duration::from_secs(30)));
        assert!(report.passed(), "{:?}", report.metrics.notes);
        let m = &report.metrics;
        assert_eq!(m.value("context_budget_violations").unwrap().value, 0.0);
        assert_eq!(m.value("strict_truncation_failures").unwrap().value, 0.0);
        assert!(m.value("token_reduction_pct").unwrap().value >= 25.0);
        assert!(m.counter("strict_refusals").unwrap() > 0);
        assert!(m.usage.calls > 0);
    }
}
