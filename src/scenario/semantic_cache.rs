//! Semantic response cache, simulated on top of the provider and the engine's
//! key-value space.
//!
//! Prompts are rewritten by the provider, stripped of the phrasing shared by
//! every paraphrase family, embedded, and looked up by cosine similarity.
//! A lookup that lands on another topic's entry is a false hit. The engine
//! only stores cached responses, so the resulting rates are reported as
//! simulated.

#![allow(clippy::cast_precision_loss)]

use std::collections::{BTreeMap, BTreeSet};

use super::{Scenario, ScenarioContext};
use crate::core::config::ScaleParams;
use crate::core::errors::Result;
use crate::engine::{DistanceMetric, NamespaceHandle};
use crate::generator::{ParaphraseGroup, SyntheticGenerator};
use crate::metrics::ScenarioMetrics;
use crate::provider::GenerateOptions;
use crate::provider::deterministic::content_words;

const PARAPHRASES: usize = 5;
const SIMILARITY_THRESHOLD: f32 = 0.85;
/// Hashed variants per key token, so a single bucket collision cannot merge keys.
const KEY_VARIANTS: usize = 8;

/// Paraphrases hit the cache and unrelated prompts miss.
#[derive(Debug, Clone, Default)]
pub struct SemanticCacheScenario;

/// Paraphrase groups and the lookups made against them.
#[derive(Debug, Clone)]
pub struct CacheFixtures {
    /// Prompts grouped by meaning.
    pub groups: Vec<ParaphraseGroup>,
    /// Words that occur in more than one family: phrasing, not meaning.
    pub shared_phrasing: BTreeSet<String>,
}

/// The cache namespace and lookup plan.
#[derive(Debug)]
pub struct CacheWorkingSet {
    handle: NamespaceHandle,
    prompts: Vec<(usize, String)>,
    shared_phrasing: BTreeSet<String>,
}

/// Result of one cache lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// Nothing close enough was cached.
    Miss,
    /// Served from the entry cached for `topic_id`.
    Hit {
        /// Topic of the entry that served the lookup.
        topic_id: usize,
        /// Whether the entry's payload was still in the engine.
        stored: bool,
    },
}

/// Lookups in issue order.
#[derive(Debug, Clone, Default)]
pub struct CacheResults {
    /// `(asked topic, outcome)` per prompt, in ask order.
    pub lookups: Vec<(usize, Lookup)>,
}

struct Entry {
    key: Vec<f32>,
    topic_id: usize,
    storage_key: String,
}

/// Cache key text: meaningful words, each expanded into several variants.
fn key_text(rewrite: &str, shared: &BTreeSet<String>) -> String {
    content_words(rewrite)
        .into_iter()
        .filter(|w| !shared.contains(w))
        .flat_map(|w| (0..KEY_VARIANTS).map(move |i| format!("{w}-{i}")))
        .collect::<Vec<_>>()
        .join(" ")
}

fn shared_phrasing(groups: &[ParaphraseGroup]) -> BTreeSet<String> {
    let mut families: BTreeMap<String, BTreeSet<usize>> = BTreeMap::new();
    for (i, group) in groups.iter().enumerate() {
        for prompt in &group.prompts {
            for word in content_words(prompt) {
                families.entry(word).or_default().insert(i);
            }
        }
    }
    families
        .into_iter()
        .filter(|(_, seen_in)| seen_in.len() > 1)
        .map(|(word, _)| word)
        .collect()
}

impl Scenario for SemanticCacheScenario {
    type Fixtures = CacheFixtures;
    type WorkingSet = CacheWorkingSet;
    type RawResults = CacheResults;

    fn id(&self) -> &'static str {
        "semantic_cache"
    }

    fn description(&self) -> &'static str {
        "paraphrases of a cached prompt hit the cache; other topics never do (simulated)"
    }

    fn parallel_safe(&self) -> bool {
        true
    }

    fn fixtures(&self, generator: &SyntheticGenerator, scale: &ScaleParams) -> Result<Self::Fixtures> {
        let corpus = generator.build_corpus("tenant_000", "docs", scale.docs_per_collection);
        let groups: Vec<ParaphraseGroup> = corpus
            .active_topics
            .iter()
            .filter_map(|t| generator.topic(*t))
            .map(|t| generator.build_paraphrase_group(t, PARAPHRASES))
            .collect();
        Ok(CacheFixtures {
            shared_phrasing: shared_phrasing(&groups),
            groups,
        })
    }

    fn setup(&mut self, ctx: &mut ScenarioContext, fixtures: &Self::Fixtures) -> Result<Self::WorkingSet> {
        let handle = ctx.create_namespace("cache")?;
        let prompts = fixtures
            .groups
            .iter()
            .flat_map(|g| g.prompts.iter().map(|p| (g.topic_id, p.clone())))
            .collect();
        Ok(CacheWorkingSet {
            handle,
            prompts,
            shared_phrasing: fixtures.shared_phrasing.clone(),
        })
    }

    fn execute(&mut self, ctx: &mut ScenarioContext, ws: &Self::WorkingSet) -> Result<Self::RawResults> {
        let provider = ctx.provider().clone();
        let options = GenerateOptions::default();
        let mut entries: Vec<Entry> = Vec::new();
        let mut out = CacheResults::default();

        for (topic_id, prompt) in &ws.prompts {
            ctx.check_deadline()?;
            let rewrite = provider.generate(prompt, &options)?;
            ctx.metrics().add_usage(rewrite.usage);
            let embedding = provider.embed(&key_text(&rewrite.text, &ws.shared_phrasing))?;
            ctx.metrics().add_usage(embedding.usage);

            let best = ctx.timed("cache_lookup", || {
                entries
                    .iter()
                    .map(|e| (DistanceMetric::Cosine.score(&embedding.vector, &e.key), e))
                    .filter(|(score, _)| *score >= SIMILARITY_THRESHOLD)
                    .max_by(|a, b| a.0.total_cmp(&b.0))
                    .map(|(_, e)| (e.topic_id, e.storage_key.clone()))
            });

            let lookup = match best {
                Some((hit_topic, storage_key)) => {
                    let stored = ctx.timed("cache_read", || ws.handle.get(&storage_key))?.is_some();
                    Lookup::Hit {
                        topic_id: hit_topic,
                        stored,
                    }
                }
                None => {
                    let storage_key = format!("cache/{:05}", entries.len());
                    let response = format!("answer for topic {topic_id}: {}", rewrite.text);
                    ctx.mutate("put", &storage_key, || {
                        ws.handle.put(&storage_key, response.as_bytes())
                    })?;
                    entries.push(Entry {
                        key: embedding.vector,
                        topic_id: *topic_id,
                        storage_key,
                    });
                    Lookup::Miss
                }
            };
            out.lookups.push((*topic_id, lookup));
        }
        Ok(out)
    }

    fn verify(
        &self,
        raw: &Self::RawResults,
        _fixtures: &Self::Fixtures,
        metrics: &mut ScenarioMetrics,
    ) -> Result<()> {
        let mut hits = 0_u64;
        let mut false_hits = 0_u64;
        for (asked, lookup) in &raw.lookups {
            match lookup {
                Lookup::Miss => metrics.incr("cache_misses", 1),
                Lookup::Hit { topic_id, stored } => {
                    if !stored {
                        metrics.incr("cache_entry_missing", 1);
                    }
                    if topic_id == asked {
                        hits += 1;
                    } else {
                        false_hits += 1;
                    }
                }
            }
        }
        if !raw.lookups.is_empty() {
            let total = raw.lookups.len() as f64;
            metrics.simulated("cache_hit_rate", hits as f64 / total);
            metrics.simulated("cache_false_hit_rate", false_hits as f64 / total);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use super::*;
    use crate::core::config::ProviderConfig;
    use crate::logger::EventLog;
    use crate::metrics::Provenance;
    use crate::provider::{
        DeterministicProvider, Embedding, Generation, Provider, ProviderError, RetryPolicy,
        RetryingProvider,
    };
    use crate::scenario::testing::test_env;
    use crate::scenario::{ScenarioState, drive};

    /// Answers like the deterministic provider, but only after `delay`.
    struct SlowProvider {
        inner: DeterministicProvider,
        delay: Duration,
    }

    impl Provider for SlowProvider {
        fn name(&self) -> &str {
            "slow"
        }

        fn embed(&self, text: &str) -> std::result::Result<Embedding, ProviderError> {
            self.inner.embed(text)
        }

        fn generate(
            &self,
            prompt: &str,
            options: &GenerateOptions,
        ) -> std::result::Result<Generation, ProviderError> {
            thread::sleep(self.delay);
            self.inner.generate(prompt, options)
        }
    }

    #[test]
    fn paraphrases_hit_and_families_stay_apart() {
        let report = drive(SemanticCacheScenario, &test_env(Duration::from_secs(30)));
        assert!(report.passed(), "{:?}", report.metrics.notes);
        let m = &report.metrics;
        let hit = m.value("cache_hit_rate").unwrap();
        assert_eq!(hit.provenance, Provenance::Simulated);
        assert!(hit.value >= 0.8 - 1e-9, "hit rate {}", hit.value);
        assert_eq!(m.value("cache_false_hit_rate").unwrap().value, 0.0);
        assert!(m.usage.calls > 0);
        assert_eq!(m.counter("cache_entry_missing"), None);
    }

    #[test]
    fn shared_words_are_stripped_from_keys() {
        let shared = BTreeSet::from(["fix".to_string(), "issues".to_string()]);
        let key = key_text("fix ledger017 issues", &shared);
        assert!(key.starts_with("ledger017-0 "));
        assert_eq!(key.split_whitespace().count(), KEY_VARIANTS);
    }

    #[test]
    fn hung_provider_call_is_cut_off_at_the_budget() {
        let mut env = test_env(Duration::from_millis(500));
        env.provider = RetryingProvider::new(
            Arc::new(SlowProvider {
                inner: DeterministicProvider::new(7, 32),
                delay: Duration::from_secs(3),
            }),
            RetryPolicy::from(&ProviderConfig::default()),
            EventLog::disabled(),
        );

        let started = Instant::now();
        let report = drive(SemanticCacheScenario, &env);
        let elapsed = started.elapsed();

        assert!(elapsed < Duration::from_millis(1_500), "took {elapsed:?}");
        assert_eq!(report.state, ScenarioState::Errored);
        assert_eq!(report.error.unwrap().code, "ECH-3003");
        assert_eq!(report.trace.last(), Some(&ScenarioState::TornDown));
        assert!(!env.engine.namespace_exists("semantic_cache_7_cache").unwrap());
    }
}
