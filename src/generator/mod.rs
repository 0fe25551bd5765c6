//! Deterministic synthetic fixtures with a-priori ground truth.
//!
//! Everything here is a pure function of `(seed, GeneratorConfig)`. Fixtures
//! are built on demand from per-fixture RNG sub-streams (see [`rng`]), so two
//! generators with the same inputs produce byte-identical fixtures no matter
//! which fixtures are requested or in what order.

#![allow(clippy::cast_possible_truncation)]

pub mod access;
pub mod graph;
pub mod keywords;
pub mod paraphrase;
pub mod rng;
pub mod temporal;
pub mod topics;

use std::collections::{BTreeMap, BTreeSet};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::core::config::{GeneratorConfig, ScaleParams};
use crate::core::errors::Result;

pub use access::{ACTIONS, AccessMatrix, AccessMatrixEntry, RuleSet, expected_rule};
pub use graph::IncidentGraph;
pub use keywords::KeywordSignal;
pub use paraphrase::ParaphraseGroup;
pub use temporal::{BASE_EPOCH, MAX_TIME_SPAN, TemporalVersion, TemporalVersionChain};
pub use topics::{GroundTruthItem, TopicCluster};

use rng::{bounded_normal, label_salt, normalize, substream};

/// Target number of documents per active topic in a corpus.
const DOCS_PER_TOPIC: usize = 10;

/// A collection's worth of items with topic membership.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Corpus {
    pub tenant: String,
    pub collection: String,
    pub items: Vec<GroundTruthItem>,
    /// Topics the items were drawn from.
    pub active_topics: Vec<usize>,
    pub topic_members: BTreeMap<usize, BTreeSet<String>>,
    pub keyword_signals: Vec<KeywordSignal>,
}

impl Corpus {
    /// Ground-truth relevant ids for a topic (empty if none).
    #[must_use]
    pub fn relevant(&self, topic: usize) -> BTreeSet<String> {
        self.topic_members.get(&topic).cloned().unwrap_or_default()
    }
}

/// A query with its ground-truth relevant set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    pub id: String,
    pub topic_id: usize,
    pub vector: Vec<f32>,
    pub text: String,
    pub relevant: BTreeSet<String>,
}

/// Every fixture family at one scale, used for determinism fingerprints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureSet {
    pub tenants: Vec<String>,
    pub corpus: Corpus,
    pub queries: Vec<QuerySpec>,
    pub temporal: Vec<TemporalVersionChain>,
    pub access: AccessMatrix,
    pub paraphrases: Vec<ParaphraseGroup>,
    pub graph: IncidentGraph,
}

impl FixtureSet {
    /// SHA-256 of each fixture family plus a combined `all` entry.
    pub fn fingerprints(&self) -> Result<BTreeMap<String, String>> {
        let mut out = BTreeMap::new();
        out.insert("tenants".to_string(), rng::fingerprint(&self.tenants)?);
        out.insert("corpus".to_string(), rng::fingerprint(&self.corpus)?);
        out.insert("queries".to_string(), rng::fingerprint(&self.queries)?);
        out.insert("temporal".to_string(), rng::fingerprint(&self.temporal)?);
        out.insert("access".to_string(), rng::fingerprint(&self.access)?);
        out.insert("paraphrases".to_string(), rng::fingerprint(&self.paraphrases)?);
        out.insert("graph".to_string(), rng::fingerprint(&self.graph)?);
        out.insert("all".to_string(), rng::fingerprint(self)?);
        Ok(out)
    }
}

/// Seeded fixture factory shared read-only by every scenario.
#[derive(Debug, Clone)]
pub struct SyntheticGenerator {
    seed: u64,
    config: GeneratorConfig,
    topics: Vec<TopicCluster>,
}

impl SyntheticGenerator {
    /// Builds the topic clusters up front; fails on non-positive topic
    /// count or dimension.
    pub fn new(seed: u64, config: &GeneratorConfig) -> Result<Self> {
        let topics = topics::build_topic_clusters(seed, config.topic_count, config.embedding_dim)?;
        Ok(Self {
            seed,
            config: config.clone(),
            topics,
        })
    }

    #[must_use]
    pub const fn seed(&self) -> u64 {
        self.seed
    }

    #[must_use]
    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    #[must_use]
    pub fn topics(&self) -> &[TopicCluster] {
        &self.topics
    }

    #[must_use]
    pub fn topic(&self, id: usize) -> Option<&TopicCluster> {
        self.topics.get(id)
    }

    /// Embedding dimension of every generated vector.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.topics.first().map_or(0, |t| t.centroid.len())
    }

    pub fn build_topic_clusters(&self, count: i64, dimension: i64) -> Result<Vec<TopicCluster>> {
        topics::build_topic_clusters(self.seed, count, dimension)
    }

    #[must_use]
    pub fn build_ground_truth_item(
        &self,
        topic: &TopicCluster,
        index: u64,
        noise_scale: f64,
    ) -> GroundTruthItem {
        topics::build_ground_truth_item(self.seed, topic, index, noise_scale)
    }

    #[must_use]
    pub fn build_keyword_signal(
        &self,
        topic: &TopicCluster,
        topic_items: &[&GroundTruthItem],
        other_items: &[&GroundTruthItem],
        in_topic_rate: f64,
        noise_rate: f64,
    ) -> KeywordSignal {
        keywords::build_keyword_signal(
            self.seed,
            topic,
            topic_items,
            other_items,
            in_topic_rate,
            noise_rate,
        )
    }

    #[must_use]
    pub fn build_paraphrase_group(&self, topic: &TopicCluster, n: usize) -> ParaphraseGroup {
        paraphrase::build_paraphrase_group(topic, n)
    }

    #[must_use]
    pub fn build_temporal_chain(
        &self,
        record_id: &str,
        version_count: usize,
        time_span: i64,
    ) -> TemporalVersionChain {
        temporal::build_temporal_chain(self.seed, record_id, version_count, time_span)
    }

    #[must_use]
    pub fn build_access_matrix(
        &self,
        subject_count: usize,
        resource_count: usize,
        rule_set: RuleSet,
    ) -> AccessMatrix {
        access::build_access_matrix(self.seed, subject_count, resource_count, rule_set)
    }

    #[must_use]
    pub fn build_incident_graph(&self, tenant: &str) -> IncidentGraph {
        graph::build_incident_graph(self.seed, tenant)
    }

    #[must_use]
    pub fn build_tenants(&self, count: usize) -> Vec<String> {
        (0..count).map(|i| format!("tenant_{i:03}")).collect()
    }

    /// `count` items spread evenly over roughly `count / 10` topics, with
    /// keyword signals injected for every active topic.
    #[must_use]
    pub fn build_corpus(&self, tenant: &str, collection: &str, count: usize) -> Corpus {
        let active = self.active_topics(tenant, collection, count);
        let salt = label_salt(&format!("{tenant}/{collection}")) & 0xffff_ffff;

        let mut items: Vec<GroundTruthItem> = (0..count)
            .filter_map(|i| {
                let topic = self.topics.get(active[i % active.len()])?;
                let mut item = self.build_ground_truth_item(
                    topic,
                    (salt << 20) | i as u64,
                    self.config.item_noise,
                );
                item.id = format!("{tenant}/{collection}/{i:05}");
                Some(item)
            })
            .collect();

        let mut topic_members: BTreeMap<usize, BTreeSet<String>> = BTreeMap::new();
        for item in &items {
            topic_members
                .entry(item.topic_id)
                .or_default()
                .insert(item.id.clone());
        }

        let signals: Vec<KeywordSignal> = active
            .iter()
            .filter_map(|t| self.topics.get(*t))
            .map(|topic| {
                let (own, other): (Vec<&GroundTruthItem>, Vec<&GroundTruthItem>) =
                    items.iter().partition(|i| i.topic_id == topic.id);
                self.build_keyword_signal(
                    topic,
                    &own,
                    &other,
                    self.config.in_topic_keyword_rate,
                    self.config.noise_keyword_rate,
                )
            })
            .collect();
        for signal in &signals {
            signal.apply(&mut items);
        }

        Corpus {
            tenant: tenant.to_string(),
            collection: collection.to_string(),
            items,
            active_topics: active,
            topic_members,
            keyword_signals: signals,
        }
    }

    /// Queries against a corpus: each targets one active topic; the query
    /// vector is the centroid plus query noise.
    #[must_use]
    pub fn build_queries(&self, corpus: &Corpus, count: usize) -> Vec<QuerySpec> {
        if corpus.active_topics.is_empty() {
            return Vec::new();
        }
        let salt = label_salt(&format!("{}/{}", corpus.tenant, corpus.collection));
        (0..count)
            .filter_map(|q| {
                let mut rng = substream(self.seed, "query", &[salt, q as u64]);
                let topic_id = corpus.active_topics[rng.random_range(0..corpus.active_topics.len())];
                let topic = self.topics.get(topic_id)?;
                let mut vector: Vec<f32> = topic
                    .centroid
                    .iter()
                    .map(|c| c + (bounded_normal(&mut rng) * self.config.query_noise) as f32)
                    .collect();
                normalize(&mut vector);
                let verb = ["fix", "resolve", "troubleshoot"][rng.random_range(0..3)];
                let terms: Vec<&str> = topic.keywords.iter().take(2).map(String::as_str).collect();
                Some(QuerySpec {
                    id: format!("query_{q:04}"),
                    topic_id,
                    vector,
                    text: format!("{verb} {} {}", terms.join(" "), topic.marker()),
                    relevant: corpus.relevant(topic_id),
                })
            })
            .collect()
    }

    /// Every fixture family at the given scale.
    #[must_use]
    pub fn fixture_set(&self, scale: &ScaleParams) -> FixtureSet {
        let tenants = self.build_tenants(scale.tenants);
        let home = tenants.first().map_or("tenant_000", String::as_str);
        let corpus = self.build_corpus(home, "docs", scale.docs_per_collection);
        let queries = self.build_queries(&corpus, scale.queries);
        let temporal = (0..scale.temporal_records)
            .map(|i| {
                self.build_temporal_chain(&format!("record_{i:04}"), scale.versions_per_record, 86_400)
            })
            .collect();
        let access = self.build_access_matrix(scale.subjects, scale.resources, RuleSet::Generated);
        let paraphrases = corpus
            .active_topics
            .iter()
            .filter_map(|t| self.topics.get(*t))
            .map(|t| self.build_paraphrase_group(t, 5))
            .collect();
        let graph = self.build_incident_graph(home);
        FixtureSet {
            tenants,
            corpus,
            queries,
            temporal,
            access,
            paraphrases,
            graph,
        }
    }

    /// Distinct topics for a corpus, chosen from the sub-stream so that
    /// different collections use different topics.
    fn active_topics(&self, tenant: &str, collection: &str, count: usize) -> Vec<usize> {
        let want = count.div_ceil(DOCS_PER_TOPIC).clamp(1, self.topics.len().max(1));
        let mut rng = substream(self.seed, "active-topics", &[label_salt(&format!("{tenant}/{collection}"))]);
        let mut picked = rand::seq::index::sample(&mut rng, self.topics.len().max(1), want).into_vec();
        picked.sort_unstable();
        picked
    }
}
