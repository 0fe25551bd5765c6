//! Target-engine interface: the narrow client surface the harness drives,
//! plus an in-process reference implementation.
//!
//! The harness never looks inside the engine under test. Every scenario goes
//! through [`TargetEngine`] (usually via a [`NamespaceHandle`]) and judges the
//! engine only by its observable responses.

pub mod memory;
pub mod namespace;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::{EngineFaults, MemoryEngine};
pub use namespace::NamespaceHandle;

/// Result alias for raw engine calls.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Failures reported by the engine under test.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    /// Namespace does not exist.
    #[error("namespace not found: {namespace}")]
    NamespaceNotFound { namespace: String },
    /// Namespace already exists.
    #[error("namespace already exists: {namespace}")]
    NamespaceExists { namespace: String },
    /// Collection does not exist in the namespace.
    #[error("collection not found: {namespace}/{collection}")]
    CollectionNotFound {
        namespace: String,
        collection: String,
    },
    /// Collection already exists in the namespace.
    #[error("collection already exists: {namespace}/{collection}")]
    CollectionExists {
        namespace: String,
        collection: String,
    },
    /// Vector length does not match the collection dimension.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    /// Unknown or already finished transaction.
    #[error("transaction not found: {txn}")]
    TxnNotFound { txn: TxnId },
    /// Commit lost a write-write race.
    #[error("transaction conflict on key {key}")]
    Conflict { key: String },
    /// Graph node missing for an edge endpoint.
    #[error("graph node not found: {id}")]
    NodeNotFound { id: String },
    /// Engine was closed (cleanly or not) and not reopened.
    #[error("engine is closed")]
    Closed,
    /// Any other refusal.
    #[error("rejected: {details}")]
    Rejected { details: String },
}

impl EngineError {
    /// Whether this is a transaction conflict that a caller may retry.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Similarity function used by a vector collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    #[default]
    Cosine,
    Dot,
    Euclidean,
}

impl DistanceMetric {
    /// Score two vectors; higher is always more similar.
    #[must_use]
    pub fn score(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Self::Dot => dot(a, b),
            Self::Cosine => {
                let denom = norm(a) * norm(b);
                if denom <= f32::EPSILON {
                    0.0
                } else {
                    dot(a, b) / denom
                }
            }
            Self::Euclidean => {
                let dist: f32 = a
                    .iter()
                    .zip(b)
                    .map(|(x, y)| (x - y) * (x - y))
                    .sum::<f32>()
                    .sqrt();
                -dist
            }
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn norm(a: &[f32]) -> f32 {
    dot(a, a).sqrt()
}

/// One stored vector document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub content: String,
    pub metadata: BTreeMap<String, String>,
}

/// One ranked search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
    pub metadata: BTreeMap<String, String>,
}

/// Opaque transaction handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxnId(pub u64);

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn-{}", self.0)
    }
}

/// Graph vertex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub kind: String,
    pub properties: BTreeMap<String, String>,
}

/// Undirected, typed graph edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
    pub kind: String,
}

/// Outcome of an access check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    Allow,
    Deny,
}

/// Access-control rule. `subject` and `action` accept `*`; `resource`
/// accepts a trailing `*` as a prefix wildcard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRule {
    pub rule_id: String,
    pub subject: String,
    pub resource: String,
    pub action: String,
    pub effect: Effect,
    pub priority: u32,
    pub reason: String,
}

impl AccessRule {
    /// Whether this rule applies to the `(subject, resource, action)` triple.
    #[must_use]
    pub fn matches(&self, subject: &str, resource: &str, action: &str) -> bool {
        let subject_ok = self.subject == "*" || self.subject == subject;
        let action_ok = self.action == "*" || self.action == action;
        let resource_ok = self
            .resource
            .strip_suffix('*')
            .map_or(self.resource == resource, |prefix| {
                resource.starts_with(prefix)
            });
        subject_ok && action_ok && resource_ok
    }
}

/// Rule id reported when no rule matches.
pub const DEFAULT_DENY_RULE: &str = "default-deny";

/// Pick the winning rule: highest priority, deny beats allow on ties,
/// then lowest rule id for determinism.
#[must_use]
pub fn resolve_rules<'a>(
    rules: impl IntoIterator<Item = &'a AccessRule>,
    subject: &str,
    resource: &str,
    action: &str,
) -> Option<&'a AccessRule> {
    rules
        .into_iter()
        .filter(|rule| rule.matches(subject, resource, action))
        .min_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| effect_rank(a.effect).cmp(&effect_rank(b.effect)))
                .then_with(|| a.rule_id.cmp(&b.rule_id))
        })
}

const fn effect_rank(effect: Effect) -> u8 {
    match effect {
        Effect::Deny => 0,
        Effect::Allow => 1,
    }
}

/// Engine answer to an access check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessDecision {
    pub effect: Effect,
    pub rule_id: Option<String>,
    pub explanation: Option<String>,
}

/// What the engine reported after reopening from an unclean close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RecoveryStats {
    pub replayed_entries: u64,
}

/// The client surface of the engine under test.
///
/// Implementations must be shareable across scenario workers.
pub trait TargetEngine: Send + Sync {
    /// Short label for logs and run metadata.
    fn name(&self) -> &str;

    fn create_namespace(&self, namespace: &str) -> EngineResult<()>;
    fn drop_namespace(&self, namespace: &str) -> EngineResult<()>;
    fn namespace_exists(&self, namespace: &str) -> EngineResult<bool>;

    fn put(&self, namespace: &str, key: &str, value: &[u8]) -> EngineResult<()>;
    fn get(&self, namespace: &str, key: &str) -> EngineResult<Option<Vec<u8>>>;
    fn delete(&self, namespace: &str, key: &str) -> EngineResult<bool>;
    fn scan_prefix(&self, namespace: &str, prefix: &str) -> EngineResult<Vec<(String, Vec<u8>)>>;

    fn put_at(&self, namespace: &str, key: &str, timestamp: i64, value: &[u8])
    -> EngineResult<()>;
    fn get_as_of(&self, namespace: &str, key: &str, timestamp: i64)
    -> EngineResult<Option<Vec<u8>>>;
    /// Versions of `key` written with `put_at` whose timestamps fall in
    /// `from..=to`, oldest first. Empty when `from > to`.
    fn history_between(
        &self,
        namespace: &str,
        key: &str,
        from: i64,
        to: i64,
    ) -> EngineResult<Vec<(i64, Vec<u8>)>>;

    fn create_collection(
        &self,
        namespace: &str,
        collection: &str,
        dimension: usize,
        metric: DistanceMetric,
    ) -> EngineResult<()>;
    fn insert_vector(&self, namespace: &str, collection: &str, record: VectorRecord)
    -> EngineResult<()>;
    fn insert_vectors(
        &self,
        namespace: &str,
        collection: &str,
        records: Vec<VectorRecord>,
    ) -> EngineResult<usize>;
    fn get_vector(&self, namespace: &str, collection: &str, id: &str)
    -> EngineResult<Option<VectorRecord>>;
    fn collection_len(&self, namespace: &str, collection: &str) -> EngineResult<usize>;
    fn vector_search(
        &self,
        namespace: &str,
        collection: &str,
        query: &[f32],
        k: usize,
    ) -> EngineResult<Vec<SearchHit>>;
    fn hybrid_search(
        &self,
        namespace: &str,
        collection: &str,
        query: &[f32],
        text: &str,
        k: usize,
        alpha: f32,
    ) -> EngineResult<Vec<SearchHit>>;

    fn begin(&self, namespace: &str) -> EngineResult<TxnId>;
    fn txn_put(&self, txn: TxnId, key: &str, value: &[u8]) -> EngineResult<()>;
    fn txn_get(&self, txn: TxnId, key: &str) -> EngineResult<Option<Vec<u8>>>;
    fn txn_delete(&self, txn: TxnId, key: &str) -> EngineResult<()>;
    fn commit(&self, txn: TxnId) -> EngineResult<()>;
    fn rollback(&self, txn: TxnId) -> EngineResult<()>;

    fn add_node(&self, namespace: &str, node: GraphNode) -> EngineResult<()>;
    fn add_edge(&self, namespace: &str, edge: GraphEdge) -> EngineResult<()>;
    fn neighbors(&self, namespace: &str, node: &str, kind: Option<&str>)
    -> EngineResult<Vec<String>>;
    fn shortest_path(
        &self,
        namespace: &str,
        from: &str,
        to: &str,
        max_depth: usize,
    ) -> EngineResult<Option<Vec<String>>>;

    fn put_access_rule(&self, namespace: &str, rule: AccessRule) -> EngineResult<()>;
    fn check_access(
        &self,
        namespace: &str,
        subject: &str,
        resource: &str,
        action: &str,
    ) -> EngineResult<AccessDecision>;

    /// Make everything acknowledged so far durable without replay.
    fn checkpoint(&self) -> EngineResult<()>;
    /// Drop the process state without flushing or checkpointing.
    fn close_unclean(&self) -> EngineResult<()>;
    /// Recover after [`TargetEngine::close_unclean`].
    fn reopen(&self) -> EngineResult<RecoveryStats>;
}
