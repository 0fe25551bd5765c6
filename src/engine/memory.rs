//! In-process reference engine.
//!
//! Every acknowledged mutation is applied to live state and appended to a
//! write-ahead log. `checkpoint` snapshots the state and truncates the log;
//! `close_unclean` throws the live state away; `reopen` rebuilds it from the
//! snapshot plus a replay of the log. Transactions are optimistic with
//! first-committer-wins conflict detection on per-key versions.
//!
//! [`EngineFaults`] switches on specific defects so tests can prove that the
//! harness gates catch them.

#![allow(clippy::cast_precision_loss)]

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use parking_lot::RwLock;

use super::{
    AccessDecision, AccessRule, DEFAULT_DENY_RULE, DistanceMetric, Effect, EngineError,
    EngineResult, GraphEdge, GraphNode, RecoveryStats, SearchHit, TargetEngine, TxnId,
    VectorRecord, resolve_rules,
};

/// Deliberate defects for negative testing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineFaults {
    /// Searches and scans read every namespace, not just the requested one.
    pub leak_across_namespaces: bool,
    /// Rollback still applies the first buffered write.
    pub partial_rollback: bool,
    /// Reopen skips log replay, losing writes since the last checkpoint.
    pub lose_unflushed_writes: bool,
    /// Point-in-time reads always return the newest version.
    pub stale_time_travel: bool,
    /// Deny decisions come back without explanation or rule id.
    pub unexplained_denies: bool,
    /// Transactional reads ignore committed data.
    pub blind_transaction_reads: bool,
}

impl EngineFaults {
    pub const NAMES: [&'static str; 6] = [
        "leak_across_namespaces",
        "partial_rollback",
        "lose_unflushed_writes",
        "stale_time_travel",
        "unexplained_denies",
        "blind_transaction_reads",
    ];

    /// Switch on a fault by name; `false` for unknown names.
    pub fn enable(&mut self, name: &str) -> bool {
        let slot = match name.trim() {
            "leak_across_namespaces" => &mut self.leak_across_namespaces,
            "partial_rollback" => &mut self.partial_rollback,
            "lose_unflushed_writes" => &mut self.lose_unflushed_writes,
            "stale_time_travel" => &mut self.stale_time_travel,
            "unexplained_denies" => &mut self.unexplained_denies,
            "blind_transaction_reads" => &mut self.blind_transaction_reads,
            _ => return false,
        };
        *slot = true;
        true
    }
}

#[derive(Debug, Clone)]
struct Versioned {
    value: Option<Vec<u8>>,
    version: u64,
}

#[derive(Debug, Clone)]
struct Collection {
    dimension: usize,
    metric: DistanceMetric,
    docs: BTreeMap<String, VectorRecord>,
}

#[derive(Debug, Clone, Default)]
struct NamespaceState {
    kv: BTreeMap<String, Versioned>,
    temporal: BTreeMap<String, BTreeMap<i64, Vec<u8>>>,
    collections: BTreeMap<String, Collection>,
    nodes: BTreeMap<String, GraphNode>,
    edges: Vec<GraphEdge>,
    rules: Vec<AccessRule>,
}

#[derive(Debug, Clone, Default)]
struct EngineState {
    namespaces: BTreeMap<String, NamespaceState>,
    seq: u64,
}

#[derive(Debug, Clone)]
enum WalOp {
    CreateNamespace(String),
    DropNamespace(String),
    Put {
        namespace: String,
        key: String,
        value: Option<Vec<u8>>,
    },
    PutAt {
        namespace: String,
        key: String,
        timestamp: i64,
        value: Vec<u8>,
    },
    CreateCollection {
        namespace: String,
        collection: String,
        dimension: usize,
        metric: DistanceMetric,
    },
    InsertVectors {
        namespace: String,
        collection: String,
        records: Vec<VectorRecord>,
    },
    AddNode {
        namespace: String,
        node: GraphNode,
    },
    AddEdge {
        namespace: String,
        edge: GraphEdge,
    },
    PutRule {
        namespace: String,
        rule: AccessRule,
    },
    Commit {
        namespace: String,
        writes: Vec<(String, Option<Vec<u8>>)>,
    },
}

#[derive(Debug, Clone)]
struct TxnState {
    namespace: String,
    start_seq: u64,
    writes: BTreeMap<String, Option<Vec<u8>>>,
    order: Vec<String>,
}

#[derive(Debug, Default)]
struct Inner {
    state: EngineState,
    snapshot: EngineState,
    wal: Vec<WalOp>,
    txns: HashMap<u64, TxnState>,
    next_txn: u64,
    closed: bool,
}

/// Thread-safe in-memory engine with a write-ahead log.
#[derive(Debug, Default)]
pub struct MemoryEngine {
    inner: RwLock<Inner>,
    faults: EngineFaults,
}

impl MemoryEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine with the given defects switched on.
    #[must_use]
    pub fn with_faults(faults: EngineFaults) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            faults,
        }
    }

    /// Number of log entries that a crash right now would replay.
    #[must_use]
    pub fn pending_wal_entries(&self) -> usize {
        self.inner.read().wal.len()
    }

    fn mutate(&self, op: WalOp) -> EngineResult<()> {
        let mut inner = self.inner.write();
        if inner.closed {
            return Err(EngineError::Closed);
        }
        apply(&mut inner.state, &op)?;
        inner.wal.push(op);
        Ok(())
    }

    fn read<T>(&self, f: impl FnOnce(&EngineState) -> EngineResult<T>) -> EngineResult<T> {
        let inner = self.inner.read();
        if inner.closed {
            return Err(EngineError::Closed);
        }
        f(&inner.state)
    }

    /// Namespaces a read is allowed to see.
    fn visible<'a>(
        &self,
        state: &'a EngineState,
        namespace: &str,
    ) -> EngineResult<Vec<&'a NamespaceState>> {
        let own = namespace_ref(state, namespace)?;
        if self.faults.leak_across_namespaces {
            Ok(state.namespaces.values().collect())
        } else {
            Ok(vec![own])
        }
    }

    fn ranked(
        &self,
        namespace: &str,
        collection: &str,
        query: &[f32],
        k: usize,
        keyword: Option<(&str, f32)>,
    ) -> EngineResult<Vec<SearchHit>> {
        self.read(|state| {
            let own = namespace_ref(state, namespace)?;
            let home = own
                .collections
                .get(collection)
                .ok_or_else(|| EngineError::CollectionNotFound {
                    namespace: namespace.to_string(),
                    collection: collection.to_string(),
                })?;
            if query.len() != home.dimension {
                return Err(EngineError::DimensionMismatch {
                    expected: home.dimension,
                    actual: query.len(),
                });
            }
            let query_terms = keyword.map(|(text, _)| terms(text));
            let mut hits = Vec::new();
            for ns in self.visible(state, namespace)? {
                let Some(coll) = ns.collections.get(collection) else {
                    continue;
                };
                if coll.dimension != home.dimension {
                    continue;
                }
                for doc in coll.docs.values() {
                    let vector_score = home.metric.score(query, &doc.vector);
                    let score = match (&query_terms, keyword) {
                        (Some(q), Some((_, alpha))) => {
                            let kw = keyword_score(q, &doc.content);
                            alpha.mul_add(vector_score, (1.0 - alpha) * kw)
                        }
                        _ => vector_score,
                    };
                    hits.push(SearchHit {
                        id: doc.id.clone(),
                        score,
                        metadata: doc.metadata.clone(),
                    });
                }
            }
            hits.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| a.id.cmp(&b.id))
            });
            hits.truncate(k);
            Ok(hits)
        })
    }
}

fn namespace_ref<'a>(state: &'a EngineState, namespace: &str) -> EngineResult<&'a NamespaceState> {
    state
        .namespaces
        .get(namespace)
        .ok_or_else(|| EngineError::NamespaceNotFound {
            namespace: namespace.to_string(),
        })
}

fn namespace_mut<'a>(
    state: &'a mut EngineState,
    namespace: &str,
) -> EngineResult<&'a mut NamespaceState> {
    state
        .namespaces
        .get_mut(namespace)
        .ok_or_else(|| EngineError::NamespaceNotFound {
            namespace: namespace.to_string(),
        })
}

#[allow(clippy::too_many_lines)]
fn apply(state: &mut EngineState, op: &WalOp) -> EngineResult<()> {
    match op {
        WalOp::CreateNamespace(name) => {
            if state.namespaces.contains_key(name) {
                return Err(EngineError::NamespaceExists {
                    namespace: name.clone(),
                });
            }
            state
                .namespaces
                .insert(name.clone(), NamespaceState::default());
        }
        WalOp::DropNamespace(name) => {
            if state.namespaces.remove(name).is_none() {
                return Err(EngineError::NamespaceNotFound {
                    namespace: name.clone(),
                });
            }
        }
        WalOp::Put {
            namespace,
            key,
            value,
        } => {
            state.seq += 1;
            let version = state.seq;
            namespace_mut(state, namespace)?.kv.insert(
                key.clone(),
                Versioned {
                    value: value.clone(),
                    version,
                },
            );
        }
        WalOp::PutAt {
            namespace,
            key,
            timestamp,
            value,
        } => {
            namespace_mut(state, namespace)?
                .temporal
                .entry(key.clone())
                .or_default()
                .insert(*timestamp, value.clone());
        }
        WalOp::CreateCollection {
            namespace,
            collection,
            dimension,
            metric,
        } => {
            let ns = namespace_mut(state, namespace)?;
            if ns.collections.contains_key(collection) {
                return Err(EngineError::CollectionExists {
                    namespace: namespace.clone(),
                    collection: collection.clone(),
                });
            }
            ns.collections.insert(
                collection.clone(),
                Collection {
                    dimension: *dimension,
                    metric: *metric,
                    docs: BTreeMap::new(),
                },
            );
        }
        WalOp::InsertVectors {
            namespace,
            collection,
            records,
        } => {
            let coll = namespace_mut(state, namespace)?
                .collections
                .get_mut(collection)
                .ok_or_else(|| EngineError::CollectionNotFound {
                    namespace: namespace.clone(),
                    collection: collection.clone(),
                })?;
            if let Some(bad) = records.iter().find(|r| r.vector.len() != coll.dimension) {
                return Err(EngineError::DimensionMismatch {
                    expected: coll.dimension,
                    actual: bad.vector.len(),
                });
            }
            for record in records {
                coll.docs.insert(record.id.clone(), record.clone());
            }
        }
        WalOp::AddNode { namespace, node } => {
            namespace_mut(state, namespace)?
                .nodes
                .insert(node.id.clone(), node.clone());
        }
        WalOp::AddEdge { namespace, edge } => {
            let ns = namespace_mut(state, namespace)?;
            for endpoint in [&edge.from, &edge.to] {
                if !ns.nodes.contains_key(endpoint) {
                    return Err(EngineError::NodeNotFound {
                        id: endpoint.clone(),
                    });
                }
            }
            ns.edges.push(edge.clone());
        }
        WalOp::PutRule { namespace, rule } => {
            let ns = namespace_mut(state, namespace)?;
            ns.rules.retain(|r| r.rule_id != rule.rule_id);
            ns.rules.push(rule.clone());
        }
        WalOp::Commit { namespace, writes } => {
            state.seq += 1;
            let version = state.seq;
            let ns = namespace_mut(state, namespace)?;
            for (key, value) in writes {
                ns.kv.insert(
                    key.clone(),
                    Versioned {
                        value: value.clone(),
                        version,
                    },
                );
            }
        }
    }
    Ok(())
}

/// Lowercased alphanumeric tokens.
fn terms(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Fraction of query terms present in the document.
fn keyword_score(query_terms: &BTreeSet<String>, content: &str) -> f32 {
    if query_terms.is_empty() {
        return 0.0;
    }
    let doc_terms = terms(content);
    let overlap = query_terms.intersection(&doc_terms).count();
    overlap as f32 / query_terms.len() as f32
}

impl TargetEngine for MemoryEngine {
    fn name(&self) -> &str {
        "memory"
    }

    fn create_namespace(&self, namespace: &str) -> EngineResult<()> {
        self.mutate(WalOp::CreateNamespace(namespace.to_string()))
    }

    fn drop_namespace(&self, namespace: &str) -> EngineResult<()> {
        self.mutate(WalOp::DropNamespace(namespace.to_string()))
    }

    fn namespace_exists(&self, namespace: &str) -> EngineResult<bool> {
        self.read(|state| Ok(state.namespaces.contains_key(namespace)))
    }

    fn put(&self, namespace: &str, key: &str, value: &[u8]) -> EngineResult<()> {
        self.mutate(WalOp::Put {
            namespace: namespace.to_string(),
            key: key.to_string(),
            value: Some(value.to_vec()),
        })
    }

    fn get(&self, namespace: &str, key: &str) -> EngineResult<Option<Vec<u8>>> {
        self.read(|state| {
            Ok(namespace_ref(state, namespace)?
                .kv
                .get(key)
                .and_then(|v| v.value.clone()))
        })
    }

    fn delete(&self, namespace: &str, key: &str) -> EngineResult<bool> {
        let existed = self.get(namespace, key)?.is_some();
        if existed {
            self.mutate(WalOp::Put {
                namespace: namespace.to_string(),
                key: key.to_string(),
                value: None,
            })?;
        }
        Ok(existed)
    }

    fn scan_prefix(&self, namespace: &str, prefix: &str) -> EngineResult<Vec<(String, Vec<u8>)>> {
        self.read(|state| {
            let mut out = Vec::new();
            for ns in self.visible(state, namespace)? {
                for (key, entry) in ns.kv.range(prefix.to_string()..) {
                    if !key.starts_with(prefix) {
                        break;
                    }
                    if let Some(value) = &entry.value {
                        out.push((key.clone(), value.clone()));
                    }
                }
            }
            Ok(out)
        })
    }

    fn put_at(&self, namespace: &str, key: &str, timestamp: i64, value: &[u8]) -> EngineResult<()> {
        self.mutate(WalOp::PutAt {
            namespace: namespace.to_string(),
            key: key.to_string(),
            timestamp,
            value: value.to_vec(),
        })
    }

    fn get_as_of(&self, namespace: &str, key: &str, timestamp: i64) -> EngineResult<Option<Vec<u8>>> {
        self.read(|state| {
            let Some(history) = namespace_ref(state, namespace)?.temporal.get(key) else {
                return Ok(None);
            };
            if self.faults.stale_time_travel {
                return Ok(history.values().next_back().cloned());
            }
            Ok(history
                .range(..=timestamp)
                .next_back()
                .map(|(_, v)| v.clone()))
        })
    }

    fn history_between(
        &self,
        namespace: &str,
        key: &str,
        from: i64,
        to: i64,
    ) -> EngineResult<Vec<(i64, Vec<u8>)>> {
        self.read(|state| {
            let Some(history) = namespace_ref(state, namespace)?.temporal.get(key) else {
                return Ok(Vec::new());
            };
            if from > to {
                return Ok(Vec::new());
            }
            if self.faults.stale_time_travel {
                return Ok(history
                    .iter()
                    .next_back()
                    .map(|(ts, v)| vec![(*ts, v.clone())])
                    .unwrap_or_default());
            }
            Ok(history
                .range(from..=to)
                .map(|(ts, v)| (*ts, v.clone()))
                .collect())
        })
    }

    fn create_collection(
        &self,
        namespace: &str,
        collection: &str,
        dimension: usize,
        metric: DistanceMetric,
    ) -> EngineResult<()> {
        if dimension == 0 {
            return Err(EngineError::Rejected {
                details: "collection dimension must be > 0".to_string(),
            });
        }
        self.mutate(WalOp::CreateCollection {
            namespace: namespace.to_string(),
            collection: collection.to_string(),
            dimension,
            metric,
        })
    }

    fn insert_vector(&self, namespace: &str, collection: &str, record: VectorRecord) -> EngineResult<()> {
        self.insert_vectors(namespace, collection, vec![record])
            .map(|_| ())
    }

    fn insert_vectors(
        &self,
        namespace: &str,
        collection: &str,
        records: Vec<VectorRecord>,
    ) -> EngineResult<usize> {
        let count = records.len();
        self.mutate(WalOp::InsertVectors {
            namespace: namespace.to_string(),
            collection: collection.to_string(),
            records,
        })?;
        Ok(count)
    }

    fn get_vector(
        &self,
        namespace: &str,
        collection: &str,
        id: &str,
    ) -> EngineResult<Option<VectorRecord>> {
        self.read(|state| {
            let coll = namespace_ref(state, namespace)?
                .collections
                .get(collection)
                .ok_or_else(|| EngineError::CollectionNotFound {
                    namespace: namespace.to_string(),
                    collection: collection.to_string(),
                })?;
            Ok(coll.docs.get(id).cloned())
        })
    }

    fn collection_len(&self, namespace: &str, collection: &str) -> EngineResult<usize> {
        self.read(|state| {
            namespace_ref(state, namespace)?
                .collections
                .get(collection)
                .map(|c| c.docs.len())
                .ok_or_else(|| EngineError::CollectionNotFound {
                    namespace: namespace.to_string(),
                    collection: collection.to_string(),
                })
        })
    }

    fn vector_search(
        &self,
        namespace: &str,
        collection: &str,
        query: &[f32],
        k: usize,
    ) -> EngineResult<Vec<SearchHit>> {
        self.ranked(namespace, collection, query, k, None)
    }

    fn hybrid_search(
        &self,
        namespace: &str,
        collection: &str,
        query: &[f32],
        text: &str,
        k: usize,
        alpha: f32,
    ) -> EngineResult<Vec<SearchHit>> {
        self.ranked(
            namespace,
            collection,
            query,
            k,
            Some((text, alpha.clamp(0.0, 1.0))),
        )
    }

    fn begin(&self, namespace: &str) -> EngineResult<TxnId> {
        let mut inner = self.inner.write();
        if inner.closed {
            return Err(EngineError::Closed);
        }
        namespace_ref(&inner.state, namespace)?;
        inner.next_txn += 1;
        let id = inner.next_txn;
        let start_seq = inner.state.seq;
        inner.txns.insert(
            id,
            TxnState {
                namespace: namespace.to_string(),
                start_seq,
                writes: BTreeMap::new(),
                order: Vec::new(),
            },
        );
        Ok(TxnId(id))
    }

    fn txn_put(&self, txn: TxnId, key: &str, value: &[u8]) -> EngineResult<()> {
        let mut inner = self.inner.write();
        if inner.closed {
            return Err(EngineError::Closed);
        }
        let state = inner
            .txns
            .get_mut(&txn.0)
            .ok_or(EngineError::TxnNotFound { txn })?;
        if !state.writes.contains_key(key) {
            state.order.push(key.to_string());
        }
        state.writes.insert(key.to_string(), Some(value.to_vec()));
        Ok(())
    }

    fn txn_get(&self, txn: TxnId, key: &str) -> EngineResult<Option<Vec<u8>>> {
        let inner = self.inner.read();
        if inner.closed {
            return Err(EngineError::Closed);
        }
        let state = inner
            .txns
            .get(&txn.0)
            .ok_or(EngineError::TxnNotFound { txn })?;
        if let Some(own) = state.writes.get(key) {
            return Ok(own.clone());
        }
        if self.faults.blind_transaction_reads {
            return Ok(None);
        }
        Ok(namespace_ref(&inner.state, &state.namespace)?
            .kv
            .get(key)
            .and_then(|v| v.value.clone()))
    }

    fn txn_delete(&self, txn: TxnId, key: &str) -> EngineResult<()> {
        let mut inner = self.inner.write();
        if inner.closed {
            return Err(EngineError::Closed);
        }
        let state = inner
            .txns
            .get_mut(&txn.0)
            .ok_or(EngineError::TxnNotFound { txn })?;
        if !state.writes.contains_key(key) {
            state.order.push(key.to_string());
        }
        state.writes.insert(key.to_string(), None);
        Ok(())
    }

    fn commit(&self, txn: TxnId) -> EngineResult<()> {
        let mut inner = self.inner.write();
        if inner.closed {
            return Err(EngineError::Closed);
        }
        let state = inner
            .txns
            .remove(&txn.0)
            .ok_or(EngineError::TxnNotFound { txn })?;
        let ns = namespace_ref(&inner.state, &state.namespace)?;
        for key in state.writes.keys() {
            if ns.kv.get(key).is_some_and(|v| v.version > state.start_seq) {
                return Err(EngineError::Conflict { key: key.clone() });
            }
        }
        if state.writes.is_empty() {
            return Ok(());
        }
        let op = WalOp::Commit {
            namespace: state.namespace,
            writes: state.writes.into_iter().collect(),
        };
        apply(&mut inner.state, &op)?;
        inner.wal.push(op);
        Ok(())
    }

    fn rollback(&self, txn: TxnId) -> EngineResult<()> {
        let mut inner = self.inner.write();
        if inner.closed {
            return Err(EngineError::Closed);
        }
        let state = inner
            .txns
            .remove(&txn.0)
            .ok_or(EngineError::TxnNotFound { txn })?;
        if self.faults.partial_rollback
            && let Some(first) = state.order.first()
        {
            let op = WalOp::Commit {
                namespace: state.namespace.clone(),
                writes: vec![(first.clone(), state.writes.get(first).cloned().flatten())],
            };
            apply(&mut inner.state, &op)?;
            inner.wal.push(op);
        }
        Ok(())
    }

    fn add_node(&self, namespace: &str, node: GraphNode) -> EngineResult<()> {
        self.mutate(WalOp::AddNode {
            namespace: namespace.to_string(),
            node,
        })
    }

    fn add_edge(&self, namespace: &str, edge: GraphEdge) -> EngineResult<()> {
        self.mutate(WalOp::AddEdge {
            namespace: namespace.to_string(),
            edge,
        })
    }

    fn neighbors(&self, namespace: &str, node: &str, kind: Option<&str>) -> EngineResult<Vec<String>> {
        self.read(|state| {
            let ns = namespace_ref(state, namespace)?;
            if !ns.nodes.contains_key(node) {
                return Err(EngineError::NodeNotFound {
                    id: node.to_string(),
                });
            }
            Ok(adjacent(ns, node, kind).into_iter().collect())
        })
    }

    fn shortest_path(
        &self,
        namespace: &str,
        from: &str,
        to: &str,
        max_depth: usize,
    ) -> EngineResult<Option<Vec<String>>> {
        self.read(|state| {
            let ns = namespace_ref(state, namespace)?;
            for endpoint in [from, to] {
                if !ns.nodes.contains_key(endpoint) {
                    return Err(EngineError::NodeNotFound {
                        id: endpoint.to_string(),
                    });
                }
            }
            Ok(bfs_path(ns, from, to, max_depth))
        })
    }

    fn put_access_rule(&self, namespace: &str, rule: AccessRule) -> EngineResult<()> {
        self.mutate(WalOp::PutRule {
            namespace: namespace.to_string(),
            rule,
        })
    }

    fn check_access(
        &self,
        namespace: &str,
        subject: &str,
        resource: &str,
        action: &str,
    ) -> EngineResult<AccessDecision> {
        self.read(|state| {
            let ns = namespace_ref(state, namespace)?;
            let decision = match resolve_rules(&ns.rules, subject, resource, action) {
                Some(rule) => AccessDecision {
                    effect: rule.effect,
                    rule_id: Some(rule.rule_id.clone()),
                    explanation: match rule.effect {
                        Effect::Allow => None,
                        Effect::Deny => Some(rule.reason.clone()),
                    },
                },
                None => AccessDecision {
                    effect: Effect::Deny,
                    rule_id: Some(DEFAULT_DENY_RULE.to_string()),
                    explanation: Some(format!(
                        "no rule grants {action} on {resource} to {subject}"
                    )),
                },
            };
            if self.faults.unexplained_denies && decision.effect == Effect::Deny {
                return Ok(AccessDecision {
                    effect: Effect::Deny,
                    rule_id: None,
                    explanation: None,
                });
            }
            Ok(decision)
        })
    }

    fn checkpoint(&self) -> EngineResult<()> {
        let mut inner = self.inner.write();
        if inner.closed {
            return Err(EngineError::Closed);
        }
        inner.snapshot = inner.state.clone();
        inner.wal.clear();
        Ok(())
    }

    fn close_unclean(&self) -> EngineResult<()> {
        let mut inner = self.inner.write();
        if inner.closed {
            return Err(EngineError::Closed);
        }
        inner.state = EngineState::default();
        inner.txns.clear();
        inner.closed = true;
        Ok(())
    }

    fn reopen(&self) -> EngineResult<RecoveryStats> {
        let mut inner = self.inner.write();
        let mut state = inner.snapshot.clone();
        let mut replayed = 0_u64;
        if self.faults.lose_unflushed_writes {
            inner.wal.clear();
        } else {
            for op in &inner.wal {
                apply(&mut state, op)?;
                replayed += 1;
            }
        }
        inner.state = state;
        inner.closed = false;
        Ok(RecoveryStats {
            replayed_entries: replayed,
        })
    }
}

fn adjacent(ns: &NamespaceState, node: &str, kind: Option<&str>) -> BTreeSet<String> {
    ns.edges
        .iter()
        .filter(|edge| kind.is_none_or(|k| edge.kind == k))
        .filter_map(|edge| {
            if edge.from == node {
                Some(edge.to.clone())
            } else if edge.to == node {
                Some(edge.from.clone())
            } else {
                None
            }
        })
        .collect()
}

fn bfs_path(ns: &NamespaceState, from: &str, to: &str, max_depth: usize) -> Option<Vec<String>> {
    if from == to {
        return Some(vec![from.to_string()]);
    }
    let mut parent: BTreeMap<String, String> = BTreeMap::new();
    let mut queue = VecDeque::from([(from.to_string(), 0_usize)]);
    let mut seen = BTreeSet::from([from.to_string()]);
    while let Some((node, depth)) = queue.pop_front() {
        if depth >= max_depth {
            continue;
        }
        for next in adjacent(ns, &node, None) {
            if !seen.insert(next.clone()) {
                continue;
            }
            parent.insert(next.clone(), node.clone());
            if next == to {
                let mut path = vec![next];
                while let Some(p) = parent.get(path.last()?) {
                    path.push(p.clone());
                }
                path.reverse();
                return Some(path);
            }
            queue.push_back((next, depth + 1));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, vector: Vec<f32>, content: &str) -> VectorRecord {
        VectorRecord {
            id: id.to_string(),
            vector,
            content: content.to_string(),
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn faults_enable_by_name() {
        let mut faults = EngineFaults::default();
        for name in EngineFaults::NAMES {
            assert!(faults.enable(name), "{name}");
        }
        assert!(faults.leak_across_namespaces && faults.blind_transaction_reads);
        assert!(!faults.enable("melt_disk"));
    }

    fn engine_with_ns(ns: &str) -> MemoryEngine {
        let engine = MemoryEngine::new();
        engine.create_namespace(ns).unwrap();
        engine
    }

    #[test]
    fn kv_put_get_delete_scan() {
        let engine = engine_with_ns("a");
        engine.put("a", "user/1", b"x").unwrap();
        engine.put("a", "user/2", b"y").unwrap();
        engine.put("a", "zzz", b"z").unwrap();
        assert_eq!(engine.get("a", "user/1").unwrap(), Some(b"x".to_vec()));
        assert_eq!(engine.scan_prefix("a", "user/").unwrap().len(), 2);
        assert!(engine.delete("a", "user/1").unwrap());
        assert!(!engine.delete("a", "user/1").unwrap());
        assert_eq!(engine.get("a", "user/1").unwrap(), None);
        assert_eq!(engine.scan_prefix("a", "user/").unwrap().len(), 1);
    }

    #[test]
    fn missing_namespace_is_an_error() {
        let engine = MemoryEngine::new();
        assert!(matches!(
            engine.get("nope", "k"),
            Err(EngineError::NamespaceNotFound { .. })
        ));
    }

    #[test]
    fn duplicate_namespace_rejected() {
        let engine = engine_with_ns("a");
        assert!(matches!(
            engine.create_namespace("a"),
            Err(EngineError::NamespaceExists { .. })
        ));
    }

    #[test]
    fn vector_search_is_scoped_to_namespace() {
        let engine = MemoryEngine::new();
        for ns in ["a", "b"] {
            engine.create_namespace(ns).unwrap();
            engine
                .create_collection(ns, "docs", 2, DistanceMetric::Cosine)
                .unwrap();
            engine
                .insert_vector(ns, "docs", record(&format!("{ns}-1"), vec![1.0, 0.0], ""))
                .unwrap();
        }
        let hits = engine.vector_search("a", "docs", &[1.0, 0.0], 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a-1");
    }

    #[test]
    fn leak_fault_exposes_other_namespaces() {
        let engine = MemoryEngine::with_faults(EngineFaults {
            leak_across_namespaces: true,
            ..EngineFaults::default()
        });
        for ns in ["a", "b"] {
            engine.create_namespace(ns).unwrap();
            engine
                .create_collection(ns, "docs", 2, DistanceMetric::Cosine)
                .unwrap();
            engine
                .insert_vector(ns, "docs", record(&format!("{ns}-1"), vec![1.0, 0.0], ""))
                .unwrap();
        }
        let hits = engine.vector_search("a", "docs", &[1.0, 0.0], 10).unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn dimension_mismatch_rejected() {
        let engine = engine_with_ns("a");
        engine
            .create_collection("a", "docs", 3, DistanceMetric::Cosine)
            .unwrap();
        let err = engine
            .insert_vector("a", "docs", record("x", vec![1.0], ""))
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::DimensionMismatch {
                expected: 3,
                actual: 1
            }
        );
    }

    #[test]
    fn hybrid_search_rewards_keyword_overlap() {
        let engine = engine_with_ns("a");
        engine
            .create_collection("a", "docs", 2, DistanceMetric::Cosine)
            .unwrap();
        engine
            .insert_vector("a", "docs", record("plain", vec![1.0, 0.0], "nothing here"))
            .unwrap();
        engine
            .insert_vector("a", "docs", record("kw", vec![1.0, 0.0], "ledger payment"))
            .unwrap();
        let hits = engine
            .hybrid_search("a", "docs", &[1.0, 0.0], "ledger", 2, 0.5)
            .unwrap();
        assert_eq!(hits[0].id, "kw");
    }

    #[test]
    fn uncommitted_writes_are_invisible_and_rollback_discards() {
        let engine = engine_with_ns("a");
        let txn = engine.begin("a").unwrap();
        engine.txn_put(txn, "k1", b"v1").unwrap();
        assert_eq!(engine.get("a", "k1").unwrap(), None);
        assert_eq!(engine.txn_get(txn, "k1").unwrap(), Some(b"v1".to_vec()));
        engine.rollback(txn).unwrap();
        assert_eq!(engine.get("a", "k1").unwrap(), None);
        assert!(matches!(
            engine.commit(txn),
            Err(EngineError::TxnNotFound { .. })
        ));
    }

    #[test]
    fn first_committer_wins() {
        let engine = engine_with_ns("a");
        let t1 = engine.begin("a").unwrap();
        let t2 = engine.begin("a").unwrap();
        engine.txn_put(t1, "shared", b"one").unwrap();
        engine.txn_put(t2, "shared", b"two").unwrap();
        engine.commit(t1).unwrap();
        let err = engine.commit(t2).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(engine.get("a", "shared").unwrap(), Some(b"one".to_vec()));
    }

    #[test]
    fn partial_rollback_fault_leaks_first_write() {
        let engine = MemoryEngine::with_faults(EngineFaults {
            partial_rollback: true,
            ..EngineFaults::default()
        });
        engine.create_namespace("a").unwrap();
        let txn = engine.begin("a").unwrap();
        engine.txn_put(txn, "first", b"1").unwrap();
        engine.txn_put(txn, "second", b"2").unwrap();
        engine.rollback(txn).unwrap();
        assert_eq!(engine.get("a", "first").unwrap(), Some(b"1".to_vec()));
        assert_eq!(engine.get("a", "second").unwrap(), None);
    }

    #[test]
    fn temporal_reads_follow_last_version_at_or_before() {
        let engine = engine_with_ns("a");
        for (ts, v) in [(10, "v10"), (20, "v20"), (30, "v30")] {
            engine.put_at("a", "doc", ts, v.as_bytes()).unwrap();
        }
        assert_eq!(engine.get_as_of("a", "doc", 5).unwrap(), None);
        assert_eq!(engine.get_as_of("a", "doc", 15).unwrap(), Some(b"v10".to_vec()));
        assert_eq!(engine.get_as_of("a", "doc", 30).unwrap(), Some(b"v30".to_vec()));
    }

    #[test]
    fn history_ranges_are_inclusive_and_ordered() {
        let engine = engine_with_ns("a");
        for (ts, v) in [(30, "v30"), (10, "v10"), (20, "v20")] {
            engine.put_at("a", "doc", ts, v.as_bytes()).unwrap();
        }
        let stamps = |from, to| -> Vec<i64> {
            engine
                .history_between("a", "doc", from, to)
                .unwrap()
                .into_iter()
                .map(|(ts, _)| ts)
                .collect()
        };
        assert_eq!(stamps(10, 20), vec![10, 20]);
        assert_eq!(stamps(i64::MIN, i64::MAX), vec![10, 20, 30]);
        assert!(stamps(21, 29).is_empty());
        assert!(stamps(30, 10).is_empty());
        assert!(engine.history_between("a", "other", 0, 100).unwrap().is_empty());
        assert!(matches!(
            engine.history_between("missing", "doc", 0, 100),
            Err(EngineError::NamespaceNotFound { .. })
        ));
    }

    #[test]
    fn unclean_close_then_reopen_replays_wal() {
        let engine = engine_with_ns("a");
        engine.checkpoint().unwrap();
        engine.put("a", "k1", b"1").unwrap();
        engine.put("a", "k2", b"2").unwrap();
        engine.close_unclean().unwrap();
        assert!(matches!(engine.get("a", "k1"), Err(EngineError::Closed)));
        let stats = engine.reopen().unwrap();
        assert_eq!(stats.replayed_entries, 2);
        assert_eq!(engine.get("a", "k2").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn lost_write_fault_drops_unflushed_entries() {
        let engine = MemoryEngine::with_faults(EngineFaults {
            lose_unflushed_writes: true,
            ..EngineFaults::default()
        });
        engine.create_namespace("a").unwrap();
        engine.checkpoint().unwrap();
        engine.put("a", "k1", b"1").unwrap();
        engine.close_unclean().unwrap();
        let stats = engine.reopen().unwrap();
        assert_eq!(stats.replayed_entries, 0);
        assert_eq!(engine.get("a", "k1").unwrap(), None);
    }

    #[test]
    fn graph_neighbors_and_paths() {
        let engine = engine_with_ns("g");
        for id in ["a", "b", "c", "d"] {
            engine
                .add_node(
                    "g",
                    GraphNode {
                        id: id.to_string(),
                        kind: "host".to_string(),
                        properties: BTreeMap::new(),
                    },
                )
                .unwrap();
        }
        for (from, to) in [("a", "b"), ("b", "c")] {
            engine
                .add_edge(
                    "g",
                    GraphEdge {
                        from: from.to_string(),
                        to: to.to_string(),
                        kind: "link".to_string(),
                    },
                )
                .unwrap();
        }
        assert_eq!(engine.neighbors("g", "b", None).unwrap(), vec!["a", "c"]);
        assert_eq!(
            engine.shortest_path("g", "a", "c", 5).unwrap(),
            Some(vec!["a".to_string(), "b".to_string(), "c".to_string()])
        );
        assert_eq!(engine.shortest_path("g", "a", "d", 5).unwrap(), None);
        assert_eq!(engine.shortest_path("g", "a", "c", 1).unwrap(), None);
    }

    #[test]
    fn edge_to_unknown_node_rejected() {
        let engine = engine_with_ns("g");
        let err = engine
            .add_edge(
                "g",
                GraphEdge {
                    from: "x".to_string(),
                    to: "y".to_string(),
                    kind: "link".to_string(),
                },
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::NodeNotFound { .. }));
    }

    #[test]
    fn default_deny_is_explained() {
        let engine = engine_with_ns("p");
        let decision = engine.check_access("p", "eve", "docs/1", "read").unwrap();
        assert_eq!(decision.effect, Effect::Deny);
        assert_eq!(decision.rule_id.as_deref(), Some(DEFAULT_DENY_RULE));
        assert!(decision.explanation.is_some());
    }
}
