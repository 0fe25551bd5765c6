//! Namespace-bound engine handle.
//!
//! Scenarios talk to the engine through a handle bound to one namespace so
//! they cannot address another scenario's data by accident. Every call maps
//! engine failures to [`HarnessError::TargetEngine`] tagged with the
//! operation name.

use std::sync::Arc;

use super::{
    AccessDecision, AccessRule, DistanceMetric, GraphEdge, GraphNode, SearchHit, TargetEngine,
    TxnId, VectorRecord,
};
use crate::core::errors::{HarnessError, Result};

/// Engine handle scoped to a single namespace.
#[derive(Clone)]
pub struct NamespaceHandle {
    engine: Arc<dyn TargetEngine>,
    namespace: String,
}

impl std::fmt::Debug for NamespaceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamespaceHandle")
            .field("engine", &self.engine.name())
            .field("namespace", &self.namespace)
            .finish()
    }
}

impl NamespaceHandle {
    /// Bind to an existing namespace without creating it.
    #[must_use]
    pub fn bind(engine: Arc<dyn TargetEngine>, namespace: impl Into<String>) -> Self {
        Self {
            engine,
            namespace: namespace.into(),
        }
    }

    /// Create the namespace and bind to it.
    pub fn create(engine: Arc<dyn TargetEngine>, namespace: impl Into<String>) -> Result<Self> {
        let handle = Self::bind(engine, namespace);
        handle
            .engine
            .create_namespace(&handle.namespace)
            .map_err(|e| HarnessError::engine("create_namespace", e))?;
        Ok(handle)
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The underlying engine, for engine-wide operations such as crash tests.
    #[must_use]
    pub fn engine(&self) -> &Arc<dyn TargetEngine> {
        &self.engine
    }

    pub fn drop_namespace(&self) -> Result<()> {
        self.engine
            .drop_namespace(&self.namespace)
            .map_err(|e| HarnessError::engine("drop_namespace", e))
    }

    pub fn exists(&self) -> Result<bool> {
        self.engine
            .namespace_exists(&self.namespace)
            .map_err(|e| HarnessError::engine("namespace_exists", e))
    }

    pub fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.engine
            .put(&self.namespace, key, value)
            .map_err(|e| HarnessError::engine("put", e))
    }

    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.engine
            .get(&self.namespace, key)
            .map_err(|e| HarnessError::engine("get", e))
    }

    pub fn delete(&self, key: &str) -> Result<bool> {
        self.engine
            .delete(&self.namespace, key)
            .map_err(|e| HarnessError::engine("delete", e))
    }

    pub fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        self.engine
            .scan_prefix(&self.namespace, prefix)
            .map_err(|e| HarnessError::engine("scan_prefix", e))
    }

    pub fn put_at(&self, key: &str, timestamp: i64, value: &[u8]) -> Result<()> {
        self.engine
            .put_at(&self.namespace, key, timestamp, value)
            .map_err(|e| HarnessError::engine("put_at", e))
    }

    pub fn get_as_of(&self, key: &str, timestamp: i64) -> Result<Option<Vec<u8>>> {
        self.engine
            .get_as_of(&self.namespace, key, timestamp)
            .map_err(|e| HarnessError::engine("get_as_of", e))
    }

    pub fn history_between(&self, key: &str, from: i64, to: i64) -> Result<Vec<(i64, Vec<u8>)>> {
        self.engine
            .history_between(&self.namespace, key, from, to)
            .map_err(|e| HarnessError::engine("history_between", e))
    }

    pub fn create_collection(
        &self,
        collection: &str,
        dimension: usize,
        metric: DistanceMetric,
    ) -> Result<()> {
        self.engine
            .create_collection(&self.namespace, collection, dimension, metric)
            .map_err(|e| HarnessError::engine("create_collection", e))
    }

    pub fn insert_vector(&self, collection: &str, record: VectorRecord) -> Result<()> {
        self.engine
            .insert_vector(&self.namespace, collection, record)
            .map_err(|e| HarnessError::engine("insert_vector", e))
    }

    pub fn insert_vectors(&self, collection: &str, records: Vec<VectorRecord>) -> Result<usize> {
        self.engine
            .insert_vectors(&self.namespace, collection, records)
            .map_err(|e| HarnessError::engine("insert_vectors", e))
    }

    pub fn get_vector(&self, collection: &str, id: &str) -> Result<Option<VectorRecord>> {
        self.engine
            .get_vector(&self.namespace, collection, id)
            .map_err(|e| HarnessError::engine("get_vector", e))
    }

    pub fn collection_len(&self, collection: &str) -> Result<usize> {
        self.engine
            .collection_len(&self.namespace, collection)
            .map_err(|e| HarnessError::engine("collection_len", e))
    }

    pub fn vector_search(&self, collection: &str, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        self.engine
            .vector_search(&self.namespace, collection, query, k)
            .map_err(|e| HarnessError::engine("vector_search", e))
    }

    pub fn hybrid_search(
        &self,
        collection: &str,
        query: &[f32],
        text: &str,
        k: usize,
        alpha: f32,
    ) -> Result<Vec<SearchHit>> {
        self.engine
            .hybrid_search(&self.namespace, collection, query, text, k, alpha)
            .map_err(|e| HarnessError::engine("hybrid_search", e))
    }

    pub fn begin(&self) -> Result<TxnId> {
        self.engine
            .begin(&self.namespace)
            .map_err(|e| HarnessError::engine("begin", e))
    }

    pub fn txn_put(&self, txn: TxnId, key: &str, value: &[u8]) -> Result<()> {
        self.engine
            .txn_put(txn, key, value)
            .map_err(|e| HarnessError::engine("txn_put", e))
    }

    pub fn txn_get(&self, txn: TxnId, key: &str) -> Result<Option<Vec<u8>>> {
        self.engine
            .txn_get(txn, key)
            .map_err(|e| HarnessError::engine("txn_get", e))
    }

    pub fn txn_delete(&self, txn: TxnId, key: &str) -> Result<()> {
        self.engine
            .txn_delete(txn, key)
            .map_err(|e| HarnessError::engine("txn_delete", e))
    }

    /// Commit, keeping the raw engine error so callers can tell conflicts
    /// apart from hard failures.
    pub fn commit(&self, txn: TxnId) -> super::EngineResult<()> {
        self.engine.commit(txn)
    }

    pub fn rollback(&self, txn: TxnId) -> Result<()> {
        self.engine
            .rollback(txn)
            .map_err(|e| HarnessError::engine("rollback", e))
    }

    pub fn add_node(&self, node: GraphNode) -> Result<()> {
        self.engine
            .add_node(&self.namespace, node)
            .map_err(|e| HarnessError::engine("add_node", e))
    }

    pub fn add_edge(&self, edge: GraphEdge) -> Result<()> {
        self.engine
            .add_edge(&self.namespace, edge)
            .map_err(|e| HarnessError::engine("add_edge", e))
    }

    pub fn neighbors(&self, node: &str, kind: Option<&str>) -> Result<Vec<String>> {
        self.engine
            .neighbors(&self.namespace, node, kind)
            .map_err(|e| HarnessError::engine("neighbors", e))
    }

    pub fn shortest_path(&self, from: &str, to: &str, max_depth: usize) -> Result<Option<Vec<String>>> {
        self.engine
            .shortest_path(&self.namespace, from, to, max_depth)
            .map_err(|e| HarnessError::engine("shortest_path", e))
    }

    pub fn put_access_rule(&self, rule: AccessRule) -> Result<()> {
        self.engine
            .put_access_rule(&self.namespace, rule)
            .map_err(|e| HarnessError::engine("put_access_rule", e))
    }

    pub fn check_access(&self, subject: &str, resource: &str, action: &str) -> Result<AccessDecision> {
        self.engine
            .check_access(&self.namespace, subject, resource, action)
            .map_err(|e| HarnessError::engine("check_access", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemoryEngine;

    #[test]
    fn handle_scopes_calls_to_its_namespace() {
        let engine: Arc<dyn TargetEngine> = Arc::new(MemoryEngine::new());
        let a = NamespaceHandle::create(Arc::clone(&engine), "tenant-a").unwrap();
        let b = NamespaceHandle::create(Arc::clone(&engine), "tenant-b").unwrap();
        a.put("k", b"a").unwrap();
        assert_eq!(b.get("k").unwrap(), None);
        assert_eq!(a.get("k").unwrap(), Some(b"a".to_vec()));
    }

    #[test]
    fn engine_errors_carry_operation_name() {
        let engine: Arc<dyn TargetEngine> = Arc::new(MemoryEngine::new());
        let handle = NamespaceHandle::bind(engine, "missing");
        let err = handle.get("k").unwrap_err();
        assert_eq!(err.code(), "ECH-3001");
        assert!(err.to_string().contains("get"));
    }

    #[test]
    fn drop_removes_namespace() {
        let engine: Arc<dyn TargetEngine> = Arc::new(MemoryEngine::new());
        let handle = NamespaceHandle::create(engine, "gone").unwrap();
        assert!(handle.exists().unwrap());
        handle.drop_namespace().unwrap();
        assert!(!handle.exists().unwrap());
    }
}
