//! Tenant isolation: every tenant gets its own namespace with a disjoint
//! corpus, and no read from one namespace may surface another tenant's ids.

use std::collections::BTreeSet;

use super::{Scenario, ScenarioContext};
use crate::core::config::ScaleParams;
use crate::core::errors::Result;
use crate::engine::{DistanceMetric, NamespaceHandle};
use crate::generator::{Corpus, QuerySpec, SyntheticGenerator};
use crate::metrics::ScenarioMetrics;

const COLLECTION: &str = "docs";
const TOP_K: usize = 10;
const DOC_PREFIX: &str = "doc/";

/// Tenants never see each other's documents.
#[derive(Debug, Clone, Default)]
pub struct IsolationScenario {
    shape: Option<(usize, usize)>,
}

impl IsolationScenario {
    /// Fixed tenant count and documents per tenant instead of the scale preset.
    #[must_use]
    pub const fn with_shape(tenants: usize, docs_per_tenant: usize) -> Self {
        Self {
            shape: Some((tenants, docs_per_tenant)),
        }
    }
}

/// One tenant's corpus and queries.
#[derive(Debug, Clone)]
pub struct TenantFixture {
    /// Tenant name, also its namespace suffix.
    pub tenant: String,
    /// Documents owned by the tenant.
    pub corpus: Corpus,
    /// Searches the tenant issues.
    pub queries: Vec<QuerySpec>,
}

/// Every tenant's fixture.
#[derive(Debug, Clone)]
pub struct IsolationFixtures {
    /// Tenants in creation order.
    pub tenants: Vec<TenantFixture>,
    /// Vector dimension.
    pub dimension: usize,
}

impl IsolationFixtures {
    fn total_docs(&self) -> usize {
        self.tenants.iter().map(|t| t.corpus.items.len()).sum()
    }
}

/// One tenant's namespace and queries.
#[derive(Debug)]
pub struct TenantWorkingSet {
    tenant: String,
    handle: NamespaceHandle,
    queries: Vec<Vec<f32>>,
}

/// All tenant namespaces.
#[derive(Debug)]
pub struct IsolationWorkingSet {
    tenants: Vec<TenantWorkingSet>,
    enumerate_k: usize,
}

/// Ids one tenant's namespace returned, per kind of read.
#[derive(Debug, Clone, Default)]
pub struct TenantObservation {
    /// Tenant the reads were made as.
    pub tenant: String,
    /// Hit ids per query.
    pub query_hits: Vec<Vec<String>>,
    /// Ids returned by enumerating the namespace.
    pub enumerated: Vec<String>,
    /// Keys returned by a full prefix scan.
    pub scanned: Vec<String>,
}

fn owned_by(id: &str, tenant: &str) -> bool {
    id.strip_prefix(tenant).is_some_and(|rest| rest.starts_with('/'))
}

impl Scenario for IsolationScenario {
    type Fixtures = IsolationFixtures;
    type WorkingSet = IsolationWorkingSet;
    type RawResults = Vec<TenantObservation>;

    fn id(&self) -> &'static str {
        "isolation"
    }

    fn description(&self) -> &'static str {
        "per-tenant namespaces; searches and scans must never return another tenant's ids"
    }

    fn parallel_safe(&self) -> bool {
        true
    }

    fn fixtures(&self, generator: &SyntheticGenerator, scale: &ScaleParams) -> Result<Self::Fixtures> {
        let (tenant_count, docs) = self
            .shape
            .unwrap_or((scale.tenants, scale.docs_per_collection));
        let query_count = (scale.queries / tenant_count.max(1)).max(1);
        let tenants = generator
            .build_tenants(tenant_count)
            .into_iter()
            .map(|tenant| {
                let corpus = generator.build_corpus(&tenant, COLLECTION, docs);
                let queries = generator.build_queries(&corpus, query_count);
                TenantFixture {
                    tenant,
                    corpus,
                    queries,
                }
            })
            .collect();
        Ok(IsolationFixtures {
            tenants,
            dimension: generator.dimension(),
        })
    }

    fn setup(&mut self, ctx: &mut ScenarioContext, fixtures: &Self::Fixtures) -> Result<Self::WorkingSet> {
        let mut tenants = Vec::with_capacity(fixtures.tenants.len());
        for fixture in &fixtures.tenants {
            ctx.check_deadline()?;
            let handle = ctx.create_namespace(&fixture.tenant)?;
            ctx.mutate("create_collection", COLLECTION, || {
                handle.create_collection(COLLECTION, fixtures.dimension, DistanceMetric::Cosine)
            })?;
            let records = fixture.corpus.items.iter().map(|i| i.to_record()).collect();
            ctx.mutate("insert_vectors", COLLECTION, || {
                handle.insert_vectors(COLLECTION, records)
            })?;
            for item in &fixture.corpus.items {
                let key = format!("{DOC_PREFIX}{}", item.id);
                ctx.mutate("put", &key, || handle.put(&key, item.content.as_bytes()))?;
            }
            tenants.push(TenantWorkingSet {
                tenant: fixture.tenant.clone(),
                handle,
                queries: fixture.queries.iter().map(|q| q.vector.clone()).collect(),
            });
        }
        Ok(IsolationWorkingSet {
            tenants,
            enumerate_k: fixtures.total_docs().max(1),
        })
    }

    fn execute(&mut self, ctx: &mut ScenarioContext, ws: &Self::WorkingSet) -> Result<Self::RawResults> {
        let mut observations = Vec::with_capacity(ws.tenants.len());
        for tenant in &ws.tenants {
            ctx.check_deadline()?;
            let handle = &tenant.handle;
            let mut query_hits = Vec::with_capacity(tenant.queries.len());
            for query in &tenant.queries {
                let hits = ctx.timed("vector_search", || handle.vector_search(COLLECTION, query, TOP_K))?;
                query_hits.push(hits.into_iter().map(|h| h.id).collect());
            }
            // Ask for every document in the engine; only the tenant's own may come back.
            let sweep = tenant.queries.first().cloned().unwrap_or_default();
            let enumerated = if sweep.is_empty() {
                Vec::new()
            } else {
                ctx.timed("vector_search", || {
                    handle.vector_search(COLLECTION, &sweep, ws.enumerate_k)
                })?
                .into_iter()
                .map(|h| h.id)
                .collect()
            };
            let scanned = ctx
                .timed("scan_prefix", || handle.scan_prefix(DOC_PREFIX))?
                .into_iter()
                .map(|(key, _)| key.trim_start_matches(DOC_PREFIX).to_string())
                .collect();
            observations.push(TenantObservation {
                tenant: tenant.tenant.clone(),
                query_hits,
                enumerated,
                scanned,
            });
        }
        Ok(observations)
    }

    fn verify(
        &self,
        raw: &Self::RawResults,
        fixtures: &Self::Fixtures,
        metrics: &mut ScenarioMetrics,
    ) -> Result<()> {
        metrics.observe("leakage_count");
        metrics.observe("namespace_isolation_violations");

        for observation in raw {
            let tenant = observation.tenant.as_str();
            let reads = observation
                .query_hits
                .iter()
                .chain([&observation.enumerated, &observation.scanned]);
            for ids in reads {
                let foreign = ids.iter().filter(|id| !owned_by(id, tenant)).count();
                if foreign > 0 {
                    metrics.incr("leakage_count", foreign as u64);
                    metrics.incr("namespace_isolation_violations", 1);
                    metrics.note(format!("{tenant}: {foreign} foreign ids in one read"));
                }
            }

            let Some(fixture) = fixtures.tenants.iter().find(|t| t.tenant == tenant) else {
                continue;
            };
            let own: BTreeSet<&str> = fixture.corpus.items.iter().map(|i| i.id.as_str()).collect();
            let seen: BTreeSet<&str> = observation.enumerated.iter().map(String::as_str).collect();
            let missing = own.difference(&seen).count();
            metrics.incr("isolation_missing_items", missing as u64);
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
    use crate::scenario::drive;
    use crate::scenario::testing::{env_with_engine, test_env};

    #[test]
    fn clean_engine_has_no_leakage() {
        let scenario = IsolationScenario::with_shape(3, 10);
        let report = drive(scenario, &test_env(Duration::from_secs(30)));
        assert!(report.passed(), "{:?}", report.metrics.notes);
        assert_eq!(report.metrics.counter("leakage_count"), Some(0));
        assert_eq!(report.metrics.counter("namespace_isolation_violations"), Some(0));
        assert_eq!(report.metrics.counter("isolation_missing_items"), Some(0));
    }

    #[test]
    fn leaking_engine_fails_the_scenario() {
        let engine = Arc::new(MemoryEngine::with_faults(EngineFaults {
            leak_across_namespaces: true,
            ..EngineFaults::default()
        }));
        let scenario = IsolationScenario::with_shape(3, 10);
        let report = drive(scenario, &env_with_engine(engine, Duration::from_secs(30)));
        assert!(!report.passed());
        assert!(report.metrics.counter("leakage_count").unwrap() > 0);
        assert!(report.metrics.counter("namespace_isolation_violations").unwrap() > 0);
    }

    #[test]
    fn every_mutation_is_audited() {
        let scenario = IsolationScenario::with_shape(2, 5);
        let report = drive(scenario, &test_env(Duration::from_secs(30)));
        assert_eq!(report.metrics.audit_coverage(), Some(1.0));
    }

    #[test]
    fn ownership_needs_the_separator() {
        assert!(owned_by("tenant_001/docs/00001", "tenant_001"));
        assert!(!owned_by("tenant_0010/docs/00001", "tenant_001"));
        assert!(!owned_by("tenant_002/docs/00001", "tenant_001"));
    }
}
