//! Explicit scenario registry: id to constructor, in a fixed order.

use std::collections::BTreeSet;

use super::DynScenario;
use super::atomicity::AtomicityScenario;
use super::context_budget::ContextBudgetScenario;
use super::crash_recovery::CrashRecoveryScenario;
use super::graph::GraphScenario;
use super::isolation::IsolationScenario;
use super::ledger::LedgerScenario;
use super::policy::PolicyScenario;
use super::ranking::RankingScenario;
use super::semantic_cache::SemanticCacheScenario;
use super::temporal::TemporalScenario;
use crate::core::errors::{HarnessError, Result};

/// Builds a fresh scenario instance.
pub type Constructor = fn() -> Box<dyn DynScenario>;

/// Registry listing, for `ech list`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ScenarioInfo {
    /// Scenario id.
    pub id: &'static str,
    /// One-line description.
    pub description: &'static str,
    /// Whether it may run alongside other scenarios.
    pub parallel_safe: bool,
}

/// Scenario constructors by id, in run order.
#[derive(Debug, Default)]
pub struct ScenarioRegistry {
    entries: Vec<(&'static str, Constructor)>,
}

impl ScenarioRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every built-in scenario, in report order.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("isolation", || Box::new(IsolationScenario::default()));
        registry.register("atomicity", || Box::new(AtomicityScenario::default()));
        registry.register("ranking", || Box::new(RankingScenario::default()));
        registry.register("ledger", || Box::new(LedgerScenario::default()));
        registry.register("temporal", || Box::new(TemporalScenario::default()));
        registry.register("crash_recovery", || Box::new(CrashRecoveryScenario::default()));
        registry.register("policy", || Box::new(PolicyScenario::default()));
        registry.register("graph", || Box::new(GraphScenario::default()));
        registry.register("semantic_cache", || Box::new(SemanticCacheScenario::default()));
        registry.register("context_budget", || Box::new(ContextBudgetScenario::default()));
        registry
    }

    /// Add or replace a constructor. Replacing keeps the original position.
    pub fn register(&mut self, id: &'static str, constructor: Constructor) {
        if let Some(slot) = self.entries.iter_mut().find(|(existing, _)| *existing == id) {
            slot.1 = constructor;
        } else {
            self.entries.push((id, constructor));
        }
    }

    /// Ids in run order.
    #[must_use]
    pub fn ids(&self) -> Vec<&'static str> {
        self.entries.iter().map(|(id, _)| *id).collect()
    }

    /// Whether `id` names a registered scenario.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|(existing, _)| *existing == id)
    }

    /// Id, description and parallel safety of each scenario.
    #[must_use]
    pub fn describe(&self) -> Vec<ScenarioInfo> {
        self.entries
            .iter()
            .map(|&(id, build)| {
                let scenario = build();
                ScenarioInfo {
                    id,
                    description: scenario.description(),
                    parallel_safe: scenario.parallel_safe(),
                }
            })
            .collect()
    }

    /// Instances for the requested ids (all when empty), in registry order.
    /// Unknown ids are a configuration error.
    pub fn instantiate(&self, requested: &[String]) -> Result<Vec<Box<dyn DynScenario>>> {
        let wanted: BTreeSet<&str> = requested
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect();
        if let Some(unknown) = wanted.iter().find(|id| !self.contains(id)) {
            return Err(HarnessError::UnknownScenario {
                name: (*unknown).to_string(),
            });
        }
        Ok(self
            .entries
            .iter()
            .filter(|(id, _)| wanted.is_empty() || wanted.contains(id))
            .map(|&(_, build)| build())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_has_ten_unique_scenarios() {
        let registry = ScenarioRegistry::builtin();
        let ids = registry.ids();
        assert_eq!(ids.len(), 10);
        let unique: BTreeSet<&str> = ids.iter().copied().collect();
        assert_eq!(unique.len(), 10);
        for info in registry.describe() {
            assert!(!info.description.is_empty());
        }
    }

    #[test]
    fn instances_match_their_ids() {
        let registry = ScenarioRegistry::builtin();
        let all = registry.instantiate(&[]).unwrap();
        let ids: Vec<&str> = all.iter().map(|s| s.id()).collect();
        assert_eq!(ids, registry.ids());
    }

    #[test]
    fn selection_uses_registry_order() {
        let registry = ScenarioRegistry::builtin();
        let picked = registry
            .instantiate(&["temporal".to_string(), "isolation".to_string()])
            .unwrap();
        let ids: Vec<&str> = picked.iter().map(|s| s.id()).collect();
        assert_eq!(ids, vec!["isolation", "temporal"]);
    }

    #[test]
    fn unknown_scenario_is_configuration_error() {
        let err = ScenarioRegistry::builtin()
            .instantiate(&["nope".to_string()])
            .err()
            .expect("unknown scenario id must be rejected");
        assert!(
            matches!(&err, HarnessError::UnknownScenario { name } if name == "nope"),
            "{err:?}"
        );
        assert_eq!(err.code(), "ECH-1004");
        assert!(err.is_configuration());
    }
}
