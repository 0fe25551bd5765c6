//! Access-policy enforcement over a full subject × resource × action matrix.

#![allow(clippy::cast_precision_loss)]

use std::collections::BTreeSet;

use super::{Scenario, ScenarioContext};
use crate::core::config::ScaleParams;
use crate::core::errors::Result;
use crate::engine::{AccessDecision, DEFAULT_DENY_RULE, Effect, NamespaceHandle};
use crate::generator::{AccessMatrix, AccessMatrixEntry, RuleSet, SyntheticGenerator};
use crate::metrics::ScenarioMetrics;

/// Access decisions match the expected rule table.
#[derive(Debug, Clone, Default)]
pub struct PolicyScenario;

/// The namespace holding the installed rules.
#[derive(Debug)]
pub struct PolicyWorkingSet {
    handle: NamespaceHandle,
    entries: Vec<AccessMatrixEntry>,
}

/// Why a decision is malformed, if it is.
fn schema_problem(decision: &AccessDecision, known_rules: &BTreeSet<&str>) -> Option<&'static str> {
    let Some(rule_id) = decision.rule_id.as_deref() else {
        return Some("missing rule id");
    };
    if rule_id != DEFAULT_DENY_RULE && !known_rules.contains(rule_id) {
        return Some("unknown rule id");
    }
    if decision.effect == Effect::Deny
        && decision.explanation.as_deref().is_none_or(|e| e.trim().is_empty())
    {
        return Some("deny without explanation");
    }
    None
}

impl Scenario for PolicyScenario {
    type Fixtures = AccessMatrix;
    type WorkingSet = PolicyWorkingSet;
    type RawResults = Vec<AccessDecision>;

    fn id(&self) -> &'static str {
        "policy"
    }

    fn description(&self) -> &'static str {
        "access decisions match the rule truth table; every deny is explained"
    }

    fn parallel_safe(&self) -> bool {
        true
    }

    fn fixtures(&self, generator: &SyntheticGenerator, scale: &ScaleParams) -> Result<Self::Fixtures> {
        Ok(generator.build_access_matrix(scale.subjects, scale.resources, RuleSet::Generated))
    }

    fn setup(&mut self, ctx: &mut ScenarioContext, matrix: &Self::Fixtures) -> Result<Self::WorkingSet> {
        let handle = ctx.create_namespace("acl")?;
        for rule in &matrix.rules {
            ctx.mutate("put_access_rule", &rule.rule_id, || {
                handle.put_access_rule(rule.clone())
            })?;
        }
        Ok(PolicyWorkingSet {
            handle,
            entries: matrix.entries.clone(),
        })
    }

    fn execute(&mut self, ctx: &mut ScenarioContext, ws: &Self::WorkingSet) -> Result<Self::RawResults> {
        let mut decisions = Vec::with_capacity(ws.entries.len());
        for (i, entry) in ws.entries.iter().enumerate() {
            if i % 256 == 0 {
                ctx.check_deadline()?;
            }
            let decision = ctx.timed("access_check", || {
                ws.handle
                    .check_access(&entry.subject, &entry.resource, &entry.action)
            })?;
            decisions.push(decision);
        }
        Ok(decisions)
    }

    fn verify(
        &self,
        raw: &Self::RawResults,
        matrix: &Self::Fixtures,
        metrics: &mut ScenarioMetrics,
    ) -> Result<()> {
        metrics.observe("schema_validation_failures");
        let known: BTreeSet<&str> = matrix.rules.iter().map(|r| r.rule_id.as_str()).collect();

        let mut correct = 0_u64;
        let mut denies = 0_u64;
        let mut explained = 0_u64;
        for (entry, decision) in matrix.entries.iter().zip(raw) {
            if decision.effect == entry.expected {
                correct += 1;
            } else {
                metrics.note(format!(
                    "{} {} {}: expected {:?}, got {:?}",
                    entry.subject, entry.action, entry.resource, entry.expected, decision.effect
                ));
            }
            if decision.rule_id.as_deref() != Some(entry.rule_id.as_str()) {
                metrics.incr("policy_rule_mismatches", 1);
            }
            if let Some(problem) = schema_problem(decision, &known) {
                metrics.incr("schema_validation_failures", 1);
                metrics.incr(&format!("policy_{}", problem.replace(' ', "_")), 1);
            }
            if decision.effect == Effect::Deny {
                denies += 1;
                if decision.rule_id.is_some()
                    && decision.explanation.as_deref().is_some_and(|e| !e.trim().is_empty())
                {
                    explained += 1;
                }
            }
        }

        if !raw.is_empty() {
            metrics.measured("policy_accuracy", correct as f64 / raw.len() as f64);
        }
        if denies > 0 {
            metrics.measured("deny_with_explanation_pct", explained as f64 * 100.0 / denies as f64);
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
    fn reference_engine_is_exact() {
        let report = drive(PolicyScenario, &test_env(Duration::from_secs(30)));
        assert!(report.passed(), "{:?}", report.metrics.notes);
        let m = &report.metrics;
        assert_eq!(m.value("policy_accuracy").unwrap().value, 1.0);
        assert_eq!(m.value("deny_with_explanation_pct").unwrap().value, 100.0);
        assert_eq!(m.counter("schema_validation_failures"), Some(0));
        assert_eq!(m.counter("policy_rule_mismatches"), None);
    }

    #[test]
    fn unexplained_denies_fail_schema_validation() {
        let engine = Arc::new(MemoryEngine::with_faults(EngineFaults {
            unexplained_denies: true,
            ..EngineFaults::default()
        }));
        let report = drive(PolicyScenario, &env_with_engine(engine, Duration::from_secs(30)));
        assert!(!report.passed());
        let m = &report.metrics;
        assert!(m.counter("schema_validation_failures").unwrap() > 0);
        assert_eq!(m.value("deny_with_explanation_pct").unwrap().value, 0.0);
        assert_eq!(m.value("policy_accuracy").unwrap().value, 1.0);
    }

    #[test]
    fn schema_checks() {
        let known = BTreeSet::from(["r-1"]);
        let ok = AccessDecision {
            effect: Effect::Deny,
            rule_id: Some(DEFAULT_DENY_RULE.into()),
            explanation: Some("no rule".into()),
        };
        assert_eq!(schema_problem(&ok, &known), None);
        let bare = AccessDecision {
            explanation: Some("  ".into()),
            ..ok.clone()
        };
        assert_eq!(schema_problem(&bare, &known), Some("deny without explanation"));
        let ghost = AccessDecision {
            effect: Effect::Allow,
            rule_id: Some("r-9".into()),
            explanation: None,
        };
        assert_eq!(schema_problem(&ghost, &known), Some("unknown rule id"));
    }
}
