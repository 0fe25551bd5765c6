//! Access-control rule sets expanded into a full truth table.
//!
//! The generator is the source of truth. It resolves rules on its own, by
//! priority tiers, rather than through the engine's resolver: highest
//! priority wins, deny beats allow on ties, the lowest rule id breaks what
//! is left and no match means `default-deny`.

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::rng::substream;
use crate::engine::{AccessRule, DEFAULT_DENY_RULE, Effect};

/// Actions every subject/resource pair is checked for.
pub const ACTIONS: &[&str] = &["read", "write", "delete"];

/// Rules to expand: generated from the seed, or supplied explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleSet {
    Generated,
    Explicit(Vec<AccessRule>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessMatrixEntry {
    pub subject: String,
    pub resource: String,
    pub action: String,
    pub expected: Effect,
    /// Rule that decides the entry; `default-deny` when none matches.
    pub rule_id: String,
    /// Deny decisions must carry an explanation.
    pub explanation_required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessMatrix {
    pub subjects: Vec<String>,
    pub resources: Vec<String>,
    pub rules: Vec<AccessRule>,
    pub entries: Vec<AccessMatrixEntry>,
}

impl AccessMatrix {
    #[must_use]
    pub fn deny_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.expected == Effect::Deny)
            .count()
    }
}

fn subject_name(i: usize) -> String {
    format!("subject_{i:03}")
}

fn resource_name(group: usize, i: usize) -> String {
    format!("res/g{group}/{i:03}")
}

/// Build the subject × resource × action truth table.
#[must_use]
pub fn build_access_matrix(
    seed: u64,
    subject_count: usize,
    resource_count: usize,
    rule_set: RuleSet,
) -> AccessMatrix {
    let groups = (resource_count / 4).max(1);
    let subjects: Vec<String> = (0..subject_count).map(subject_name).collect();
    let resources: Vec<String> = (0..resource_count)
        .map(|i| resource_name(i % groups, i))
        .collect();

    let rules = match rule_set {
        RuleSet::Explicit(rules) => rules,
        RuleSet::Generated => generated_rules(seed, &subjects, &resources, groups),
    };

    let mut entries = Vec::with_capacity(subjects.len() * resources.len() * ACTIONS.len());
    for subject in &subjects {
        for resource in &resources {
            for action in ACTIONS {
                let (expected, rule_id) = match expected_rule(&rules, subject, resource, action) {
                    Some(rule) => (rule.effect, rule.rule_id.clone()),
                    None => (Effect::Deny, DEFAULT_DENY_RULE.to_string()),
                };
                entries.push(AccessMatrixEntry {
                    subject: subject.clone(),
                    resource: resource.clone(),
                    action: (*action).to_string(),
                    expected,
                    rule_id,
                    explanation_required: expected == Effect::Deny,
                });
            }
        }
    }

    AccessMatrix {
        subjects,
        resources,
        rules,
        entries,
    }
}

/// `*` matches anything; a trailing `*` on a resource makes it a prefix.
fn resource_pattern_matches(pattern: &str, resource: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => resource.starts_with(prefix),
        None => pattern == resource,
    }
}

fn applies(rule: &AccessRule, subject: &str, resource: &str, action: &str) -> bool {
    (rule.subject == "*" || rule.subject == subject)
        && (rule.action == "*" || rule.action == action)
        && resource_pattern_matches(&rule.resource, resource)
}

/// The rule that should decide a triple, or `None` for `default-deny`.
///
/// Finds the top priority tier among applicable rules, keeps its denies when
/// it has any, and takes the lowest rule id of what remains.
#[must_use]
pub fn expected_rule<'a>(
    rules: &'a [AccessRule],
    subject: &str,
    resource: &str,
    action: &str,
) -> Option<&'a AccessRule> {
    let applicable: Vec<&AccessRule> = rules
        .iter()
        .filter(|r| applies(r, subject, resource, action))
        .collect();
    let top = applicable.iter().map(|r| r.priority).max()?;
    let tier: Vec<&AccessRule> = applicable
        .into_iter()
        .filter(|r| r.priority == top)
        .collect();
    let denies_in_tier = tier.iter().any(|r| r.effect == Effect::Deny);
    tier.into_iter()
        .filter(|r| !denies_in_tier || r.effect == Effect::Deny)
        .min_by(|a, b| a.rule_id.cmp(&b.rule_id))
}

fn rule(
    rule_id: String,
    subject: &str,
    resource: String,
    action: &str,
    effect: Effect,
    priority: u32,
    reason: String,
) -> AccessRule {
    AccessRule {
        rule_id,
        subject: subject.to_string(),
        resource,
        action: action.to_string(),
        effect,
        priority,
        reason,
    }
}

/// Role grants per group, an admin, legal holds that outrank the admin,
/// and equal-priority deny/allow collisions.
fn generated_rules(
    seed: u64,
    subjects: &[String],
    resources: &[String],
    groups: usize,
) -> Vec<AccessRule> {
    let mut rng = substream(seed, "access-rules", &[subjects.len() as u64, resources.len() as u64]);
    let mut rules = Vec::new();

    if let Some(admin) = subjects.first() {
        rules.push(rule(
            "r-admin".to_string(),
            admin,
            "*".to_string(),
            "*",
            Effect::Allow,
            10,
            "administrator".to_string(),
        ));
    }

    for (i, subject) in subjects.iter().enumerate().skip(1) {
        let group = i % groups;
        rules.push(rule(
            format!("r-read-{i:03}"),
            subject,
            format!("res/g{group}/*"),
            "read",
            Effect::Allow,
            5,
            format!("member of group g{group}"),
        ));
        if rng.random_bool(0.5) {
            rules.push(rule(
                format!("r-write-{i:03}"),
                subject,
                format!("res/g{group}/*"),
                "write",
                Effect::Allow,
                5,
                format!("editor of group g{group}"),
            ));
        }
    }

    for (j, resource) in resources.iter().enumerate() {
        if rng.random_bool(0.15) {
            rules.push(rule(
                format!("r-hold-{j:03}"),
                "*",
                resource.clone(),
                "*",
                Effect::Deny,
                20,
                format!("{resource} is under legal hold"),
            ));
        }
    }

    for (i, subject) in subjects.iter().enumerate().skip(1) {
        if rng.random_bool(0.25) && !resources.is_empty() {
            let target = &resources[rng.random_range(0..resources.len())];
            rules.push(rule(
                format!("r-revoke-{i:03}"),
                subject,
                target.clone(),
                "read",
                Effect::Deny,
                5,
                format!("read access to {target} revoked for {subject}"),
            ));
        }
    }

    rules
}
