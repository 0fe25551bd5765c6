//! Mutation tracking and audit coverage.

#![allow(clippy::cast_precision_loss)]

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// A mutating engine call issued by a scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationRecord {
    /// Recorder-local id, in issue order.
    pub id: u64,
    /// Engine operation, such as `put` or `commit`.
    pub operation: String,
    /// Key or namespace the mutation addressed.
    pub target: String,
}

/// Evidence that the engine answered a mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// The [`MutationRecord::id`] this event answers.
    pub mutation_id: u64,
    /// Copied from the mutation.
    pub operation: String,
    /// Copied from the mutation.
    pub target: String,
    /// Who issued the mutation; an event without one covers nothing.
    pub actor: String,
    /// `ok`, `conflict`, `rejected`, ...
    pub outcome: String,
    /// RFC 3339 time the answer was recorded.
    pub ts: String,
}

/// Share of mutations with at least one matching, attributed audit event.
///
/// `None` when there were no mutations. Exactly 1.0 only when the event list
/// is non-empty and every mutation is covered by an event naming its actor.
#[must_use]
pub fn audit_coverage(mutations: &[MutationRecord], events: &[AuditEvent]) -> Option<f64> {
    if mutations.is_empty() {
        return None;
    }
    if events.is_empty() {
        return Some(0.0);
    }
    let covered_ids: BTreeSet<u64> = events
        .iter()
        .filter(|e| !e.actor.trim().is_empty())
        .map(|e| e.mutation_id)
        .collect();
    let covered = mutations
        .iter()
        .filter(|m| covered_ids.contains(&m.id))
        .count();
    Some(covered as f64 / mutations.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mutation(id: u64) -> MutationRecord {
        MutationRecord {
            id,
            operation: "put".to_string(),
            target: format!("k{id}"),
        }
    }

    fn event(id: u64) -> AuditEvent {
        AuditEvent {
            mutation_id: id,
            operation: "put".to_string(),
            target: format!("k{id}"),
            actor: "ledger".to_string(),
            outcome: "ok".to_string(),
            ts: String::new(),
        }
    }

    #[test]
    fn no_mutations_is_no_data() {
        assert_eq!(audit_coverage(&[], &[event(1)]), None);
    }

    #[test]
    fn full_and_partial_coverage() {
        let m = vec![mutation(1), mutation(2), mutation(3), mutation(4)];
        let all: Vec<AuditEvent> = (1..=4).map(event).collect();
        assert_eq!(audit_coverage(&m, &all), Some(1.0));
        assert_eq!(audit_coverage(&m, &[event(1), event(3), event(9)]), Some(0.5));
        assert_eq!(audit_coverage(&m, &[]), Some(0.0));
    }

    #[test]
    fn events_without_an_actor_do_not_count() {
        let m = vec![mutation(1), mutation(2)];
        let mut anonymous = event(2);
        anonymous.actor = String::new();
        assert_eq!(audit_coverage(&m, &[event(1), anonymous.clone()]), Some(0.5));

        anonymous.actor = "  ".to_string();
        assert_eq!(audit_coverage(&m, &[anonymous]), Some(0.0));
    }
}
