//! Paraphrase groups for cache-equivalence checks.

use serde::{Deserialize, Serialize};

use super::topics::{TopicCluster, fill_template};

const PARAPHRASE_TEMPLATES: &[&str] = &[
    "How do I fix {0} issues?",
    "What's the solution for {0} problems?",
    "Help with {0} errors",
    "Troubleshooting {0}",
    "{0} not working correctly",
    "Why does {0} keep failing?",
    "Steps to repair broken {0}",
    "Guide for resolving {0} faults",
];

/// Distinct prompts that all mean the same thing for one topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParaphraseGroup {
    pub topic_id: usize,
    /// Content word every variant shares.
    pub anchor: String,
    pub prompts: Vec<String>,
}

/// Up to `n` distinct prompts for `topic`; asking for more than the
/// template count returns every template once.
#[must_use]
pub fn build_paraphrase_group(topic: &TopicCluster, n: usize) -> ParaphraseGroup {
    let anchor = topic.marker();
    let slots = [anchor.clone()];
    ParaphraseGroup {
        topic_id: topic.id,
        prompts: PARAPHRASE_TEMPLATES
            .iter()
            .take(n)
            .map(|t| fill_template(t, &slots))
            .collect(),
        anchor,
    }
}

/// Number of distinct paraphrase templates available.
#[must_use]
pub const fn max_paraphrases() -> usize {
    PARAPHRASE_TEMPLATES.len()
}
