//! Controlled keyword injection with a known precision/recall ceiling.

#![allow(clippy::cast_precision_loss)]

use std::collections::BTreeSet;

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::rng::substream;
use super::topics::{GroundTruthItem, TopicCluster};

/// Which items carry a topic's marker keyword, and what a perfect keyword
/// search for that marker can therefore achieve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordSignal {
    pub topic_id: usize,
    pub keyword: String,
    /// Item ids carrying the keyword, both true-topic and noise.
    pub injected: BTreeSet<String>,
    pub in_topic_hits: usize,
    pub noise_hits: usize,
    pub topic_items: usize,
    /// `in_topic_hits / (in_topic_hits + noise_hits)`; 0 when nothing was injected.
    pub expected_precision: f64,
    /// `in_topic_hits / topic_items`; 0 for an empty topic.
    pub expected_recall: f64,
}

impl KeywordSignal {
    /// Append the keyword to the content of every injected item.
    pub fn apply(&self, items: &mut [GroundTruthItem]) {
        for item in items.iter_mut().filter(|i| self.injected.contains(&i.id)) {
            item.content.push(' ');
            item.content.push_str(&self.keyword);
            item.keywords.push(self.keyword.clone());
        }
    }
}

/// Decide keyword injection for `topic` across `topic_items` (true topic)
/// and `other_items` (unrelated), at the given rates.
#[must_use]
pub fn build_keyword_signal(
    seed: u64,
    topic: &TopicCluster,
    topic_items: &[&GroundTruthItem],
    other_items: &[&GroundTruthItem],
    in_topic_rate: f64,
    noise_rate: f64,
) -> KeywordSignal {
    let in_rate = in_topic_rate.clamp(0.0, 1.0);
    let out_rate = noise_rate.clamp(0.0, 1.0);
    let mut injected = BTreeSet::new();
    let mut in_topic_hits = 0;
    let mut noise_hits = 0;

    for item in topic_items {
        let mut rng = substream(seed, "kw-in", &[topic.id as u64, item.index]);
        if rng.random_bool(in_rate) {
            injected.insert(item.id.clone());
            in_topic_hits += 1;
        }
    }
    for item in other_items {
        let mut rng = substream(seed, "kw-noise", &[topic.id as u64, item.index]);
        if rng.random_bool(out_rate) {
            injected.insert(item.id.clone());
            noise_hits += 1;
        }
    }

    let returned = in_topic_hits + noise_hits;
    KeywordSignal {
        topic_id: topic.id,
        keyword: topic.marker(),
        injected,
        in_topic_hits,
        noise_hits,
        topic_items: topic_items.len(),
        expected_precision: if returned == 0 {
            0.0
        } else {
            in_topic_hits as f64 / returned as f64
        },
        expected_recall: if topic_items.is_empty() {
            0.0
        } else {
            in_topic_hits as f64 / topic_items.len() as f64
        },
    }
}
