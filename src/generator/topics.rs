//! Topic centroids, topic vocabularies and ground-truth items.

#![allow(clippy::cast_possible_truncation)]

use std::collections::BTreeMap;

use rand::Rng;
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};

use super::rng::{bounded_normal, normalize, substream};
use crate::core::errors::{HarnessError, Result};
use crate::engine::VectorRecord;

/// Words topic vocabularies are drawn from.
pub const KEYWORD_POOL: &[&str] = &[
    "authentication", "authorization", "database", "network", "security",
    "performance", "latency", "throughput", "error", "exception",
    "deployment", "rollback", "scale", "memory", "cpu",
    "customer", "support", "ticket", "incident", "alert",
    "contract", "vendor", "compliance", "audit", "policy",
    "invoice", "ledger", "payment", "transaction", "reconcile",
    "embedding", "vector", "search", "index", "query",
    "model", "training", "inference", "prediction", "replication",
];

const CONTENT_TEMPLATES: &[&str] = &[
    "Customer experiencing issues with {0}. Need to investigate {1} and {2}.",
    "Troubleshooting {0} problem. Related to {1} configuration.",
    "How to resolve {0} errors? Check {1} settings.",
    "To fix {0} issues: check {1}, verify {2}, restart services.",
    "Runbook for {0}: ensure {1} is configured correctly.",
    "Contract clause regarding {0} and {1} obligations.",
    "[ERROR] {0} failure detected. {1} check required.",
    "[WARN] {0} threshold exceeded. Review {1} metrics.",
];

/// One synthetic topic: a unit-length centroid plus its vocabulary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicCluster {
    pub id: usize,
    pub centroid: Vec<f32>,
    pub keywords: Vec<String>,
}

impl TopicCluster {
    /// Synthetic marker token unique to this topic, used for keyword signals.
    #[must_use]
    pub fn marker(&self) -> String {
        let base = self.keywords.first().map_or("topic", String::as_str);
        format!("{base}{:03}", self.id)
    }
}

/// A generated document with known topic membership.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundTruthItem {
    pub id: String,
    pub topic_id: usize,
    pub index: u64,
    pub vector: Vec<f32>,
    pub content: String,
    /// Keyword markers injected into `content`.
    pub keywords: Vec<String>,
}

impl GroundTruthItem {
    /// Engine record for this item, tagged with its topic.
    #[must_use]
    pub fn to_record(&self) -> VectorRecord {
        VectorRecord {
            id: self.id.clone(),
            vector: self.vector.clone(),
            content: self.content.clone(),
            metadata: BTreeMap::from([("topic".to_string(), self.topic_id.to_string())]),
        }
    }
}

/// Draw `count` unit-length Gaussian centroids of `dimension` components.
pub fn build_topic_clusters(seed: u64, count: i64, dimension: i64) -> Result<Vec<TopicCluster>> {
    if count <= 0 || dimension <= 0 {
        return Err(HarnessError::InvalidConfig {
            details: format!(
                "topic clusters need count > 0 and dimension > 0, got count={count} dimension={dimension}"
            ),
        });
    }
    let count = usize::try_from(count).map_err(|_| HarnessError::InvalidConfig {
        details: format!("topic count {count} does not fit in memory"),
    })?;
    let dimension = usize::try_from(dimension).map_err(|_| HarnessError::InvalidConfig {
        details: format!("dimension {dimension} does not fit in memory"),
    })?;

    Ok((0..count)
        .map(|id| {
            let mut rng = substream(seed, "centroid", &[id as u64]);
            let mut centroid: Vec<f32> = (0..dimension)
                .map(|_| bounded_normal(&mut rng) as f32)
                .collect();
            normalize(&mut centroid);
            TopicCluster {
                id,
                centroid,
                keywords: topic_keywords(seed, id),
            }
        })
        .collect())
}

/// Three to five distinct pool words for a topic.
fn topic_keywords(seed: u64, topic: usize) -> Vec<String> {
    let mut rng = substream(seed, "keywords", &[topic as u64]);
    let n = rng.random_range(3..=5);
    KEYWORD_POOL
        .choose_multiple(&mut rng, n)
        .map(|w| (*w).to_string())
        .collect()
}

/// Centroid plus bounded Gaussian noise, re-normalized, with a templated payload.
///
/// Identical `(seed, topic, index)` always yields an identical item.
#[must_use]
pub fn build_ground_truth_item(
    seed: u64,
    topic: &TopicCluster,
    index: u64,
    noise_scale: f64,
) -> GroundTruthItem {
    let mut rng = substream(seed, "item", &[topic.id as u64, index]);
    let mut vector: Vec<f32> = topic
        .centroid
        .iter()
        .map(|c| c + (bounded_normal(&mut rng) * noise_scale) as f32)
        .collect();
    normalize(&mut vector);

    let template = CONTENT_TEMPLATES
        .choose(&mut rng)
        .copied()
        .unwrap_or(CONTENT_TEMPLATES[0]);
    GroundTruthItem {
        id: format!("t{:03}-i{index:06}", topic.id),
        topic_id: topic.id,
        index,
        vector,
        content: fill_template(template, &topic.keywords),
        keywords: Vec::new(),
    }
}

/// Replace `{n}` placeholders with the n-th keyword (wrapping).
pub(crate) fn fill_template(template: &str, keywords: &[String]) -> String {
    if keywords.is_empty() {
        return template.to_string();
    }
    let mut out = template.to_string();
    for slot in 0..3 {
        let word = &keywords[slot % keywords.len()];
        out = out.replace(&format!("{{{slot}}}"), word);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::DistanceMetric;

    #[test]
    fn non_positive_arguments_rejected() {
        for (count, dim) in [(0, 8), (-1, 8), (4, 0), (4, -3)] {
            let err = build_topic_clusters(1, count, dim).unwrap_err();
            assert_eq!(err.code(), "ECH-1001", "count={count} dim={dim}");
        }
    }

    #[test]
    fn centroids_are_unit_length() {
        let topics = build_topic_clusters(42, 10, 64).unwrap();
        assert_eq!(topics.len(), 10);
        for t in &topics {
            let norm: f32 = t.centroid.iter().map(|v| v * v).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-4);
            assert!((3..=5).contains(&t.keywords.len()));
        }
    }

    #[test]
    fn centroids_are_near_orthogonal() {
        let topics = build_topic_clusters(42, 50, 384).unwrap();
        for (i, a) in topics.iter().enumerate() {
            for b in &topics[i + 1..] {
                let cos = DistanceMetric::Cosine.score(&a.centroid, &b.centroid);
                assert!(cos.abs() < 0.35, "topics {} and {} too close: {cos}", a.id, b.id);
            }
        }
    }

    #[test]
    fn items_are_reproducible_and_closest_to_own_centroid() {
        let topics = build_topic_clusters(7, 20, 128).unwrap();
        let a = build_ground_truth_item(7, &topics[3], 11, 0.05);
        let b = build_ground_truth_item(7, &topics[3], 11, 0.05);
        assert_eq!(a, b);
        let best = topics
            .iter()
            .max_by(|x, y| {
                DistanceMetric::Cosine
                    .score(&a.vector, &x.centroid)
                    .total_cmp(&DistanceMetric::Cosine.score(&a.vector, &y.centroid))
            })
            .unwrap();
        assert_eq!(best.id, 3);
    }

    #[test]
    fn template_fills_all_slots() {
        let kws = vec!["ledger".to_string(), "audit".to_string()];
        let filled = fill_template("{0} {1} {2}", &kws);
        assert_eq!(filled, "ledger audit ledger");
    }

    #[test]
    fn marker_is_alphanumeric_and_topic_specific() {
        let topics = build_topic_clusters(1, 3, 4).unwrap();
        let markers: Vec<String> = topics.iter().map(TopicCluster::marker).collect();
        assert!(markers.iter().all(|m| m.chars().all(char::is_alphanumeric)));
        assert_ne!(markers[0], markers[1]);
    }
}
