//! Ranking quality against generator ground truth.
//!
//! Relevance is binary: a hit is relevant iff its id is in the ground-truth
//! set for the query topic. Ranks are 1-indexed.

#![allow(clippy::cast_precision_loss)]

use std::collections::BTreeSet;

fn discount(rank: usize) -> f64 {
    1.0 / ((rank + 1) as f64).log2()
}

/// NDCG@k. The ideal ordering puts `min(k, |relevant|)` relevant items first;
/// 0 when there is nothing relevant.
#[must_use]
pub fn ndcg_at_k(ranked: &[String], relevant: &BTreeSet<String>, k: usize) -> f64 {
    let ideal: f64 = (1..=k.min(relevant.len())).map(discount).sum();
    if ideal <= 0.0 {
        return 0.0;
    }
    let dcg: f64 = ranked
        .iter()
        .take(k)
        .enumerate()
        .filter(|(_, id)| relevant.contains(*id))
        .map(|(i, _)| discount(i + 1))
        .sum();
    (dcg / ideal).clamp(0.0, 1.0)
}

/// Relevant ids in the top `k` over all relevant ids in the corpus.
#[must_use]
pub fn recall_at_k(ranked: &[String], relevant: &BTreeSet<String>, k: usize) -> f64 {
    if relevant.is_empty() {
        return 0.0;
    }
    hits_in_top(ranked, relevant, k) as f64 / relevant.len() as f64
}

/// Relevant ids in the top `k` over `k`.
#[must_use]
pub fn precision_at_k(ranked: &[String], relevant: &BTreeSet<String>, k: usize) -> f64 {
    if k == 0 {
        return 0.0;
    }
    hits_in_top(ranked, relevant, k) as f64 / k as f64
}

/// Reciprocal rank of the first relevant id within the top `k`, else 0.
#[must_use]
pub fn mrr_at_k(ranked: &[String], relevant: &BTreeSet<String>, k: usize) -> f64 {
    ranked
        .iter()
        .take(k)
        .position(|id| relevant.contains(id))
        .map_or(0.0, |i| 1.0 / (i + 1) as f64)
}

fn hits_in_top(ranked: &[String], relevant: &BTreeSet<String>, k: usize) -> usize {
    let mut seen = BTreeSet::new();
    ranked
        .iter()
        .take(k)
        .filter(|id| relevant.contains(*id) && seen.insert(id.as_str()))
        .count()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn ids(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| (*s).to_string()).collect()
    }

    fn set(raw: &[&str]) -> BTreeSet<String> {
        raw.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn perfect_ranking_scores_one() {
        let rel = set(&["a", "b", "c"]);
        let ranked = ids(&["a", "b", "c", "x", "y"]);
        assert!((ndcg_at_k(&ranked, &rel, 5) - 1.0).abs() < 1e-12);
        assert!((recall_at_k(&ranked, &rel, 5) - 1.0).abs() < 1e-12);
        assert!((mrr_at_k(&ranked, &rel, 5) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn ndcg_matches_hand_computation() {
        // rel at ranks 2 and 3, two relevant items in total.
        let rel = set(&["a", "b"]);
        let ranked = ids(&["x", "a", "b"]);
        let dcg = 1.0 / 3_f64.log2() + 1.0 / 4_f64.log2();
        let idcg = 1.0 + 1.0 / 3_f64.log2();
        assert!((ndcg_at_k(&ranked, &rel, 3) - dcg / idcg).abs() < 1e-12);
    }

    #[test]
    fn empty_ground_truth_is_zero() {
        let ranked = ids(&["a"]);
        assert!(ndcg_at_k(&ranked, &BTreeSet::new(), 10).abs() < f64::EPSILON);
        assert!(recall_at_k(&ranked, &BTreeSet::new(), 10).abs() < f64::EPSILON);
    }

    #[test]
    fn mrr_uses_first_relevant_rank() {
        let rel = set(&["b"]);
        assert!((mrr_at_k(&ids(&["x", "y", "b"]), &rel, 10) - 1.0 / 3.0).abs() < 1e-12);
        assert!(mrr_at_k(&ids(&["x", "y", "b"]), &rel, 2).abs() < f64::EPSILON);
    }

    #[test]
    fn recall_denominator_is_ground_truth_not_response() {
        let rel = set(&["a", "b", "c", "d"]);
        assert!((recall_at_k(&ids(&["a"]), &rel, 10) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn duplicate_hits_count_once() {
        let rel = set(&["a", "b"]);
        assert!((recall_at_k(&ids(&["a", "a"]), &rel, 10) - 0.5).abs() < 1e-12);
        assert!((precision_at_k(&ids(&["a", "a"]), &rel, 2) - 0.5).abs() < 1e-12);
    }

    fn ranking_strategy() -> impl Strategy<Value = (Vec<String>, BTreeSet<String>)> {
        (
            proptest::collection::vec(0_u8..30, 0..25),
            proptest::collection::btree_set(0_u8..30, 0..15),
        )
            .prop_map(|(ranked, rel)| {
                (
                    ranked.into_iter().map(|n| format!("d{n}")).collect(),
                    rel.into_iter().map(|n| format!("d{n}")).collect(),
                )
            })
    }

    proptest! {
        #[test]
        fn ndcg_is_bounded((ranked, rel) in ranking_strategy(), k in 0_usize..30) {
            let v = ndcg_at_k(&ranked, &rel, k);
            prop_assert!((0.0..=1.0).contains(&v));
        }

        #[test]
        fn recall_is_monotone_in_k((ranked, rel) in ranking_strategy(), k in 0_usize..29) {
            prop_assert!(recall_at_k(&ranked, &rel, k) <= recall_at_k(&ranked, &rel, k + 1));
        }

        #[test]
        fn ideal_prefix_scores_one(n_rel in 1_usize..15, k in 1_usize..20) {
            let rel: BTreeSet<String> = (0..n_rel).map(|i| format!("r{i}")).collect();
            let ranked: Vec<String> = (0..n_rel).map(|i| format!("r{i}"))
                .chain((0..10).map(|i| format!("x{i}")))
                .collect();
            prop_assert!((ndcg_at_k(&ranked, &rel, k) - 1.0).abs() < 1e-9);
        }
    }
}
