//! Per-modality similarity ranking.
//!
//! Scores every candidate against the query with cosine similarity and keeps
//! the top `k`. A linear scan is plenty at corpus scale; [`Ranker`] is the
//! seam for swapping in an approximate index later.

use serde::Serialize;

use super::vector::cosine_similarity;
use crate::corpus::ItemId;

/// One ranked entry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoredId {
    pub id: ItemId,
    /// Cosine similarity, in [-1.0, 1.0]
    pub score: f32,
}

impl ScoredId {
    pub fn new(id: ItemId, score: f32) -> Self {
        Self { id, score }
    }
}

/// Ordered by descending score, at most `k` long.
pub type RankedResult = Vec<ScoredId>;

/// A candidate as seen by the ranker: the item id and its vector for the
/// modality being ranked, if it has one.
pub type Candidate<'a> = (ItemId, Option<&'a [f32]>);

pub trait Ranker: Send + Sync {
    fn rank(&self, query: Option<&[f32]>, candidates: &[Candidate<'_>], k: usize) -> RankedResult;
}

/// Exhaustive O(n·d) scan.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinearScan;

impl Ranker for LinearScan {
    fn rank(&self, query: Option<&[f32]>, candidates: &[Candidate<'_>], k: usize) -> RankedResult {
        rank(query, candidates, k)
    }
}

/// Rank `candidates` against `query`.
///
/// Candidates without a vector, or whose dimension differs from the query,
/// are skipped. An absent or empty query yields an empty result. Ties keep
/// input order.
pub fn rank(query: Option<&[f32]>, candidates: &[Candidate<'_>], k: usize) -> RankedResult {
    let query = match query {
        Some(q) if !q.is_empty() => q,
        _ => return Vec::new(),
    };
    if k == 0 {
        return Vec::new();
    }

    let mut results: RankedResult = candidates
        .iter()
        .filter_map(|(id, vector)| {
            let vector = (*vector)?;
            if vector.len() != query.len() {
                return None;
            }
            Some(ScoredId::new(*id, cosine_similarity(query, vector)))
        })
        .collect();

    // stable sort: equal scores stay in input order
    results.sort_by(|a, b| b.score.total_cmp(&a.score));
    results.truncate(k);

    results
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owned(entries: &[(ItemId, Option<Vec<f32>>)]) -> Vec<(ItemId, Option<Vec<f32>>)> {
        entries.to_vec()
    }

    fn candidates(entries: &[(ItemId, Option<Vec<f32>>)]) -> Vec<Candidate<'_>> {
        entries.iter().map(|(id, v)| (*id, v.as_deref())).collect()
    }

    #[test]
    fn test_rank_basic() {
        let items = owned(&[
            (1, Some(vec![1.0, 0.0, 0.0])),
            (2, Some(vec![0.0, 1.0, 0.0])),
        ]);

        let results = rank(Some(&[1.0, 0.1, 0.0]), &candidates(&items), 10);

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, 1);
        assert!(results[0].score > results[1].score);
    }

    #[test]
    fn test_rank_skips_missing_and_mismatched() {
        let items = owned(&[
            (1, None),
            (2, Some(vec![1.0, 0.0])),
            (3, Some(vec![1.0, 0.0, 0.0])),
            (4, Some(vec![])),
        ]);

        let results = rank(Some(&[1.0, 0.0, 0.0]), &candidates(&items), 10);

        let ids: Vec<ItemId> = results.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![3]);
    }

    #[test]
    fn test_rank_without_query_is_empty() {
        let items = owned(&[(1, Some(vec![1.0, 0.0]))]);
        assert!(rank(None, &candidates(&items), 5).is_empty());
        assert!(rank(Some(&[]), &candidates(&items), 5).is_empty());
    }

    #[test]
    fn test_rank_empty_corpus() {
        assert!(rank(Some(&[1.0, 0.0]), &[], 5).is_empty());
    }

    #[test]
    fn test_rank_truncates_to_k() {
        let items: Vec<(ItemId, Option<Vec<f32>>)> = (0..10)
            .map(|i| (i, Some(vec![1.0, i as f32 * 0.1, 0.0])))
            .collect();

        let results = rank(Some(&[1.0, 0.0, 0.0]), &candidates(&items), 3);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].id, 0);

        assert!(rank(Some(&[1.0, 0.0, 0.0]), &candidates(&items), 0).is_empty());
    }

    #[test]
    fn test_rank_ties_keep_input_order() {
        let items = owned(&[
            (7, Some(vec![0.0, 1.0])),
            (3, Some(vec![1.0, 0.0])),
            (5, Some(vec![2.0, 0.0])),
            (1, Some(vec![0.5, 0.0])),
        ]);

        let results = rank(Some(&[1.0, 0.0]), &candidates(&items), 10);
        let ids: Vec<ItemId> = results.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![3, 5, 1, 7]);
    }

    #[test]
    fn test_rank_zero_query_scores_zero() {
        let items = owned(&[(1, Some(vec![1.0, 0.0])), (2, Some(vec![0.0, 1.0]))]);

        let results = rank(Some(&[0.0, 0.0]), &candidates(&items), 10);
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.score == 0.0));
        assert_eq!(results[0].id, 1);
    }

    #[test]
    fn test_rank_scores_descending() {
        let items: Vec<(ItemId, Option<Vec<f32>>)> = (0..20)
            .map(|i| (i, Some(vec![(i as f32).sin(), (i as f32).cos(), 0.3])))
            .collect();

        let results = rank(Some(&[0.2, 0.9, 0.1]), &candidates(&items), 20);
        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn test_linear_scan_matches_rank() {
        let items = owned(&[(1, Some(vec![1.0, 0.0])), (2, Some(vec![0.6, 0.8]))]);
        let c = candidates(&items);
        assert_eq!(LinearScan.rank(Some(&[0.0, 1.0]), &c, 2), rank(Some(&[0.0, 1.0]), &c, 2));
    }
}
