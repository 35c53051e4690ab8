//! Fusion of text and image rankings.
//!
//! Uses a weighted linear combination of the per-modality cosine scores:
//!   score(d) = w * score_text(d) + (1-w) * score_image(d)
//!
//! An id missing from one list contributes 0 for that modality. When only one
//! modality produced results it is returned as-is, without weighting.

use std::collections::HashMap;

use super::ranker::{RankedResult, ScoredId};
use crate::corpus::ItemId;

/// Default text weight, image gets the remainder.
pub const DEFAULT_TEXT_WEIGHT: f32 = 0.6;

/// Merge text and image rankings into one ranking of at most `k` entries.
///
/// `weight_text` is clamped to [0.0, 1.0]. Ties are broken by first
/// appearance, text list first.
pub fn combine(
    text_results: &[ScoredId],
    image_results: &[ScoredId],
    weight_text: f32,
    k: usize,
) -> RankedResult {
    // identity when only one side has anything
    if text_results.is_empty() {
        return image_results.iter().take(k).copied().collect();
    }
    if image_results.is_empty() {
        return text_results.iter().take(k).copied().collect();
    }

    let text_weight = weight_text.clamp(0.0, 1.0);
    let image_weight = 1.0 - text_weight;

    // id -> position in `merged`, so insertion order drives tie-breaking
    let mut positions: HashMap<ItemId, usize> = HashMap::new();
    let mut merged: Vec<ScoredId> = Vec::with_capacity(text_results.len() + image_results.len());

    for result in text_results {
        let score = text_weight * result.score;
        match positions.get(&result.id) {
            Some(&pos) => merged[pos].score += score,
            None => {
                positions.insert(result.id, merged.len());
                merged.push(ScoredId::new(result.id, score));
            }
        }
    }

    for result in image_results {
        let score = image_weight * result.score;
        match positions.get(&result.id) {
            Some(&pos) => merged[pos].score += score,
            None => {
                positions.insert(result.id, merged.len());
                merged.push(ScoredId::new(result.id, score));
            }
        }
    }

    merged.sort_by(|a, b| b.score.total_cmp(&a.score));
    merged.truncate(k);
    merged
}
