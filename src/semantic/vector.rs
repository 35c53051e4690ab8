//! Vector math shared by the ranker.

/// Compute L2 norm of a vector.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Cosine similarity of two equal-length vectors.
///
/// Returns exactly `0.0` when either vector has zero norm, when the lengths
/// differ, or when the result is not finite.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let (norm_a, norm_b) = (l2_norm(a), l2_norm(b));
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    let score = dot(a, b) / (norm_a * norm_b);
    if score.is_finite() {
        // rounding can push parallel vectors slightly past 1
        score.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}
