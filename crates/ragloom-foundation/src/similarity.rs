//! Similarity computation for embedding vectors

use ragloom_kernel::error::{KernelError, KernelResult};
use std::cmp::Ordering;

/// Cosine similarity between two vectors.
///
/// Returns a value between -1.0 and 1.0 (1.0 for identical direction,
/// 0.0 for orthogonal, -1.0 for opposite direction).
/// Returns 0.0 if either vector has zero magnitude, and `DimMismatch`
/// when the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> KernelResult<f32> {
    if a.len() != b.len() {
        return Err(KernelError::DimMismatch {
            left: a.len(),
            right: b.len(),
        });
    }

    let dot = dot_product(a, b);
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }

    Ok(dot / (norm_a * norm_b))
}

/// Dot product between two vectors of equal length.
fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Ordering for ranked results: score descending, then id ascending.
///
/// NaN scores sort after every real score.
pub fn rank_order(a_score: f32, a_id: &str, b_score: f32, b_id: &str) -> Ordering {
    match (a_score.is_nan(), b_score.is_nan()) {
        (true, false) => return Ordering::Greater,
        (false, true) => return Ordering::Less,
        _ => {}
    }
    b_score
        .partial_cmp(&a_score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a_id.cmp(b_id))
}
