//! SpeakerEmbedder capability (§6.4): wav bytes → fixed-dimension unit vector.

use crate::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait SpeakerEmbedder: Send + Sync {
    async fn embed(&self, wav_path: &std::path::Path) -> Result<Vec<f32>>;
    fn dimensions(&self) -> usize;
}

/// Cosine similarity between two equal-length vectors. Returns 0 if either is zero-norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Componentwise mean of a non-empty slice of equal-length vectors.
pub fn average_vectors(vectors: &[Vec<f32>]) -> Vec<f32> {
    if vectors.is_empty() {
        return Vec::new();
    }
    let dims = vectors[0].len();
    let mut sum = vec![0.0f32; dims];
    for v in vectors {
        for (i, x) in v.iter().enumerate() {
            sum[i] += x;
        }
    }
    let n = vectors.len() as f32;
    for x in sum.iter_mut() {
        *x /= n;
    }
    sum
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_identical_vectors_is_one() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_orthogonal_is_zero() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn average_vectors_computes_componentwise_mean() {
        let vectors = vec![vec![1.0, 1.0], vec![3.0, 5.0]];
        assert_eq!(average_vectors(&vectors), vec![2.0, 3.0]);
    }
}
