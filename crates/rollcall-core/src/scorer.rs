//! Similarity scoring between two embeddings.
//!
//! Embeddings of the primary dimension are compared by Euclidean distance
//! with a boost that spreads high-confidence scores apart. Any other shape
//! (histogram features, foreign models) falls back to a blend of cosine
//! similarity and inverse distance over unit-normalised vectors.

use crate::types::Embedding;

/// Dimension of embeddings produced by the primary extractor family.
pub const PRIMARY_EMBEDDING_DIM: usize = 128;

const BOOST_FLOOR: f32 = 0.5;
const BOOST_EXPONENT: f32 = 0.7;
const COSINE_WEIGHT: f32 = 0.8;
const DISTANCE_WEIGHT: f32 = 0.2;

/// Score two embeddings in [0, 1]; higher is more similar.
///
/// Never fails: mismatched lengths, empty vectors, non-finite components and
/// zero vectors all score 0.0 so a single corrupt gallery entry cannot abort
/// a scan.
pub fn score(a: &Embedding, b: &Embedding) -> f32 {
    if !a.is_well_formed() || !b.is_well_formed() || a.len() != b.len() {
        tracing::debug!(
            probe_len = a.len(),
            entry_len = b.len(),
            "malformed embedding scored as 0.0"
        );
        return 0.0;
    }

    let raw = if a.len() == PRIMARY_EMBEDDING_DIM {
        distance_similarity(a, b)
    } else {
        blended_similarity(a, b)
    };

    if raw.is_finite() {
        raw.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn distance_similarity(a: &Embedding, b: &Embedding) -> f32 {
    let similarity = (1.0 - a.euclidean_distance(b)).max(0.0);
    if similarity > BOOST_FLOOR {
        similarity.powf(BOOST_EXPONENT)
    } else {
        similarity
    }
}

fn blended_similarity(a: &Embedding, b: &Embedding) -> f32 {
    let (Some(a), Some(b)) = (a.normalized(), b.normalized()) else {
        return 0.0;
    };
    let cosine: f32 = a
        .values
        .iter()
        .zip(b.values.iter())
        .map(|(x, y)| x * y)
        .sum();
    let inverse_distance = 1.0 / (1.0 + a.euclidean_distance(&b));
    COSINE_WEIGHT * cosine + DISTANCE_WEIGHT * inverse_distance
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic pseudo-random vector in [-0.5, 0.5).
    fn vector(seed: u32, len: usize) -> Embedding {
        let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
        let values = (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                (state % 10_000) as f32 / 10_000.0 - 0.5
            })
            .collect();
        Embedding::new(values)
    }

    /// Scale a vector to the unit sphere, as the embedding extractor does.
    fn unit(e: Embedding) -> Embedding {
        e.normalized().unwrap()
    }

    #[test]
    fn test_self_similarity_primary() {
        for seed in 1..20 {
            let e = unit(vector(seed, PRIMARY_EMBEDDING_DIM));
            assert!((score(&e, &e) - 1.0).abs() < 1e-5, "seed {seed}");
        }
    }

    #[test]
    fn test_self_similarity_fallback() {
        for seed in 1..20 {
            let e = vector(seed, 256);
            assert!((score(&e, &e) - 1.0).abs() < 1e-5, "seed {seed}");
        }
    }

    #[test]
    fn test_symmetric() {
        for seed in 1..20 {
            for len in [PRIMARY_EMBEDDING_DIM, 64, 256] {
                let a = vector(seed, len);
                let b = vector(seed + 100, len);
                assert_eq!(score(&a, &b), score(&b, &a));
            }
        }
    }

    #[test]
    fn test_bounded() {
        for seed in 1..50 {
            for len in [PRIMARY_EMBEDDING_DIM, 3, 256] {
                let a = vector(seed, len);
                let b = vector(seed * 7 + 3, len);
                let s = score(&a, &b);
                assert!((0.0..=1.0).contains(&s), "score {s} out of range");
            }
        }
    }

    #[test]
    fn test_far_apart_primary_is_zero() {
        let a = Embedding::new(vec![0.0; PRIMARY_EMBEDDING_DIM]);
        let mut far = vec![0.0; PRIMARY_EMBEDDING_DIM];
        far[0] = 2.0;
        // distance 2 → 1 - 2 clamps to 0; zero vector is still well formed
        assert_eq!(score(&a, &Embedding::new(far)), 0.0);
    }

    #[test]
    fn test_boost_applied_above_floor() {
        let a = Embedding::new(vec![0.0; PRIMARY_EMBEDDING_DIM]);
        let mut near = vec![0.0; PRIMARY_EMBEDDING_DIM];
        near[0] = 0.2;
        // similarity 0.8 → 0.8^0.7
        let expected = 0.8f32.powf(0.7);
        assert!((score(&a, &Embedding::new(near)) - expected).abs() < 1e-5);
    }

    #[test]
    fn test_no_boost_below_floor() {
        let a = Embedding::new(vec![0.0; PRIMARY_EMBEDDING_DIM]);
        let mut near = vec![0.0; PRIMARY_EMBEDDING_DIM];
        near[0] = 0.6;
        assert!((score(&a, &Embedding::new(near)) - 0.4).abs() < 1e-5);
    }

    #[test]
    fn test_fallback_orthogonal() {
        let a = Embedding::new(vec![1.0, 0.0, 0.0]);
        let b = Embedding::new(vec![0.0, 1.0, 0.0]);
        // cosine 0, distance sqrt(2) → 0.2 / (1 + sqrt 2)
        let expected = 0.2 / (1.0 + 2.0f32.sqrt());
        assert!((score(&a, &b) - expected).abs() < 1e-5);
    }

    #[test]
    fn test_fallback_opposite_clamps_to_zero() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![-1.0, 0.0]);
        // 0.8 * -1 + 0.2 / 3 < 0
        assert_eq!(score(&a, &b), 0.0);
    }

    #[test]
    fn test_malformed_inputs_score_zero() {
        let good = vector(1, PRIMARY_EMBEDDING_DIM);
        assert_eq!(score(&good, &vector(1, 64)), 0.0);
        assert_eq!(score(&good, &Embedding::new(vec![])), 0.0);
        let mut nan = good.clone();
        nan.values[5] = f32::NAN;
        assert_eq!(score(&good, &nan), 0.0);
        assert_eq!(score(&nan, &good), 0.0);
        let zero = Embedding::new(vec![0.0; 16]);
        assert_eq!(score(&zero, &vector(2, 16)), 0.0);
    }
}
