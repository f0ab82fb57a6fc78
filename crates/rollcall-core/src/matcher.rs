//! Gallery matching: full linear scan for the single best-scoring entry.

use crate::scorer;
use crate::types::{Embedding, GalleryEntry};
use rayon::prelude::*;
use std::time::{Duration, Instant};
use thiserror::Error;

const WEIGHT_REFERENCE_STRENGTH: f32 = 0.1;
const WEIGHT_MIN: f32 = 0.8;
const WEIGHT_MAX: f32 = 1.2;
/// Sequential scans check the clock once per this many entries.
const BUDGET_CHECK_INTERVAL: usize = 64;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("gallery scan exceeded its {budget:?} budget after {scanned} entries")]
    BudgetExceeded {
        budget: Duration,
        scanned: usize,
        best_score: f32,
    },
}

/// Best entry found by a scan. `best_index` is `None` when nothing scored
/// above zero (including an empty gallery).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BestMatch {
    pub best_index: Option<usize>,
    pub best_score: f32,
}

/// Strategy for comparing a probe embedding against a gallery of enrolled faces.
pub trait Matcher {
    fn best_match(&self, probe: &Embedding, gallery: &[GalleryEntry])
        -> Result<BestMatch, MatchError>;
}

/// Confidence weight rewarding pairs where both embeddings carry feature
/// variance. Pure function of its inputs so the scan can run in parallel.
pub fn confidence_weight(probe: &Embedding, entry: &Embedding) -> f32 {
    let strength = probe.std_dev() + entry.std_dev();
    let weight = strength / WEIGHT_REFERENCE_STRENGTH;
    if weight.is_finite() {
        weight.clamp(WEIGHT_MIN, WEIGHT_MAX)
    } else {
        WEIGHT_MIN
    }
}

/// Linear-scan matcher over a gallery.
///
/// Always visits every entry: gallery order says nothing about quality, so
/// the first entry above threshold is not necessarily the best one.
#[derive(Debug, Clone)]
pub struct GalleryMatcher {
    /// Multiply raw scores by [`confidence_weight`] before comparison.
    pub weighting: bool,
    /// Galleries at least this large are scanned on the rayon pool.
    pub parallel_min: usize,
    /// Wall-clock budget for one scan; `None` is unbounded.
    pub budget: Option<Duration>,
}

impl Default for GalleryMatcher {
    fn default() -> Self {
        Self {
            weighting: true,
            parallel_min: 512,
            budget: None,
        }
    }
}

impl GalleryMatcher {
    /// Ranking score for one entry. Weighted scores can exceed 1.0 and are
    /// compared unclamped; only the reported score is clamped.
    fn entry_score(&self, probe: &Embedding, entry: &GalleryEntry) -> f32 {
        let raw = scorer::score(probe, &entry.embedding);
        if !self.weighting || raw == 0.0 {
            return raw;
        }
        raw * confidence_weight(probe, &entry.embedding)
    }

    fn scan_sequential(
        &self,
        probe: &Embedding,
        gallery: &[GalleryEntry],
        deadline: Option<Instant>,
    ) -> Result<BestMatch, MatchError> {
        let mut best: Option<(usize, f32)> = None;

        for (i, entry) in gallery.iter().enumerate() {
            if i % BUDGET_CHECK_INTERVAL == 0 {
                self.check_deadline(deadline, i, reported_score(best))?;
            }
            let score = self.entry_score(probe, entry);
            if score > best.map_or(0.0, |(_, s)| s) {
                best = Some((i, score));
            }
        }

        Ok(to_best_match(best))
    }

    fn scan_parallel(
        &self,
        probe: &Embedding,
        gallery: &[GalleryEntry],
        deadline: Option<Instant>,
    ) -> Result<BestMatch, MatchError> {
        let best = gallery
            .par_iter()
            .enumerate()
            .try_fold(
                || None,
                |best: Option<(usize, f32)>, (i, entry)| {
                    let score = self.entry_score(probe, entry);
                    let best = better(best, (score > 0.0).then_some((i, score)));
                    if deadline.is_some_and(|d| Instant::now() > d) {
                        return Err((i + 1, best));
                    }
                    Ok(best)
                },
            )
            .try_reduce(|| None, |a, b| Ok(better(a, b)));

        match best {
            Ok(best) => Ok(to_best_match(best)),
            // Only the partial maximum of the fold that hit the deadline survives.
            Err((scanned, partial)) => Err(MatchError::BudgetExceeded {
                budget: self.budget.unwrap_or_default(),
                scanned,
                best_score: reported_score(partial),
            }),
        }
    }

    fn check_deadline(
        &self,
        deadline: Option<Instant>,
        scanned: usize,
        best_score: f32,
    ) -> Result<(), MatchError> {
        match (deadline, self.budget) {
            (Some(d), Some(budget)) if Instant::now() > d => Err(MatchError::BudgetExceeded {
                budget,
                scanned,
                best_score,
            }),
            _ => Ok(()),
        }
    }
}

/// Score as reported to callers: the ranking score clamped to [0, 1].
fn reported_score(best: Option<(usize, f32)>) -> f32 {
    best.map_or(0.0, |(_, s)| s.clamp(0.0, 1.0))
}

fn to_best_match(best: Option<(usize, f32)>) -> BestMatch {
    BestMatch {
        best_index: best.map(|(i, _)| i),
        best_score: reported_score(best),
    }
}

/// Higher score wins; equal scores keep the lower index so the parallel
/// reduction agrees with the sequential scan.
fn better(a: Option<(usize, f32)>, b: Option<(usize, f32)>) -> Option<(usize, f32)> {
    match (a, b) {
        (None, x) | (x, None) => x,
        (Some(a), Some(b)) => {
            if b.1 > a.1 || (b.1 == a.1 && b.0 < a.0) {
                Some(b)
            } else {
                Some(a)
            }
        }
    }
}

impl Matcher for GalleryMatcher {
    fn best_match(
        &self,
        probe: &Embedding,
        gallery: &[GalleryEntry],
    ) -> Result<BestMatch, MatchError> {
        let started = Instant::now();
        let deadline = self.budget.map(|b| started + b);

        let best = if gallery.len() >= self.parallel_min.max(1) {
            self.scan_parallel(probe, gallery, deadline)?
        } else {
            self.scan_sequential(probe, gallery, deadline)?
        };

        tracing::debug!(
            entries = gallery.len(),
            best_index = ?best.best_index,
            best_score = best.best_score,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "gallery scan complete"
        );
        Ok(best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scorer::PRIMARY_EMBEDDING_DIM;

    /// Primary-dimension embedding whose first component is `offset` and the
    /// rest alternate ±0.05, giving every vector the same spread.
    fn emb(offset: f32) -> Embedding {
        let mut values: Vec<f32> = (0..PRIMARY_EMBEDDING_DIM)
            .map(|i| if i % 2 == 0 { 0.05 } else { -0.05 })
            .collect();
        values[0] = offset;
        Embedding::new(values)
    }

    fn entry(person_id: i64, offset: f32) -> GalleryEntry {
        GalleryEntry {
            person_id,
            embedding: emb(offset),
        }
    }

    fn unweighted() -> GalleryMatcher {
        GalleryMatcher {
            weighting: false,
            ..GalleryMatcher::default()
        }
    }

    #[test]
    fn test_empty_gallery() {
        let best = unweighted().best_match(&emb(0.0), &[]).unwrap();
        assert_eq!(best.best_index, None);
        assert_eq!(best.best_score, 0.0);
    }

    #[test]
    fn test_best_match_is_last_entry() {
        // Verify all gallery entries are compared (best match is last entry)
        let gallery = vec![entry(1, 0.6), entry(2, 0.4), entry(3, 0.05)];
        let best = unweighted().best_match(&emb(0.05), &gallery).unwrap();
        assert_eq!(best.best_index, Some(2));
        assert!((best.best_score - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_appending_lower_score_keeps_index() {
        let probe = emb(0.05);
        let mut gallery = vec![entry(1, 0.6), entry(2, 0.15)];
        let before = unweighted().best_match(&probe, &gallery).unwrap();
        gallery.push(entry(3, 0.5));
        let after = unweighted().best_match(&probe, &gallery).unwrap();
        assert_eq!(before.best_index, Some(1));
        assert_eq!(after.best_index, Some(1));
    }

    #[test]
    fn test_appending_higher_score_changes_index() {
        let probe = emb(0.05);
        let mut gallery = vec![entry(1, 0.6), entry(2, 0.3)];
        let before = unweighted().best_match(&probe, &gallery).unwrap();
        gallery.push(entry(3, 0.1));
        let after = unweighted().best_match(&probe, &gallery).unwrap();
        assert_eq!(before.best_index, Some(1));
        assert_eq!(after.best_index, Some(2));
        assert!(after.best_score > before.best_score);
    }

    /// Unit-norm vector with spread comparable to a real 128-d face embedding.
    fn unit_face(seed: f32) -> Embedding {
        Embedding::new(
            (0..PRIMARY_EMBEDDING_DIM)
                .map(|i| ((i as f32 + 1.0) * seed).sin())
                .collect(),
        )
        .normalized()
        .unwrap()
    }

    /// `face` moved `amount` of the way towards `other`, renormalised.
    fn blend(face: &Embedding, other: &Embedding, amount: f32) -> Embedding {
        Embedding::new(
            face.values
                .iter()
                .zip(&other.values)
                .map(|(a, b)| a * (1.0 - amount) + b * amount)
                .collect(),
        )
        .normalized()
        .unwrap()
    }

    #[test]
    fn test_weighted_scan_picks_closest_of_two_strong_matches() {
        let face = unit_face(0.7);
        let near = blend(&face, &unit_face(1.3), 0.01);
        assert!(scorer::score(&face, &near) > 0.85);
        assert!(scorer::score(&face, &near) < scorer::score(&face, &face));

        let gallery = vec![
            GalleryEntry { person_id: 1, embedding: near },
            GalleryEntry { person_id: 2, embedding: face.clone() },
        ];
        let best = GalleryMatcher::default().best_match(&face, &gallery).unwrap();
        assert_eq!(best.best_index, Some(1));
        assert!(best.best_score <= 1.0);
    }

    #[test]
    fn test_weighted_append_of_closer_entry_changes_index() {
        let face = unit_face(0.7);
        let mut gallery = vec![GalleryEntry {
            person_id: 1,
            embedding: blend(&face, &unit_face(1.3), 0.01),
        }];
        let matcher = GalleryMatcher::default();
        let before = matcher.best_match(&face, &gallery).unwrap();

        gallery.push(GalleryEntry {
            person_id: 2,
            embedding: face.clone(),
        });
        let after = matcher.best_match(&face, &gallery).unwrap();

        assert_eq!(before.best_index, Some(0));
        assert_eq!(after.best_index, Some(1));
    }

    #[test]
    fn test_corrupt_entry_does_not_abort_scan() {
        let gallery = vec![
            GalleryEntry {
                person_id: 1,
                embedding: Embedding::new(vec![]),
            },
            GalleryEntry {
                person_id: 2,
                embedding: Embedding::new(vec![f32::NAN; PRIMARY_EMBEDDING_DIM]),
            },
            entry(3, 0.05),
        ];
        let best = unweighted().best_match(&emb(0.05), &gallery).unwrap();
        assert_eq!(best.best_index, Some(2));
    }

    #[test]
    fn test_weight_bounds() {
        let flat = Embedding::new(vec![0.5; 8]);
        assert!((confidence_weight(&flat, &flat) - WEIGHT_MIN).abs() < 1e-6);

        let spread = Embedding::new(vec![1.0, -1.0, 1.0, -1.0]);
        assert!((confidence_weight(&spread, &spread) - WEIGHT_MAX).abs() < 1e-6);

        // std 0.05 each → strength 0.1 → weight 1.0
        let mid = emb(0.05);
        assert!((confidence_weight(&mid, &mid) - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_weighting_penalizes_flat_embeddings() {
        let flat = Embedding::new(vec![0.01; PRIMARY_EMBEDDING_DIM]);
        let gallery = vec![GalleryEntry {
            person_id: 1,
            embedding: flat.clone(),
        }];
        let weighted = GalleryMatcher::default().best_match(&flat, &gallery).unwrap();
        assert!((weighted.best_score - WEIGHT_MIN).abs() < 1e-5);
    }

    #[test]
    fn test_weighted_score_stays_in_range() {
        let spread = Embedding::new(
            (0..PRIMARY_EMBEDDING_DIM)
                .map(|i| if i % 2 == 0 { 0.08 } else { -0.08 })
                .collect(),
        );
        let gallery = vec![GalleryEntry {
            person_id: 1,
            embedding: spread.clone(),
        }];
        let best = GalleryMatcher::default().best_match(&spread, &gallery).unwrap();
        assert!(best.best_score <= 1.0);
    }

    #[test]
    fn test_parallel_agrees_with_sequential() {
        let gallery: Vec<GalleryEntry> = (0..600)
            .map(|i| entry(i, 0.05 + (i % 37) as f32 * 0.01))
            .collect();
        let probe = emb(0.2);
        let sequential = GalleryMatcher {
            parallel_min: usize::MAX,
            ..GalleryMatcher::default()
        };
        let parallel = GalleryMatcher {
            parallel_min: 1,
            ..GalleryMatcher::default()
        };
        let a = sequential.best_match(&probe, &gallery).unwrap();
        let b = parallel.best_match(&probe, &gallery).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_expired_deadline_fails_closed() {
        let gallery: Vec<GalleryEntry> = (0..10).map(|i| entry(i, 0.1)).collect();
        let matcher = GalleryMatcher {
            budget: Some(Duration::from_millis(5)),
            ..unweighted()
        };
        let expired = Instant::now() - Duration::from_millis(10);

        let sequential = matcher.scan_sequential(&emb(0.1), &gallery, Some(expired));
        assert!(matches!(
            sequential,
            Err(MatchError::BudgetExceeded { scanned: 0, .. })
        ));

        let parallel = matcher.scan_parallel(&emb(0.1), &gallery, Some(expired));
        assert!(matches!(parallel, Err(MatchError::BudgetExceeded { .. })));
    }

    #[test]
    fn test_parallel_timeout_reports_partial_best() {
        let gallery: Vec<GalleryEntry> = (0..10).map(|i| entry(i, 0.1)).collect();
        let matcher = GalleryMatcher {
            budget: Some(Duration::from_millis(5)),
            ..unweighted()
        };
        let expired = Instant::now() - Duration::from_millis(10);

        match matcher.scan_parallel(&emb(0.1), &gallery, Some(expired)) {
            Err(MatchError::BudgetExceeded {
                scanned,
                best_score,
                ..
            }) => {
                assert!(scanned >= 1);
                assert!((best_score - 1.0).abs() < 1e-5);
            }
            other => panic!("expected budget error, got {other:?}"),
        }
    }

    #[test]
    fn test_generous_budget_completes() {
        let gallery: Vec<GalleryEntry> = (0..10).map(|i| entry(i, 0.1)).collect();
        let matcher = GalleryMatcher {
            budget: Some(Duration::from_secs(60)),
            ..unweighted()
        };
        let best = matcher.best_match(&emb(0.1), &gallery).unwrap();
        assert_eq!(best.best_index, Some(0));
    }

    #[test]
    fn test_better_prefers_lower_index_on_tie() {
        assert_eq!(better(Some((3, 0.5)), Some((1, 0.5))), Some((1, 0.5)));
        assert_eq!(better(Some((1, 0.5)), Some((3, 0.5))), Some((1, 0.5)));
        assert_eq!(better(None, Some((2, 0.1))), Some((2, 0.1)));
    }
}
