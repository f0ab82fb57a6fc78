//! Recognition service: quality gate, face extraction, candidate selection,
//! gallery scan and the acceptance threshold behind one `identify` call.

use crate::extractor::{ExtractorError, FaceExtractor};
use crate::matcher::{GalleryMatcher, MatchError, Matcher};
use crate::quality::{self, QualityAssessment, QualityIssue, QualityReport};
use crate::selector::{self, SelectError, SelectionMode};
use crate::threshold::ThresholdPolicy;
use crate::types::{FaceCandidate, GalleryEntry, MatchResult};
use image::DynamicImage;
use serde::Serialize;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IdentifyError {
    #[error("image rejected: {issue}")]
    LowImageQuality {
        issue: QualityIssue,
        report: QualityReport,
    },
    #[error("no face detected; look straight at the camera")]
    NoFaceDetected,
    #[error("{0} faces detected; make sure only one face is visible")]
    AmbiguousFaces(usize),
    #[error("no enrolled faces to match against")]
    NoGalleryData,
    #[error("gallery scan timed out after {budget:?} (best score so far {best_score:.2})")]
    ScanTimeout { budget: Duration, best_score: f32 },
    #[error("extractor error: {0}")]
    Extractor(#[from] ExtractorError),
}

impl From<SelectError> for IdentifyError {
    fn from(err: SelectError) -> Self {
        match err {
            SelectError::NoFace => IdentifyError::NoFaceDetected,
            SelectError::Ambiguous(n) => IdentifyError::AmbiguousFaces(n),
        }
    }
}

impl From<MatchError> for IdentifyError {
    fn from(err: MatchError) -> Self {
        match err {
            MatchError::BudgetExceeded {
                budget, best_score, ..
            } => IdentifyError::ScanTimeout { budget, best_score },
        }
    }
}

/// Whether a failed quality check stops identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityPolicy {
    /// Report the failure alongside the result but keep matching.
    Advisory,
    /// Fail with [`IdentifyError::LowImageQuality`].
    Enforced,
}

impl FromStr for QualityPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "advisory" => Ok(QualityPolicy::Advisory),
            "enforced" | "strict" => Ok(QualityPolicy::Enforced),
            other => Err(format!(
                "unknown quality gate {other:?}: expected \"advisory\" or \"enforced\""
            )),
        }
    }
}

/// Result of a successful identification run.
#[derive(Debug, Clone, Serialize)]
pub struct Identification {
    pub result: MatchResult,
    pub quality: QualityAssessment,
    /// Threshold actually applied after lighting adjustment.
    pub threshold: f32,
}

/// Identification pipeline: quality gate → extraction → selection → gallery
/// scan → threshold.
///
/// Constructed once at startup and passed to whoever needs it.
pub struct RecognitionEngine {
    extractor: Box<dyn FaceExtractor + Send>,
    matcher: GalleryMatcher,
    threshold_policy: ThresholdPolicy,
    quality_policy: QualityPolicy,
}

impl RecognitionEngine {
    pub fn new(
        extractor: Box<dyn FaceExtractor + Send>,
        matcher: GalleryMatcher,
        threshold_policy: ThresholdPolicy,
        quality_policy: QualityPolicy,
    ) -> Self {
        Self {
            extractor,
            matcher,
            threshold_policy,
            quality_policy,
        }
    }

    pub fn extractor_name(&self) -> &'static str {
        self.extractor.name()
    }

    /// Quality diagnostics only; nothing is extracted or matched.
    pub fn assess(&self, image: &DynamicImage) -> QualityAssessment {
        quality::assess_quality(&image.to_luma8())
    }

    /// Identify the face in `image` against `gallery`.
    ///
    /// Enrollment mode always enforces the quality gate; attendance mode
    /// follows the engine's [`QualityPolicy`].
    pub fn identify(
        &mut self,
        image: &DynamicImage,
        gallery: &[GalleryEntry],
        mode: SelectionMode,
        base_threshold: f32,
    ) -> Result<Identification, IdentifyError> {
        let gray = image.to_luma8();
        let quality = self.gate(&gray, mode)?;

        if gallery.is_empty() {
            return Err(IdentifyError::NoGalleryData);
        }

        let candidates = self.extractor.extract(image)?;
        tracing::debug!(faces = candidates.len(), ?mode, "faces extracted");
        let probe = selector::select(candidates, mode)?;

        let best = self.matcher.best_match(&probe.embedding, gallery)?;
        let threshold = self.threshold_policy.acceptance_threshold(&gray, base_threshold);

        let result = match best.best_index {
            Some(idx) if best.best_score >= threshold => MatchResult::Matched {
                person_id: gallery[idx].person_id,
                score: best.best_score,
                bbox: probe.bbox,
            },
            _ => MatchResult::NoMatch {
                best_score: best.best_score,
            },
        };

        tracing::info!(
            matched = result.is_match(),
            person_id = ?result.person_id(),
            score = result.best_score(),
            threshold,
            gallery = gallery.len(),
            "identification complete"
        );

        Ok(Identification {
            result,
            quality,
            threshold,
        })
    }

    /// Extract the single face of an enrollment photo.
    pub fn enroll(&mut self, image: &DynamicImage) -> Result<FaceCandidate, IdentifyError> {
        self.gate(&image.to_luma8(), SelectionMode::Enrollment)?;
        let candidates = self.extractor.extract(image)?;
        let face = selector::select(candidates, SelectionMode::Enrollment)?;
        tracing::info!(
            extractor = self.extractor.name(),
            dim = face.embedding.len(),
            "enrollment face extracted"
        );
        Ok(face)
    }

    fn gate(
        &self,
        gray: &image::GrayImage,
        mode: SelectionMode,
    ) -> Result<QualityAssessment, IdentifyError> {
        let assessment = quality::assess_quality(gray);
        let Some(issue) = assessment.issue() else {
            return Ok(assessment);
        };

        let enforced = mode == SelectionMode::Enrollment || self.quality_policy == QualityPolicy::Enforced;
        if enforced {
            return Err(IdentifyError::LowImageQuality {
                issue,
                report: assessment.report,
            });
        }
        tracing::warn!(%issue, "image quality check failed; continuing (advisory)");
        Ok(assessment)
    }
}
