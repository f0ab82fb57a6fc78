//! Face extraction strategies.
//!
//! Both strategies share the SCRFD detector and differ in the features they
//! compute for each detected box. The strategy is picked once from
//! configuration; there is no runtime fallback between them.

pub mod detector;
pub mod embedding;
pub mod histogram;

use crate::types::FaceCandidate;
use image::DynamicImage;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

pub use detector::{Detection, FaceDetector};
pub use embedding::EmbeddingExtractor;
pub use histogram::HistogramExtractor;

/// File name of the SCRFD detection model inside the model directory.
pub const DETECTOR_MODEL_FILE: &str = "det_500m.onnx";
/// File name of the 128-d embedding model inside the model directory.
pub const EMBEDDING_MODEL_FILE: &str = "mobilefacenet_128.onnx";

#[derive(Error, Debug)]
pub enum ExtractorError {
    #[error("model file not found: {0} (place the ONNX model in the model directory)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Source of face candidates for an image.
///
/// Returns every detected face with its features; choosing among them is the
/// caller's job.
pub trait FaceExtractor {
    fn extract(&mut self, image: &DynamicImage) -> Result<Vec<FaceCandidate>, ExtractorError>;

    /// Short name recorded as the embedding's model version.
    fn name(&self) -> &'static str;
}

/// Which extraction strategy to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractorKind {
    /// Learned 128-d embeddings.
    Embedding,
    /// Grey-level histogram of the face crop.
    Histogram,
}

impl FromStr for ExtractorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "embedding" => Ok(ExtractorKind::Embedding),
            "histogram" => Ok(ExtractorKind::Histogram),
            other => Err(format!(
                "unknown extractor {other:?}: expected \"embedding\" or \"histogram\""
            )),
        }
    }
}

/// Load the configured strategy from `model_dir`. Fails fast if a model file
/// is missing.
pub fn load_extractor(
    kind: ExtractorKind,
    model_dir: &Path,
) -> Result<Box<dyn FaceExtractor + Send>, ExtractorError> {
    let detector_path = model_dir.join(DETECTOR_MODEL_FILE);
    let detector = FaceDetector::load(&detector_path)?;

    let extractor: Box<dyn FaceExtractor + Send> = match kind {
        ExtractorKind::Embedding => {
            let model_path = model_dir.join(EMBEDDING_MODEL_FILE);
            Box::new(EmbeddingExtractor::load(detector, &model_path)?)
        }
        ExtractorKind::Histogram => Box::new(HistogramExtractor::new(detector)),
    };

    tracing::info!(
        extractor = extractor.name(),
        model_dir = %model_dir.display(),
        "face extractor ready"
    );
    Ok(extractor)
}
