//! Grey-level histogram features for installations without an embedding
//! model. Much weaker than learned embeddings; scored on the fallback path.

use super::detector::FaceDetector;
use super::embedding::crop_face;
use super::{ExtractorError, FaceExtractor};
use crate::types::{Embedding, FaceCandidate};
use image::{DynamicImage, GrayImage};

const HISTOGRAM_CROP_SIZE: u32 = 100;
const HISTOGRAM_BINS: usize = 256;
const HISTOGRAM_MODEL_VERSION: &str = "histogram-256";

pub struct HistogramExtractor {
    detector: FaceDetector,
}

impl HistogramExtractor {
    pub fn new(detector: FaceDetector) -> Self {
        Self { detector }
    }
}

impl FaceExtractor for HistogramExtractor {
    fn extract(&mut self, image: &DynamicImage) -> Result<Vec<FaceCandidate>, ExtractorError> {
        let detections = self.detector.detect(image)?;
        let rgb = image.to_rgb8();

        Ok(detections
            .into_iter()
            .map(|detection| {
                let crop = crop_face(&rgb, &detection.bbox, HISTOGRAM_CROP_SIZE);
                let gray = DynamicImage::ImageRgb8(crop).to_luma8();
                FaceCandidate {
                    bbox: detection.bbox,
                    embedding: histogram_features(&gray),
                }
            })
            .collect())
    }

    fn name(&self) -> &'static str {
        HISTOGRAM_MODEL_VERSION
    }
}

/// L2-normalised 256-bin intensity histogram.
pub fn histogram_features(gray: &GrayImage) -> Embedding {
    let mut bins = vec![0.0f32; HISTOGRAM_BINS];
    for pixel in gray.pixels() {
        bins[pixel[0] as usize] += 1.0;
    }
    let embedding = Embedding::with_model(bins, HISTOGRAM_MODEL_VERSION);
    embedding.normalized().unwrap_or(embedding)
}
