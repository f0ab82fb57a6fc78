//! Learned face embeddings via ONNX Runtime.
//!
//! Crops every detected face, resizes it to the model input and runs a
//! 128-dimensional embedding network on it.

use super::detector::FaceDetector;
use super::{ExtractorError, FaceExtractor};
use crate::scorer::PRIMARY_EMBEDDING_DIM;
use crate::types::{BoundingBox, Embedding, FaceCandidate};
use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const EMBEDDING_INPUT_SIZE: u32 = 112;
const EMBEDDING_MEAN: f32 = 127.5;
const EMBEDDING_STD: f32 = 127.5;
const EMBEDDING_MODEL_VERSION: &str = "mobilefacenet-128";

/// Detector plus embedding network.
pub struct EmbeddingExtractor {
    detector: FaceDetector,
    session: Session,
}

impl EmbeddingExtractor {
    /// Load the embedding model and pair it with a loaded detector.
    pub fn load(detector: FaceDetector, model_path: &Path) -> Result<Self, ExtractorError> {
        if !model_path.exists() {
            return Err(ExtractorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            "loaded embedding model"
        );

        Ok(Self { detector, session })
    }

    fn embed(&mut self, rgb: &RgbImage, bbox: &BoundingBox) -> Result<Embedding, ExtractorError> {
        let crop = crop_face(rgb, bbox, EMBEDDING_INPUT_SIZE);
        let input = to_tensor(&crop);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ExtractorError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != PRIMARY_EMBEDDING_DIM {
            return Err(ExtractorError::InferenceFailed(format!(
                "expected {PRIMARY_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        let embedding = Embedding::with_model(raw.to_vec(), EMBEDDING_MODEL_VERSION);
        Ok(embedding.normalized().unwrap_or(embedding))
    }
}

impl FaceExtractor for EmbeddingExtractor {
    fn extract(&mut self, image: &DynamicImage) -> Result<Vec<FaceCandidate>, ExtractorError> {
        let detections = self.detector.detect(image)?;
        let rgb = image.to_rgb8();

        let mut candidates = Vec::with_capacity(detections.len());
        for detection in detections {
            let embedding = self.embed(&rgb, &detection.bbox)?;
            candidates.push(FaceCandidate {
                bbox: detection.bbox,
                embedding,
            });
        }
        Ok(candidates)
    }

    fn name(&self) -> &'static str {
        EMBEDDING_MODEL_VERSION
    }
}

/// Crop `bbox` (clamped to the image) and resize it to a `size`×`size` square.
pub(crate) fn crop_face(rgb: &RgbImage, bbox: &BoundingBox, size: u32) -> RgbImage {
    let (w, h) = rgb.dimensions();
    let x0 = bbox.x.max(0.0).floor() as u32;
    let y0 = bbox.y.max(0.0).floor() as u32;
    let x0 = x0.min(w.saturating_sub(1));
    let y0 = y0.min(h.saturating_sub(1));
    let x1 = ((bbox.x + bbox.width).ceil().max(0.0) as u32).clamp(x0 + 1, w.max(x0 + 1));
    let y1 = ((bbox.y + bbox.height).ceil().max(0.0) as u32).clamp(y0 + 1, h.max(y0 + 1));

    let region = imageops::crop_imm(rgb, x0, y0, x1 - x0, y1 - y0).to_image();
    imageops::resize(&region, size, size, FilterType::Triangle)
}

/// Normalise an RGB crop into a NCHW float tensor.
fn to_tensor(crop: &RgbImage) -> Array4<f32> {
    let (w, h) = crop.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, 3, h as usize, w as usize));
    for (x, y, pixel) in crop.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - EMBEDDING_MEAN) / EMBEDDING_STD;
        }
    }
    tensor
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_crop_face_output_size() {
        let rgb = RgbImage::from_pixel(640, 480, Rgb([10, 20, 30]));
        let crop = crop_face(&rgb, &BoundingBox::new(100.0, 50.0, 200.0, 240.0), EMBEDDING_INPUT_SIZE);
        assert_eq!(crop.dimensions(), (EMBEDDING_INPUT_SIZE, EMBEDDING_INPUT_SIZE));
        assert_eq!(crop.get_pixel(56, 56), &Rgb([10, 20, 30]));
    }

    #[test]
    fn test_crop_face_clamps_out_of_bounds_box() {
        let rgb = RgbImage::from_pixel(100, 100, Rgb([200, 200, 200]));
        let crop = crop_face(&rgb, &BoundingBox::new(-30.0, 80.0, 500.0, 500.0), 64);
        assert_eq!(crop.dimensions(), (64, 64));
    }

    #[test]
    fn test_crop_face_degenerate_box() {
        let rgb = RgbImage::from_pixel(100, 100, Rgb([1, 2, 3]));
        let crop = crop_face(&rgb, &BoundingBox::new(150.0, 150.0, 0.0, 0.0), 32);
        assert_eq!(crop.dimensions(), (32, 32));
    }

    #[test]
    fn test_tensor_shape_and_normalization() {
        let crop = RgbImage::from_pixel(EMBEDDING_INPUT_SIZE, EMBEDDING_INPUT_SIZE, Rgb([255, 0, 128]));
        let tensor = to_tensor(&crop);
        let size = EMBEDDING_INPUT_SIZE as usize;
        assert_eq!(tensor.shape(), &[1, 3, size, size]);
        assert!((tensor[[0, 0, 0, 0]] - 1.0).abs() < 1e-6);
        assert!((tensor[[0, 1, 0, 0]] + 1.0).abs() < 1e-6);
        assert!((tensor[[0, 2, 5, 5]] - (128.0 - EMBEDDING_MEAN) / EMBEDDING_STD).abs() < 1e-6);
    }
}
