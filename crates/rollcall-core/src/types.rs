use serde::{Deserialize, Serialize};

/// Identifier of an enrolled person (student, teacher, admin).
pub type PersonId = i64;

/// Pixel-space bounding box of a detected face.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    /// Box area in square pixels. Degenerate (negative) extents count as zero.
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// Face embedding vector (128-dimensional for the default extractor,
/// 256 bins for the histogram extractor).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Extractor that produced this embedding (e.g., "mobilefacenet-128").
    #[serde(default)]
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn with_model(values: Vec<f32>, model_version: &str) -> Self {
        Self {
            values,
            model_version: Some(model_version.to_string()),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// True when the vector is non-empty and every component is finite.
    pub fn is_well_formed(&self) -> bool {
        !self.values.is_empty() && self.values.iter().all(|v| v.is_finite())
    }

    /// Compute Euclidean distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Population standard deviation of the components.
    pub fn std_dev(&self) -> f32 {
        if self.values.is_empty() {
            return 0.0;
        }
        let n = self.values.len() as f32;
        let mean = self.values.iter().sum::<f32>() / n;
        let variance = self.values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
        variance.sqrt()
    }

    /// Unit-length copy, or `None` for a zero vector.
    pub fn normalized(&self) -> Option<Embedding> {
        let norm = self.values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 && norm.is_finite() {
            Some(Embedding {
                values: self.values.iter().map(|v| v / norm).collect(),
                model_version: self.model_version.clone(),
            })
        } else {
            None
        }
    }
}

/// A detected face region together with its extracted embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceCandidate {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
}

/// One enrolled (person, embedding) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GalleryEntry {
    pub person_id: PersonId,
    pub embedding: Embedding,
}

/// Outcome of identifying a probe face against the gallery.
///
/// The best score is kept on a miss so callers can tell the user how close
/// the attempt came.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MatchResult {
    NoMatch {
        best_score: f32,
    },
    Matched {
        person_id: PersonId,
        score: f32,
        bbox: BoundingBox,
    },
}

impl MatchResult {
    pub fn best_score(&self) -> f32 {
        match self {
            MatchResult::NoMatch { best_score } => *best_score,
            MatchResult::Matched { score, .. } => *score,
        }
    }

    pub fn is_match(&self) -> bool {
        matches!(self, MatchResult::Matched { .. })
    }

    pub fn person_id(&self) -> Option<PersonId> {
        match self {
            MatchResult::Matched { person_id, .. } => Some(*person_id),
            MatchResult::NoMatch { .. } => None,
        }
    }
}
