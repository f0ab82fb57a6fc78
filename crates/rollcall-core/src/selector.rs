//! Candidate selection when an image yields several faces.

use crate::types::FaceCandidate;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Policy for images with more than one detected face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    /// Exactly one face is required; several is an error.
    Enrollment,
    /// The face with the largest bounding box wins.
    Attendance,
}

impl FromStr for SelectionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "enrollment" | "strict" => Ok(SelectionMode::Enrollment),
            "attendance" | "largest" => Ok(SelectionMode::Attendance),
            other => Err(format!("unknown selection mode: {other}")),
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SelectError {
    #[error("no face detected")]
    NoFace,
    #[error("{0} faces detected; make sure only one face is visible")]
    Ambiguous(usize),
}

/// Reduce the detected candidates to exactly one.
///
/// In attendance mode the largest box wins and ties go to the candidate seen
/// first.
pub fn select(
    candidates: Vec<FaceCandidate>,
    mode: SelectionMode,
) -> Result<FaceCandidate, SelectError> {
    let count = candidates.len();
    match (count, mode) {
        (0, _) => Err(SelectError::NoFace),
        (1, _) => candidates.into_iter().next().ok_or(SelectError::NoFace),
        (_, SelectionMode::Enrollment) => Err(SelectError::Ambiguous(count)),
        (_, SelectionMode::Attendance) => {
            let mut best: Option<FaceCandidate> = None;
            for candidate in candidates {
                let larger = match &best {
                    None => true,
                    Some(current) => candidate.bbox.area() > current.bbox.area(),
                };
                if larger {
                    best = Some(candidate);
                }
            }
            if let Some(chosen) = &best {
                tracing::debug!(
                    count,
                    area = chosen.bbox.area(),
                    "largest face selected"
                );
            }
            best.ok_or(SelectError::NoFace)
        }
    }
}
