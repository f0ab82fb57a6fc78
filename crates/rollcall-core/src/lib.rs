//! rollcall-core — Face identification and attendance decision engine.
//!
//! Takes a photograph, finds the face in it, compares it against an enrolled
//! gallery and turns the outcome into an attendance decision. Detection and
//! embedding run via ONNX Runtime on the CPU.

pub mod attendance;
pub mod engine;
pub mod extractor;
pub mod matcher;
pub mod quality;
pub mod scorer;
pub mod selector;
pub mod threshold;
pub mod types;

pub use attendance::{
    approve, decide_attendance, Approval, Approver, ApproverScope, AttendanceError,
    AttendanceInput, AttendanceRecord, AttendanceStatus, DecisionContext, ExcuseSubmission,
    LedgerMutation,
};
pub use engine::{Identification, IdentifyError, QualityPolicy, RecognitionEngine};
pub use extractor::{load_extractor, ExtractorError, ExtractorKind, FaceExtractor};
pub use matcher::{GalleryMatcher, Matcher};
pub use quality::{QualityAssessment, QualityIssue, QualityReport};
pub use selector::SelectionMode;
pub use threshold::ThresholdPolicy;
pub use types::{BoundingBox, Embedding, FaceCandidate, GalleryEntry, MatchResult, PersonId};

use std::path::PathBuf;

/// Default model directory: `$XDG_DATA_HOME/rollcall/models`, falling back to
/// `~/.local/share/rollcall/models`.
pub fn default_model_dir() -> PathBuf {
    data_dir().join("models")
}

/// Per-user data directory for rollcall.
pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}
