//! faceverify-core: face verification pipeline.
//!
//! Uses SCRFD for face location and ArcFace for face embeddings, both running
//! via ONNX Runtime on CPU, and turns embedding distance into a verification
//! decision.

pub mod alignment;
pub mod backend;
pub mod detector;
pub mod error;
pub mod image_loader;
pub mod matcher;
pub mod recognizer;
pub mod types;
pub mod verifier;

pub use backend::{BackendConfig, Capability, CapabilityStatus};
pub use detector::{DetectionMode, FaceLocator, ScrfdDetector};
pub use error::VerifyError;
pub use image_loader::ImageSource;
pub use matcher::{CosineMatcher, EuclideanMatcher, Matcher, Metric, DEFAULT_THRESHOLD};
pub use recognizer::{ArcFaceRecognizer, FaceEncoder};
pub use types::{BatchEntry, Decision, Embedding, FaceRegion, MatchResult, VerificationOutcome};
pub use verifier::Verifier;

use std::path::PathBuf;

/// Per-user data directory: `$XDG_DATA_HOME/faceverify`, falling back to
/// `~/.local/share/faceverify`.
pub fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("faceverify")
}

/// Default directory searched for the ONNX model files.
pub fn default_model_dir() -> PathBuf {
    default_data_dir().join("models")
}
