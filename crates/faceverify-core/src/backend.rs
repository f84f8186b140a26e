//! One-time backend initialization and capability reporting.

use crate::detector::{DetectionMode, ScrfdDetector};
use crate::matcher::Metric;
use crate::recognizer::ArcFaceRecognizer;
use crate::verifier::Verifier;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";
pub const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";

/// Everything needed to build the pipeline's models.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub model_dir: PathBuf,
    pub detection_mode: DetectionMode,
    pub metric: Metric,
    pub intra_threads: usize,
}

impl BackendConfig {
    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> String {
        self.model_dir
            .join(SCRFD_MODEL_FILE)
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> String {
        self.model_dir
            .join(ARCFACE_MODEL_FILE)
            .to_string_lossy()
            .into_owned()
    }
}

/// Whether the verification pipeline could be built at startup.
#[derive(Clone)]
pub enum Capability {
    Ready(Arc<Verifier>),
    Unavailable { reason: String },
}

impl Capability {
    /// Load both models once. Failure is reported as `Unavailable`, never retried.
    pub fn probe(config: &BackendConfig) -> Self {
        let detector = match ScrfdDetector::load(
            &config.scrfd_model_path(),
            config.detection_mode,
            config.intra_threads,
        ) {
            Ok(d) => d,
            Err(e) => return Self::unavailable(format!("face detector: {e}")),
        };

        let recognizer = match ArcFaceRecognizer::load(&config.arcface_model_path(), config.intra_threads) {
            Ok(r) => r,
            Err(e) => return Self::unavailable(format!("face recognizer: {e}")),
        };

        tracing::info!(
            model_dir = %config.model_dir.display(),
            mode = ?config.detection_mode,
            metric = ?config.metric,
            "verification backend ready"
        );

        Capability::Ready(Arc::new(Verifier::new(
            Box::new(detector),
            Box::new(recognizer),
            config.metric.matcher(),
        )))
    }

    fn unavailable(reason: String) -> Self {
        tracing::warn!(%reason, "verification backend unavailable");
        Capability::Unavailable { reason }
    }

    pub fn verifier(&self) -> Option<&Arc<Verifier>> {
        match self {
            Capability::Ready(v) => Some(v),
            Capability::Unavailable { .. } => None,
        }
    }

    pub fn status(&self) -> CapabilityStatus {
        match self {
            Capability::Ready(v) => CapabilityStatus {
                available: true,
                model_version: Some(v.model_version().to_string()),
                reason: None,
            },
            Capability::Unavailable { reason } => CapabilityStatus {
                available: false,
                model_version: None,
                reason: Some(reason.clone()),
            },
        }
    }
}

/// Serializable summary of a [`Capability`].
#[derive(Debug, Clone, Serialize)]
pub struct CapabilityStatus {
    pub available: bool,
    pub model_version: Option<String>,
    pub reason: Option<String>,
}
