//! Embedding comparison under a distance threshold.

use crate::error::VerifyError;
use crate::types::{Embedding, MatchResult};
use serde::{Deserialize, Serialize};

/// Default maximum distance still considered a match. Lower is stricter.
///
/// Under the default cosine metric this accepts ArcFace similarity ≥ 0.40.
pub const DEFAULT_THRESHOLD: f32 = 0.6;

/// Distance metric used to compare embeddings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// L2 distance. On unit vectors, 0.6 means similarity ≥ 0.82.
    Euclidean,
    #[default]
    Cosine,
}

impl Metric {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "euclidean" | "l2" => Some(Metric::Euclidean),
            "cosine" => Some(Metric::Cosine),
            _ => None,
        }
    }

    pub fn matcher(self) -> Box<dyn Matcher> {
        match self {
            Metric::Euclidean => Box::new(EuclideanMatcher),
            Metric::Cosine => Box::new(CosineMatcher),
        }
    }
}

/// Reject NaN and negative thresholds.
pub fn validate_threshold(threshold: f32) -> Result<(), VerifyError> {
    if threshold.is_nan() || threshold < 0.0 {
        return Err(VerifyError::InvalidInput(format!(
            "threshold must be a non-negative number, got {threshold}"
        )));
    }
    Ok(())
}

/// Strategy for turning two embeddings into a match decision.
///
/// Implementations must be symmetric and return zero for identical inputs.
pub trait Matcher: Send + Sync {
    /// Raw distance between two embeddings of equal, non-zero dimension.
    fn distance(&self, known: &Embedding, unknown: &Embedding) -> f32;

    fn compare(
        &self,
        known: &Embedding,
        unknown: &Embedding,
        threshold: f32,
    ) -> Result<MatchResult, VerifyError> {
        validate_threshold(threshold)?;
        if known.dim() != unknown.dim() {
            return Err(VerifyError::InvalidInput(format!(
                "embedding dimensions differ: {} vs {}",
                known.dim(),
                unknown.dim()
            )));
        }
        if known.dim() == 0 {
            return Err(VerifyError::InvalidInput("embeddings are empty".into()));
        }
        if !known.is_finite() || !unknown.is_finite() {
            return Err(VerifyError::InvalidInput("embedding contains NaN or infinite values".into()));
        }

        // NaN must be caught before clamping: f32::max(NaN, 0.0) is 0.0.
        let raw = self.distance(known, unknown);
        if raw.is_nan() {
            return Err(VerifyError::InvalidInput("embedding distance is NaN".into()));
        }
        let distance = raw.max(0.0);
        let confidence = (1.0 - distance).clamp(0.0, 1.0);
        let is_match = distance <= threshold;

        tracing::info!(distance, confidence, is_match, threshold, "face comparison");

        Ok(MatchResult { distance, confidence, is_match })
    }
}

/// L2 distance between raw embedding vectors.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn distance(&self, known: &Embedding, unknown: &Embedding) -> f32 {
        known.euclidean_distance(unknown)
    }
}

/// Cosine distance (`1 - cosine similarity`), in [0, 2].
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn distance(&self, known: &Embedding, unknown: &Embedding) -> f32 {
        let d = 1.0 - known.similarity(unknown);
        // NaN passes through to the caller's check
        if d < 0.0 {
            0.0
        } else {
            d
        }
    }
}
