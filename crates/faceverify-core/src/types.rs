use serde::{Deserialize, Serialize};

/// Rectangle locating one candidate face, in pixel coordinates of the source image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
    /// Detector score for this region.
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl FaceRegion {
    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Build a region from a floating-point box, clamped to a `width` × `height` image.
    pub fn from_box(
        x: f32,
        y: f32,
        box_width: f32,
        box_height: f32,
        image_width: u32,
        image_height: u32,
    ) -> Self {
        let clamp_x = |v: f32| v.round().clamp(0.0, image_width as f32) as u32;
        let clamp_y = |v: f32| v.round().clamp(0.0, image_height as f32) as u32;
        Self {
            top: clamp_y(y),
            right: clamp_x(x + box_width),
            bottom: clamp_y(y + box_height),
            left: clamp_x(x),
            confidence: 0.0,
            landmarks: None,
        }
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values, model_version: None }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// True when no component is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }

    /// Compute cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
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
}

/// Result of comparing two embeddings under a threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub distance: f32,
    /// `1 - distance`, clamped to [0, 1].
    pub confidence: f32,
    pub is_match: bool,
}

/// Categorical result of one verification attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Matched,
    NotMatched,
    NoFaceReference,
    NoFaceProbe,
    ProcessingError,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Matched => "matched",
            Decision::NotMatched => "not_matched",
            Decision::NoFaceReference => "no_face_reference",
            Decision::NoFaceProbe => "no_face_probe",
            Decision::ProcessingError => "processing_error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "matched" => Some(Decision::Matched),
            "not_matched" => Some(Decision::NotMatched),
            "no_face_reference" => Some(Decision::NoFaceReference),
            "no_face_probe" => Some(Decision::NoFaceProbe),
            "processing_error" => Some(Decision::ProcessingError),
            _ => None,
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single reference-vs-probe verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub decision: Decision,
    pub confidence: Option<f32>,
    pub diagnostic: String,
}

impl VerificationOutcome {
    pub fn matched(confidence: f32, diagnostic: String) -> Self {
        Self { decision: Decision::Matched, confidence: Some(confidence), diagnostic }
    }

    pub fn not_matched(confidence: f32, diagnostic: String) -> Self {
        Self { decision: Decision::NotMatched, confidence: Some(confidence), diagnostic }
    }

    pub fn no_face(decision: Decision, diagnostic: impl Into<String>) -> Self {
        Self { decision, confidence: None, diagnostic: diagnostic.into() }
    }

    pub fn processing_error(diagnostic: impl Into<String>) -> Self {
        Self {
            decision: Decision::ProcessingError,
            confidence: None,
            diagnostic: diagnostic.into(),
        }
    }

    pub fn is_match(&self) -> bool {
        self.decision == Decision::Matched
    }
}

/// One row of a probe-vs-many comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchEntry<Id> {
    pub id: Id,
    pub is_match: bool,
    pub confidence: f32,
}

impl<Id> BatchEntry<Id> {
    pub fn rejected(id: Id) -> Self {
        Self { id, is_match: false, confidence: 0.0 }
    }
}
