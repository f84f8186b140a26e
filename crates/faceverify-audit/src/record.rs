use chrono::{DateTime, SubsecRound, Utc};
use faceverify_core::{Decision, VerificationOutcome};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use uuid::Uuid;

/// Coarse status bucket used for reporting, one per decision family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Success,
    Failed,
    Error,
    NoFace,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Success => "success",
            AttemptStatus::Failed => "failed",
            AttemptStatus::Error => "error",
            AttemptStatus::NoFace => "no_face",
        }
    }
}

impl From<Decision> for AttemptStatus {
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::Matched => AttemptStatus::Success,
            Decision::NotMatched => AttemptStatus::Failed,
            Decision::NoFaceReference | Decision::NoFaceProbe => AttemptStatus::NoFace,
            Decision::ProcessingError => AttemptStatus::Error,
        }
    }
}

/// One persisted verification attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub attempt_id: Uuid,
    pub staff_id: String,
    pub decision: Decision,
    pub status: AttemptStatus,
    /// Absent for no-face and error outcomes, and for non-positive scores.
    pub confidence: Option<f32>,
    pub diagnostic: String,
    pub threshold: f32,
    pub reference_sha256: Option<String>,
    pub probe_sha256: Option<String>,
    pub captured_photo: Option<PathBuf>,
    pub reference_photo: Option<PathBuf>,
    /// Free-form caller description (address, user agent).
    pub client: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl VerificationRecord {
    /// Build a record from an outcome, hashing whichever image bytes are available.
    pub fn new(
        attempt_id: Uuid,
        staff_id: impl Into<String>,
        outcome: &VerificationOutcome,
        threshold: f32,
        reference_bytes: Option<&[u8]>,
        probe_bytes: Option<&[u8]>,
    ) -> Self {
        Self {
            attempt_id,
            staff_id: staff_id.into(),
            decision: outcome.decision,
            status: outcome.decision.into(),
            confidence: outcome.confidence.filter(|c| *c > 0.0),
            diagnostic: outcome.diagnostic.clone(),
            threshold,
            reference_sha256: reference_bytes.map(sha256_hex),
            probe_sha256: probe_bytes.map(sha256_hex),
            captured_photo: None,
            reference_photo: None,
            client: None,
            // Stored with microsecond precision
            created_at: Utc::now().trunc_subsecs(6),
        }
    }

    pub fn with_client(mut self, client: Option<String>) -> Self {
        self.client = client;
        self
    }

    pub fn with_evidence(mut self, captured: Option<PathBuf>, reference: Option<PathBuf>) -> Self {
        self.captured_photo = captured;
        self.reference_photo = reference;
        self
    }
}

/// Hex-encoded SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
