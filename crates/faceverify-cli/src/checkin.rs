//! Staff check-in: verify a captured photo against the roster photo, keep
//! evidence copies and record the attempt.

use crate::engine::EngineHandle;
use crate::roster::{Roster, StaffMember};
use anyhow::{bail, Context, Result};
use faceverify_audit::{AuditRecorder, EvidenceKind, EvidenceStore, VerificationRecord};
use faceverify_core::{Decision, ImageSource, VerificationOutcome};
use serde::Serialize;
use std::path::Path;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct CheckReport {
    pub attempt_id: Uuid,
    pub staff: StaffMember,
    pub message: String,
    #[serde(flatten)]
    pub outcome: VerificationOutcome,
    /// False when the audit store rejected the record.
    pub recorded: bool,
    pub timestamp: String,
}

pub struct CheckIn<'a> {
    pub roster: &'a Roster,
    pub engine: &'a EngineHandle,
    pub recorder: &'a dyn AuditRecorder,
    pub evidence: &'a EvidenceStore,
    pub max_photo_bytes: usize,
}

impl CheckIn<'_> {
    /// Run one check-in. Roster and size problems are errors; every pipeline
    /// result, including faults, is reported and recorded.
    pub async fn run(
        &self,
        staff_id: &str,
        probe_path: &Path,
        threshold: f32,
        client: Option<String>,
    ) -> Result<CheckReport> {
        let (member, reference_path) = self.roster.lookup(staff_id)?;

        let probe_bytes = read_photo(probe_path, self.max_photo_bytes)?;
        let reference_bytes = match std::fs::read(reference_path) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                tracing::warn!(path = %reference_path.display(), error = %e, "reference photo unreadable");
                None
            }
        };

        let reference = match &reference_bytes {
            Some(bytes) => ImageSource::Bytes(bytes.clone()),
            None => ImageSource::from(reference_path),
        };
        let outcome = self
            .engine
            .verify_one(reference, ImageSource::Bytes(probe_bytes.clone()), threshold)
            .await?;

        let attempt_id = Uuid::new_v4();
        let record = VerificationRecord::new(
            attempt_id,
            staff_id,
            &outcome,
            threshold,
            reference_bytes.as_deref(),
            Some(probe_bytes.as_slice()),
        )
        .with_client(client);

        let captured = self.evidence.save(
            staff_id,
            attempt_id,
            EvidenceKind::Captured,
            &probe_bytes,
            &photo_extension(probe_path),
            record.created_at,
        );
        let reference_copy = reference_bytes.as_deref().and_then(|bytes| {
            self.evidence.save(
                staff_id,
                attempt_id,
                EvidenceKind::Reference,
                bytes,
                &photo_extension(reference_path),
                record.created_at,
            )
        });
        let record = record.with_evidence(captured, reference_copy);

        let recorded = match self.recorder.record(&record) {
            Ok(_) => true,
            Err(e) => {
                tracing::error!(attempt_id = %attempt_id, error = %e, "failed to record verification attempt");
                false
            }
        };

        Ok(CheckReport {
            attempt_id,
            staff: member.clone(),
            message: outcome_message(&outcome, &member.name),
            outcome,
            recorded,
            timestamp: record.created_at.to_rfc3339(),
        })
    }
}

/// Read a photo, refusing files above `max_bytes`.
fn read_photo(path: &Path, max_bytes: usize) -> Result<Vec<u8>> {
    let size = std::fs::metadata(path)
        .with_context(|| format!("cannot read {}", path.display()))?
        .len();
    if size > max_bytes as u64 {
        bail!(
            "photo {} is too large ({size} bytes, limit {max_bytes})",
            path.display()
        );
    }
    std::fs::read(path).with_context(|| format!("cannot read {}", path.display()))
}

fn photo_extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| "jpg".to_string())
}

fn outcome_message(outcome: &VerificationOutcome, name: &str) -> String {
    match outcome.decision {
        Decision::Matched => format!("Face verified. Welcome, {name}!"),
        Decision::NotMatched => "Face does not match our records.".to_string(),
        Decision::NoFaceReference => "No face found in the reference photo on file.".to_string(),
        Decision::NoFaceProbe => "No face detected in the captured photo.".to_string(),
        Decision::ProcessingError => format!("Verification failed: {}", outcome.diagnostic),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests::{engine, png_bytes};
    use faceverify_audit::{AttemptStatus, AuditError, Recorded, SqliteAuditStore};
    use faceverify_core::DEFAULT_THRESHOLD;
    use std::time::Duration;
    use tempfile::TempDir;

    const TEAL: [u8; 3] = [0, 200, 200];
    const ORANGE: [u8; 3] = [250, 120, 0];
    const BLACK: [u8; 3] = [0, 0, 0];

    struct BrokenRecorder;

    impl AuditRecorder for BrokenRecorder {
        fn record(&self, _record: &VerificationRecord) -> Result<Recorded, AuditError> {
            Err(AuditError::LockPoisoned)
        }
    }

    /// Temp dir holding a roster with EMP001 whose reference photo is `reference`.
    fn setup(reference: [u8; 3]) -> (TempDir, Roster, EvidenceStore) {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("photos")).unwrap();
        std::fs::write(dir.path().join("photos/emp001.png"), png_bytes(reference)).unwrap();
        let roster = Roster::parse(
            "[[staff]]\nstaff_id = \"EMP001\"\nname = \"Ada Example\"\nphoto = \"photos/emp001.png\"\n",
            dir.path(),
        )
        .unwrap();
        let evidence = EvidenceStore::new(dir.path().join("evidence"));
        (dir, roster, evidence)
    }

    fn write_probe(dir: &TempDir, color: [u8; 3]) -> std::path::PathBuf {
        let path = dir.path().join("probe.png");
        std::fs::write(&path, png_bytes(color)).unwrap();
        path
    }

    #[tokio::test]
    async fn test_matched_check_is_recorded_with_evidence() {
        let (dir, roster, evidence) = setup(TEAL);
        let probe = write_probe(&dir, TEAL);
        let store = SqliteAuditStore::open_in_memory().unwrap();
        let engine = engine(Duration::ZERO, Duration::from_secs(5));
        let check_in = CheckIn {
            roster: &roster,
            engine: &engine,
            recorder: &store,
            evidence: &evidence,
            max_photo_bytes: 1 << 20,
        };

        let report = check_in
            .run("EMP001", &probe, DEFAULT_THRESHOLD, Some("kiosk-1".into()))
            .await
            .unwrap();
        assert_eq!(report.outcome.decision, Decision::Matched);
        assert!(report.recorded);
        assert!(report.message.contains("Ada Example"));

        let record = store.get(report.attempt_id).unwrap().unwrap();
        assert_eq!(record.staff_id, "EMP001");
        assert_eq!(record.status, AttemptStatus::Success);
        assert_eq!(record.client.as_deref(), Some("kiosk-1"));
        assert!(record.reference_sha256.is_some());
        assert!(record.probe_sha256.is_some());

        let captured = record.captured_photo.unwrap();
        let reference = record.reference_photo.unwrap();
        assert!(captured.starts_with(dir.path().join("evidence/EMP001")));
        assert!(captured.to_string_lossy().ends_with(".png"));
        assert_eq!(std::fs::read(&captured).unwrap(), std::fs::read(&probe).unwrap());
        assert!(reference.exists());
    }

    #[tokio::test]
    async fn test_decisions_map_to_status_buckets() {
        let cases = [
            (TEAL, ORANGE, Decision::NotMatched, AttemptStatus::Failed),
            (TEAL, BLACK, Decision::NoFaceProbe, AttemptStatus::NoFace),
            (BLACK, TEAL, Decision::NoFaceReference, AttemptStatus::NoFace),
        ];
        for (reference, probe_color, decision, status) in cases {
            let (dir, roster, evidence) = setup(reference);
            let probe = write_probe(&dir, probe_color);
            let store = SqliteAuditStore::open_in_memory().unwrap();
            let engine = engine(Duration::ZERO, Duration::from_secs(5));
            let check_in = CheckIn {
                roster: &roster,
                engine: &engine,
                recorder: &store,
                evidence: &evidence,
                max_photo_bytes: 1 << 20,
            };

            let report = check_in.run("EMP001", &probe, DEFAULT_THRESHOLD, None).await.unwrap();
            assert_eq!(report.outcome.decision, decision);
            let record = store.get(report.attempt_id).unwrap().unwrap();
            assert_eq!(record.status, status);
            if status == AttemptStatus::NoFace {
                assert!(record.confidence.is_none());
            }
        }
    }

    #[tokio::test]
    async fn test_failing_recorder_still_reports_outcome() {
        let (dir, roster, evidence) = setup(TEAL);
        let probe = write_probe(&dir, TEAL);
        let engine = engine(Duration::ZERO, Duration::from_secs(5));
        let check_in = CheckIn {
            roster: &roster,
            engine: &engine,
            recorder: &BrokenRecorder,
            evidence: &evidence,
            max_photo_bytes: 1 << 20,
        };

        let report = check_in.run("EMP001", &probe, DEFAULT_THRESHOLD, None).await.unwrap();
        assert_eq!(report.outcome.decision, Decision::Matched);
        assert!(!report.recorded);
    }

    #[tokio::test]
    async fn test_unknown_staff_and_oversized_photo_are_errors() {
        let (dir, roster, evidence) = setup(TEAL);
        let probe = write_probe(&dir, TEAL);
        let store = SqliteAuditStore::open_in_memory().unwrap();
        let engine = engine(Duration::ZERO, Duration::from_secs(5));
        let mut check_in = CheckIn {
            roster: &roster,
            engine: &engine,
            recorder: &store,
            evidence: &evidence,
            max_photo_bytes: 1 << 20,
        };

        assert!(check_in.run("EMP999", &probe, DEFAULT_THRESHOLD, None).await.is_err());

        check_in.max_photo_bytes = 8;
        let err = check_in.run("EMP001", &probe, DEFAULT_THRESHOLD, None).await.unwrap_err();
        assert!(err.to_string().contains("too large"));
        assert!(store.recent(None, 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_reference_file_is_recorded_as_error() {
        let (dir, roster, evidence) = setup(TEAL);
        std::fs::remove_file(dir.path().join("photos/emp001.png")).unwrap();
        let probe = write_probe(&dir, TEAL);
        let store = SqliteAuditStore::open_in_memory().unwrap();
        let engine = engine(Duration::ZERO, Duration::from_secs(5));
        let check_in = CheckIn {
            roster: &roster,
            engine: &engine,
            recorder: &store,
            evidence: &evidence,
            max_photo_bytes: 1 << 20,
        };

        let report = check_in.run("EMP001", &probe, DEFAULT_THRESHOLD, None).await.unwrap();
        assert_eq!(report.outcome.decision, Decision::ProcessingError);
        assert!(report.outcome.diagnostic.starts_with("reference image"));

        let record = store.get(report.attempt_id).unwrap().unwrap();
        assert_eq!(record.status, AttemptStatus::Error);
        assert!(record.reference_sha256.is_none());
        assert!(record.reference_photo.is_none());
        assert!(record.captured_photo.is_some());
    }

    #[test]
    fn test_photo_extension() {
        assert_eq!(photo_extension(Path::new("a/b.PNG")), "png");
        assert_eq!(photo_extension(Path::new("a/b")), "jpg");
    }

    #[test]
    fn test_read_photo_size_limit() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("probe.jpg");
        std::fs::write(&path, vec![0u8; 64]).unwrap();

        assert_eq!(read_photo(&path, 64).unwrap().len(), 64);
        let err = read_photo(&path, 63).unwrap_err();
        assert!(err.to_string().contains("too large"));
        assert!(read_photo(&dir.path().join("missing.jpg"), 64).is_err());
    }

    #[test]
    fn test_outcome_message() {
        let matched = VerificationOutcome::matched(0.7, String::new());
        assert!(outcome_message(&matched, "Ada").contains("Ada"));

        let error = VerificationOutcome::processing_error("probe image: cannot decode");
        assert!(outcome_message(&error, "Ada").contains("cannot decode"));
    }
}
