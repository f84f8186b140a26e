//! faceverify-audit: persistence of verification outcomes.
//!
//! Records each verification attempt once in SQLite, keyed by attempt ID,
//! and keeps copies of the compared photos as evidence.

pub mod evidence;
pub mod record;
pub mod store;

pub use evidence::{EvidenceKind, EvidenceStore};
pub use record::{sha256_hex, AttemptStatus, VerificationRecord};
pub use store::{AttemptStats, AuditError, AuditRecorder, Recorded, SqliteAuditStore};
