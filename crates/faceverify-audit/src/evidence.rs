//! Copies of the photos compared in each attempt.
//!
//! Layout: `<root>/<staff_id>/<YYYYmmdd_HHMMSS>_<kind>_<attempt_id>.<ext>`.

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvidenceKind {
    /// The freshly captured probe photo.
    Captured,
    /// The staff member's reference photo as it was at verification time.
    Reference,
}

impl EvidenceKind {
    fn as_str(&self) -> &'static str {
        match self {
            EvidenceKind::Captured => "captured",
            EvidenceKind::Reference => "reference",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EvidenceStore {
    root: PathBuf,
}

impl EvidenceStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Write one evidence photo. Failures are logged and yield `None`; a lost
    /// copy never fails the attempt it belongs to.
    pub fn save(
        &self,
        staff_id: &str,
        attempt_id: Uuid,
        kind: EvidenceKind,
        data: &[u8],
        extension: &str,
        at: DateTime<Utc>,
    ) -> Option<PathBuf> {
        let dir = self.root.join(sanitize_component(staff_id));
        let filename = format!(
            "{}_{}_{}.{}",
            at.format("%Y%m%d_%H%M%S"),
            kind.as_str(),
            attempt_id,
            sanitize_component(extension),
        );
        let path = dir.join(filename);

        let result = std::fs::create_dir_all(&dir).and_then(|_| std::fs::write(&path, data));
        match result {
            Ok(()) => {
                tracing::debug!(path = %path.display(), bytes = data.len(), kind = kind.as_str(), "evidence saved");
                Some(path)
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, kind = kind.as_str(), "failed to save evidence photo");
                None
            }
        }
    }
}

/// Replace path separators and other unsafe characters in one path component.
fn sanitize_component(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}
