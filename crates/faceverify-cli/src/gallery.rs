//! Precomputed embedding gallery stored as JSON, used by `batch`.

use anyhow::{Context, Result};
use faceverify_core::Embedding;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GalleryEntry {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub embedding: Embedding,
}

pub fn load(path: &Path) -> Result<Vec<GalleryEntry>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read gallery {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("invalid gallery {}", path.display()))
}

pub fn save(path: &Path, entries: &[GalleryEntry]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(entries)?;
    std::fs::write(path, json).with_context(|| format!("failed to write gallery {}", path.display()))
}

/// Split entries into comparison pairs, dropping those produced by another model.
///
/// Embeddings from different models are not comparable.
pub fn comparable(entries: Vec<GalleryEntry>, model_version: &str) -> Vec<(String, Embedding)> {
    entries
        .into_iter()
        .filter(|entry| match entry.embedding.model_version.as_deref() {
            Some(v) if v != model_version => {
                tracing::warn!(id = %entry.id, entry_model = v, model_version, "skipping gallery entry from another model");
                false
            }
            _ => true,
        })
        .map(|entry| (entry.id, entry.embedding))
        .collect()
}
