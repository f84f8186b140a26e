use faceverify_core::{BackendConfig, DetectionMode, Metric, DEFAULT_THRESHOLD};
use std::path::PathBuf;

/// CLI configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Maximum embedding distance still considered a match.
    pub threshold: f32,
    pub metric: Metric,
    pub detection_mode: DetectionMode,
    /// ONNX Runtime intra-op threads per session.
    pub intra_threads: usize,
    /// Timeout in seconds for one verification call.
    pub verify_timeout_secs: u64,
    /// Path to the SQLite audit database.
    pub db_path: PathBuf,
    /// Directory receiving copies of compared photos.
    pub evidence_dir: PathBuf,
    /// Path to the staff roster TOML file.
    pub roster_path: PathBuf,
    /// Largest probe photo accepted, in bytes.
    pub max_photo_bytes: usize,
}

impl Config {
    /// Load configuration from `FACEVERIFY_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("FACEVERIFY_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| faceverify_core::default_model_dir());

        let data_dir = faceverify_core::default_data_dir();

        let metric = env_parsed("FACEVERIFY_METRIC", Metric::parse).unwrap_or_default();
        let detection_mode =
            env_parsed("FACEVERIFY_DETECTION_MODE", DetectionMode::parse).unwrap_or_default();

        Self {
            model_dir,
            threshold: env_f32("FACEVERIFY_THRESHOLD", DEFAULT_THRESHOLD),
            metric,
            detection_mode,
            intra_threads: env_usize("FACEVERIFY_INTRA_THREADS", 2).max(1),
            verify_timeout_secs: env_u64("FACEVERIFY_VERIFY_TIMEOUT_SECS", 5),
            db_path: env_path("FACEVERIFY_DB_PATH").unwrap_or_else(|| data_dir.join("attempts.db")),
            evidence_dir: env_path("FACEVERIFY_EVIDENCE_DIR")
                .unwrap_or_else(|| data_dir.join("verification_attempts")),
            roster_path: env_path("FACEVERIFY_ROSTER_PATH").unwrap_or_else(|| data_dir.join("staff.toml")),
            max_photo_bytes: env_usize("FACEVERIFY_MAX_PHOTO_BYTES", 10 * 1024 * 1024),
        }
    }

    pub fn backend(&self) -> BackendConfig {
        BackendConfig {
            model_dir: self.model_dir.clone(),
            detection_mode: self.detection_mode,
            metric: self.metric,
            intra_threads: self.intra_threads,
        }
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key).ok().filter(|v| !v.is_empty()).map(PathBuf::from)
}

fn env_parsed<T>(key: &str, parse: fn(&str) -> Option<T>) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    let parsed = parse(&raw);
    if parsed.is_none() {
        tracing::warn!(key, value = %raw, "unrecognized value; using default");
    }
    parsed
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
