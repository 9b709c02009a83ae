use namesake_core::batch::{DEFAULT_MAX_IMAGE_BYTES, DEFAULT_WORKERS};
use namesake_core::classify::DEFAULT_MAX_LABELS;
use namesake_core::conflict::DEFAULT_DUPLICATE_FORMAT;
use namesake_core::matcher::DEFAULT_TOLERANCE;
use namesake_core::naming::DEFAULT_SEPARATOR;
use std::path::PathBuf;

/// CLI configuration, loaded from environment variables.
pub struct Config {
    /// Path to the SQLite gallery database.
    pub db_path: PathBuf,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Maximum embedding distance for a positive match.
    pub tolerance: f32,
    /// Cap on identified names per filename.
    pub max_labels: usize,
    /// Separator between names in derived filenames.
    pub separator: String,
    /// Suffix format for filename collisions; `{n}` is the counter.
    pub duplicate_format: String,
    /// Batch worker pool width.
    pub workers: usize,
    /// Per-file size cap in bytes.
    pub max_image_bytes: u64,
}

impl Config {
    /// Load configuration from `NAMESAKE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("namesake");

        let db_path = std::env::var("NAMESAKE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("faces.db"));

        let model_dir = std::env::var("NAMESAKE_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("models"));

        Self {
            db_path,
            model_dir,
            tolerance: env_f32("NAMESAKE_TOLERANCE", DEFAULT_TOLERANCE),
            max_labels: env_usize("NAMESAKE_MAX_NAMES", DEFAULT_MAX_LABELS),
            separator: std::env::var("NAMESAKE_SEPARATOR")
                .unwrap_or_else(|_| DEFAULT_SEPARATOR.to_string()),
            duplicate_format: std::env::var("NAMESAKE_DUPLICATE_FORMAT")
                .unwrap_or_else(|_| DEFAULT_DUPLICATE_FORMAT.to_string()),
            workers: env_usize("NAMESAKE_WORKERS", DEFAULT_WORKERS).max(1),
            max_image_bytes: env_u64("NAMESAKE_MAX_IMAGE_BYTES", DEFAULT_MAX_IMAGE_BYTES),
        }
    }

    /// Path to the face detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_dir
            .join("det_10g.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the face recognition model.
    pub fn embedder_model_path(&self) -> String {
        self.model_dir
            .join("w600k_r50.onnx")
            .to_string_lossy()
            .into_owned()
    }
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
