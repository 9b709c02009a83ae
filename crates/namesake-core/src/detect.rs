//! Face detection boundary.
//!
//! Detection and embedding extraction are external collaborators: an
//! implementation turns a photo file into zero or more [`DetectedFace`]s.
//! `namesake-onnx` provides the ONNX Runtime implementation; tests use mocks.

use crate::types::DetectedFace;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectError {
    #[error("image file not found: {0}")]
    NotFound(PathBuf),
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),
    #[error("image too large: {size} bytes (limit {limit})")]
    TooLarge { size: u64, limit: u64 },
    /// Corrupt or undecodable image. This must be a typed failure; a
    /// detector must never report a broken image as "no faces".
    #[error("unreadable image: {0}")]
    Unreadable(String),
    #[error("inference failed: {0}")]
    Inference(String),
}

/// Detects faces in a photo and extracts one embedding per face.
///
/// May return an empty list (a readable photo with no faces). Shared
/// read-only across batch workers.
pub trait FaceDetector: Sync {
    fn detect(&self, image: &Path) -> Result<Vec<DetectedFace>, DetectError>;
}
