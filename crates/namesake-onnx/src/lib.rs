//! ONNX Runtime implementation of the face-detection boundary.
//!
//! Decodes photo files with the `image` crate, finds faces with an
//! SCRFD-style multi-stride detection model, and extracts one L2-normalized
//! 512-dimensional embedding per face with an ArcFace-style recognition
//! model. Both models run on CPU via `ort`.

pub mod detector;
pub mod embedder;
mod engine;

pub use detector::PhotoFaceDetector;
pub use embedder::FaceEmbedder;
pub use engine::OnnxFaceEngine;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OnnxError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}
