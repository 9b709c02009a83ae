//! The combined detect-then-embed pipeline behind the core boundary trait.

use crate::detector::PhotoFaceDetector;
use crate::embedder::FaceEmbedder;
use crate::OnnxError;
use namesake_core::{DetectError, DetectedFace, FaceDetector};
use std::path::Path;
use std::sync::Mutex;

/// ONNX-backed face engine: photo file in, detected faces with embeddings out.
///
/// `ort` sessions need exclusive access to run, so the engine serializes
/// inference behind a mutex; batch workers share one engine and overlap on
/// file I/O and decoding instead.
pub struct OnnxFaceEngine {
    inner: Mutex<Inner>,
}

struct Inner {
    detector: PhotoFaceDetector,
    embedder: FaceEmbedder,
}

impl OnnxFaceEngine {
    /// Load both models. Fails fast if either file is missing.
    pub fn load(detector_model: &str, embedder_model: &str) -> Result<Self, OnnxError> {
        let detector = PhotoFaceDetector::load(detector_model)?;
        let embedder = FaceEmbedder::load(embedder_model)?;
        Ok(Self {
            inner: Mutex::new(Inner { detector, embedder }),
        })
    }
}

impl FaceDetector for OnnxFaceEngine {
    fn detect(&self, image: &Path) -> Result<Vec<DetectedFace>, DetectError> {
        if !image.exists() {
            return Err(DetectError::NotFound(image.to_path_buf()));
        }

        // A corrupt photo is a typed failure, never an empty face list.
        let photo = image::open(image)
            .map_err(|e| DetectError::Unreadable(e.to_string()))?
            .to_rgb8();

        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let boxes = inner
            .detector
            .detect(&photo)
            .map_err(|e| DetectError::Inference(e.to_string()))?;

        tracing::debug!(file = %image.display(), faces = boxes.len(), "detection complete");

        let mut faces = Vec::with_capacity(boxes.len());
        for bounds in boxes {
            let embedding = inner
                .embedder
                .embed(&photo, &bounds)
                .map_err(|e| DetectError::Inference(e.to_string()))?;
            faces.push(DetectedFace { embedding, bounds });
        }
        Ok(faces)
    }
}
