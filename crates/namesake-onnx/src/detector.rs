//! SCRFD-style face detection on decoded photos.
//!
//! The model takes a letterboxed 640×640 RGB tensor and emits per-stride
//! score and box-distance tensors. Boxes are decoded anchor-free (distances
//! from the anchor center, in stride units), filtered by confidence, merged
//! with NMS, and mapped back to photo coordinates.

use crate::OnnxError;
use image::imageops::FilterType;
use image::RgbImage;
use namesake_core::BoundingBox;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const DETECT_INPUT_SIZE: u32 = 640;
const DETECT_MEAN: f32 = 127.5;
const DETECT_STD: f32 = 128.0;
const CONFIDENCE_THRESHOLD: f32 = 0.5;
const NMS_IOU_THRESHOLD: f32 = 0.4;
const STRIDES: [u32; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: u32 = 2;

/// Mapping from photo coordinates into the letterboxed model input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: u32, height: u32) -> Self {
        let scale = (DETECT_INPUT_SIZE as f32 / width as f32)
            .min(DETECT_INPUT_SIZE as f32 / height as f32);
        let scaled_w = (width as f32 * scale).round();
        let scaled_h = (height as f32 * scale).round();
        Self {
            scale,
            pad_x: (DETECT_INPUT_SIZE as f32 - scaled_w) / 2.0,
            pad_y: (DETECT_INPUT_SIZE as f32 - scaled_h) / 2.0,
        }
    }

    /// Map a point from model-input space back to photo space.
    fn to_photo(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// SCRFD-style photo face detector.
pub struct PhotoFaceDetector {
    session: Session,
}

impl PhotoFaceDetector {
    /// Load the detection model from the given ONNX file.
    ///
    /// Accepts exports with 6 outputs (score/box per stride) or 9 outputs
    /// (score/box/landmark per stride); landmarks are ignored.
    pub fn load(model_path: &str) -> Result<Self, OnnxError> {
        if !Path::new(model_path).exists() {
            return Err(OnnxError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let num_outputs = session.outputs().len();
        if num_outputs < 2 * STRIDES.len() {
            return Err(OnnxError::Inference(format!(
                "detection model needs at least {} outputs (score/box per stride), got {num_outputs}",
                2 * STRIDES.len()
            )));
        }

        tracing::info!(
            path = model_path,
            outputs = num_outputs,
            "face detection model loaded"
        );
        Ok(Self { session })
    }

    /// Detect faces in a decoded photo, highest confidence first.
    pub fn detect(&mut self, photo: &RgbImage) -> Result<Vec<BoundingBox>, OnnxError> {
        let letterbox = Letterbox::fit(photo.width(), photo.height());
        let input = preprocess(photo, letterbox);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        // Positional layout: [scores per stride..., boxes per stride...].
        let mut candidates = Vec::new();
        for (i, &stride) in STRIDES.iter().enumerate() {
            let (_, scores) = outputs[i]
                .try_extract_tensor::<f32>()
                .map_err(|e| OnnxError::Inference(format!("scores stride {stride}: {e}")))?;
            let (_, boxes) = outputs[STRIDES.len() + i]
                .try_extract_tensor::<f32>()
                .map_err(|e| OnnxError::Inference(format!("boxes stride {stride}: {e}")))?;
            decode_stride(scores, boxes, stride, letterbox, &mut candidates);
        }

        Ok(merge_overlapping(candidates, NMS_IOU_THRESHOLD))
    }
}

/// Letterbox-resize a photo into a normalized NCHW RGB tensor.
fn preprocess(photo: &RgbImage, letterbox: Letterbox) -> Array4<f32> {
    let size = DETECT_INPUT_SIZE as usize;
    let scaled_w = (photo.width() as f32 * letterbox.scale).round() as u32;
    let scaled_h = (photo.height() as f32 * letterbox.scale).round() as u32;
    let resized = image::imageops::resize(photo, scaled_w.max(1), scaled_h.max(1), FilterType::Triangle);

    let pad_x = letterbox.pad_x.floor() as u32;
    let pad_y = letterbox.pad_y.floor() as u32;

    // Padding stays at DETECT_MEAN, which normalizes to 0.
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let tx = (x + pad_x) as usize;
        let ty = (y + pad_y) as usize;
        if tx >= size || ty >= size {
            continue;
        }
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = (pixel.0[c] as f32 - DETECT_MEAN) / DETECT_STD;
        }
    }
    tensor
}

/// Decode one stride's score/box tensors into photo-space candidates.
fn decode_stride(
    scores: &[f32],
    boxes: &[f32],
    stride: u32,
    letterbox: Letterbox,
    out: &mut Vec<BoundingBox>,
) {
    let grid = (DETECT_INPUT_SIZE / stride) as usize;
    let anchors = grid * grid * ANCHORS_PER_CELL as usize;

    for idx in 0..anchors.min(scores.len()) {
        let confidence = scores[idx];
        if confidence <= CONFIDENCE_THRESHOLD {
            continue;
        }
        let box_off = idx * 4;
        if box_off + 3 >= boxes.len() {
            break;
        }

        let cell = idx / ANCHORS_PER_CELL as usize;
        let anchor_x = ((cell % grid) as u32 * stride) as f32;
        let anchor_y = ((cell / grid) as u32 * stride) as f32;

        // Box as distances from the anchor center, in stride units.
        let (x1, y1) = letterbox.to_photo(
            anchor_x - boxes[box_off] * stride as f32,
            anchor_y - boxes[box_off + 1] * stride as f32,
        );
        let (x2, y2) = letterbox.to_photo(
            anchor_x + boxes[box_off + 2] * stride as f32,
            anchor_y + boxes[box_off + 3] * stride as f32,
        );

        out.push(BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence,
        });
    }
}

/// Greedy NMS: keep each candidate unless it overlaps an already-kept,
/// higher-confidence one.
fn merge_overlapping(mut candidates: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut kept: Vec<BoundingBox> = Vec::new();
    for candidate in candidates {
        if kept.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let ix = (a.x + a.width).min(b.x + b.width) - a.x.max(b.x);
    let iy = (a.y + a.height).min(b.y + b.height) - a.y.max(b.y);
    let intersection = ix.max(0.0) * iy.max(0.0);
    let union = a.width * a.height + b.width * b.height - intersection;
    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}
