//! ArcFace-style embedding extraction from face crops.

use crate::OnnxError;
use image::imageops::FilterType;
use image::RgbImage;
use namesake_core::{BoundingBox, Embedding};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const EMBED_INPUT_SIZE: u32 = 112;
const EMBED_MEAN: f32 = 127.5;
const EMBED_STD: f32 = 127.5; // symmetric normalization, unlike the detector
const EMBEDDING_DIM: usize = 512;
/// Extra context around the detected box before cropping, as a fraction of
/// the box size. Stands in for landmark alignment.
const CROP_MARGIN: f32 = 0.2;

/// ArcFace-style face embedder.
pub struct FaceEmbedder {
    session: Session,
}

impl FaceEmbedder {
    /// Load the recognition model from the given ONNX file.
    pub fn load(model_path: &str) -> Result<Self, OnnxError> {
        if !Path::new(model_path).exists() {
            return Err(OnnxError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(path = model_path, "face recognition model loaded");
        Ok(Self { session })
    }

    /// Extract an L2-normalized embedding for one detected face.
    pub fn embed(&mut self, photo: &RgbImage, face: &BoundingBox) -> Result<Embedding, OnnxError> {
        let crop = crop_face(photo, face);
        let input = preprocess(&crop);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| OnnxError::Inference(format!("embedding extraction: {e}")))?;

        if raw.len() != EMBEDDING_DIM {
            return Err(OnnxError::Inference(format!(
                "expected {EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(Embedding::new(l2_normalize(raw)))
    }
}

/// Cut the face region out of the photo, expanded by [`CROP_MARGIN`] and
/// clamped to the photo bounds, then resize to the model input.
fn crop_face(photo: &RgbImage, face: &BoundingBox) -> RgbImage {
    let margin_x = face.width * CROP_MARGIN;
    let margin_y = face.height * CROP_MARGIN;

    let x0 = (face.x - margin_x).max(0.0) as u32;
    let y0 = (face.y - margin_y).max(0.0) as u32;
    let x1 = ((face.x + face.width + margin_x).max(0.0) as u32).min(photo.width());
    let y1 = ((face.y + face.height + margin_y).max(0.0) as u32).min(photo.height());

    let w = x1.saturating_sub(x0).max(1);
    let h = y1.saturating_sub(y0).max(1);

    let crop = image::imageops::crop_imm(photo, x0, y0, w, h).to_image();
    image::imageops::resize(
        &crop,
        EMBED_INPUT_SIZE,
        EMBED_INPUT_SIZE,
        FilterType::Triangle,
    )
}

/// 112×112 RGB crop into a normalized NCHW tensor.
fn preprocess(crop: &RgbImage) -> Array4<f32> {
    let size = EMBED_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in crop.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel.0[c] as f32 - EMBED_MEAN) / EMBED_STD;
        }
    }
    tensor
}

fn l2_normalize(raw: &[f32]) -> Vec<f32> {
    let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preprocess_shape_and_normalization() {
        let crop = RgbImage::from_pixel(EMBED_INPUT_SIZE, EMBED_INPUT_SIZE, image::Rgb([128, 0, 255]));
        let tensor = preprocess(&crop);
        assert_eq!(tensor.shape(), &[1, 3, 112, 112]);
        assert!((tensor[[0, 0, 0, 0]] - (128.0 - EMBED_MEAN) / EMBED_STD).abs() < 1e-6);
        assert!((tensor[[0, 1, 0, 0]] - -1.0).abs() < 1e-6);
        assert!((tensor[[0, 2, 0, 0]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn crop_clamps_to_photo_bounds() {
        let photo = RgbImage::from_pixel(100, 100, image::Rgb([10, 20, 30]));
        // Box hangs off the top-left corner.
        let face = BoundingBox {
            x: -20.0,
            y: -20.0,
            width: 60.0,
            height: 60.0,
            confidence: 0.9,
        };
        let crop = crop_face(&photo, &face);
        assert_eq!(crop.dimensions(), (EMBED_INPUT_SIZE, EMBED_INPUT_SIZE));
    }

    #[test]
    fn crop_of_uniform_photo_stays_uniform() {
        let photo = RgbImage::from_pixel(200, 200, image::Rgb([77, 77, 77]));
        let face = BoundingBox {
            x: 50.0,
            y: 50.0,
            width: 80.0,
            height: 80.0,
            confidence: 0.9,
        };
        let crop = crop_face(&photo, &face);
        assert!(crop.pixels().all(|p| p.0 == [77, 77, 77]));
    }

    #[test]
    fn l2_normalize_unit_length() {
        let normalized = l2_normalize(&[3.0, 4.0]);
        let norm: f32 = normalized.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
        assert!((normalized[0] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn l2_normalize_zero_vector_unchanged() {
        assert_eq!(l2_normalize(&[0.0, 0.0]), vec![0.0, 0.0]);
    }
}
