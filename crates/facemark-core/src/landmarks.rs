//! Facial landmark fitting via ONNX Runtime.
//!
//! Regresses a fixed set of keypoints (68 for the bundled model) from each
//! face crop. The model sees a 112×112 RGB crop of the bounding box and
//! returns coordinates normalized to that crop.

use crate::image_io::Image;
use crate::types::{BoundingBox, LandmarkSet, Point};
use image::imageops::{self, FilterType};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const LANDMARK_INPUT_SIZE: u32 = 112;
const LANDMARK_SCALE: f32 = 1.0 / 255.0;

#[derive(Error, Debug)]
pub enum LandmarkError {
    #[error("model file not found: {0} (place the landmark ONNX model in the model directory)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Anything that fits one landmark set per bounding box.
pub trait Landmarker {
    /// Returns exactly one [`LandmarkSet`] per box, in the same order.
    fn fit(&mut self, image: &Image, boxes: &[BoundingBox]) -> Result<Vec<LandmarkSet>, LandmarkError>;
}

/// ONNX-backed landmark regressor.
pub struct LandmarkFitter {
    session: Session,
}

impl LandmarkFitter {
    /// Load the landmark ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, LandmarkError> {
        if !Path::new(model_path).exists() {
            return Err(LandmarkError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "facial landmark model loaded"
        );

        Ok(Self { session })
    }

    fn fit_one(&mut self, image: &Image, face: &BoundingBox) -> Result<LandmarkSet, LandmarkError> {
        let input = preprocess(image, face);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, coords) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| LandmarkError::InferenceFailed(format!("landmarks: {e}")))?;

        decode_landmarks(coords, face)
    }
}

impl Landmarker for LandmarkFitter {
    fn fit(&mut self, image: &Image, boxes: &[BoundingBox]) -> Result<Vec<LandmarkSet>, LandmarkError> {
        let sets = boxes
            .iter()
            .map(|face| self.fit_one(image, face))
            .collect::<Result<Vec<_>, _>>()?;
        tracing::debug!(faces = sets.len(), "landmarks fitted");
        Ok(sets)
    }
}

/// Crop `face` out of `image` and build a 1×3×112×112 RGB tensor in `[0, 1]`.
///
/// The crop is clamped to the image; boxes reaching this point have already
/// passed the detection filter, so the clamp only matters at the right and
/// bottom edges.
fn preprocess(image: &Image, face: &BoundingBox) -> Array4<f32> {
    let size = LANDMARK_INPUT_SIZE as usize;
    let x = face.x.max(0) as u32;
    let y = face.y.max(0) as u32;
    let w = (face.width.max(1) as u32).min(image.width().saturating_sub(x)).max(1);
    let h = (face.height.max(1) as u32).min(image.height().saturating_sub(y)).max(1);

    let crop = imageops::crop_imm(image, x, y, w, h).to_image();
    let resized = imageops::resize(&crop, LANDMARK_INPUT_SIZE, LANDMARK_INPUT_SIZE, FilterType::Triangle);

    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (px, py, pixel) in resized.enumerate_pixels() {
        let (px, py) = (px as usize, py as usize);
        for c in 0..3 {
            tensor[[0, c, py, px]] = pixel.0[c] as f32 * LANDMARK_SCALE;
        }
    }

    tensor
}

/// Map crop-normalized `[x0, y0, x1, y1, ...]` back into image pixels.
fn decode_landmarks(coords: &[f32], face: &BoundingBox) -> Result<LandmarkSet, LandmarkError> {
    if coords.is_empty() || coords.len() % 2 != 0 {
        return Err(LandmarkError::InferenceFailed(format!(
            "expected an even number of landmark coordinates, got {}",
            coords.len()
        )));
    }

    let points = coords
        .chunks_exact(2)
        .map(|xy| Point {
            x: face.x as f32 + xy[0] * face.width as f32,
            y: face.y as f32 + xy[1] * face.height as f32,
        })
        .collect();

    Ok(LandmarkSet { points })
}
