//! SSD face detector via ONNX Runtime.
//!
//! Runs one of the two ResNet-10 SSD face detectors (Caffe- or
//! TensorFlow-trained, both exported to ONNX) and returns the raw,
//! unfiltered candidate rows. Thresholding and geometric validation
//! live in [`crate::filter`].

use crate::image_io::Image;
use crate::types::RawDetection;
use image::imageops::{self, FilterType};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

// --- Network input layout ---
const SSD_INPUT_SIZE: u32 = 300;
/// Per-plane mean, in tensor plane order (B, G, R).
const SSD_MEAN: [f32; 3] = [104.0, 117.0, 123.0];
const SSD_SCALE: f32 = 1.0;
/// `[image_id, class_id, confidence, x1, y1, x2, y2]`
const SSD_ROW_LEN: usize = 7;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unsupported detector backend: {0:?} (expected \"caffe\" or \"tf\")")]
pub struct ConfigurationError(pub String);

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} (place the detector ONNX export in the model directory)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Pretrained detector variant. Both produce the same output layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// ResNet-10 SSD trained with Caffe (fp16 weights).
    Caffe,
    /// The same architecture trained with TensorFlow (uint8 quantized).
    TensorFlow,
}

impl Backend {
    /// File name of this backend's model inside the model directory.
    pub fn model_file(self) -> &'static str {
        match self {
            Backend::Caffe => "res10_300x300_ssd_iter_140000_fp16.onnx",
            Backend::TensorFlow => "opencv_face_detector_uint8.onnx",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Backend::Caffe => "caffe",
            Backend::TensorFlow => "tf",
        }
    }
}

impl FromStr for Backend {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "caffe" => Ok(Backend::Caffe),
            "tf" => Ok(Backend::TensorFlow),
            other => Err(ConfigurationError(other.to_string())),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anything that turns an image into raw detector rows.
pub trait Detector {
    fn detect(&mut self, image: &Image) -> Result<Vec<RawDetection>, DetectorError>;
}

/// ONNX-backed SSD face detector.
pub struct FaceDetector {
    session: Session,
}

impl FaceDetector {
    /// Load the detector ONNX model for `backend` from the given path.
    pub fn load(model_path: &str, backend: Backend) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            %backend,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "face detection model loaded"
        );

        Ok(Self { session })
    }
}

impl Detector for FaceDetector {
    /// Run one forward pass; every output row becomes a [`RawDetection`].
    fn detect(&mut self, image: &Image) -> Result<Vec<RawDetection>, DetectorError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(DetectorError::InferenceFailed("empty image".into()));
        }

        let input = preprocess(image);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("detections: {e}")))?;

        let detections = parse_detections(data)?;
        tracing::debug!(
            candidates = detections.len(),
            width = image.width(),
            height = image.height(),
            "detector forward pass"
        );
        Ok(detections)
    }
}

/// Build the NCHW input blob: plain resize to 300×300, B/G/R planes,
/// per-plane mean subtraction.
fn preprocess(image: &Image) -> Array4<f32> {
    let size = SSD_INPUT_SIZE as usize;
    let resized = imageops::resize(image, SSD_INPUT_SIZE, SSD_INPUT_SIZE, FilterType::Triangle);

    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let [r, g, b] = pixel.0;
        let (x, y) = (x as usize, y as usize);
        tensor[[0, 0, y, x]] = (b as f32 - SSD_MEAN[0]) * SSD_SCALE;
        tensor[[0, 1, y, x]] = (g as f32 - SSD_MEAN[1]) * SSD_SCALE;
        tensor[[0, 2, y, x]] = (r as f32 - SSD_MEAN[2]) * SSD_SCALE;
    }

    tensor
}

/// Split the flat `[1, 1, N, 7]` output into detection records.
fn parse_detections(data: &[f32]) -> Result<Vec<RawDetection>, DetectorError> {
    if data.len() % SSD_ROW_LEN != 0 {
        return Err(DetectorError::InferenceFailed(format!(
            "detector output length {} is not a multiple of {SSD_ROW_LEN}",
            data.len()
        )));
    }

    Ok(data
        .chunks_exact(SSD_ROW_LEN)
        .map(|row| RawDetection {
            class_id: row[1],
            confidence: row[2],
            x1: row[3],
            y1: row[4],
            x2: row[5],
            y2: row[6],
        })
        .collect())
}
