//! Explicitly owned model handles with load-on-first-use.

use crate::detector::{Backend, ConfigurationError, Detector, DetectorError, FaceDetector};
use crate::image_io::Image;
use crate::landmarks::{LandmarkError, LandmarkFitter, Landmarker};
use crate::types::{BoundingBox, LandmarkSet, RawDetection};
use std::path::PathBuf;

/// Landmark model file name inside the model directory.
pub const LANDMARK_MODEL_FILE: &str = "face_landmarks_68.onnx";

/// Default directory holding the ONNX model files.
pub fn default_model_dir() -> PathBuf {
    PathBuf::from("models")
}

/// Which models to load and where they live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelConfig {
    /// Detector backend name: `"caffe"` or `"tf"`.
    pub backend: String,
    pub model_dir: PathBuf,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Caffe.as_str().to_string(),
            model_dir: default_model_dir(),
        }
    }
}

/// Owner of the detector and landmark models.
///
/// The backend is resolved when the registry is built; the models themselves
/// are read from disk the first time they are needed and kept for the life of
/// the registry.
pub struct ModelRegistry {
    backend: Backend,
    model_dir: PathBuf,
    detector: Option<FaceDetector>,
    landmarker: Option<LandmarkFitter>,
}

impl ModelRegistry {
    /// Resolve the configured backend. Touches no files.
    pub fn new(config: &ModelConfig) -> Result<Self, ConfigurationError> {
        let backend: Backend = config.backend.parse()?;
        Ok(Self {
            backend,
            model_dir: config.model_dir.clone(),
            detector: None,
            landmarker: None,
        })
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn detector_path(&self) -> String {
        self.model_path(self.backend.model_file())
    }

    pub fn landmark_path(&self) -> String {
        self.model_path(LANDMARK_MODEL_FILE)
    }

    pub fn detector_loaded(&self) -> bool {
        self.detector.is_some()
    }

    pub fn landmarker_loaded(&self) -> bool {
        self.landmarker.is_some()
    }

    /// Load both models now instead of on first request.
    pub fn preload(&mut self) -> Result<(), crate::PipelineError> {
        self.detector()?;
        self.landmarker()?;
        Ok(())
    }

    /// The detector, loading it on first use.
    pub fn detector(&mut self) -> Result<&mut FaceDetector, DetectorError> {
        let detector = match self.detector.take() {
            Some(d) => d,
            None => FaceDetector::load(&self.detector_path(), self.backend)?,
        };
        Ok(self.detector.insert(detector))
    }

    /// The landmark model, loading it on first use.
    pub fn landmarker(&mut self) -> Result<&mut LandmarkFitter, LandmarkError> {
        let landmarker = match self.landmarker.take() {
            Some(l) => l,
            None => LandmarkFitter::load(&self.landmark_path())?,
        };
        Ok(self.landmarker.insert(landmarker))
    }

    fn model_path(&self, file: &str) -> String {
        self.model_dir.join(file).to_string_lossy().into_owned()
    }
}

impl Detector for ModelRegistry {
    fn detect(&mut self, image: &Image) -> Result<Vec<RawDetection>, DetectorError> {
        self.detector()?.detect(image)
    }
}

impl Landmarker for ModelRegistry {
    fn fit(&mut self, image: &Image, boxes: &[BoundingBox]) -> Result<Vec<LandmarkSet>, LandmarkError> {
        self.landmarker()?.fit(image, boxes)
    }
}
