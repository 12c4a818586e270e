//! facemark-core: face detection and facial landmark fitting.
//!
//! Runs a ResNet-10 SSD face detector and a landmark regressor via ONNX
//! Runtime, filters raw detections into pixel-space boxes, and caches each
//! upload's detector output so threshold changes never re-run inference.

pub mod detector;
pub mod filter;
pub mod image_io;
pub mod landmarks;
pub mod pipeline;
pub mod registry;
pub mod session;
pub mod types;

pub use detector::{Backend, ConfigurationError, Detector, DetectorError, FaceDetector};
pub use filter::filter_detections;
pub use image_io::{decode_upload, downscale_to_fit, load_upload, DecodeError, Image};
pub use landmarks::{LandmarkError, LandmarkFitter, Landmarker};
pub use pipeline::{
    analyze, overlay_thickness, PipelineError, DEFAULT_THRESHOLD, MAX_DETECTIONS, MAX_IMAGE_DIM,
};
pub use registry::{default_model_dir, ModelConfig, ModelRegistry};
pub use session::{SessionCache, SessionStore, UploadSession};
pub use types::{Analysis, BoundingBox, LandmarkSet, Point, RawDetection, UploadToken};
