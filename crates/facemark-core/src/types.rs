use serde::{Deserialize, Serialize};
use std::fmt;

/// One candidate row of SSD detector output.
///
/// Coordinates are normalized to `[0, 1]` relative to the source image and
/// describe the top-left and bottom-right corners.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    pub class_id: f32,
    pub confidence: f32,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

/// Validated face region in pixel units, anchored at its top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// A landmark location in image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

/// Ordered facial keypoints for one bounding box.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LandmarkSet {
    pub points: Vec<Point>,
}

impl LandmarkSet {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Opaque identity of one upload, supplied by the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UploadToken(String);

impl UploadToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UploadToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UploadToken {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for UploadToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Result of filtering one cached upload at one confidence threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub width: u32,
    pub height: u32,
    pub threshold: f32,
    /// Accepted boxes, in detector output order.
    pub boxes: Vec<BoundingBox>,
    /// One set per box; `None` when fitting did not run.
    pub landmarks: Option<Vec<LandmarkSet>>,
    /// True when fitting was skipped because too many faces were accepted.
    pub crowded: bool,
    /// Recommended overlay stroke width for this image.
    pub line_thickness: u32,
}

impl Analysis {
    pub fn face_count(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }
}
