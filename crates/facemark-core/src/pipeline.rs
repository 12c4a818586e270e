//! Threshold filtering plus gated landmark fitting over a cached upload.

use crate::detector::{ConfigurationError, DetectorError};
use crate::filter::filter_detections;
use crate::image_io::{DecodeError, Image};
use crate::landmarks::{LandmarkError, Landmarker};
use crate::types::{Analysis, RawDetection};
use thiserror::Error;

/// Landmark fitting runs only below this many accepted faces.
pub const MAX_DETECTIONS: usize = 10;
/// Initial confidence threshold offered to users.
pub const DEFAULT_THRESHOLD: f32 = 0.5;
/// Longest side an upload is downscaled to before detection.
pub const MAX_IMAGE_DIM: u32 = 800;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("landmark error: {0}")]
    Landmarks(#[from] LandmarkError),
    #[error("confidence threshold must be within [0, 1], got {0}")]
    InvalidThreshold(f32),
    #[error("no image has been uploaded for this session")]
    NoUpload,
}

/// Recommended overlay stroke width: `max(1, round(height / 200))`.
///
/// Halves round to even, so a 500 px image gets 2 and a 700 px image gets 4.
pub fn overlay_thickness(height: u32) -> u32 {
    ((height as f32 / 200.0).round_ties_even() as u32).max(1)
}

/// Filter `detections` at `threshold` and fit landmarks when the face count
/// is in `(0, max_detections)`.
///
/// A crowded image still reports its boxes; only fitting is skipped.
pub fn analyze<L>(
    image: &Image,
    detections: &[RawDetection],
    threshold: f32,
    max_detections: usize,
    landmarker: &mut L,
) -> Result<Analysis, PipelineError>
where
    L: Landmarker + ?Sized,
{
    if !(0.0..=1.0).contains(&threshold) {
        return Err(PipelineError::InvalidThreshold(threshold));
    }

    let (width, height) = image.dimensions();
    let boxes = filter_detections(detections, threshold, height, width);
    let crowded = boxes.len() >= max_detections;

    let landmarks = if !boxes.is_empty() && !crowded {
        Some(landmarker.fit(image, &boxes)?)
    } else {
        None
    };

    tracing::debug!(
        threshold,
        candidates = detections.len(),
        faces = boxes.len(),
        crowded,
        "analysis complete"
    );

    Ok(Analysis {
        width,
        height,
        threshold,
        boxes,
        landmarks,
        crowded,
        line_thickness: overlay_thickness(height),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, LandmarkSet, Point};

    /// Records every call and returns one single-point set per box (its corner).
    #[derive(Default)]
    struct RecordingLandmarker {
        calls: Vec<Vec<BoundingBox>>,
    }

    impl Landmarker for RecordingLandmarker {
        fn fit(&mut self, _image: &Image, boxes: &[BoundingBox]) -> Result<Vec<LandmarkSet>, LandmarkError> {
            self.calls.push(boxes.to_vec());
            Ok(boxes
                .iter()
                .map(|b| LandmarkSet { points: vec![Point { x: b.x as f32, y: b.y as f32 }] })
                .collect())
        }
    }

    /// `n` valid, non-overlapping detections on a 1000×100 image.
    fn valid_detections(n: usize) -> Vec<RawDetection> {
        (0..n)
            .map(|i| {
                let x = i as f32 / 100.0;
                RawDetection { class_id: 1.0, confidence: 0.9, x1: x, y1: 0.1, x2: x + 0.005, y2: 0.5 }
            })
            .collect()
    }

    fn image() -> Image {
        Image::new(1000, 100)
    }

    #[test]
    fn test_overlay_thickness() {
        assert_eq!(overlay_thickness(0), 1);
        assert_eq!(overlay_thickness(150), 1);
        assert_eq!(overlay_thickness(300), 2);
        assert_eq!(overlay_thickness(800), 4);
        assert_eq!(overlay_thickness(1100), 6);
    }

    #[test]
    fn test_overlay_thickness_rounds_halves_to_even() {
        assert_eq!(overlay_thickness(100), 1);
        assert_eq!(overlay_thickness(500), 2);
        assert_eq!(overlay_thickness(700), 4);
        assert_eq!(overlay_thickness(900), 4);
    }

    #[test]
    fn test_skips_landmarks_at_max_detections() {
        let mut landmarker = RecordingLandmarker::default();
        let dets = valid_detections(MAX_DETECTIONS);
        let analysis = analyze(&image(), &dets, 0.5, MAX_DETECTIONS, &mut landmarker).unwrap();

        assert_eq!(analysis.face_count(), MAX_DETECTIONS);
        assert!(analysis.crowded);
        assert!(analysis.landmarks.is_none());
        assert!(landmarker.calls.is_empty());
    }

    #[test]
    fn test_fits_landmarks_below_max_detections() {
        let mut landmarker = RecordingLandmarker::default();
        let dets = valid_detections(MAX_DETECTIONS - 1);
        let analysis = analyze(&image(), &dets, 0.5, MAX_DETECTIONS, &mut landmarker).unwrap();

        assert_eq!(landmarker.calls.len(), 1);
        assert_eq!(landmarker.calls[0], analysis.boxes);
        assert!(!analysis.crowded);

        // One set per box, same order.
        let sets = analysis.landmarks.unwrap();
        assert_eq!(sets.len(), analysis.boxes.len());
        for (set, bbox) in sets.iter().zip(&analysis.boxes) {
            assert_eq!(set.points[0], Point { x: bbox.x as f32, y: bbox.y as f32 });
        }
    }

    #[test]
    fn test_empty_result_is_not_an_error() {
        let mut landmarker = RecordingLandmarker::default();
        let dets = valid_detections(3);
        let analysis = analyze(&image(), &dets, 0.95, MAX_DETECTIONS, &mut landmarker).unwrap();

        assert!(analysis.is_empty());
        assert!(!analysis.crowded);
        assert!(analysis.landmarks.is_none());
        assert!(landmarker.calls.is_empty());
    }

    #[test]
    fn test_rejects_out_of_range_threshold() {
        let mut landmarker = RecordingLandmarker::default();
        for t in [-0.1, 1.01, f32::NAN] {
            let result = analyze(&image(), &[], t, MAX_DETECTIONS, &mut landmarker);
            assert!(matches!(result, Err(PipelineError::InvalidThreshold(_))), "threshold {t}");
        }
    }

    #[test]
    fn test_rethresholding_leaves_detections_intact() {
        let mut landmarker = RecordingLandmarker::default();
        let mut dets = valid_detections(4);
        dets[1].confidence = 0.3;
        let before = dets.clone();

        let strict = analyze(&image(), &dets, 0.5, MAX_DETECTIONS, &mut landmarker).unwrap();
        let loose = analyze(&image(), &dets, 0.2, MAX_DETECTIONS, &mut landmarker).unwrap();

        assert_eq!(strict.face_count(), 3);
        assert_eq!(loose.face_count(), 4);
        assert_eq!(dets, before);
    }

    #[test]
    fn test_reports_dimensions_and_thickness() {
        let mut landmarker = RecordingLandmarker::default();
        let img = Image::new(640, 480);
        let analysis = analyze(&img, &[], 0.5, MAX_DETECTIONS, &mut landmarker).unwrap();
        assert_eq!((analysis.width, analysis.height), (640, 480));
        assert_eq!(analysis.line_thickness, 2);
    }
}
