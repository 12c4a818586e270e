//! Confidence thresholding and geometric validation of raw detections.

use crate::types::{BoundingBox, RawDetection};

/// Convert raw normalized detections into validated pixel-space boxes.
///
/// Keeps every detection with `confidence >= threshold` whose scaled box has
/// positive extent and lies inside the image. The first corner must satisfy
/// `0 <= x1 < width`, `0 <= y1 < height`; the second `0 <= x2 <= width`,
/// `0 <= y2 <= height` (a half-open box anchored at its top-left pixel).
///
/// Output order follows input order. Inputs are never modified.
pub fn filter_detections(
    detections: &[RawDetection],
    threshold: f32,
    height: u32,
    width: u32,
) -> Vec<BoundingBox> {
    let h = height as f32;
    let w = width as f32;

    detections
        .iter()
        .filter(|det| det.confidence >= threshold)
        .filter_map(|det| {
            let (x1, y1) = (det.x1 * w, det.y1 * h);
            let (x2, y2) = (det.x2 * w, det.y2 * h);
            let box_w = x2 - x1;
            let box_h = y2 - y1;

            if !(box_w > 0.0 && box_h > 0.0) {
                return None;
            }
            if !in_bounds((x1, y1), (x2, y2), h, w) {
                return None;
            }

            Some(BoundingBox {
                x: x1 as i32,
                y: y1 as i32,
                width: box_w as i32,
                height: box_h as i32,
            })
        })
        .collect()
}

fn in_bounds(p1: (f32, f32), p2: (f32, f32), h: f32, w: f32) -> bool {
    let w_check = 0.0 <= p1.0 && p1.0 < w && 0.0 <= p2.0 && p2.0 <= w;
    let h_check = 0.0 <= p1.1 && p1.1 < h && 0.0 <= p2.1 && p2.1 <= h;
    w_check && h_check
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(conf: f32, x1: f32, y1: f32, x2: f32, y2: f32) -> RawDetection {
        RawDetection { class_id: 1.0, confidence: conf, x1, y1, x2, y2 }
    }

    #[test]
    fn test_scales_and_truncates() {
        let dets = [det(0.9, 0.25, 0.125, 0.75, 0.5), det(0.9, 0.1, 0.1, 0.3, 0.3)];
        let boxes = filter_detections(&dets, 0.5, 200, 400);
        // x1=100, y1=25, x2=300, y2=100
        assert_eq!(boxes[0], BoundingBox { x: 100, y: 25, width: 200, height: 75 });
        // x1=40.0.., y1=20.0.., width=80.0.. truncated toward zero
        assert!(boxes[1].x == 40 || boxes[1].x == 39);
        assert!(boxes[1].width >= 79 && boxes[1].width <= 80);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let dets = [det(0.5, 0.1, 0.1, 0.2, 0.2)];
        assert_eq!(filter_detections(&dets, 0.5, 100, 100).len(), 1);
        assert!(filter_detections(&dets, 0.51, 100, 100).is_empty());
    }

    #[test]
    fn test_rejects_degenerate_boxes() {
        let dets = [
            det(0.99, 0.5, 0.5, 0.5, 0.8), // zero width
            det(0.99, 0.5, 0.5, 0.8, 0.5), // zero height
            det(0.99, 0.6, 0.6, 0.4, 0.8), // inverted x
            det(0.99, 0.2, 0.6, 0.4, 0.4), // inverted y
        ];
        assert!(filter_detections(&dets, 0.0, 100, 100).is_empty());
    }

    #[test]
    fn test_rejects_first_corner_outside_image() {
        let on_edge = [det(1.0, 0.1, 1.0, 0.2, 1.0)];
        assert!(filter_detections(&on_edge, 0.0, 100, 100).is_empty());

        let negative_x = [det(1.0, -0.01, 0.1, 0.2, 0.2)];
        assert!(filter_detections(&negative_x, 0.0, 100, 100).is_empty());
        let negative_y = [det(1.0, 0.1, -0.01, 0.2, 0.2)];
        assert!(filter_detections(&negative_y, 0.0, 100, 100).is_empty());
    }

    #[test]
    fn test_bounds_second_corner_is_inclusive() {
        let dets = [det(1.0, 0.5, 0.5, 1.0, 1.0)];
        let boxes = filter_detections(&dets, 0.0, 100, 100);
        assert_eq!(boxes, vec![BoundingBox { x: 50, y: 50, width: 50, height: 50 }]);

        let past_edge = [det(1.0, 0.5, 0.5, 1.01, 1.0)];
        assert!(filter_detections(&past_edge, 0.0, 100, 100).is_empty());
        let past_bottom = [det(1.0, 0.5, 0.5, 1.0, 1.2)];
        assert!(filter_detections(&past_bottom, 0.0, 100, 100).is_empty());
    }

    #[test]
    fn test_out_of_bounds_never_passes_regardless_of_confidence() {
        let bad = [
            det(1.0, -0.2, 0.1, 0.3, 0.3),
            det(1.0, 0.1, -0.2, 0.3, 0.3),
            det(1.0, 0.1, 0.1, 1.5, 0.3),
            det(1.0, 0.1, 0.1, 0.3, 1.5),
            det(1.0, 0.3, 0.3, 0.3, 0.3),
        ];
        for t in [0.0, 0.5, 0.99, 1.0] {
            assert!(filter_detections(&bad, t, 480, 640).is_empty(), "threshold {t}");
        }
    }

    #[test]
    fn test_preserves_input_order() {
        let dets = [
            det(0.6, 0.7, 0.7, 0.8, 0.8),
            det(0.95, 0.1, 0.1, 0.2, 0.2),
            det(0.8, 0.4, 0.4, 0.5, 0.5),
        ];
        let boxes = filter_detections(&dets, 0.5, 100, 100);
        let xs: Vec<i32> = boxes.iter().map(|b| b.x).collect();
        assert_eq!(xs, vec![70, 10, 40]);
    }

    #[test]
    fn test_threshold_monotonicity() {
        let dets: Vec<RawDetection> = (0..20)
            .map(|i| {
                let f = i as f32 / 20.0;
                det(f, f * 0.5, 0.1, f * 0.5 + 0.1, 0.3)
            })
            .collect();

        let thresholds = [0.0, 0.1, 0.25, 0.5, 0.75, 0.9, 1.0];
        for pair in thresholds.windows(2) {
            let low = filter_detections(&dets, pair[0], 240, 320);
            let high = filter_detections(&dets, pair[1], 240, 320);
            assert!(
                high.iter().all(|b| low.contains(b)),
                "boxes at {} must be a subset of boxes at {}",
                pair[1],
                pair[0]
            );
            assert!(high.len() <= low.len());
        }
    }

    #[test]
    fn test_does_not_mutate_input() {
        let dets = vec![det(0.9, 0.1, 0.1, 0.2, 0.2), det(0.1, 0.1, 0.1, 0.2, 0.2)];
        let before = dets.clone();
        let _ = filter_detections(&dets, 0.5, 100, 100);
        assert_eq!(dets, before);
    }

    #[test]
    fn test_nan_confidence_is_dropped() {
        let dets = [det(f32::NAN, 0.1, 0.1, 0.2, 0.2)];
        assert!(filter_detections(&dets, 0.0, 100, 100).is_empty());
    }
}
