//! Overlay drawing for analysis results.

use std::{fs, path::Path};

use anyhow::{Context, Result};
use facemark_core::{Analysis, BoundingBox, Image};
use image::Rgb;
use imageproc::{
    drawing::{draw_filled_circle_mut, draw_hollow_rect_mut},
    rect::Rect,
};

const BOX_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const LANDMARK_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// Draw boxes and landmarks from `analysis` onto a copy of `image`.
pub fn draw_analysis(image: &Image, analysis: &Analysis) -> Image {
    let mut canvas = image.clone();
    let thickness = analysis.line_thickness.max(1);

    for bbox in &analysis.boxes {
        for inset in 0..thickness {
            if let Some(rect) = inset_rect(bbox, inset as i32) {
                draw_hollow_rect_mut(&mut canvas, rect, BOX_COLOR);
            }
        }
    }

    if let Some(sets) = &analysis.landmarks {
        for point in sets.iter().flat_map(|set| &set.points) {
            let center = (point.x.round() as i32, point.y.round() as i32);
            draw_filled_circle_mut(&mut canvas, center, thickness as i32, LANDMARK_COLOR);
        }
    }

    canvas
}

/// Draw and save; the format follows the output extension.
pub fn save_annotated(image: &Image, analysis: &Analysis, output_path: &Path) -> Result<()> {
    let canvas = draw_analysis(image, analysis);

    if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    canvas
        .save(output_path)
        .with_context(|| format!("failed to save annotated image {}", output_path.display()))
}

/// `bbox` shrunk by `inset` pixels on every side, or `None` once it collapses.
fn inset_rect(bbox: &BoundingBox, inset: i32) -> Option<Rect> {
    let width = bbox.width - 2 * inset;
    let height = bbox.height - 2 * inset;
    if width <= 0 || height <= 0 {
        return None;
    }
    Some(Rect::at(bbox.x + inset, bbox.y + inset).of_size(width as u32, height as u32))
}
