//! Upload decoding and size normalization.

use image::imageops::{self, FilterType};
use image::RgbImage;
use thiserror::Error;

/// Decoded three-channel 8-bit image.
pub type Image = RgbImage;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("malformed image: {0}")]
    Malformed(#[from] image::ImageError),
    #[error("image has zero width or height")]
    Empty,
}

/// Decode an uploaded JPEG/PNG byte stream into an RGB image.
pub fn decode_upload(bytes: &[u8]) -> Result<Image, DecodeError> {
    let decoded = image::load_from_memory(bytes)?.to_rgb8();
    if decoded.width() == 0 || decoded.height() == 0 {
        return Err(DecodeError::Empty);
    }
    Ok(decoded)
}

/// Shrink `image` so its longer side is at most `max_dim`.
///
/// Only applies when both sides exceed `max_dim`; the aspect ratio is kept.
pub fn downscale_to_fit(image: Image, max_dim: u32) -> Image {
    let (width, height) = image.dimensions();
    if max_dim == 0 || width <= max_dim || height <= max_dim {
        return image;
    }

    let scale = max_dim as f32 / width.max(height) as f32;
    let new_w = ((width as f32 * scale).round() as u32).clamp(1, max_dim);
    let new_h = ((height as f32 * scale).round() as u32).clamp(1, max_dim);

    tracing::debug!(width, height, new_w, new_h, "downscaling upload");
    imageops::resize(&image, new_w, new_h, FilterType::Triangle)
}

/// Decode then downscale; the usual loader for a fresh upload.
pub fn load_upload(bytes: &[u8], max_dim: u32) -> Result<Image, DecodeError> {
    decode_upload(bytes).map(|img| downscale_to_fit(img, max_dim))
}
