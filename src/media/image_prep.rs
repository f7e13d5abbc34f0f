//! Frame normalization for the vision capability.
//!
//! Uploaded photos and sampled video frames arrive in whatever size and
//! format the operator had on hand. Before a vision call every frame is
//! decoded, bounds-checked, scaled down to a payload-friendly size, and
//! re-encoded as base64 JPEG.

use std::io::Cursor;

use base64::{engine::general_purpose::STANDARD, Engine};
use image::{DynamicImage, ImageFormat};
use tracing::debug;

use crate::error::PipelineError;

/// Longest edge allowed in a vision payload; larger frames are downscaled.
pub const MAX_IMAGE_DIMENSION: u32 = 1024;

/// Frames with a shorter side below this are rejected outright.
pub const MIN_IMAGE_DIMENSION: u32 = 200;

/// Normalize one frame into a base64 JPEG string for the vision call.
///
/// # Errors
/// `MediaAnalysis` when the bytes do not decode or the frame is below
/// the minimum dimension.
pub fn prepare_image(image_bytes: &[u8]) -> Result<String, PipelineError> {
    let frame = image::load_from_memory(image_bytes).map_err(|e| {
        PipelineError::MediaAnalysis(format!(
            "Failed to decode media: {}. Supported formats are JPEG, PNG, and WebP.",
            e
        ))
    })?;

    if frame.width().min(frame.height()) < MIN_IMAGE_DIMENSION {
        return Err(PipelineError::MediaAnalysis(format!(
            "Media too small for reliable analysis: {}x{}. Minimum dimension is {}px.",
            frame.width(),
            frame.height(),
            MIN_IMAGE_DIMENSION
        )));
    }

    let frame = match scaled_dimensions(frame.width(), frame.height(), MAX_IMAGE_DIMENSION) {
        Some((w, h)) => {
            debug!(
                "Downscaling frame {}x{} -> {}x{}",
                frame.width(),
                frame.height(),
                w,
                h
            );
            frame.resize(w, h, image::imageops::FilterType::Lanczos3)
        }
        None => frame,
    };

    let mut jpeg = Cursor::new(Vec::new());
    frame
        .write_to(&mut jpeg, ImageFormat::Jpeg)
        .map_err(|e| PipelineError::MediaAnalysis(format!("Failed to encode frame: {}", e)))?;

    Ok(STANDARD.encode(jpeg.get_ref()))
}

/// Target size for a frame that exceeds `max_edge`, preserving aspect
/// ratio. `None` when the frame already fits.
fn scaled_dimensions(width: u32, height: u32, max_edge: u32) -> Option<(u32, u32)> {
    let longest = width.max(height);
    if longest <= max_edge {
        return None;
    }
    let scale = f64::from(max_edge) / f64::from(longest);
    Some((
        (f64::from(width) * scale) as u32,
        (f64::from(height) * scale) as u32,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::new_rgb8(width, height);
        let mut buffer = Cursor::new(Vec::new());
        img.write_to(&mut buffer, ImageFormat::Png).unwrap();
        buffer.into_inner()
    }

    #[test]
    fn test_rejects_frames_below_minimum() {
        let err = prepare_image(&png_bytes(50, 50)).unwrap_err();
        assert!(matches!(err, PipelineError::MediaAnalysis(_)));
        assert!(err.to_string().contains("too small"));

        // 199 on the short side is still too small even if the long side
        // is generous.
        let err = prepare_image(&png_bytes(199, 800)).unwrap_err();
        assert!(err.to_string().contains("too small"));
    }

    #[test]
    fn test_rejects_undecodable_bytes() {
        let err = prepare_image(b"not an image").unwrap_err();
        assert!(err.to_string().contains("Failed to decode"));
    }

    #[test]
    fn test_output_is_base64_jpeg() {
        let encoded = prepare_image(&png_bytes(300, 300)).unwrap();
        let decoded = STANDARD.decode(&encoded).unwrap();
        assert_eq!(&decoded[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_scaled_dimensions() {
        // Small frames pass through untouched.
        assert_eq!(scaled_dimensions(500, 300, 1024), None);
        assert_eq!(scaled_dimensions(1024, 1024, 1024), None);
        // Landscape and portrait both scale against the long edge.
        assert_eq!(scaled_dimensions(2000, 1000, 1024), Some((1024, 512)));
        assert_eq!(scaled_dimensions(1000, 2000, 1024), Some((512, 1024)));
    }
}
