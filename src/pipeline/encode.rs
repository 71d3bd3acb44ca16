//! Source image preparation: raw bytes → base64 [`SourceImage`].
//!
//! Vision APIs accept images as base64 payloads inside the JSON request
//! body. Photos are forwarded untouched when they are already small enough;
//! oversized photos are downscaled and re-encoded as PNG, which is lossless
//! and keeps thin strokes, exponents and subscripts crisp.

use crate::error::ExtractionError;
use crate::model::SourceImage;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use tracing::debug;

/// Prepare submitted bytes for the extraction backend.
///
/// # Errors
/// [`ExtractionError::InvalidImage`] when the bytes are not a PNG/JPEG or
/// cannot be decoded.
pub fn prepare_source(bytes: &[u8], max_pixels: u32) -> Result<SourceImage, ExtractionError> {
    let format = sniff_format(bytes)?;

    let reader = image::ImageReader::with_format(Cursor::new(bytes), format);
    let (width, height) = reader
        .into_dimensions()
        .map_err(|e| ExtractionError::InvalidImage {
            detail: e.to_string(),
        })?;

    if width.max(height) <= max_pixels {
        debug!("Source image {}x{} forwarded as-is", width, height);
        return Ok(SourceImage {
            mime_type: format.to_mime_type().to_string(),
            data: STANDARD.encode(bytes),
        });
    }

    let img = image::load_from_memory_with_format(bytes, format).map_err(|e| {
        ExtractionError::InvalidImage {
            detail: e.to_string(),
        }
    })?;
    let scaled = img.thumbnail(max_pixels, max_pixels);
    debug!(
        "Source image {}x{} downscaled to {}x{}",
        width,
        height,
        scaled.width(),
        scaled.height()
    );
    encode_png(&scaled)
}

/// Identify PNG or JPEG from the leading bytes.
pub fn sniff_format(bytes: &[u8]) -> Result<ImageFormat, ExtractionError> {
    match image::guess_format(bytes) {
        Ok(f @ (ImageFormat::Png | ImageFormat::Jpeg)) => Ok(f),
        Ok(other) => Err(ExtractionError::InvalidImage {
            detail: format!("unsupported format {other:?}; use PNG or JPEG"),
        }),
        Err(_) => Err(ExtractionError::InvalidImage {
            detail: "not a recognisable image".to_string(),
        }),
    }
}

fn encode_png(img: &DynamicImage) -> Result<SourceImage, ExtractionError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(|e| ExtractionError::InvalidImage {
            detail: format!("re-encoding failed: {e}"),
        })?;
    Ok(SourceImage {
        mime_type: "image/png".to_string(),
        data: STANDARD.encode(&buf),
    })
}
