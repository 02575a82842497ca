//! Query and catalog image handling.
//!
//! Validates that bytes represent a usable image (recognized format, not an
//! HTML error page, decodes cleanly), downscales large images before
//! embedding, and materializes images as temporary JPEG files for the
//! encoder, which reads from paths.

use anyhow::{bail, Context, Result};
use image::{DynamicImage, GenericImageView};
use tempfile::NamedTempFile;

/// Images larger than this on either side are scaled down before encoding.
pub const MAX_ENCODE_DIMENSION: u32 = 1024;

/// JPEG quality for materialized temp files.
const JPEG_QUALITY: u8 = 85;

/// Decode image bytes, rejecting anything that is not a recognizable image.
pub fn decode_image(data: &[u8]) -> Result<DynamicImage> {
    if data.is_empty() {
        bail!("empty image payload");
    }

    if is_html_content(data) {
        bail!("payload looks like HTML, not an image");
    }

    match infer::get(data) {
        Some(kind) if kind.matcher_type() == infer::MatcherType::Image => {}
        _ => bail!("unrecognized image format"),
    }

    image::load_from_memory(data).context("failed to decode image")
}

/// Scale an image down to fit within [`MAX_ENCODE_DIMENSION`], preserving
/// aspect ratio. Images already within bounds are returned unchanged.
pub fn prepare_for_encoding(img: DynamicImage) -> DynamicImage {
    let (w, h) = img.dimensions();
    if w <= MAX_ENCODE_DIMENSION && h <= MAX_ENCODE_DIMENSION {
        return img;
    }

    let scale = (MAX_ENCODE_DIMENSION as f64) / (w.max(h) as f64);
    let new_w = ((w as f64) * scale).round().max(1.0) as u32;
    let new_h = ((h as f64) * scale).round().max(1.0) as u32;

    img.resize(new_w, new_h, image::imageops::FilterType::Lanczos3)
}

/// Write an image to a temporary JPEG file. The file is deleted when the
/// returned handle drops, so it must outlive the encode call.
pub fn write_temp_jpeg(img: &DynamicImage) -> Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("lookalike-img-")
        .suffix(".jpg")
        .tempfile()
        .context("failed to create temp image file")?;

    // JPEG has no alpha channel
    let rgb = img.to_rgb8();
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut file, JPEG_QUALITY);
    rgb.write_with_encoder(encoder)
        .context("failed to encode temp JPEG")?;

    Ok(file)
}

/// Write an image as a JPEG at the given path.
pub fn save_jpeg(path: &std::path::Path, img: &DynamicImage) -> Result<()> {
    let mut file = std::fs::File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;

    let rgb = img.to_rgb8();
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut file, JPEG_QUALITY);
    rgb.write_with_encoder(encoder)
        .with_context(|| format!("failed to write {}", path.display()))?;

    Ok(())
}

/// Checks if bytes look like HTML content (case-insensitive check of first 50 bytes).
fn is_html_content(bytes: &[u8]) -> bool {
    let check_len = bytes.len().min(50);
    let prefix_lower = bytes[0..check_len].to_ascii_lowercase();

    prefix_lower.starts_with(b"<!doctype") || prefix_lower.starts_with(b"<html")
}
