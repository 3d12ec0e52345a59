use crate::error::Result;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;

/// Canonical maximum width of derived images.
pub const CANONICAL_WIDTH: u32 = 800;

/// Output size for an image of `width` x `height`.
///
/// Wider images are scaled down to `max_width` with the height derived from the aspect
/// ratio (rounded, never below 1). Images already within bounds keep their size.
pub fn target_dimensions(width: u32, height: u32, max_width: u32) -> (u32, u32) {
    if width <= max_width {
        return (width, height);
    }
    let scaled = (height as u64 * max_width as u64 + width as u64 / 2) / width as u64;
    (max_width, scaled.max(1) as u32)
}

/// Decodes `bytes`, resizes to the canonical width and re-encodes as JPEG.
///
/// CPU bound; callers on the async runtime should run it via `spawn_blocking`.
pub fn render_derived(bytes: &[u8], max_width: u32, jpeg_quality: u8) -> Result<Vec<u8>> {
    let decoded = image::load_from_memory(bytes)?;
    let (width, height) = target_dimensions(decoded.width(), decoded.height(), max_width);

    let resized = if (width, height) == (decoded.width(), decoded.height()) {
        decoded
    } else {
        decoded.resize_exact(width, height, FilterType::Lanczos3)
    };

    // JPEG has no alpha channel.
    let rgb = resized.to_rgb8();
    let mut encoded = Vec::new();
    JpegEncoder::new_with_quality(&mut encoded, jpeg_quality).encode_image(&rgb)?;
    Ok(encoded)
}
