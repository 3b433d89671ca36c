//! Reduction of arbitrary rasters to 8-bit grayscale sample buffers.

use image::{DynamicImage, GrayImage};

/// Convert a raster to one byte per pixel, row-major.
///
/// 8-bit single-channel input is copied unchanged. Everything else goes
/// through the `image` crate's luminance conversion (Rec. 709 weights,
/// 16-bit and float samples rescaled to 0-255).
pub fn to_gray8(image: &DynamicImage) -> GrayImage {
    match image {
        DynamicImage::ImageLuma8(gray) => gray.clone(),
        other => other.to_luma8(),
    }
}
