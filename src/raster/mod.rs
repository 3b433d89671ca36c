//! Raster stages of the pipeline: mask rendering, grayscale reduction and
//! thresholding.

mod gray;
mod mask;
mod threshold;

pub use gray::to_gray8;
pub use mask::{count_foreground, forward_transform, rasterize_mask};
pub use threshold::{Histogram, apply_threshold, binarize_to_count};
