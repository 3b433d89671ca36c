//! Global constants for the alignment pipeline

/// Working resolution for alignment, in microns per pixel
pub const DEFAULT_TARGET_PIXEL_SIZE_MICRONS: f64 = 4.0;

/// Iteration cap for the ECC solver
pub const DEFAULT_ECC_MAX_ITERATIONS: usize = 50;

/// ECC stops once the correlation improves by less than this
pub const DEFAULT_ECC_EPSILON: f64 = 1e-3;

/// Gaussian kernel size applied before ECC (1 disables smoothing)
pub const DEFAULT_ECC_GAUSS_FILT_SIZE: usize = 5;

/// Final correlation below this is reported as a weak registration
pub const DEFAULT_MIN_CORRELATION: f64 = 0.5;

/// Number of segments used when an ellipse is flattened to a polygon
pub const DEFAULT_ELLIPSE_SEGMENTS: usize = 64;

/// Foreground value written into masks and binarized images
pub const MASK_FOREGROUND: u8 = 255;

/// Number of histogram bins for 8-bit samples
pub const HISTOGRAM_BINS: usize = 256;

/// Fewer valid overlapping pixels than this and ECC gives up
pub const ECC_MIN_VALID_PIXELS: usize = 16;

/// Determinants below this are treated as singular
pub const SINGULAR_EPSILON: f64 = 1e-12;

/// Change events kept by a hierarchy before the oldest are dropped
pub const MAX_PENDING_EVENTS: usize = 1024;
