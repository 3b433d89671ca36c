//! tmalign - TMA core annotation alignment
//!
//! Moves annotations drawn inside tissue microarray cores onto the tissue
//! that is actually visible in the slide, by registering a mask of the
//! annotations against a thresholded low-resolution view of each core.

pub mod align;
pub mod cancel;
pub mod config;
pub mod constants;
pub mod data;
pub mod error;
pub mod format;
pub mod geometry;
pub mod model;
pub mod raster;
pub mod registration;
pub mod synthetic;
pub mod worker;

pub use align::{AlignmentInput, AlignmentOutcome, align_core, align_tma_grid, apply_outcome};
pub use config::AlignConfig;
pub use error::AlignError;
