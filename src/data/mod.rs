//! Pixel sources for the alignment pipeline.
//!
//! This module provides:
//! - `PixelCalibration`: physical pixel size of a slide, when known
//! - `ImageServer`: the trait the pipeline reads regions through
//! - `InMemoryImageServer`: a server over a decoded `image::DynamicImage`
//!
//! ## Adding New Backends
//!
//! ```rust,ignore
//! use tmalign::data::{ImageServer, ImageReadError, PixelCalibration, RegionRequest};
//!
//! pub struct TiledServer { /* ... */ }
//!
//! impl ImageServer for TiledServer {
//!     fn id(&self) -> &'static str { "tiled" }
//!     fn calibration(&self) -> PixelCalibration { /* read metadata */ }
//!     fn dimensions(&self) -> (u32, u32) { /* ... */ }
//!     fn read_region(&self, request: &RegionRequest)
//!         -> Result<image::DynamicImage, ImageReadError> { /* ... */ }
//! }
//! ```

mod image_server;

pub use image_server::{
    ImageReadError, ImageServer, InMemoryImageServer, PixelCalibration, RegionRequest,
};
