//! Trait-based access to slide pixels.
//!
//! The alignment pipeline never opens files itself. It asks an
//! [`ImageServer`] for the pixel calibration and for rectangular regions at a
//! chosen downsample, so any image backend can be plugged in by implementing
//! the trait.

use image::DynamicImage;
use image::imageops::FilterType;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Physical pixel size of an image, when known.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PixelCalibration {
    /// Pixel width in microns
    #[serde(default)]
    pub pixel_width_microns: Option<f64>,
    /// Pixel height in microns
    #[serde(default)]
    pub pixel_height_microns: Option<f64>,
}

impl PixelCalibration {
    /// Calibration with no physical units.
    pub fn unknown() -> Self {
        Self::default()
    }

    /// Square pixels of the given size.
    pub fn microns(size: f64) -> Self {
        Self {
            pixel_width_microns: Some(size),
            pixel_height_microns: Some(size),
        }
    }

    /// Mean of width and height, if both are known and positive.
    pub fn averaged_pixel_size_microns(&self) -> Option<f64> {
        match (self.pixel_width_microns, self.pixel_height_microns) {
            (Some(w), Some(h)) if w > 0.0 && h > 0.0 && w.is_finite() && h.is_finite() => {
                Some((w + h) / 2.0)
            }
            _ => None,
        }
    }
}

/// A rectangular full-resolution region read at a downsample factor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionRequest {
    /// Downsample factor, at least 1
    pub downsample: f64,
    /// Left edge in full-resolution pixels
    pub x: u32,
    /// Top edge in full-resolution pixels
    pub y: u32,
    /// Width in full-resolution pixels
    pub width: u32,
    /// Height in full-resolution pixels
    pub height: u32,
}

impl RegionRequest {
    /// Pixel size of the raster returned for this request.
    pub fn output_size(&self) -> (u32, u32) {
        let w = (f64::from(self.width) / self.downsample).ceil().max(1.0) as u32;
        let h = (f64::from(self.height) / self.downsample).ceil().max(1.0) as u32;
        (w, h)
    }
}

/// Error type for image reads.
#[derive(Debug, Clone)]
pub struct ImageReadError {
    /// Human-readable error message.
    pub message: String,
    /// The server that produced this error (if known).
    pub server_id: Option<&'static str>,
}

impl ImageReadError {
    /// Create a new read error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            server_id: None,
        }
    }

    /// Create an error with server context.
    pub fn with_server(mut self, server_id: &'static str) -> Self {
        self.server_id = Some(server_id);
        self
    }
}

impl std::fmt::Display for ImageReadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(server) = self.server_id {
            write!(f, "[{}] {}", server, self.message)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for ImageReadError {}

impl From<image::ImageError> for ImageReadError {
    fn from(e: image::ImageError) -> Self {
        Self::new(format!("Failed to decode image: {}", e))
    }
}

/// Source of slide pixels.
pub trait ImageServer: Send + Sync {
    /// Unique identifier for this kind of server (e.g. "memory").
    fn id(&self) -> &'static str;

    /// Physical pixel size, or unknown.
    fn calibration(&self) -> PixelCalibration;

    /// Full-resolution width and height in pixels.
    fn dimensions(&self) -> (u32, u32);

    /// Read a region scaled down by `request.downsample`.
    ///
    /// The returned raster must have the size given by
    /// [`RegionRequest::output_size`].
    fn read_region(&self, request: &RegionRequest) -> Result<DynamicImage, ImageReadError>;
}

/// An [`ImageServer`] over a decoded image held in memory.
pub struct InMemoryImageServer {
    image: DynamicImage,
    calibration: PixelCalibration,
}

impl InMemoryImageServer {
    pub fn new(image: DynamicImage, calibration: PixelCalibration) -> Self {
        Self { image, calibration }
    }

    /// Decode an image file (any format the `image` crate supports).
    pub fn open(path: &Path, calibration: PixelCalibration) -> Result<Self, ImageReadError> {
        let image = image::open(path).map_err(|e| {
            ImageReadError::new(format!("Failed to open {:?}: {}", path, e)).with_server("memory")
        })?;
        log::debug!(
            "Opened {:?}: {}x{} ({:?})",
            path,
            image.width(),
            image.height(),
            image.color()
        );
        Ok(Self::new(image, calibration))
    }
}

impl ImageServer for InMemoryImageServer {
    fn id(&self) -> &'static str {
        "memory"
    }

    fn calibration(&self) -> PixelCalibration {
        self.calibration
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.image.width(), self.image.height())
    }

    fn read_region(&self, request: &RegionRequest) -> Result<DynamicImage, ImageReadError> {
        let (img_w, img_h) = self.dimensions();
        let fits = request.width > 0
            && request.height > 0
            && u64::from(request.x) + u64::from(request.width) <= u64::from(img_w)
            && u64::from(request.y) + u64::from(request.height) <= u64::from(img_h);
        if !fits {
            return Err(ImageReadError::new(format!(
                "Region {}x{} at ({}, {}) is outside the {}x{} image",
                request.width, request.height, request.x, request.y, img_w, img_h
            ))
            .with_server(self.id()));
        }
        if !(request.downsample >= 1.0 && request.downsample.is_finite()) {
            return Err(
                ImageReadError::new(format!("Invalid downsample {}", request.downsample))
                    .with_server(self.id()),
            );
        }

        let crop = self
            .image
            .crop_imm(request.x, request.y, request.width, request.height);
        let (out_w, out_h) = request.output_size();
        if (out_w, out_h) == (request.width, request.height) {
            return Ok(crop);
        }

        log::trace!(
            "Resizing region {}x{} -> {}x{} (downsample {:.3})",
            request.width,
            request.height,
            out_w,
            out_h,
            request.downsample
        );
        Ok(crop.resize_exact(out_w, out_h, FilterType::Triangle))
    }
}
