//! Choosing the working resolution and reading the core's region.

use image::DynamicImage;

use crate::data::{ImageReadError, ImageServer, PixelCalibration, RegionRequest};
use crate::error::AlignError;
use crate::geometry::Rect;
use crate::model::Roi;

/// Downsample that brings the native pixel size up to `target_microns`.
///
/// Images already coarser than the target are read at full resolution, as
/// are images without a known pixel size. The result is always finite and at
/// least 1.
pub fn choose_downsample(calibration: &PixelCalibration, target_microns: f64) -> f64 {
    match calibration.averaged_pixel_size_microns() {
        Some(native) if native < target_microns => {
            let d = target_microns / native;
            if d.is_finite() { d } else { 1.0 }
        }
        Some(_) => 1.0,
        None => {
            log::info!("Pixel size unknown, aligning at full resolution");
            1.0
        }
    }
}

impl RegionRequest {
    /// Smallest integer pixel rectangle enclosing `bounds`, clipped to the
    /// image.
    pub fn for_bounds(
        bounds: &Rect,
        downsample: f64,
        image_width: u32,
        image_height: u32,
    ) -> Result<Self, AlignError> {
        if !(downsample >= 1.0 && downsample.is_finite()) {
            return Err(AlignError::empty_region(format!(
                "invalid downsample {}",
                downsample
            )));
        }
        let x0 = bounds.x.floor().max(0.0);
        let y0 = bounds.y.floor().max(0.0);
        let x1 = bounds.max_x().ceil().min(f64::from(image_width));
        let y1 = bounds.max_y().ceil().min(f64::from(image_height));
        if !(x1 > x0 && y1 > y0) {
            return Err(AlignError::empty_region(format!(
                "bounds ({:.1}, {:.1}, {:.1}x{:.1}) do not overlap the {}x{} image",
                bounds.x, bounds.y, bounds.width, bounds.height, image_width, image_height
            )));
        }
        Ok(Self {
            downsample,
            x: x0 as u32,
            y: y0 as u32,
            width: (x1 - x0) as u32,
            height: (y1 - y0) as u32,
        })
    }
}

/// Pixels of the container region together with the request that produced
/// them.
#[derive(Debug, Clone)]
pub struct ExtractedRegion {
    pub request: RegionRequest,
    pub image: DynamicImage,
}

/// Work out the region request for `parent_roi` at the configured resolution.
pub fn plan_region(
    server: &dyn ImageServer,
    parent_roi: &Roi,
    target_microns: f64,
) -> Result<RegionRequest, AlignError> {
    let bounds = parent_roi
        .bounds()
        .ok_or_else(|| AlignError::empty_region("container ROI has no vertices"))?;
    let downsample = choose_downsample(&server.calibration(), target_microns);
    let (width, height) = server.dimensions();
    RegionRequest::for_bounds(&bounds, downsample, width, height)
}

/// Read the planned region from the server.
///
/// A failed read is returned as is and never retried. The raster must have
/// the size promised by [`RegionRequest::output_size`].
pub fn extract_region(
    server: &dyn ImageServer,
    request: RegionRequest,
) -> Result<ExtractedRegion, AlignError> {
    let image = server
        .read_region(&request)
        .map_err(|e| e.with_server(server.id()))?;
    let expected = request.output_size();
    if (image.width(), image.height()) != expected {
        return Err(AlignError::ImageRead(
            ImageReadError::new(format!(
                "server returned {}x{} for a {}x{} request",
                image.width(),
                image.height(),
                expected.0,
                expected.1
            ))
            .with_server(server.id()),
        ));
    }
    Ok(ExtractedRegion { request, image })
}
