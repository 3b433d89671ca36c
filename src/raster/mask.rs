//! Rasterization of annotation ROIs into a binary mask.

use image::{GrayImage, Luma};

use crate::constants::MASK_FOREGROUND;
use crate::data::RegionRequest;
use crate::geometry::{AffineTransform, Point};
use crate::model::Roi;

/// Transform from image-plane coordinates into the local raster of `request`.
///
/// Points are shifted by the region origin, then scaled by `1 / downsample`.
pub fn forward_transform(request: &RegionRequest) -> AffineTransform {
    let inv_d = 1.0 / request.downsample;
    AffineTransform::translation(-f64::from(request.x), -f64::from(request.y))
        .then(&AffineTransform::scale(inv_d, inv_d))
}

/// Fill every area ROI into a `width × height` mask.
///
/// ROIs are mapped through `forward` first. Pixels whose centre falls inside
/// a shape (even-odd rule) are set to 255, everything else stays 0. Points
/// and polylines enclose nothing and are ignored.
pub fn rasterize_mask(
    rois: &[Roi],
    forward: &AffineTransform,
    width: u32,
    height: u32,
    ellipse_segments: usize,
) -> GrayImage {
    let mut mask = GrayImage::new(width, height);
    for roi in rois {
        let local = roi.transform(forward, ellipse_segments);
        match local.outline(ellipse_segments) {
            Some(outline) => fill_polygon(&mut mask, &outline),
            None => log::debug!("Skipping {} ROI with no area", roi.kind_name()),
        }
    }
    mask
}

/// Number of non-zero pixels.
pub fn count_foreground(mask: &GrayImage) -> u64 {
    mask.as_raw().iter().filter(|&&v| v != 0).count() as u64
}

/// Scanline fill of a closed polygon, sampling pixel centres.
fn fill_polygon(mask: &mut GrayImage, vertices: &[Point]) {
    let (width, height) = mask.dimensions();
    if vertices.len() < 3 || width == 0 || height == 0 {
        return;
    }

    let min_y = vertices.iter().map(|p| p.y).fold(f64::INFINITY, f64::min);
    let max_y = vertices.iter().map(|p| p.y).fold(f64::NEG_INFINITY, f64::max);
    if !min_y.is_finite() || !max_y.is_finite() {
        return;
    }
    let row_start = (min_y - 0.5).ceil().max(0.0) as u32;
    let row_end = ((max_y - 0.5).floor() + 1.0).clamp(0.0, f64::from(height)) as u32;

    let mut crossings: Vec<f64> = Vec::with_capacity(vertices.len());
    for row in row_start..row_end {
        let yc = f64::from(row) + 0.5;
        crossings.clear();

        let mut j = vertices.len() - 1;
        for i in 0..vertices.len() {
            let (a, b) = (vertices[i], vertices[j]);
            if (a.y > yc) != (b.y > yc) {
                crossings.push(a.x + (yc - a.y) * (b.x - a.x) / (b.y - a.y));
            }
            j = i;
        }
        crossings.sort_by(f64::total_cmp);

        for span in crossings.chunks_exact(2) {
            // Pixel i is inside when i + 0.5 lies in [span[0], span[1])
            let start = (span[0] - 0.5).ceil().max(0.0);
            let end = (span[1] - 0.5).ceil().min(f64::from(width));
            if end <= start {
                continue;
            }
            for col in start as u32..end as u32 {
                mask.put_pixel(col, row, Luma([MASK_FOREGROUND]));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(x: u32, y: u32, width: u32, height: u32, downsample: f64) -> RegionRequest {
        RegionRequest {
            downsample,
            x,
            y,
            width,
            height,
        }
    }

    #[test]
    fn test_forward_transform_maps_origin() {
        let req = request(100, 200, 80, 80, 4.0);
        let t = forward_transform(&req);
        let p = t.apply(Point::new(100.0, 200.0));
        assert!(p.x.abs() < 1e-12 && p.y.abs() < 1e-12);
        let p = t.apply(Point::new(180.0, 240.0));
        assert!((p.x - 20.0).abs() < 1e-12 && (p.y - 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_forward_roundtrip() {
        let t = forward_transform(&request(1234, 5678, 400, 400, 8.0));
        let inv = t.try_inverse().unwrap();
        for &(x, y) in &[(1234.0, 5678.0), (1300.25, 5700.5), (0.0, 0.0), (99999.0, 12.0)] {
            let p = Point::new(x, y);
            let back = inv.apply(t.apply(p));
            assert!((back.x - p.x).abs() < 1e-9 && (back.y - p.y).abs() < 1e-9);
        }
    }

    #[test]
    fn test_rasterize_square() {
        let roi = Roi::rectangle(2.0, 3.0, 4.0, 5.0);
        let mask = rasterize_mask(&[roi], &AffineTransform::identity(), 10, 10, 32);
        assert_eq!(count_foreground(&mask), 20);
        assert_eq!(mask.get_pixel(2, 3)[0], 255);
        assert_eq!(mask.get_pixel(5, 7)[0], 255);
        assert_eq!(mask.get_pixel(6, 7)[0], 0);
        assert_eq!(mask.get_pixel(2, 8)[0], 0);
    }

    #[test]
    fn test_rasterize_with_forward_offset() {
        let req = request(100, 100, 40, 40, 2.0);
        let forward = forward_transform(&req);
        let roi = Roi::rectangle(110.0, 110.0, 10.0, 10.0);
        let mask = rasterize_mask(&[roi], &forward, 20, 20, 32);
        // (110..120) maps to local (5..10)
        assert_eq!(count_foreground(&mask), 25);
        assert_eq!(mask.get_pixel(5, 5)[0], 255);
        assert_eq!(mask.get_pixel(4, 5)[0], 0);
    }

    #[test]
    fn test_rasterize_clips_to_raster() {
        let roi = Roi::rectangle(-5.0, -5.0, 10.0, 10.0);
        let mask = rasterize_mask(&[roi], &AffineTransform::identity(), 8, 8, 32);
        assert_eq!(count_foreground(&mask), 25);
    }

    #[test]
    fn test_rasterize_even_odd_self_overlap() {
        // A polygon tracing the same square twice cancels out under even-odd
        let twice = Roi::polygon([
            (1.0, 1.0),
            (5.0, 1.0),
            (5.0, 5.0),
            (1.0, 5.0),
            (1.0, 1.0),
            (5.0, 1.0),
            (5.0, 5.0),
            (1.0, 5.0),
        ]);
        let mask = rasterize_mask(&[twice], &AffineTransform::identity(), 8, 8, 32);
        assert_eq!(count_foreground(&mask), 0);
    }

    #[test]
    fn test_rasterize_ignores_lines_and_points() {
        let rois = vec![
            Roi::Point { x: 2.0, y: 2.0 },
            Roi::Polyline {
                vertices: vec![Point::new(0.0, 0.0), Point::new(7.0, 7.0)],
            },
        ];
        let mask = rasterize_mask(&rois, &AffineTransform::identity(), 8, 8, 32);
        assert_eq!(count_foreground(&mask), 0);
    }

    #[test]
    fn test_rasterize_is_idempotent() {
        let rois = vec![
            Roi::ellipse(3.5, 4.25, 30.0, 22.0),
            Roi::polygon([(20.0, 5.0), (38.0, 12.0), (30.0, 35.0), (12.0, 30.0)]),
        ];
        let forward = AffineTransform::scale(0.9, 0.9).then(&AffineTransform::translation(1.5, -0.5));
        let a = rasterize_mask(&rois, &forward, 40, 40, 64);
        let b = rasterize_mask(&rois, &forward, 40, 40, 64);
        assert_eq!(a.as_raw(), b.as_raw());
        assert!(count_foreground(&a) > 0);
    }
}
