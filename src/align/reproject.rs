//! Mapping annotation geometry through the registration result.
//!
//! The solver works on pixel indices, where pixel `i` is sampled at `i`. The
//! rasterizer places the centre of pixel `i` at `i + 0.5`. `refine` is the
//! solver warp expressed in rasterizer coordinates.

use crate::error::AlignError;
use crate::geometry::AffineTransform;
use crate::model::Roi;

/// Build `refine` from the 2×3 solver matrix.
pub fn refine_from_matrix(matrix: [[f64; 3]; 2]) -> AffineTransform {
    let to_index = AffineTransform::translation(-0.5, -0.5);
    let to_raster = AffineTransform::translation(0.5, 0.5);
    to_index
        .then(&AffineTransform::from_matrix(matrix))
        .then(&to_raster)
}

/// Move one ROI from the image plane through the local raster and back.
pub fn reproject(
    roi: &Roi,
    forward: &AffineTransform,
    refine: &AffineTransform,
    ellipse_segments: usize,
) -> Result<Roi, AlignError> {
    let inverse = forward.try_inverse()?;
    Ok(roi
        .transform(forward, ellipse_segments)
        .transform(refine, ellipse_segments)
        .transform(&inverse, ellipse_segments))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Point;

    fn forward() -> AffineTransform {
        AffineTransform::translation(-100.0, -50.0).then(&AffineTransform::scale(0.25, 0.25))
    }

    fn vertices(roi: &Roi) -> Vec<Point> {
        roi.outline(16).unwrap()
    }

    #[test]
    fn test_identity_refine_leaves_square_unchanged() {
        let square = Roi::polygon([(120.0, 60.0), (180.0, 60.0), (180.0, 120.0), (120.0, 120.0)]);
        let refine = refine_from_matrix(AffineTransform::identity().to_matrix());
        let out = reproject(&square, &forward(), &refine, 16).unwrap();
        for (a, b) in vertices(&square).iter().zip(vertices(&out).iter()) {
            assert!(a.distance_to(b) < 1e-6);
        }
    }

    #[test]
    fn test_rectangle_translation_keeps_kind() {
        let rect = Roi::rectangle(120.0, 60.0, 40.0, 20.0);
        let refine = refine_from_matrix(AffineTransform::translation(2.0, -1.0).to_matrix());
        match reproject(&rect, &forward(), &refine, 16).unwrap() {
            Roi::Rectangle {
                x,
                y,
                width,
                height,
            } => {
                // Local shifts are scaled back up by the downsample
                assert!((x - 128.0).abs() < 1e-9);
                assert!((y - 56.0).abs() < 1e-9);
                assert!((width - 40.0).abs() < 1e-9);
                assert!((height - 20.0).abs() < 1e-9);
            }
            other => panic!("expected rectangle, got {:?}", other),
        }
    }

    #[test]
    fn test_rotation_is_about_pixel_centres() {
        // A solver rotation about index (0, 0) is a rotation about raster (0.5, 0.5)
        let refine = refine_from_matrix(
            AffineTransform::euclidean(std::f64::consts::FRAC_PI_2, 0.0, 0.0).to_matrix(),
        );
        let fixed = refine.apply(Point::new(0.5, 0.5));
        assert!(fixed.distance_to(&Point::new(0.5, 0.5)) < 1e-12);
        let moved = refine.apply(Point::new(1.5, 0.5));
        assert!(moved.distance_to(&Point::new(0.5, 1.5)) < 1e-12);
    }

    #[test]
    fn test_rotated_rectangle_becomes_polygon() {
        let rect = Roi::rectangle(120.0, 60.0, 40.0, 20.0);
        let refine = refine_from_matrix(AffineTransform::euclidean(0.05, 0.0, 0.0).to_matrix());
        let out = reproject(&rect, &forward(), &refine, 16).unwrap();
        assert_eq!(out.kind_name(), "polygon");
    }

    #[test]
    fn test_non_invertible_forward() {
        let singular = AffineTransform::scale(0.0, 1.0);
        let err = reproject(
            &Roi::Point { x: 1.0, y: 1.0 },
            &singular,
            &AffineTransform::identity(),
            16,
        )
        .unwrap_err();
        assert!(matches!(err, AlignError::NonInvertible { .. }));
    }
}
