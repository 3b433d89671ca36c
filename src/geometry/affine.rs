//! 2D affine transforms.
//!
//! A transform is stored as the top two rows of a 3×3 homogeneous matrix:
//!
//! ```text
//! | m00 m01 m02 |   | x |
//! | m10 m11 m12 | * | y |
//! |  0   0   1  |   | 1 |
//! ```

use serde::{Deserialize, Serialize};

use super::Point;
use crate::constants::SINGULAR_EPSILON;
use crate::error::AlignError;

/// A 2×3 affine transform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AffineTransform {
    pub m00: f64,
    pub m01: f64,
    pub m02: f64,
    pub m10: f64,
    pub m11: f64,
    pub m12: f64,
}

impl AffineTransform {
    /// The identity transform.
    pub fn identity() -> Self {
        Self::from_matrix([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]])
    }

    /// Build from the top two rows of a homogeneous matrix.
    pub fn from_matrix(m: [[f64; 3]; 2]) -> Self {
        Self {
            m00: m[0][0],
            m01: m[0][1],
            m02: m[0][2],
            m10: m[1][0],
            m11: m[1][1],
            m12: m[1][2],
        }
    }

    pub fn to_matrix(&self) -> [[f64; 3]; 2] {
        [[self.m00, self.m01, self.m02], [self.m10, self.m11, self.m12]]
    }

    pub fn scale(sx: f64, sy: f64) -> Self {
        Self::from_matrix([[sx, 0.0, 0.0], [0.0, sy, 0.0]])
    }

    pub fn translation(tx: f64, ty: f64) -> Self {
        Self::from_matrix([[1.0, 0.0, tx], [0.0, 1.0, ty]])
    }

    /// Rotation by `theta` radians about the origin followed by a translation.
    pub fn euclidean(theta: f64, tx: f64, ty: f64) -> Self {
        let (s, c) = theta.sin_cos();
        Self::from_matrix([[c, -s, tx], [s, c, ty]])
    }

    /// Compose so that `self` is applied first, then `next`.
    pub fn then(&self, next: &AffineTransform) -> AffineTransform {
        Self {
            m00: next.m00 * self.m00 + next.m01 * self.m10,
            m01: next.m00 * self.m01 + next.m01 * self.m11,
            m02: next.m00 * self.m02 + next.m01 * self.m12 + next.m02,
            m10: next.m10 * self.m00 + next.m11 * self.m10,
            m11: next.m10 * self.m01 + next.m11 * self.m11,
            m12: next.m10 * self.m02 + next.m11 * self.m12 + next.m12,
        }
    }

    /// Map a point through the transform.
    pub fn apply(&self, p: Point) -> Point {
        Point::new(
            self.m00 * p.x + self.m01 * p.y + self.m02,
            self.m10 * p.x + self.m11 * p.y + self.m12,
        )
    }

    pub fn determinant(&self) -> f64 {
        self.m00 * self.m11 - self.m01 * self.m10
    }

    /// Invert the transform.
    ///
    /// Fails with [`AlignError::NonInvertible`] when the linear part is
    /// singular or any coefficient is not finite.
    pub fn try_inverse(&self) -> Result<AffineTransform, AlignError> {
        let det = self.determinant();
        let finite = self.to_matrix().iter().flatten().all(|v| v.is_finite());
        if !finite || !det.is_finite() || det.abs() < SINGULAR_EPSILON {
            return Err(AlignError::NonInvertible { determinant: det });
        }

        let inv00 = self.m11 / det;
        let inv01 = -self.m01 / det;
        let inv10 = -self.m10 / det;
        let inv11 = self.m00 / det;
        Ok(Self {
            m00: inv00,
            m01: inv01,
            m02: -(inv00 * self.m02 + inv01 * self.m12),
            m10: inv10,
            m11: inv11,
            m12: -(inv10 * self.m02 + inv11 * self.m12),
        })
    }

    /// True when the transform has no rotation or shear component.
    pub fn is_axis_aligned(&self) -> bool {
        self.m01 == 0.0 && self.m10 == 0.0
    }

    /// Rotation angle in radians, assuming a rotation-only linear part.
    pub fn rotation(&self) -> f64 {
        self.m10.atan2(self.m00)
    }

    pub fn translation_part(&self) -> (f64, f64) {
        (self.m02, self.m12)
    }
}

impl Default for AffineTransform {
    fn default() -> Self {
        Self::identity()
    }
}
