//! Enhanced Correlation Coefficient registration, Euclidean motion model.
//!
//! Estimates rotation and translation `W` such that `target(W(x))` best
//! matches `template(x)` in the zero-mean normalized cross-correlation sense.
//! Each iteration warps the target (and its gradients) into the template
//! frame, builds the Gauss-Newton system for the three parameters and takes
//! the ECC step. Coordinates are pixel indices with the origin at the centre
//! of the top-left pixel.

use image::GrayImage;
use nalgebra::{Matrix3, Vector3};
use ndarray::Array2;
use thiserror::Error;

use crate::cancel::CancellationToken;
use crate::constants::{
    DEFAULT_ECC_EPSILON, DEFAULT_ECC_GAUSS_FILT_SIZE, DEFAULT_ECC_MAX_ITERATIONS,
    ECC_MIN_VALID_PIXELS,
};
use crate::geometry::AffineTransform;

/// Solver settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EccConfig {
    /// Hard cap on iterations
    pub max_iterations: usize,
    /// Stop once the correlation changes by less than this
    pub epsilon: f64,
    /// Odd Gaussian kernel size applied to both images first (1 = off)
    pub gauss_filt_size: usize,
}

impl Default for EccConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_ECC_MAX_ITERATIONS,
            epsilon: DEFAULT_ECC_EPSILON,
            gauss_filt_size: DEFAULT_ECC_GAUSS_FILT_SIZE,
        }
    }
}

/// Outcome of a registration run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EccResult {
    /// Warp from template pixel coordinates to target pixel coordinates
    pub transform: AffineTransform,
    /// Correlation coefficient at `transform`
    pub correlation: f64,
    /// Number of parameter updates performed
    pub iterations: usize,
    /// False when the iteration cap was reached before the epsilon criterion
    pub converged: bool,
}

/// Errors raised by the registration solver.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistrationError {
    /// Inputs are empty, mismatched, or the settings are unusable
    #[error("Invalid registration input: {message}")]
    InvalidInput {
        /// Description of the problem
        message: String,
    },

    /// The warped target no longer overlaps the template
    #[error("Only {count} overlapping pixels remain after warping")]
    TooFewValidPixels {
        /// Number of valid pixels
        count: usize,
    },

    /// One of the images is constant over the overlap
    #[error("Image has zero variance over the overlapping region")]
    ZeroVariance,

    /// The Gauss-Newton system could not be solved
    #[error("Hessian is singular at iteration {iteration}")]
    SingularHessian {
        /// Iteration at which the failure occurred
        iteration: usize,
    },

    /// A quantity became NaN, infinite or lost its sign
    #[error("Numerical failure at iteration {iteration}: {message}")]
    NumericalFailure {
        /// Iteration at which the failure occurred
        iteration: usize,
        /// What went wrong
        message: String,
    },

    /// Cancellation was requested between iterations
    #[error("Registration cancelled after {iterations} iterations")]
    Cancelled {
        /// Iterations completed before cancellation
        iterations: usize,
    },
}

impl RegistrationError {
    fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }
}

/// Register `template` onto `target` with a Euclidean warp.
///
/// Both images must have the same non-zero size. The warp starts at the
/// identity.
pub fn find_transform_ecc(
    template: &GrayImage,
    target: &GrayImage,
    config: &EccConfig,
    cancel: &CancellationToken,
) -> Result<EccResult, RegistrationError> {
    let (w, h) = template.dimensions();
    if w == 0 || h == 0 {
        return Err(RegistrationError::invalid("empty template"));
    }
    if target.dimensions() != (w, h) {
        return Err(RegistrationError::invalid(format!(
            "template is {}x{} but target is {}x{}",
            w,
            h,
            target.width(),
            target.height()
        )));
    }
    if w < 2 || h < 2 {
        return Err(RegistrationError::invalid("images must be at least 2x2"));
    }
    if config.gauss_filt_size == 0 || config.gauss_filt_size % 2 == 0 {
        return Err(RegistrationError::invalid(format!(
            "Gaussian kernel size must be odd, got {}",
            config.gauss_filt_size
        )));
    }
    if config.max_iterations == 0 || !(config.epsilon >= 0.0) {
        return Err(RegistrationError::invalid(
            "max_iterations must be positive and epsilon non-negative",
        ));
    }

    let frames = Frames::new(template, target, config.gauss_filt_size);

    let mut theta = 0.0f64;
    let mut tx = 0.0f64;
    let mut ty = 0.0f64;
    let mut last_rho = f64::NEG_INFINITY;
    let mut rho = f64::NEG_INFINITY;
    let mut iterations = 0usize;
    let mut converged = false;

    while iterations < config.max_iterations {
        if cancel.is_cancelled() {
            return Err(RegistrationError::Cancelled { iterations });
        }

        let map = AffineTransform::euclidean(theta, tx, ty);
        let (warped, stats, current) = frames.evaluate(&map, iterations)?;
        rho = current;
        log::trace!(
            "ECC iteration {}: rho={:.6} theta={:.6} t=({:.4}, {:.4})",
            iterations,
            rho,
            theta,
            tx,
            ty
        );

        if (rho - last_rho).abs() < config.epsilon {
            converged = true;
            break;
        }
        last_rho = rho;

        let delta = ecc_step(&warped, &stats, theta, iterations)?;
        theta += delta[0];
        tx += delta[1];
        ty += delta[2];
        iterations += 1;
    }

    let transform = AffineTransform::euclidean(theta, tx, ty);
    if !converged {
        // The last update has not been scored yet
        rho = frames.evaluate(&transform, iterations)?.2;
        log::debug!(
            "ECC stopped at the iteration cap ({}) with rho={:.6}",
            config.max_iterations,
            rho
        );
    }

    Ok(EccResult {
        transform,
        correlation: rho,
        iterations,
        converged,
    })
}

/// Blurred template and target, plus the target's gradients.
struct Frames {
    template: Array2<f64>,
    target: Array2<f64>,
    grad_x: Array2<f64>,
    grad_y: Array2<f64>,
}

impl Frames {
    fn new(template: &GrayImage, target: &GrayImage, gauss_filt_size: usize) -> Self {
        let template = gaussian_blur(&to_array(template), gauss_filt_size);
        let target = gaussian_blur(&to_array(target), gauss_filt_size);
        let grad_x = gradient_x(&target);
        let grad_y = gradient_y(&target);
        Self {
            template,
            target,
            grad_x,
            grad_y,
        }
    }

    /// Warp the target by `map` and score it against the template.
    fn evaluate(
        &self,
        map: &AffineTransform,
        iteration: usize,
    ) -> Result<(Warped, CenteredStats, f64), RegistrationError> {
        let warped = Warped::sample(&self.target, &self.grad_x, &self.grad_y, map);
        if warped.valid_count < ECC_MIN_VALID_PIXELS {
            return Err(RegistrationError::TooFewValidPixels {
                count: warped.valid_count,
            });
        }

        let stats = CenteredStats::compute(&self.template, &warped);
        if stats.template_norm <= 1e-9 || stats.image_norm <= 1e-9 {
            return Err(RegistrationError::ZeroVariance);
        }

        let rho = stats.corr / (stats.image_norm * stats.template_norm);
        if !rho.is_finite() {
            return Err(RegistrationError::NumericalFailure {
                iteration,
                message: "correlation is not finite".to_string(),
            });
        }
        Ok((warped, stats, rho))
    }
}

/// Target image and gradients resampled into the template frame.
struct Warped {
    image: Array2<f64>,
    grad_x: Array2<f64>,
    grad_y: Array2<f64>,
    valid: Array2<bool>,
    valid_count: usize,
}

impl Warped {
    fn sample(
        image: &Array2<f64>,
        grad_x: &Array2<f64>,
        grad_y: &Array2<f64>,
        map: &AffineTransform,
    ) -> Self {
        let (h, w) = image.dim();
        let max_x = (w - 1) as f64;
        let max_y = (h - 1) as f64;

        let mut out_image = Array2::zeros((h, w));
        let mut out_gx = Array2::zeros((h, w));
        let mut out_gy = Array2::zeros((h, w));
        let mut valid = Array2::from_elem((h, w), false);
        let mut valid_count = 0usize;

        for y in 0..h {
            for x in 0..w {
                let (xf, yf) = (x as f64, y as f64);
                let sx = map.m00 * xf + map.m01 * yf + map.m02;
                let sy = map.m10 * xf + map.m11 * yf + map.m12;
                if !(sx >= 0.0 && sy >= 0.0 && sx < max_x && sy < max_y) {
                    continue;
                }
                valid[[y, x]] = true;
                valid_count += 1;
                out_image[[y, x]] = bilinear(image, sx, sy);
                out_gx[[y, x]] = bilinear(grad_x, sx, sy);
                out_gy[[y, x]] = bilinear(grad_y, sx, sy);
            }
        }

        Self {
            image: out_image,
            grad_x: out_gx,
            grad_y: out_gy,
            valid,
            valid_count,
        }
    }
}

/// Zero-mean template and image over the valid region, with norms.
struct CenteredStats {
    template_zm: Array2<f64>,
    image_zm: Array2<f64>,
    template_norm: f64,
    image_norm: f64,
    corr: f64,
}

impl CenteredStats {
    fn compute(template: &Array2<f64>, warped: &Warped) -> Self {
        let n = warped.valid_count as f64;
        let mut t_sum = 0.0;
        let mut i_sum = 0.0;
        for ((t, i), &v) in template.iter().zip(warped.image.iter()).zip(warped.valid.iter()) {
            if v {
                t_sum += t;
                i_sum += i;
            }
        }
        let t_mean = t_sum / n;
        let i_mean = i_sum / n;

        let mut template_zm = Array2::zeros(template.dim());
        let mut image_zm = Array2::zeros(template.dim());
        let mut t_ss = 0.0;
        let mut i_ss = 0.0;
        let mut corr = 0.0;
        for (((tz, iz), (t, i)), &v) in template_zm
            .iter_mut()
            .zip(image_zm.iter_mut())
            .zip(template.iter().zip(warped.image.iter()))
            .zip(warped.valid.iter())
        {
            if !v {
                continue;
            }
            let tv = t - t_mean;
            let iv = i - i_mean;
            *tz = tv;
            *iz = iv;
            t_ss += tv * tv;
            i_ss += iv * iv;
            corr += tv * iv;
        }

        Self {
            template_zm,
            image_zm,
            template_norm: t_ss.sqrt(),
            image_norm: i_ss.sqrt(),
            corr,
        }
    }
}

/// One ECC parameter update `(dtheta, dtx, dty)`.
fn ecc_step(
    warped: &Warped,
    stats: &CenteredStats,
    theta: f64,
    iteration: usize,
) -> Result<Vector3<f64>, RegistrationError> {
    let (st, ct) = theta.sin_cos();
    let (h, w) = warped.image.dim();

    let jacobian = |x: usize, y: usize| -> Vector3<f64> {
        let (xf, yf) = (x as f64, y as f64);
        let hat_x = -(xf * st) - (yf * ct);
        let hat_y = (xf * ct) - (yf * st);
        let gx = warped.grad_x[[y, x]];
        let gy = warped.grad_y[[y, x]];
        Vector3::new(gx * hat_x + gy * hat_y, gx, gy)
    };

    let mut hessian = Matrix3::<f64>::zeros();
    let mut image_proj = Vector3::<f64>::zeros();
    let mut template_proj = Vector3::<f64>::zeros();
    for y in 0..h {
        for x in 0..w {
            if !warped.valid[[y, x]] {
                continue;
            }
            let j = jacobian(x, y);
            image_proj += j * stats.image_zm[[y, x]];
            template_proj += j * stats.template_zm[[y, x]];
            hessian += j * j.transpose();
        }
    }

    let hessian_inv = hessian
        .try_inverse()
        .ok_or(RegistrationError::SingularHessian { iteration })?;

    let image_proj_hessian = hessian_inv * image_proj;
    let lambda_n = stats.image_norm * stats.image_norm - image_proj.dot(&image_proj_hessian);
    let lambda_d = stats.corr - template_proj.dot(&image_proj_hessian);
    if !(lambda_d > 0.0) || !lambda_d.is_finite() {
        return Err(RegistrationError::NumericalFailure {
            iteration,
            message: format!("step denominator is {}", lambda_d),
        });
    }
    let lambda = lambda_n / lambda_d;
    if !lambda.is_finite() {
        return Err(RegistrationError::NumericalFailure {
            iteration,
            message: "step scale is not finite".to_string(),
        });
    }

    let mut error_proj = Vector3::<f64>::zeros();
    for y in 0..h {
        for x in 0..w {
            if !warped.valid[[y, x]] {
                continue;
            }
            let e = lambda * stats.template_zm[[y, x]] - stats.image_zm[[y, x]];
            error_proj += jacobian(x, y) * e;
        }
    }

    let delta = hessian_inv * error_proj;
    if delta.iter().any(|v| !v.is_finite()) {
        return Err(RegistrationError::NumericalFailure {
            iteration,
            message: "parameter update is not finite".to_string(),
        });
    }
    Ok(delta)
}

fn to_array(image: &GrayImage) -> Array2<f64> {
    let (w, h) = image.dimensions();
    Array2::from_shape_fn((h as usize, w as usize), |(y, x)| {
        f64::from(image.get_pixel(x as u32, y as u32)[0])
    })
}

fn gaussian_kernel(ksize: usize) -> Vec<f64> {
    let sigma = 0.3 * ((ksize as f64 - 1.0) * 0.5 - 1.0) + 0.8;
    let radius = (ksize / 2) as isize;
    let mut k: Vec<f64> = (0..ksize)
        .map(|i| {
            let x = (i as isize - radius) as f64;
            (-(x * x) / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f64 = k.iter().sum();
    for v in &mut k {
        *v /= sum;
    }
    k
}

/// Separable Gaussian blur with replicated borders.
fn gaussian_blur(src: &Array2<f64>, ksize: usize) -> Array2<f64> {
    if ksize <= 1 {
        return src.clone();
    }
    let kernel = gaussian_kernel(ksize);
    let radius = (ksize / 2) as isize;
    let (h, w) = src.dim();

    let clamp = |v: isize, n: usize| v.clamp(0, n as isize - 1) as usize;
    let tmp = Array2::from_shape_fn((h, w), |(y, x)| {
        kernel
            .iter()
            .enumerate()
            .map(|(k, kv)| src[[y, clamp(x as isize + k as isize - radius, w)]] * kv)
            .sum::<f64>()
    });
    Array2::from_shape_fn((h, w), |(y, x)| {
        kernel
            .iter()
            .enumerate()
            .map(|(k, kv)| tmp[[clamp(y as isize + k as isize - radius, h), x]] * kv)
            .sum::<f64>()
    })
}

fn gradient_x(src: &Array2<f64>) -> Array2<f64> {
    let (h, w) = src.dim();
    Array2::from_shape_fn((h, w), |(y, x)| {
        let l = x.saturating_sub(1);
        let r = (x + 1).min(w - 1);
        0.5 * (src[[y, r]] - src[[y, l]])
    })
}

fn gradient_y(src: &Array2<f64>) -> Array2<f64> {
    let (h, w) = src.dim();
    Array2::from_shape_fn((h, w), |(y, x)| {
        let u = y.saturating_sub(1);
        let d = (y + 1).min(h - 1);
        0.5 * (src[[d, x]] - src[[u, x]])
    })
}

/// Bilinear sample; callers guarantee `0 <= x < w-1` and `0 <= y < h-1`.
fn bilinear(src: &Array2<f64>, x: f64, y: f64) -> f64 {
    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let wx = x - x0 as f64;
    let wy = y - y0 as f64;
    let p00 = src[[y0, x0]];
    let p01 = src[[y0, x0 + 1]];
    let p10 = src[[y0 + 1, x0]];
    let p11 = src[[y0 + 1, x0 + 1]];
    (1.0 - wy) * ((1.0 - wx) * p00 + wx * p01) + wy * ((1.0 - wx) * p10 + wx * p11)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn binary_square(w: u32, h: u32, x0: u32, y0: u32, size: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| {
            let inside = x >= x0 && x < x0 + size && y >= y0 && y < y0 + size;
            Luma([if inside { 255 } else { 0 }])
        })
    }

    /// Two blobs of different size, so rotation is observable.
    fn two_blobs(w: u32, h: u32, dx: f64, dy: f64) -> GrayImage {
        let blob = |x: f64, y: f64, cx: f64, cy: f64, sigma: f64| {
            let (ex, ey) = (x - cx, y - cy);
            (-(ex * ex + ey * ey) / (2.0 * sigma * sigma)).exp()
        };
        GrayImage::from_fn(w, h, |x, y| {
            let (xf, yf) = (f64::from(x), f64::from(y));
            let v = 200.0 * blob(xf, yf, 40.0 + dx, 44.0 + dy, 9.0)
                + 150.0 * blob(xf, yf, 60.0 + dx, 58.0 + dy, 6.0);
            Luma([v.round().clamp(0.0, 255.0) as u8])
        })
    }

    fn checkerboard(w: u32, h: u32, step: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| {
            Luma([if ((x / step) + (y / step)) % 2 == 0 { 40 } else { 220 }])
        })
    }

    /// Resample `src` so that `out(x) = src(inverse_map(x))`.
    fn warp_with_inverse_map(src: &GrayImage, inverse_map: &AffineTransform) -> GrayImage {
        let arr = to_array(src);
        let (h, w) = arr.dim();
        GrayImage::from_fn(w as u32, h as u32, |x, y| {
            let p = inverse_map.apply(crate::geometry::Point::new(f64::from(x), f64::from(y)));
            let inside =
                p.x >= 0.0 && p.y >= 0.0 && p.x < (w - 1) as f64 && p.y < (h - 1) as f64;
            let v = if inside { bilinear(&arr, p.x, p.y) } else { 0.0 };
            Luma([v.round().clamp(0.0, 255.0) as u8])
        })
    }

    #[test]
    fn test_identical_images_give_identity() {
        let img = binary_square(64, 64, 20, 18, 24);
        let result =
            find_transform_ecc(&img, &img, &EccConfig::default(), &CancellationToken::new())
                .unwrap();
        assert!(result.converged);
        assert!(result.transform.rotation().abs() < 1e-3);
        let (tx, ty) = result.transform.translation_part();
        assert!(tx.abs() < 1e-3 && ty.abs() < 1e-3, "t=({}, {})", tx, ty);
        assert!(result.correlation > 0.999);
    }

    #[test]
    fn test_recovers_pure_translation() {
        let template = two_blobs(96, 96, 0.0, 0.0);
        let target = two_blobs(96, 96, 5.0, -3.0);
        let result = find_transform_ecc(
            &template,
            &target,
            &EccConfig::default(),
            &CancellationToken::new(),
        )
        .unwrap();
        let (tx, ty) = result.transform.translation_part();
        assert!((tx - 5.0).abs() < 0.5, "tx={}", tx);
        assert!((ty + 3.0).abs() < 0.5, "ty={}", ty);
        assert!(result.transform.rotation().abs() < 0.01);
        assert!(result.converged);
    }

    #[test]
    fn test_recovers_rotation_and_translation() {
        let template = checkerboard(128, 96, 8);
        let theta = 3.0f64.to_radians();
        let forward = AffineTransform::euclidean(theta, 4.0, -3.0);
        let target = warp_with_inverse_map(&template, &forward.try_inverse().unwrap());

        let config = EccConfig {
            max_iterations: 100,
            epsilon: 1e-4,
            gauss_filt_size: 1,
        };
        let m = find_transform_ecc(&template, &target, &config, &CancellationToken::new())
            .unwrap()
            .transform;
        assert!((m.m02 - forward.m02).abs() < 1.5, "tx {}", m.m02);
        assert!((m.m12 - forward.m12).abs() < 1.5, "ty {}", m.m12);
        assert!((m.m10 - forward.m10).abs() < 0.05, "sin(theta) {}", m.m10);
    }

    #[test]
    fn test_iteration_cap_reports_not_converged() {
        let template = two_blobs(96, 96, 0.0, 0.0);
        let target = two_blobs(96, 96, 4.0, -2.0);
        let config = EccConfig {
            max_iterations: 1,
            epsilon: 0.0,
            gauss_filt_size: 1,
        };
        let result =
            find_transform_ecc(&template, &target, &config, &CancellationToken::new()).unwrap();
        assert!(!result.converged);
        assert_eq!(result.iterations, 1);

        let frames = Frames::new(&template, &target, 1);
        let start = frames.evaluate(&AffineTransform::identity(), 0).unwrap().2;
        let at_result = frames.evaluate(&result.transform, 1).unwrap().2;
        assert!((result.correlation - at_result).abs() < 1e-12);
        assert!(result.correlation > start);
    }

    #[test]
    fn test_constant_target_is_rejected() {
        let template = binary_square(32, 32, 8, 8, 12);
        let target = GrayImage::new(32, 32);
        let err = find_transform_ecc(
            &template,
            &target,
            &EccConfig::default(),
            &CancellationToken::new(),
        )
        .unwrap_err();
        assert_eq!(err, RegistrationError::ZeroVariance);
    }

    #[test]
    fn test_size_mismatch_is_rejected() {
        let a = GrayImage::new(16, 16);
        let b = GrayImage::new(16, 17);
        let err = find_transform_ecc(&a, &b, &EccConfig::default(), &CancellationToken::new());
        assert!(matches!(err, Err(RegistrationError::InvalidInput { .. })));
    }

    #[test]
    fn test_even_kernel_is_rejected() {
        let a = binary_square(16, 16, 4, 4, 8);
        let config = EccConfig {
            gauss_filt_size: 4,
            ..EccConfig::default()
        };
        let err = find_transform_ecc(&a, &a, &config, &CancellationToken::new());
        assert!(matches!(err, Err(RegistrationError::InvalidInput { .. })));
    }

    #[test]
    fn test_cancelled_before_first_iteration() {
        let img = binary_square(32, 32, 8, 8, 12);
        let token = CancellationToken::new();
        token.cancel();
        let err = find_transform_ecc(&img, &img, &EccConfig::default(), &token).unwrap_err();
        assert_eq!(err, RegistrationError::Cancelled { iterations: 0 });
    }

    #[test]
    fn test_gaussian_kernel_normalized() {
        let k = gaussian_kernel(5);
        assert_eq!(k.len(), 5);
        assert!((k.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(k[2] > k[1] && k[1] > k[0]);
        assert!((k[0] - k[4]).abs() < 1e-15);
    }
}
