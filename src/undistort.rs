//! Lens undistortion with the Brown-Conrady model.
//!
//! Coefficients follow the OpenCV ordering `[k1, k2, p1, p2, k3, k4, k5, k6]`;
//! shorter vectors are padded with zeros. The output keeps the input camera
//! matrix, so undistorted pixels share the same intrinsics.

use image::RgbImage;
use nalgebra::{Matrix3, Vector3};
use tracing::debug;

use crate::error::{RectifyError, Result};
use crate::transform::{bilinear_interpolate, to_rgb};

/// Camera intrinsics and distortion coefficients from a prior calibration
#[derive(Debug, Clone, PartialEq)]
pub struct CameraIntrinsics {
    pub camera_matrix: Matrix3<f64>,
    pub distortion: Vec<f64>,
}

impl CameraIntrinsics {
    pub fn new(camera_matrix: Matrix3<f64>, distortion: Vec<f64>) -> Self {
        Self {
            camera_matrix,
            distortion,
        }
    }

    fn coeff(&self, i: usize) -> f64 {
        self.distortion.get(i).copied().unwrap_or(0.0)
    }

    /// Apply the distortion model to a normalized image point
    pub fn distort_normalized(&self, x: f64, y: f64) -> (f64, f64) {
        let (k1, k2, p1, p2, k3) = (
            self.coeff(0),
            self.coeff(1),
            self.coeff(2),
            self.coeff(3),
            self.coeff(4),
        );
        let (k4, k5, k6) = (self.coeff(5), self.coeff(6), self.coeff(7));

        let r2 = x * x + y * y;
        let r4 = r2 * r2;
        let r6 = r4 * r2;

        let radial = (1.0 + k1 * r2 + k2 * r4 + k3 * r6) / (1.0 + k4 * r2 + k5 * r4 + k6 * r6);
        let x_tan = 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
        let y_tan = p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y;

        (x * radial + x_tan, y * radial + y_tan)
    }

    /// Where an undistorted pixel was recorded on the sensor
    pub fn distorted_pixel(&self, k_inv: &Matrix3<f64>, u: f64, v: f64) -> (f64, f64) {
        let n = k_inv * Vector3::new(u, v, 1.0);
        let (xd, yd) = self.distort_normalized(n.x / n.z, n.y / n.z);
        let p = self.camera_matrix * Vector3::new(xd, yd, 1.0);
        (p.x / p.z, p.y / p.z)
    }
}

/// Remove lens distortion from an image
pub fn undistort_image(img: &RgbImage, intrinsics: &CameraIntrinsics) -> Result<RgbImage> {
    let k_inv = intrinsics
        .camera_matrix
        .try_inverse()
        .ok_or_else(|| RectifyError::degenerate("camera matrix is not invertible"))?;

    let (width, height) = img.dimensions();
    debug!(
        width,
        height,
        coefficients = intrinsics.distortion.len(),
        "Undistorting image"
    );

    let mut output = RgbImage::new(width, height);
    let max_x = width as f64 - 0.5;
    let max_y = height as f64 - 0.5;

    for v in 0..height {
        for u in 0..width {
            let (sx, sy) = intrinsics.distorted_pixel(&k_inv, u as f64, v as f64);
            if sx.is_finite() && sy.is_finite() && sx >= -0.5 && sx <= max_x && sy >= -0.5 && sy <= max_y {
                output.put_pixel(u, v, to_rgb(bilinear_interpolate(img, sx, sy)));
            }
        }
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn camera() -> Matrix3<f64> {
        Matrix3::new(500.0, 0.0, 32.0, 0.0, 500.0, 24.0, 0.0, 0.0, 1.0)
    }

    #[test]
    fn test_zero_distortion_is_identity() {
        let img = RgbImage::from_fn(64, 48, |x, y| Rgb([(x * 4) as u8, (y * 5) as u8, 7]));
        let intrinsics = CameraIntrinsics::new(camera(), vec![0.0; 5]);
        let out = undistort_image(&img, &intrinsics).unwrap();
        assert_eq!(out, img);
    }

    #[test]
    fn test_principal_point_is_fixed() {
        let intrinsics = CameraIntrinsics::new(camera(), vec![-0.3, 0.1, 0.001, -0.002, 0.01]);
        let k_inv = camera().try_inverse().unwrap();
        let (x, y) = intrinsics.distorted_pixel(&k_inv, 32.0, 24.0);
        assert!((x - 32.0).abs() < 1e-9);
        assert!((y - 24.0).abs() < 1e-9);
    }

    #[test]
    fn test_barrel_distortion_pulls_points_inward() {
        let intrinsics = CameraIntrinsics::new(camera(), vec![-0.2]);
        let (xd, yd) = intrinsics.distort_normalized(0.5, 0.0);
        assert!(xd < 0.5);
        assert!(yd.abs() < 1e-12);
    }

    #[test]
    fn test_rational_model_with_eight_coefficients() {
        // k1, k2, p1, p2, k3, k4, k5, k6
        let intrinsics = CameraIntrinsics::new(
            camera(),
            vec![0.1, 0.01, 0.001, 0.002, 0.001, 0.05, 0.005, 0.0005],
        );
        // r2 = 0.13, radial = 1.013171197 / 1.0065855985
        // x_tan = 0.0005, y_tan = -0.00003
        let (xd, yd) = intrinsics.distort_normalized(0.3, -0.2);
        assert!((xd - 0.302_462_753_642_555_7).abs() < 1e-12);
        assert!((yd + 0.201_338_502_428_370_5).abs() < 1e-12);

        // dropping the denominator terms must change the result
        let polynomial =
            CameraIntrinsics::new(camera(), vec![0.1, 0.01, 0.001, 0.002, 0.001]);
        let (xp, _) = polynomial.distort_normalized(0.3, -0.2);
        assert!((xp - xd).abs() > 1e-3);
    }

    #[test]
    fn test_singular_camera_matrix_is_rejected() {
        let img = RgbImage::new(4, 4);
        let intrinsics = CameraIntrinsics::new(Matrix3::zeros(), vec![]);
        assert!(matches!(
            undistort_image(&img, &intrinsics),
            Err(RectifyError::DegenerateGeometry(_))
        ));
    }
}
