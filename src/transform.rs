use image::{imageops, Rgb, RgbImage};
use nalgebra::{Matrix3, Vector3};
use tracing::debug;

use crate::error::{RectifyError, Result};
use crate::rectifier::RectifierResult;

/// Bilinear interpolation with edge clamping
pub(crate) fn bilinear_interpolate(img: &RgbImage, x: f64, y: f64) -> [f64; 3] {
    let (width, height) = img.dimensions();
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let x1 = x0 + 1;
    let y1 = y0 + 1;

    let x_frac = x - x.floor();
    let y_frac = y - y.floor();

    let get_pixel = |px: i64, py: i64| -> [f64; 3] {
        let px = px.clamp(0, width as i64 - 1) as u32;
        let py = py.clamp(0, height as i64 - 1) as u32;
        let p = img.get_pixel(px, py);
        [p[0] as f64, p[1] as f64, p[2] as f64]
    };

    let p00 = get_pixel(x0, y0);
    let p10 = get_pixel(x1, y0);
    let p01 = get_pixel(x0, y1);
    let p11 = get_pixel(x1, y1);

    let mut result = [0.0; 3];
    for c in 0..3 {
        let top = p00[c] * (1.0 - x_frac) + p10[c] * x_frac;
        let bottom = p01[c] * (1.0 - x_frac) + p11[c] * x_frac;
        result[c] = top * (1.0 - y_frac) + bottom * y_frac;
    }

    result
}

pub(crate) fn to_rgb(sample: [f64; 3]) -> Rgb<u8> {
    Rgb([
        sample[0].round().clamp(0.0, 255.0) as u8,
        sample[1].round().clamp(0.0, 255.0) as u8,
        sample[2].round().clamp(0.0, 255.0) as u8,
    ])
}

/// Inverse of a projective transform, or `DegenerateGeometry` if singular
pub fn invert_transform(transform: &Matrix3<f64>) -> Result<Matrix3<f64>> {
    transform
        .try_inverse()
        .filter(|inv| inv.iter().all(|v| v.is_finite()))
        .ok_or_else(|| RectifyError::degenerate("transform matrix is not invertible"))
}

/// Warp an image into a `width` x `height` destination frame
///
/// Every destination pixel is mapped back through the inverse transform and
/// sampled bilinearly. Pixels whose source lies outside the image stay black.
pub fn apply_transform(
    img: &RgbImage,
    transform: &Matrix3<f64>,
    width: u32,
    height: u32,
) -> Result<RgbImage> {
    let (src_width, src_height) = img.dimensions();
    let inverse = invert_transform(transform)?;

    debug!(
        "Warp: {}x{} -> {}x{}",
        src_width, src_height, width, height
    );

    let mut output = RgbImage::new(width, height);
    if src_width == 0 || src_height == 0 {
        return Ok(output);
    }

    let max_x = src_width as f64 - 0.5;
    let max_y = src_height as f64 - 0.5;

    for out_y in 0..height {
        for out_x in 0..width {
            let p = inverse * Vector3::new(out_x as f64, out_y as f64, 1.0);
            if p.z.abs() < f64::EPSILON {
                continue;
            }
            let src_x = p.x / p.z;
            let src_y = p.y / p.z;

            if src_x >= -0.5 && src_x <= max_x && src_y >= -0.5 && src_y <= max_y {
                let sample = bilinear_interpolate(img, src_x, src_y);
                output.put_pixel(out_x, out_y, to_rgb(sample));
            }
        }
    }

    Ok(output)
}

/// Crop a warped frame to the rectified rectangle it contains
pub fn crop_to_rectified(img: &RgbImage, result: &RectifierResult) -> RgbImage {
    let (img_w, img_h) = img.dimensions();
    let origin = result.destination.points[0];
    let (extent_w, extent_h) = result.rectified_extent();

    let x0 = origin.x.floor().clamp(0.0, img_w as f64) as u32;
    let y0 = origin.y.floor().clamp(0.0, img_h as f64) as u32;
    let x1 = (origin.x + extent_w).round().clamp(0.0, img_w as f64) as u32;
    let y1 = (origin.y + extent_h).round().clamp(0.0, img_h as f64) as u32;

    imageops::crop_imm(img, x0, y0, x1.saturating_sub(x0), y1.saturating_sub(y0)).to_image()
}
