//! Ground-plane rectification from four corners of a known rectangle.
//!
//! The destination rectangle keeps the real aspect ratio of the reference
//! rectangle: the more constraining axis of the requested extent decides the
//! scale, and both axes are then scaled identically.

use nalgebra::{Matrix3, SMatrix, SVector};
use tracing::debug;

use crate::error::{RectifyError, Result};
use crate::geometry::{CornerQuad, Point2D, RectangleSpec, TargetFrame};

/// Output of a rectification
#[derive(Debug, Clone, PartialEq)]
pub struct RectifierResult {
    /// Maps distorted-image pixels to the top-down frame
    pub transform: Matrix3<f64>,
    /// Millimeters represented by one destination pixel
    pub pixel_scale_mm_per_px: f64,
    /// Destination points, in the same order as the source corners
    pub destination: CornerQuad,
}

impl RectifierResult {
    /// Size of the rectified rectangle in destination pixels
    pub fn rectified_extent(&self) -> (f64, f64) {
        let d = &self.destination.points;
        (d[1].x - d[0].x, d[3].y - d[0].y)
    }
}

/// Translate the centroid to the origin and scale the mean distance to sqrt(2)
fn normalize_points(pts: &[Point2D; 4]) -> (Matrix3<f64>, [Point2D; 4]) {
    let cx = pts.iter().map(|p| p.x).sum::<f64>() / 4.0;
    let cy = pts.iter().map(|p| p.y).sum::<f64>() / 4.0;
    let mean_dist = pts
        .iter()
        .map(|p| ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt())
        .sum::<f64>()
        / 4.0;
    let s = if mean_dist > 1e-15 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };

    let t = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
    let normalized = (*pts).map(|p| Point2D::new(s * (p.x - cx), s * (p.y - cy)));
    (t, normalized)
}

/// Exact projective transform mapping `src[i]` to `dst[i]` for all four points
///
/// Solves the 8x8 linear system obtained by fixing the bottom-right entry of
/// the (normalized) homography to one.
pub fn solve_homography(src: &CornerQuad, dst: &CornerQuad) -> Result<Matrix3<f64>> {
    src.validate()?;
    dst.validate()?;

    let (t_src, src_n) = normalize_points(&src.points);
    let (t_dst, dst_n) = normalize_points(&dst.points);

    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();

    for (i, (s, d)) in src_n.iter().zip(dst_n.iter()).enumerate() {
        let (x, y) = (s.x, s.y);
        let (u, v) = (d.x, d.y);
        let r0 = 2 * i;
        let r1 = 2 * i + 1;

        // u * (h31 x + h32 y + 1) = h11 x + h12 y + h13
        a[(r0, 0)] = x;
        a[(r0, 1)] = y;
        a[(r0, 2)] = 1.0;
        a[(r0, 6)] = -u * x;
        a[(r0, 7)] = -u * y;
        b[r0] = u;

        // v * (h31 x + h32 y + 1) = h21 x + h22 y + h23
        a[(r1, 3)] = x;
        a[(r1, 4)] = y;
        a[(r1, 5)] = 1.0;
        a[(r1, 6)] = -v * x;
        a[(r1, 7)] = -v * y;
        b[r1] = v;
    }

    let h = a
        .lu()
        .solve(&b)
        .ok_or_else(|| RectifyError::degenerate("point correspondences are singular"))?;

    let h_norm = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0);
    let t_dst_inv = t_dst
        .try_inverse()
        .ok_or_else(|| RectifyError::degenerate("destination normalization failed"))?;
    let mut h_mat = t_dst_inv * h_norm * t_src;

    // normalise such that H[2,2] = 1
    let scale = h_mat[(2, 2)];
    if scale.abs() > f64::EPSILON {
        h_mat /= scale;
    }

    if h_mat.iter().any(|v| !v.is_finite()) || h_mat.try_inverse().is_none() {
        return Err(RectifyError::degenerate("estimated transform is not invertible"));
    }

    Ok(h_mat)
}

/// Compute the top-down transform and pixel scale for a corner quad
///
/// `corners` must start at the corner that maps to `target.origin` and
/// proceed clockwise; the order is not checked here.
pub fn compute_transform(
    corners: &CornerQuad,
    target: &TargetFrame,
    rect: &RectangleSpec,
) -> Result<RectifierResult> {
    let (delta_x, delta_y) = target.delta();

    let scale_x = delta_x / rect.width_mm;
    let scale_y = delta_y / rect.height_mm;
    let scale = scale_x.min(scale_y);

    if !scale.is_finite() || scale <= 0.0 {
        return Err(RectifyError::degenerate(format!(
            "target extent ({:.1}, {:.1}) px for {}x{} mm gives non-positive scale",
            delta_x, delta_y, rect.width_mm, rect.height_mm
        )));
    }

    let pixel_scale = 1.0 / scale;
    let delta_x = scale * rect.width_mm;
    let delta_y = scale * rect.height_mm;

    let (ox, oy) = (target.origin.x, target.origin.y);
    let destination = CornerQuad::new([
        Point2D::new(ox, oy),
        Point2D::new(ox + delta_x, oy),
        Point2D::new(ox + delta_x, oy + delta_y),
        Point2D::new(ox, oy + delta_y),
    ]);

    let transform = solve_homography(corners, &destination)?;

    debug!(
        scale_x,
        scale_y, scale, pixel_scale, delta_x, delta_y, "Computed rectifying transform"
    );

    Ok(RectifierResult {
        transform,
        pixel_scale_mm_per_px: pixel_scale,
        destination,
    })
}
