use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::{RectifyError, Result};

/// Relative tolerance used for coincidence and collinearity checks
const DEGENERACY_EPS: f64 = 1e-9;

/// A pixel coordinate in some image frame
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point2D {
    pub x: f64,
    pub y: f64,
}

impl Point2D {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point2D) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

impl From<(f64, f64)> for Point2D {
    fn from((x, y): (f64, f64)) -> Self {
        Self::new(x, y)
    }
}

/// Twice the signed area of triangle (a, b, c)
fn cross(a: &Point2D, b: &Point2D, c: &Point2D) -> f64 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

/// Four corners of a rectangle in a fixed traversal order
///
/// Point 0 is the corner that maps to the origin of the target frame; the
/// remaining points follow in one rotational direction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CornerQuad {
    pub points: [Point2D; 4],
}

impl CornerQuad {
    pub fn new(points: [Point2D; 4]) -> Self {
        Self { points }
    }

    /// Build a quad from a slice, failing unless exactly 4 points are given
    pub fn from_slice(points: &[Point2D]) -> Result<Self> {
        let points: [Point2D; 4] = points.try_into().map_err(|_| {
            RectifyError::degenerate(format!("expected 4 corner points, got {}", points.len()))
        })?;
        Ok(Self::new(points))
    }

    /// Signed area (shoelace); positive when clockwise in y-down image coordinates
    pub fn signed_area(&self) -> f64 {
        let p = &self.points;
        (0..4)
            .map(|i| {
                let j = (i + 1) % 4;
                p[i].x * p[j].y - p[j].x * p[i].y
            })
            .sum::<f64>()
            / 2.0
    }

    /// Cyclic rotation: new point `i` is old point `(i + k) mod 4`
    pub fn rotated(&self, k: usize) -> Self {
        let mut points = self.points;
        points.rotate_left(k % 4);
        Self::new(points)
    }

    /// Same corners, traversed clockwise on screen, starting at the same point
    pub fn to_clockwise(&self) -> Self {
        if self.signed_area() >= 0.0 {
            *self
        } else {
            let p = self.points;
            Self::new([p[0], p[3], p[2], p[1]])
        }
    }

    /// Reject quads that cannot define a projective transform
    pub fn validate(&self) -> Result<()> {
        let p = &self.points;
        if p.iter().any(|pt| !pt.x.is_finite() || !pt.y.is_finite()) {
            return Err(RectifyError::degenerate("corner coordinates must be finite"));
        }

        let min_x = p.iter().map(|pt| pt.x).fold(f64::INFINITY, f64::min);
        let max_x = p.iter().map(|pt| pt.x).fold(f64::NEG_INFINITY, f64::max);
        let min_y = p.iter().map(|pt| pt.y).fold(f64::INFINITY, f64::min);
        let max_y = p.iter().map(|pt| pt.y).fold(f64::NEG_INFINITY, f64::max);
        let extent = (max_x - min_x).hypot(max_y - min_y);
        if extent <= f64::EPSILON {
            return Err(RectifyError::degenerate("all corner points coincide"));
        }

        for i in 0..4 {
            for j in (i + 1)..4 {
                if p[i].distance(&p[j]) <= DEGENERACY_EPS * extent {
                    return Err(RectifyError::degenerate(format!(
                        "corner points {} and {} coincide",
                        i, j
                    )));
                }
            }
        }

        let area_tol = DEGENERACY_EPS * extent * extent;
        for skip in 0..4 {
            let tri: Vec<&Point2D> = (0..4).filter(|&i| i != skip).map(|i| &p[i]).collect();
            if cross(tri[0], tri[1], tri[2]).abs() <= area_tol {
                return Err(RectifyError::degenerate(
                    "three corner points are collinear",
                ));
            }
        }

        if self.signed_area().abs() <= area_tol {
            return Err(RectifyError::degenerate("corner quad encloses no area"));
        }

        Ok(())
    }
}

/// Real-world size of the reference rectangle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RectangleSpec {
    pub width_mm: f64,
    pub height_mm: f64,
}

impl RectangleSpec {
    pub fn new(width_mm: f64, height_mm: f64) -> Self {
        Self { width_mm, height_mm }
    }

    /// Width over height
    pub fn aspect(&self) -> f64 {
        self.width_mm / self.height_mm
    }
}

impl Default for RectangleSpec {
    fn default() -> Self {
        Self::new(1000.0, 1500.0)
    }
}

/// Destination rectangle in top-down pixel space, given by opposite corners
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetFrame {
    pub origin: Point2D,
    pub far: Point2D,
}

impl TargetFrame {
    pub fn new(origin: Point2D, far: Point2D) -> Self {
        Self { origin, far }
    }

    /// Whole output canvas of the given size
    pub fn canvas(width: u32, height: u32) -> Self {
        Self::new(
            Point2D::new(0.0, 0.0),
            Point2D::new(width as f64, height as f64),
        )
    }

    pub fn delta(&self) -> (f64, f64) {
        (self.far.x - self.origin.x, self.far.y - self.origin.y)
    }
}

/// Transform a point using a projective matrix
pub fn transform_point(matrix: &Matrix3<f64>, x: f64, y: f64) -> (f64, f64) {
    let p = Vector3::new(x, y, 1.0);
    let result = matrix * p;
    (result.x / result.z, result.y / result.z)
}

pub fn map_point(matrix: &Matrix3<f64>, p: &Point2D) -> Point2D {
    transform_point(matrix, p.x, p.y).into()
}
