//! Recovery of the corner ordering for automatically detected quads.
//!
//! A detected quad has a known traversal direction but an unknown starting
//! corner. The search tries the four cyclic rotations in turn and asks a probe
//! (normally: "is the orientation marker where it should be?") whether the
//! rectified result is upright.

use image::RgbImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::Settings;
use crate::error::{RectifyError, Result};
use crate::geometry::{CornerQuad, Point2D, RectangleSpec, TargetFrame};
use crate::rectifier::{compute_transform, RectifierResult};
use crate::segmentation::{color_mask, find_marker_polygon};
use crate::transform::apply_transform;

/// Number of cyclic orderings of a quad with fixed traversal direction
pub const ROTATION_COUNT: usize = 4;

/// Offset of the starting corner relative to the detected ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    R0,
    R1,
    R2,
    R3,
}

impl Rotation {
    pub fn offset(self) -> usize {
        match self {
            Rotation::R0 => 0,
            Rotation::R1 => 1,
            Rotation::R2 => 2,
            Rotation::R3 => 3,
        }
    }

    fn next(self) -> Option<Rotation> {
        match self {
            Rotation::R0 => Some(Rotation::R1),
            Rotation::R1 => Some(Rotation::R2),
            Rotation::R2 => Some(Rotation::R3),
            Rotation::R3 => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchState {
    /// Waiting for the probe verdict on this rotation
    Trying(Rotation),
    Resolved(Rotation),
    Exhausted,
}

/// Finite-state search over the four cyclic orderings of a quad
#[derive(Debug, Clone)]
pub struct OrientationSearch {
    base: CornerQuad,
    state: SearchState,
    attempts: usize,
}

impl OrientationSearch {
    pub fn new(base: CornerQuad) -> Self {
        Self {
            base,
            state: SearchState::Trying(Rotation::R0),
            attempts: 0,
        }
    }

    pub fn state(&self) -> SearchState {
        self.state
    }

    /// Probe verdicts received so far
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    /// Corner ordering to test in the current state
    pub fn candidate(&self) -> Option<CornerQuad> {
        match self.state {
            SearchState::Trying(rotation) => Some(self.base.rotated(rotation.offset())),
            _ => None,
        }
    }

    /// Feed the probe verdict for the current candidate
    pub fn advance(&mut self, accepted: bool) -> SearchState {
        if let SearchState::Trying(rotation) = self.state {
            self.attempts += 1;
            self.state = if accepted {
                SearchState::Resolved(rotation)
            } else {
                rotation
                    .next()
                    .map_or(SearchState::Exhausted, SearchState::Trying)
            };
        }
        self.state
    }
}

/// Accepted ordering together with its rectification
#[derive(Debug, Clone)]
pub struct Orientation {
    pub rotation: Rotation,
    pub attempts: usize,
    pub corners: CornerQuad,
    pub result: RectifierResult,
}

/// Try every cyclic ordering of `corners` until `probe` accepts one
///
/// Geometry errors abort the search; a probe that never accepts ends in
/// `OrientationNotResolved`.
pub fn resolve_orientation<F>(
    corners: &CornerQuad,
    target: &TargetFrame,
    rect: &RectangleSpec,
    mut probe: F,
) -> Result<Orientation>
where
    F: FnMut(&CornerQuad, &RectifierResult) -> Result<bool>,
{
    let mut search = OrientationSearch::new(*corners);

    while let Some(candidate) = search.candidate() {
        let result = compute_transform(&candidate, target, rect)?;
        let accepted = probe(&candidate, &result)?;

        debug!(attempt = search.attempts() + 1, accepted, "Orientation probe");

        if let SearchState::Resolved(rotation) = search.advance(accepted) {
            info!(
                "Orientation resolved at rotation {} after {} attempts",
                rotation.offset(),
                search.attempts()
            );
            return Ok(Orientation {
                rotation,
                attempts: search.attempts(),
                corners: candidate,
                result,
            });
        }
    }

    Err(RectifyError::OrientationNotResolved {
        attempts: search.attempts(),
    })
}

/// Area of the output frame where the marker must lie, as fractions of the frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerRegion {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
}

impl MarkerRegion {
    pub fn contains(&self, p: &Point2D, width: u32, height: u32) -> bool {
        let (w, h) = (width as f64, height as f64);
        p.x >= self.x_min * w && p.x <= self.x_max * w && p.y >= self.y_min * h && p.y <= self.y_max * h
    }

    /// True when the polygon is non-empty and every vertex lies in the region
    pub fn contains_all(&self, polygon: &[Point2D], width: u32, height: u32) -> bool {
        !polygon.is_empty() && polygon.iter().all(|p| self.contains(p, width, height))
    }
}

impl Default for MarkerRegion {
    /// Left quarter of the lower half of the frame
    fn default() -> Self {
        Self {
            x_min: 0.0,
            x_max: 0.25,
            y_min: 0.5,
            y_max: 1.0,
        }
    }
}

/// Checks a candidate rectification for the blue marker in its expected region
pub struct MarkerProbe<'a> {
    frame: &'a RgbImage,
    width: u32,
    height: u32,
    settings: &'a Settings,
}

impl<'a> MarkerProbe<'a> {
    pub fn new(frame: &'a RgbImage, width: u32, height: u32, settings: &'a Settings) -> Self {
        Self {
            frame,
            width,
            height,
            settings,
        }
    }

    pub fn check(&self, _corners: &CornerQuad, result: &RectifierResult) -> Result<bool> {
        let warped = apply_transform(self.frame, &result.transform, self.width, self.height)?;
        let mask = color_mask(&warped, &self.settings.colors.marker);
        let polygon = find_marker_polygon(
            &mask,
            self.settings.segmentation.marker_min_points,
            self.settings.segmentation.marker_epsilon,
        );

        Ok(polygon.is_some_and(|p| {
            self.settings
                .marker
                .contains_all(&p, self.width, self.height)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::map_point;
    use image::Rgb;
    use imageproc::drawing::draw_filled_rect_mut;
    use imageproc::rect::Rect;

    fn canonical() -> CornerQuad {
        CornerQuad::new([
            Point2D::new(120.0, 80.0),
            Point2D::new(520.0, 95.0),
            Point2D::new(560.0, 690.0),
            Point2D::new(90.0, 660.0),
        ])
    }

    /// Marker sits just inside the canonical origin corner
    fn marker_probe(quad: &CornerQuad, result: &RectifierResult) -> Result<bool> {
        let _ = quad;
        let marker = Point2D::new(140.0, 110.0);
        let mapped = map_point(&result.transform, &marker);
        let top_left = MarkerRegion {
            x_min: 0.0,
            x_max: 0.5,
            y_min: 0.0,
            y_max: 0.5,
        };
        Ok(top_left.contains(&mapped, 800, 1200))
    }

    #[test]
    fn test_state_machine_transitions() {
        let mut search = OrientationSearch::new(canonical());
        assert_eq!(search.state(), SearchState::Trying(Rotation::R0));
        assert_eq!(search.advance(false), SearchState::Trying(Rotation::R1));
        assert_eq!(search.candidate(), Some(canonical().rotated(1)));
        assert_eq!(search.advance(false), SearchState::Trying(Rotation::R2));
        assert_eq!(search.advance(false), SearchState::Trying(Rotation::R3));
        assert_eq!(search.advance(false), SearchState::Exhausted);
        assert_eq!(search.attempts(), 4);
        assert!(search.candidate().is_none());

        // terminal states absorb further input
        assert_eq!(search.advance(true), SearchState::Exhausted);
        assert_eq!(search.attempts(), 4);
    }

    #[test]
    fn test_converges_in_k_plus_one_attempts() {
        let target = TargetFrame::canvas(800, 1200);
        for k in 0..ROTATION_COUNT {
            let detected = canonical().rotated((ROTATION_COUNT - k) % ROTATION_COUNT);
            let orientation =
                resolve_orientation(&detected, &target, &RectangleSpec::default(), marker_probe)
                    .unwrap();

            assert_eq!(orientation.attempts, k + 1);
            assert_eq!(orientation.rotation.offset(), k);
            assert_eq!(orientation.corners, canonical());
        }
    }

    #[test]
    fn test_exhausts_when_marker_never_found() {
        let mut calls = 0;
        let err = resolve_orientation(
            &canonical(),
            &TargetFrame::canvas(800, 1200),
            &RectangleSpec::default(),
            |_, _| {
                calls += 1;
                Ok(false)
            },
        )
        .unwrap_err();

        assert!(matches!(
            err,
            RectifyError::OrientationNotResolved { attempts: 4 }
        ));
        assert_eq!(calls, 4);
    }

    #[test]
    fn test_probe_error_aborts_search() {
        let mut calls = 0;
        let err = resolve_orientation(
            &canonical(),
            &TargetFrame::canvas(800, 1200),
            &RectangleSpec::default(),
            |_, _| {
                calls += 1;
                if calls == 1 {
                    Ok(false)
                } else {
                    Err(RectifyError::degenerate("warp failed"))
                }
            },
        )
        .unwrap_err();

        assert_eq!(calls, 2);
        match err {
            RectifyError::DegenerateGeometry(msg) => assert_eq!(msg, "warp failed"),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_degenerate_quad_aborts_search() {
        let p = Point2D::new(5.0, 5.0);
        let quad = CornerQuad::new([p, p, p, Point2D::new(9.0, 1.0)]);
        let err = resolve_orientation(
            &quad,
            &TargetFrame::canvas(800, 1200),
            &RectangleSpec::default(),
            |_, _| Ok(true),
        )
        .unwrap_err();
        assert!(matches!(err, RectifyError::DegenerateGeometry(_)));
    }

    #[test]
    fn test_marker_region_default_is_lower_left_strip() {
        let region = MarkerRegion::default();
        assert!(region.contains(&Point2D::new(10.0, 90.0), 100, 100));
        assert!(!region.contains(&Point2D::new(30.0, 90.0), 100, 100));
        assert!(!region.contains(&Point2D::new(10.0, 40.0), 100, 100));
        assert!(!region.contains_all(&[], 100, 100));
    }

    #[test]
    fn test_marker_probe_on_synthetic_frame() {
        let mut frame = RgbImage::from_pixel(300, 300, Rgb([255, 255, 255]));
        draw_filled_rect_mut(&mut frame, Rect::at(30, 230).of_size(30, 40), Rgb([20, 60, 200]));

        let canonical = CornerQuad::new([
            Point2D::new(20.0, 20.0),
            Point2D::new(280.0, 20.0),
            Point2D::new(280.0, 280.0),
            Point2D::new(20.0, 280.0),
        ]);
        let settings = Settings::default();
        let probe = MarkerProbe::new(&frame, 300, 300, &settings);

        let detected = canonical.rotated(2);
        let orientation = resolve_orientation(
            &detected,
            &TargetFrame::canvas(300, 300),
            &settings.rectangle,
            |q, r| probe.check(q, r),
        )
        .unwrap();

        assert_eq!(orientation.attempts, 3);
        assert_eq!(orientation.corners, canonical);
    }
}
