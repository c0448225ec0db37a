use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::contours::{find_contours, BorderType, Contour};
use imageproc::distance_transform::Norm;
use imageproc::morphology::{dilate, erode};
use imageproc::rect::Rect;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ColorSettings;
use crate::geometry::{CornerQuad, Point2D};

/// Pixel colour in OpenCV's 8-bit HSV convention (H in [0, 180))
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hsv {
    pub h: u8,
    pub s: u8,
    pub v: u8,
}

impl From<Rgb<u8>> for Hsv {
    fn from(pixel: Rgb<u8>) -> Self {
        let [r, g, b] = pixel.0.map(|c| c as f64);
        let v = r.max(g).max(b);
        let min = r.min(g).min(b);
        let diff = v - min;

        let s = if v > 0.0 { 255.0 * diff / v } else { 0.0 };

        let mut h = if diff == 0.0 {
            0.0
        } else if v == r {
            60.0 * (g - b) / diff
        } else if v == g {
            120.0 + 60.0 * (b - r) / diff
        } else {
            240.0 + 60.0 * (r - g) / diff
        };
        if h < 0.0 {
            h += 360.0;
        }

        Self {
            h: (h / 2.0).round().clamp(0.0, 255.0) as u8,
            s: s.round() as u8,
            v: v as u8,
        }
    }
}

/// Inclusive HSV box
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HsvRange {
    pub lower: [u8; 3],
    pub upper: [u8; 3],
}

impl HsvRange {
    pub fn new(lower: [u8; 3], upper: [u8; 3]) -> Self {
        Self { lower, upper }
    }

    pub fn contains(&self, hsv: Hsv) -> bool {
        let values = [hsv.h, hsv.s, hsv.v];
        (0..3).all(|i| values[i] >= self.lower[i] && values[i] <= self.upper[i])
    }
}

/// Binary mask (255 = inside) of pixels matching any of the ranges
pub fn color_mask(img: &RgbImage, ranges: &[HsvRange]) -> GrayImage {
    let (width, height) = img.dimensions();
    GrayImage::from_fn(width, height, |x, y| {
        let hsv = Hsv::from(*img.get_pixel(x, y));
        if ranges.iter().any(|r| r.contains(hsv)) {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

/// Dilate then erode with a 3x3 square, closing pinholes in blobs
pub fn close_mask(mask: &GrayImage) -> GrayImage {
    erode(&dilate(mask, Norm::LInf, 1), Norm::LInf, 1)
}

/// Paint masked pixels white, leaving only what lies outside the mask
pub fn remove_mask(img: &RgbImage, mask: &GrayImage) -> RgbImage {
    let mut out = img.clone();
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        if mask.get_pixel(x, y)[0] > 0 {
            *pixel = Rgb([255, 255, 255]);
        }
    }
    out
}

/// Outermost contours of the mask's blobs
fn external_contours(mask: &GrayImage) -> Vec<Vec<Point2D>> {
    find_contours::<i32>(mask)
        .into_iter()
        .filter(|c: &Contour<i32>| matches!(c.border_type, BorderType::Outer) && c.parent.is_none())
        .map(|c| {
            c.points
                .iter()
                .map(|p| Point2D::new(p.x as f64, p.y as f64))
                .collect()
        })
        .collect()
}

/// Perpendicular distance from `p` to the line through `a` and `b`
fn line_distance(a: &Point2D, b: &Point2D, p: &Point2D) -> f64 {
    let len = a.distance(b);
    if len < f64::EPSILON {
        return a.distance(p);
    }
    ((b.x - a.x) * (a.y - p.y) - (a.x - p.x) * (b.y - a.y)).abs() / len
}

/// Douglas-Peucker on an open polyline; pushes every kept point except the last
fn simplify_open(points: &[Point2D], epsilon: f64, out: &mut Vec<Point2D>) {
    let (first, last) = (points[0], points[points.len() - 1]);
    let (index, dmax) = points
        .iter()
        .enumerate()
        .skip(1)
        .take(points.len().saturating_sub(2))
        .map(|(i, p)| (i, line_distance(&first, &last, p)))
        .fold((0, 0.0), |best, cur| if cur.1 > best.1 { cur } else { best });

    if dmax > epsilon {
        simplify_open(&points[..=index], epsilon, out);
        simplify_open(&points[index..], epsilon, out);
    } else {
        out.push(first);
    }
}

/// Approximate a closed contour with a polygon whose edges stay within
/// `epsilon` pixels of the contour
pub fn approximate_polygon(contour: &[Point2D], epsilon: f64) -> Vec<Point2D> {
    if contour.len() < 3 {
        return contour.to_vec();
    }

    let start = contour[0];
    let far = contour
        .iter()
        .enumerate()
        .map(|(i, p)| (i, start.distance(p)))
        .fold((0, 0.0), |best, cur| if cur.1 > best.1 { cur } else { best })
        .0;
    if far == 0 {
        return vec![start];
    }

    let mut out = Vec::new();
    simplify_open(&contour[..=far], epsilon, &mut out);
    let mut tail = contour[far..].to_vec();
    tail.push(start);
    simplify_open(&tail, epsilon, &mut out);
    out
}

/// Enclosed area of a closed polygon
pub fn polygon_area(points: &[Point2D]) -> f64 {
    let n = points.len();
    if n < 3 {
        return 0.0;
    }
    let twice: f64 = (0..n)
        .map(|i| {
            let j = (i + 1) % n;
            points[i].x * points[j].y - points[j].x * points[i].y
        })
        .sum();
    twice.abs() / 2.0
}

/// Pixel bounding box, inclusive of both end pixels
pub fn bounding_rect(points: &[Point2D]) -> Option<Rect> {
    if points.is_empty() {
        return None;
    }
    let min_x = points.iter().map(|p| p.x).fold(f64::INFINITY, f64::min);
    let max_x = points.iter().map(|p| p.x).fold(f64::NEG_INFINITY, f64::max);
    let min_y = points.iter().map(|p| p.y).fold(f64::INFINITY, f64::min);
    let max_y = points.iter().map(|p| p.y).fold(f64::NEG_INFINITY, f64::max);

    let width = (max_x - min_x).round() as u32 + 1;
    let height = (max_y - min_y).round() as u32 + 1;
    Some(Rect::at(min_x.round() as i32, min_y.round() as i32).of_size(width, height))
}

/// Find the quadrilateral outline of the reference rectangle's border
///
/// Contours with too few points are skipped; among those whose polygon
/// approximation has exactly four vertices, the one enclosing the largest
/// area wins, so the result does not depend on contour discovery order. The
/// corners are returned clockwise, starting at the first approximated vertex.
pub fn find_border_quad(mask: &GrayImage, min_points: usize, epsilon: f64) -> Option<CornerQuad> {
    let contours = external_contours(mask);
    debug!("Border mask: {} contours", contours.len());

    let mut best: Option<(f64, CornerQuad)> = None;
    for (i, contour) in contours.iter().enumerate() {
        if contour.len() <= min_points {
            continue;
        }
        let approx = approximate_polygon(contour, epsilon);
        debug!(
            contour = i,
            points = contour.len(),
            vertices = approx.len(),
            "Approximated border contour"
        );
        if approx.len() != 4 {
            continue;
        }
        let Ok(quad) = CornerQuad::from_slice(&approx) else {
            continue;
        };
        let area = polygon_area(&approx);
        if best.as_ref().map_or(true, |(best_area, _)| area > *best_area) {
            best = Some((area, quad));
        }
    }

    best.map(|(_, quad)| quad.to_clockwise())
}

/// Polygon outline of the orientation marker
///
/// Returns the first approximation with four vertices, otherwise the last
/// approximation computed, or `None` when no contour qualifies.
pub fn find_marker_polygon(
    mask: &GrayImage,
    min_points: usize,
    epsilon: f64,
) -> Option<Vec<Point2D>> {
    let mut last = None;
    for contour in external_contours(mask) {
        if contour.len() <= min_points {
            continue;
        }
        let approx = approximate_polygon(&contour, epsilon);
        if approx.len() == 4 {
            return Some(approx);
        }
        last = Some(approx);
    }
    last
}

/// Bounding boxes of label blobs large enough to hold a digit
pub fn find_label_boxes(mask: &GrayImage, min_area: f64, epsilon: f64) -> Vec<Rect> {
    external_contours(mask)
        .iter()
        .filter(|contour| polygon_area(contour) >= min_area)
        .filter_map(|contour| bounding_rect(&approximate_polygon(contour, epsilon)))
        .collect()
}

// Minimum contour sizes for the region survey, per colour class
const SURVEY_MIN_POINTS_RED: usize = 50;
const SURVEY_MIN_POINTS_BLUE: usize = 4;
const SURVEY_MIN_POINTS_GREEN: usize = 30;

/// Number of coloured regions found on a rectified surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegionSurvey {
    pub red: usize,
    pub blue: usize,
    pub green: usize,
}

fn count_regions(img: &RgbImage, ranges: &[HsvRange], min_points: usize) -> usize {
    external_contours(&color_mask(img, ranges))
        .iter()
        .filter(|contour| contour.len() > min_points)
        .count()
}

/// Count red, blue and green regions on the rectified surface
pub fn survey_regions(img: &RgbImage, colors: &ColorSettings) -> RegionSurvey {
    let survey = RegionSurvey {
        red: count_regions(img, &colors.red, SURVEY_MIN_POINTS_RED),
        blue: count_regions(img, &colors.marker, SURVEY_MIN_POINTS_BLUE),
        green: count_regions(img, &colors.label, SURVEY_MIN_POINTS_GREEN),
    };
    info!(
        red = survey.red,
        blue = survey.blue,
        green = survey.green,
        "Colour regions on rectified surface"
    );
    survey
}
