use std::path::Path;
use std::time::Duration;

use crossbeam_channel::Receiver;
use image::{ImageReader, RgbImage};
use tracing::info;

use crate::config::Settings;
use crate::error::{RectifyError, Result};
use crate::geometry::{CornerQuad, RectangleSpec, TargetFrame};
use crate::orientation::{resolve_orientation, MarkerProbe, Orientation};
use crate::picker::{pick_points, PickEvent};
use crate::rectifier::{compute_transform, RectifierResult};
use crate::segmentation::{color_mask, find_border_quad};
use crate::transform::{apply_transform, crop_to_rectified};

/// Load and decode an image as RGB
pub fn load_image(path: &Path) -> Result<RgbImage> {
    let img = ImageReader::open(path)
        .map_err(|e| RectifyError::ImageLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?
        .decode()
        .map_err(|e| RectifyError::ImageLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    info!("Loaded image: {:?} ({}x{})", path, img.width(), img.height());
    Ok(img.to_rgb8())
}

/// Manual calibration: four corners, then origin and far corner of the output
///
/// Corners must be clicked starting at the corner that becomes the origin of
/// the top-down view, proceeding clockwise.
pub fn manual_calibration(
    events: &Receiver<PickEvent>,
    rect: &RectangleSpec,
    timeout: Option<Duration>,
) -> Result<RectifierResult> {
    info!("Pick the 4 rectangle corners, clockwise from the origin corner");
    let corners = CornerQuad::from_slice(&pick_points(events, 4, timeout)?)?;

    info!("Pick the origin and the far corner of the top-down view");
    let target_points = pick_points(events, 2, timeout)?;
    let target = TargetFrame::new(target_points[0], target_points[1]);

    compute_transform(&corners, &target, rect)
}

/// Automated calibration: detect the black border and orient it by the marker
///
/// The whole frame is used as the output canvas.
pub fn auto_calibration(frame: &RgbImage, settings: &Settings) -> Result<Orientation> {
    let (width, height) = frame.dimensions();

    let mask = color_mask(frame, &settings.colors.border);
    let corners = find_border_quad(
        &mask,
        settings.segmentation.border_min_points,
        settings.segmentation.border_epsilon,
    )
    .ok_or_else(|| RectifyError::degenerate("no four-cornered border found"))?;
    info!("Detected border corners: {:?}", corners.points);

    let probe = MarkerProbe::new(frame, width, height, settings);
    resolve_orientation(
        &corners,
        &TargetFrame::canvas(width, height),
        &settings.rectangle,
        |quad, result| probe.check(quad, result),
    )
}

/// Warp a frame to the top-down view and crop it to the rectified rectangle
pub fn rectify_and_crop(frame: &RgbImage, result: &RectifierResult) -> Result<RgbImage> {
    let (width, height) = frame.dimensions();
    let warped = apply_transform(frame, &result.transform, width, height)?;
    Ok(crop_to_rectified(&warped, result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Point2D;
    use crossbeam_channel::unbounded;
    use image::Rgb;
    use imageproc::drawing::draw_filled_rect_mut;
    use imageproc::rect::Rect;

    #[test]
    fn test_load_missing_image() {
        let err = load_image(Path::new("/nonexistent/frame.png")).unwrap_err();
        assert!(matches!(err, RectifyError::ImageLoad { .. }));
    }

    #[test]
    fn test_manual_calibration_from_events() {
        let (tx, rx) = unbounded();
        for (x, y) in [
            (100.0, 100.0),
            (500.0, 100.0),
            (500.0, 700.0),
            (100.0, 700.0),
            (0.0, 0.0),
            (800.0, 1200.0),
        ] {
            tx.send(PickEvent::Click(Point2D::new(x, y))).unwrap();
        }

        let result = manual_calibration(&rx, &RectangleSpec::default(), None).unwrap();
        assert!((result.pixel_scale_mm_per_px - 1.25).abs() < 1e-9);
        assert_eq!(result.destination.points[2], Point2D::new(800.0, 1200.0));
    }

    #[test]
    fn test_manual_calibration_cancelled() {
        let (tx, rx) = unbounded();
        tx.send(PickEvent::Click(Point2D::new(1.0, 1.0))).unwrap();
        tx.send(PickEvent::Cancel).unwrap();
        let err = manual_calibration(&rx, &RectangleSpec::default(), None).unwrap_err();
        assert!(err.is_recoverable());
    }

    fn synthetic_board() -> RgbImage {
        // 300x450 white board with a black frame and a blue marker in the lower-left
        let mut frame = RgbImage::from_pixel(400, 500, Rgb([200, 200, 200]));
        draw_filled_rect_mut(&mut frame, Rect::at(50, 25).of_size(300, 450), Rgb([0, 0, 0]));
        draw_filled_rect_mut(&mut frame, Rect::at(62, 37).of_size(276, 426), Rgb([255, 255, 255]));
        draw_filled_rect_mut(&mut frame, Rect::at(75, 400).of_size(30, 40), Rgb([20, 60, 200]));
        frame
    }

    #[test]
    fn test_auto_calibration_finds_upright_orientation() {
        let frame = synthetic_board();
        let settings = Settings::default();
        let orientation = auto_calibration(&frame, &settings).unwrap();

        // the upright ordering starts at the board's top-left corner
        let origin = orientation.corners.points[0];
        assert!(origin.distance(&Point2D::new(50.0, 25.0)) < 3.0);
        assert!(orientation.attempts >= 1 && orientation.attempts <= 4);

        let rectified = rectify_and_crop(&frame, &orientation.result).unwrap();
        let (w, h) = rectified.dimensions();
        assert!((w as f64 / h as f64 - settings.rectangle.aspect()).abs() < 0.01);
    }

    #[test]
    fn test_auto_calibration_without_border() {
        let frame = RgbImage::from_pixel(100, 100, Rgb([255, 255, 255]));
        let err = auto_calibration(&frame, &Settings::default()).unwrap_err();
        assert!(matches!(err, RectifyError::DegenerateGeometry(_)));
    }

    #[test]
    fn test_auto_calibration_without_marker() {
        let mut frame = synthetic_board();
        draw_filled_rect_mut(&mut frame, Rect::at(75, 400).of_size(30, 40), Rgb([255, 255, 255]));
        let err = auto_calibration(&frame, &Settings::default()).unwrap_err();
        assert!(matches!(err, RectifyError::OrientationNotResolved { attempts: 4 }));
    }
}
