//! Digit recognition on label crops.
//!
//! The OCR engine itself is an external collaborator behind
//! [`DigitRecognizer`]; [`TesseractCli`] drives the `tesseract` executable in
//! single-character mode with a digits-only whitelist.

use std::process::Command;

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, RgbImage};
use imageproc::distance_transform::Norm;
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology::erode;
use imageproc::rect::Rect;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::config::{OcrSettings, Settings};
use crate::error::{RectifyError, Result};
use crate::segmentation::{close_mask, color_mask, find_label_boxes, remove_mask};

/// Anything that can turn a prepared label crop into text
pub trait DigitRecognizer {
    fn recognize(&mut self, roi: &GrayImage) -> Result<String>;
}

/// Tesseract driven through its command line
#[derive(Debug, Clone)]
pub struct TesseractCli {
    settings: OcrSettings,
}

impl TesseractCli {
    pub fn new(settings: OcrSettings) -> Self {
        Self { settings }
    }
}

impl DigitRecognizer for TesseractCli {
    fn recognize(&mut self, roi: &GrayImage) -> Result<String> {
        let temp_input = NamedTempFile::with_suffix(".png")?;
        roi.save(temp_input.path())
            .map_err(|e| RectifyError::Ocr(format!("failed to write crop: {}", e)))?;

        let output = Command::new(&self.settings.executable)
            .arg(temp_input.path())
            .arg("stdout")
            .arg("-l")
            .arg(&self.settings.language)
            .arg("--psm")
            .arg(self.settings.psm.to_string())
            .arg("-c")
            .arg(format!("tessedit_char_whitelist={}", self.settings.whitelist))
            .output()
            .map_err(|e| {
                RectifyError::Ocr(format!("failed to run {}: {}", self.settings.executable, e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RectifyError::Ocr(format!("tesseract failed: {}", stderr.trim())));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Keep only ASCII digits; empty results are `RecognitionEmpty`
pub fn sanitize_digits(raw: &str) -> Result<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        Err(RectifyError::RecognitionEmpty)
    } else {
        Ok(digits)
    }
}

/// Crop a label and clean it up for single-character recognition
///
/// Resize to a fixed square, binarize, then thin and smooth the strokes.
pub fn prepare_roi(filtered: &RgbImage, bbox: Rect, settings: &OcrSettings) -> Option<GrayImage> {
    let (img_w, img_h) = filtered.dimensions();
    let x0 = bbox.left().max(0) as u32;
    let y0 = bbox.top().max(0) as u32;
    let x1 = ((bbox.left() + bbox.width() as i32).max(0) as u32).min(img_w);
    let y1 = ((bbox.top() + bbox.height() as i32).max(0) as u32).min(img_h);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }

    let crop = imageops::crop_imm(filtered, x0, y0, x1 - x0, y1 - y0).to_image();
    let resized = imageops::resize(&crop, settings.roi_size, settings.roi_size, FilterType::Triangle);
    let gray = imageops::grayscale(&resized);

    let threshold = settings.threshold;
    let binary = GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        if gray.get_pixel(x, y)[0] > threshold {
            Luma([255])
        } else {
            Luma([0])
        }
    });

    let eroded = erode(&binary, Norm::LInf, 2);
    let blurred = gaussian_blur_f32(&eroded, 2.0);
    Some(erode(&blurred, Norm::LInf, 2))
}

/// One label region and what was read from it
#[derive(Debug, Clone, PartialEq)]
pub struct DigitReading {
    pub bbox: Rect,
    /// `None` when recognition produced nothing usable
    pub text: Option<String>,
}

/// Locate green labels on a rectified image and read the digit on each
///
/// Recognition failures are per label: they are logged, recorded as an empty
/// reading, and the remaining labels are still processed.
pub fn read_digits<R: DigitRecognizer>(
    img: &RgbImage,
    settings: &Settings,
    recognizer: &mut R,
) -> Vec<DigitReading> {
    let mask = close_mask(&color_mask(img, &settings.colors.label));
    let boxes = find_label_boxes(
        &mask,
        settings.segmentation.label_min_area,
        settings.segmentation.label_epsilon,
    );
    info!("Found {} label candidates", boxes.len());

    let filtered = remove_mask(img, &mask);

    boxes
        .into_iter()
        .filter_map(|bbox| {
            let roi = prepare_roi(&filtered, bbox, &settings.ocr)?;
            let text = match recognizer.recognize(&roi).and_then(|raw| sanitize_digits(&raw)) {
                Ok(digits) => {
                    info!(
                        "Recognized digit: {} at ({}, {})",
                        digits,
                        bbox.left(),
                        bbox.top()
                    );
                    Some(digits)
                }
                Err(e) => {
                    warn!("Label at ({}, {}): {}", bbox.left(), bbox.top(), e);
                    None
                }
            };
            debug!(?bbox, ?text, "Label processed");
            Some(DigitReading { bbox, text })
        })
        .collect()
}
