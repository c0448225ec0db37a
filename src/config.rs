//! Detection and recognition settings.
//!
//! Stored in TOML; every section is optional and falls back to the values
//! tuned for the reference rig (1 m x 1.5 m black border, blue orientation
//! marker, green digit labels).

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::geometry::RectangleSpec;
use crate::orientation::MarkerRegion;
use crate::segmentation::HsvRange;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub rectangle: RectangleSpec,
    pub colors: ColorSettings,
    pub segmentation: SegmentationSettings,
    pub marker: MarkerRegion,
    pub ocr: OcrSettings,
}

/// HSV ranges (OpenCV 8-bit convention) for each colour class
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorSettings {
    pub border: Vec<HsvRange>,
    pub marker: Vec<HsvRange>,
    pub label: Vec<HsvRange>,
    /// Only used for the region survey of the rectified surface
    pub red: Vec<HsvRange>,
}

impl Default for ColorSettings {
    fn default() -> Self {
        Self {
            border: vec![HsvRange::new([0, 0, 0], [180, 255, 100])],
            marker: vec![HsvRange::new([100, 50, 55], [115, 255, 255])],
            label: vec![HsvRange::new([40, 60, 119], [88, 249, 255])],
            red: vec![
                HsvRange::new([10, 0, 38], [19, 250, 229]),
                HsvRange::new([160, 10, 10], [179, 255, 255]),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationSettings {
    /// Border contours with fewer points are ignored
    pub border_min_points: usize,
    pub border_epsilon: f64,
    pub marker_min_points: usize,
    pub marker_epsilon: f64,
    /// Label blobs below this area (px²) are treated as noise
    pub label_min_area: f64,
    pub label_epsilon: f64,
}

impl Default for SegmentationSettings {
    fn default() -> Self {
        Self {
            border_min_points: 200,
            border_epsilon: 20.0,
            marker_min_points: 4,
            marker_epsilon: 40.0,
            label_min_area: 100.0,
            label_epsilon: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrSettings {
    pub executable: String,
    pub language: String,
    /// Tesseract page segmentation mode (10 = single character)
    pub psm: u32,
    pub whitelist: String,
    /// Side length the label crop is resized to before recognition
    pub roi_size: u32,
    pub threshold: u8,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            executable: "tesseract".to_string(),
            language: "eng".to_string(),
            psm: 10,
            whitelist: "0123456789".to_string(),
            roi_size: 200,
            threshold: 80,
        }
    }
}

/// Load settings from a TOML file
pub fn load_settings(path: &Path) -> Result<Settings> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings file: {:?}", path))?;
    let settings: Settings = toml::from_str(&content)
        .with_context(|| format!("Failed to parse settings file: {:?}", path))?;
    Ok(settings)
}
