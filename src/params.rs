//! Calibration parameter files.
//!
//! Matrices are stored the way OpenCV serializes them: row and column counts
//! plus row-major data.

use std::path::Path;

use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{RectifyError, Result};
use crate::undistort::CameraIntrinsics;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixRecord {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f64>,
}

impl MatrixRecord {
    pub fn from_matrix3(m: &Matrix3<f64>) -> Self {
        let data = (0..3)
            .flat_map(|r| (0..3).map(move |c| m[(r, c)]))
            .collect();
        Self {
            rows: 3,
            cols: 3,
            data,
        }
    }

    pub fn from_vector(v: &[f64]) -> Self {
        Self {
            rows: 1,
            cols: v.len(),
            data: v.to_vec(),
        }
    }

    pub fn to_matrix3(&self) -> std::result::Result<Matrix3<f64>, String> {
        if self.rows != 3 || self.cols != 3 || self.data.len() != 9 {
            return Err(format!(
                "expected a 3x3 matrix, got {}x{} with {} values",
                self.rows,
                self.cols,
                self.data.len()
            ));
        }
        Ok(Matrix3::from_row_slice(&self.data))
    }

    pub fn to_vector(&self) -> std::result::Result<Vec<f64>, String> {
        if (self.rows > 1 && self.cols > 1) || self.data.len() != self.rows * self.cols {
            return Err(format!(
                "expected a vector, got {}x{} with {} values",
                self.rows,
                self.cols,
                self.data.len()
            ));
        }
        Ok(self.data.clone())
    }
}

/// Intrinsic calibration produced by a separate camera calibration step
#[derive(Debug, Clone, Serialize, Deserialize)]
struct IntrinsicRecord {
    camera_matrix: MatrixRecord,
    distortion_coefficients: MatrixRecord,
}

/// Everything downstream consumers need to rectify frames from this rig
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullCalibration {
    pub camera_matrix: MatrixRecord,
    pub dist_coeffs: MatrixRecord,
    pub pixel_scale: f64,
    pub persp_transf: MatrixRecord,
}

impl FullCalibration {
    pub fn new(intrinsics: &CameraIntrinsics, pixel_scale: f64, transform: &Matrix3<f64>) -> Self {
        Self {
            camera_matrix: MatrixRecord::from_matrix3(&intrinsics.camera_matrix),
            dist_coeffs: MatrixRecord::from_vector(&intrinsics.distortion),
            pixel_scale,
            persp_transf: MatrixRecord::from_matrix3(transform),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        read_record(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self).map_err(|e| RectifyError::ParamFormat {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        std::fs::write(path, content).map_err(|source| RectifyError::FileOpen {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Stored calibration parameters to {:?}", path);
        Ok(())
    }

    pub fn intrinsics(&self, path: &Path) -> Result<CameraIntrinsics> {
        let format_err = |reason: String| RectifyError::ParamFormat {
            path: path.to_path_buf(),
            reason,
        };
        Ok(CameraIntrinsics::new(
            self.camera_matrix.to_matrix3().map_err(format_err)?,
            self.dist_coeffs.to_vector().map_err(format_err)?,
        ))
    }

    pub fn transform(&self, path: &Path) -> Result<Matrix3<f64>> {
        self.persp_transf
            .to_matrix3()
            .map_err(|reason| RectifyError::ParamFormat {
                path: path.to_path_buf(),
                reason,
            })
    }
}

fn read_record<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|source| RectifyError::FileOpen {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|e| RectifyError::ParamFormat {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Load `camera_matrix` and `distortion_coefficients` from an intrinsics file
pub fn load_coefficients(path: &Path) -> Result<CameraIntrinsics> {
    let record: IntrinsicRecord = read_record(path)?;
    let format_err = |reason: String| RectifyError::ParamFormat {
        path: path.to_path_buf(),
        reason,
    };
    let intrinsics = CameraIntrinsics::new(
        record.camera_matrix.to_matrix3().map_err(format_err)?,
        record
            .distortion_coefficients
            .to_vector()
            .map_err(format_err)?,
    );
    info!(
        "Loaded intrinsics from {:?} ({} distortion coefficients)",
        path,
        intrinsics.distortion.len()
    );
    Ok(intrinsics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const INTRINSICS: &str = r#"{
        "camera_matrix": { "rows": 3, "cols": 3,
                           "data": [600.0, 0.0, 320.0, 0.0, 610.0, 240.0, 0.0, 0.0, 1.0] },
        "distortion_coefficients": { "rows": 1, "cols": 5,
                                     "data": [-0.25, 0.08, 0.001, -0.0005, 0.0] }
    }"#;

    #[test]
    fn test_load_coefficients() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(INTRINSICS.as_bytes()).unwrap();

        let intrinsics = load_coefficients(file.path()).unwrap();
        assert_eq!(intrinsics.camera_matrix[(0, 2)], 320.0);
        assert_eq!(intrinsics.camera_matrix[(1, 1)], 610.0);
        assert_eq!(intrinsics.distortion.len(), 5);
        assert_eq!(intrinsics.distortion[0], -0.25);
    }

    #[test]
    fn test_missing_file_is_file_open_error() {
        let err = load_coefficients(Path::new("/nonexistent/intrinsics.json")).unwrap_err();
        assert!(matches!(err, RectifyError::FileOpen { .. }));
    }

    #[test]
    fn test_wrong_matrix_shape_is_format_error() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(
            br#"{"camera_matrix": {"rows": 2, "cols": 2, "data": [1.0, 0.0, 0.0, 1.0]},
                 "distortion_coefficients": {"rows": 1, "cols": 0, "data": []}}"#,
        )
        .unwrap();
        let err = load_coefficients(file.path()).unwrap_err();
        assert!(matches!(err, RectifyError::ParamFormat { .. }));
    }

    #[test]
    fn test_full_calibration_file_keys() {
        let intrinsics = CameraIntrinsics::new(Matrix3::identity(), vec![0.1, 0.2, 0.0, 0.0, 0.0]);
        let transform = Matrix3::new(1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 1.0);
        let calib = FullCalibration::new(&intrinsics, 1.25, &transform);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fullCalibration.json");
        calib.save(&path).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        for key in ["camera_matrix", "dist_coeffs", "pixel_scale", "persp_transf"] {
            assert!(raw.get(key).is_some(), "missing key {}", key);
        }

        let loaded = FullCalibration::load(&path).unwrap();
        assert_eq!(loaded.pixel_scale, 1.25);
        assert_eq!(loaded.transform(&path).unwrap()[(0, 1)], 2.0);
        assert_eq!(loaded.transform(&path).unwrap()[(2, 0)], 7.0);
    }
}
