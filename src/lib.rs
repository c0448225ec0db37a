pub mod cli;
pub mod config;
pub mod error;
pub mod geometry;
pub mod ocr;
pub mod orientation;
pub mod params;
pub mod picker;
pub mod pipeline;
pub mod rectifier;
pub mod segmentation;
pub mod transform;
pub mod undistort;

pub use cli::{Cli, Command};
pub use config::{load_settings, Settings};
pub use error::{RectifyError, Result};
pub use geometry::{CornerQuad, Point2D, RectangleSpec, TargetFrame};
pub use ocr::{read_digits, DigitReading, DigitRecognizer, TesseractCli};
pub use orientation::{resolve_orientation, MarkerProbe, Orientation};
pub use params::{load_coefficients, FullCalibration};
pub use picker::{pick_points, spawn_line_reader, PickEvent};
pub use pipeline::{auto_calibration, load_image, manual_calibration, rectify_and_crop};
pub use rectifier::{compute_transform, RectifierResult};
pub use segmentation::{survey_regions, RegionSurvey};
pub use transform::{apply_transform, crop_to_rectified};
pub use undistort::{undistort_image, CameraIntrinsics};
