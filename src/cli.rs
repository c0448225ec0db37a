use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::geometry::RectangleSpec;

#[derive(Parser, Debug)]
#[command(name = "ipm-rectify")]
#[command(version, about = "Compute a ground-plane perspective mapping and read digit labels on the rectified surface")]
pub struct Cli {
    /// Settings file (TOML) with colour ranges and thresholds
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Show detection details
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Real rectangle size in millimeters, e.g. "1000x1500" [default: from settings]
    #[arg(long, global = true, value_parser = parse_rectangle)]
    pub rect: Option<RectangleSpec>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Pick the rectangle corners and the output frame by hand
    Calibrate {
        /// Calibration image path
        image: PathBuf,

        /// Intrinsic calibration file (camera_matrix, distortion_coefficients)
        #[arg(short, long, default_value = "config/intrinsic_calibration.json")]
        intrinsics: PathBuf,

        /// Where to store the full calibration
        #[arg(short, long, default_value = "config/fullCalibration.json")]
        params: PathBuf,

        /// Save the rectified preview here
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Give up waiting for points after this many seconds
        #[arg(long)]
        pick_timeout: Option<u64>,
    },

    /// Detect the border automatically and orient it with the blue marker
    Auto {
        /// Calibration image path
        image: PathBuf,

        /// Intrinsic calibration file (camera_matrix, distortion_coefficients)
        #[arg(short, long, default_value = "config/intrinsic_calibration.json")]
        intrinsics: PathBuf,

        /// Where to store the full calibration
        #[arg(short, long, default_value = "config/fullCalibration.json")]
        params: PathBuf,

        /// Output path [default: input_rectified.png]
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Read the green digit labels on the rectified image
        #[arg(long)]
        read_digits: bool,
    },

    /// Apply a stored perspective transform to an image
    Warp {
        /// Image to rectify
        image: PathBuf,

        /// Full calibration file written by `calibrate` or `auto`
        #[arg(short, long, default_value = "config/fullCalibration.json")]
        params: PathBuf,

        /// Output path [default: input_rectified.png]
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Image is raw camera output and must be undistorted first
        #[arg(long)]
        undistort: bool,
    },
}

impl Cli {
    /// Log filter used when `RUST_LOG` is unset
    pub fn default_log_filter(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else {
            "info"
        }
    }
}

/// `output` if given, otherwise `<input stem>_rectified.png` next to the input
pub fn output_path(input: &Path, output: Option<&PathBuf>) -> PathBuf {
    output.cloned().unwrap_or_else(|| {
        let stem = input.file_stem().unwrap_or_default().to_string_lossy();
        let parent = input.parent().unwrap_or(Path::new("."));
        parent.join(format!("{}_rectified.png", stem))
    })
}

fn parse_rectangle(s: &str) -> Result<RectangleSpec, String> {
    let parts: Vec<&str> = s.split(['x', 'X']).collect();
    if parts.len() != 2 {
        return Err(format!("Invalid rectangle '{}', expected WxH in mm", s));
    }

    let width: f64 = parts[0]
        .trim()
        .parse()
        .map_err(|_| format!("Invalid width value: {}", parts[0]))?;
    let height: f64 = parts[1]
        .trim()
        .parse()
        .map_err(|_| format!("Invalid height value: {}", parts[1]))?;

    if width <= 0.0 || height <= 0.0 {
        return Err("Rectangle sides must be positive".to_string());
    }

    Ok(RectangleSpec::new(width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rectangle() {
        let rect = parse_rectangle("1000x1500").unwrap();
        assert_eq!(rect, RectangleSpec::new(1000.0, 1500.0));
        assert!(parse_rectangle("1000").is_err());
        assert!(parse_rectangle("0x10").is_err());
        assert!(parse_rectangle("ax10").is_err());
    }

    #[test]
    fn test_default_output_path() {
        let path = output_path(Path::new("shots/board.jpg"), None);
        assert_eq!(path, PathBuf::from("shots/board_rectified.png"));
        let explicit = PathBuf::from("out.png");
        assert_eq!(output_path(Path::new("a.png"), Some(&explicit)), explicit);
    }

    #[test]
    fn test_verbose_selects_debug_filter() {
        let quiet = Cli::try_parse_from(["ipm-rectify", "warp", "a.png"]).unwrap();
        assert_eq!(quiet.default_log_filter(), "info");
        let verbose = Cli::try_parse_from(["ipm-rectify", "warp", "a.png", "--verbose"]).unwrap();
        assert_eq!(verbose.default_log_filter(), "debug");
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::try_parse_from([
            "ipm-rectify",
            "--rect",
            "500x750",
            "auto",
            "frame.png",
            "--read-digits",
        ])
        .unwrap();
        assert_eq!(cli.rect, Some(RectangleSpec::new(500.0, 750.0)));
        match cli.command {
            Command::Auto {
                image, read_digits, ..
            } => {
                assert_eq!(image, PathBuf::from("frame.png"));
                assert!(read_digits);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
