use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use image::RgbImage;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use ipm_rectify::cli::output_path;
use ipm_rectify::{
    apply_transform, auto_calibration, load_coefficients, load_image, load_settings,
    manual_calibration, read_digits, rectify_and_crop, spawn_line_reader, survey_regions,
    undistort_image, Cli, Command, FullCalibration, Settings, TesseractCli,
};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose when set
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.default_log_filter())),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    let mut settings = match &cli.config {
        Some(path) => load_settings(path)?,
        None => Settings::default(),
    };
    if let Some(rect) = cli.rect {
        settings.rectangle = rect;
    }

    match cli.command {
        Command::Calibrate {
            image,
            intrinsics,
            params,
            output,
            pick_timeout,
        } => run_calibrate(
            &image,
            &intrinsics,
            &params,
            output.as_ref(),
            pick_timeout.map(Duration::from_secs),
            &settings,
        ),
        Command::Auto {
            image,
            intrinsics,
            params,
            output,
            read_digits,
        } => run_auto(
            &image,
            &intrinsics,
            &params,
            output.as_ref(),
            read_digits,
            &settings,
        ),
        Command::Warp {
            image,
            params,
            output,
            undistort,
        } => run_warp(&image, &params, output.as_ref(), undistort),
    }
}

fn run_calibrate(
    image: &Path,
    intrinsics_path: &Path,
    params: &Path,
    output: Option<&PathBuf>,
    pick_timeout: Option<Duration>,
    settings: &Settings,
) -> Result<()> {
    let intrinsics = load_coefficients(intrinsics_path)
        .context("Failed to load intrinsic calibration")?;
    let frame = load_image(image)?;
    let undistorted = undistort_image(&frame, &intrinsics).context("Failed to undistort image")?;

    eprintln!(
        "Image is {}x{}. Enter points as 'x y', one per line ('q' to abort).",
        undistorted.width(),
        undistorted.height()
    );

    let (tx, rx) = crossbeam_channel::unbounded();
    let _reader = spawn_line_reader(BufReader::new(std::io::stdin()), tx);

    let result = manual_calibration(&rx, &settings.rectangle, pick_timeout)
        .context("Manual calibration failed")?;

    FullCalibration::new(&intrinsics, result.pixel_scale_mm_per_px, &result.transform)
        .save(params)
        .context("Failed to store calibration")?;

    if let Some(preview) = output {
        let rectified = rectify_and_crop(&undistorted, &result)?;
        save_image(&rectified, preview)?;
    }

    print_transform(&result.transform);
    println!("Pixel scale: {:.4} mm/px", result.pixel_scale_mm_per_px);
    Ok(())
}

fn run_auto(
    image: &Path,
    intrinsics_path: &Path,
    params: &Path,
    output: Option<&PathBuf>,
    with_digits: bool,
    settings: &Settings,
) -> Result<()> {
    let intrinsics = load_coefficients(intrinsics_path)
        .context("Failed to load intrinsic calibration")?;
    let frame = load_image(image)?;
    let undistorted = undistort_image(&frame, &intrinsics).context("Failed to undistort image")?;

    let orientation =
        auto_calibration(&undistorted, settings).context("Automated calibration failed")?;
    let result = &orientation.result;

    FullCalibration::new(&intrinsics, result.pixel_scale_mm_per_px, &result.transform)
        .save(params)
        .context("Failed to store calibration")?;

    let rectified = rectify_and_crop(&undistorted, result)?;
    let output_path = output_path(image, output);
    save_image(&rectified, &output_path)?;

    print_transform(&result.transform);
    println!("Pixel scale: {:.4} mm/px", result.pixel_scale_mm_per_px);

    survey_regions(&rectified, &settings.colors);

    if with_digits {
        let mut recognizer = TesseractCli::new(settings.ocr.clone());
        let readings = read_digits(&rectified, settings, &mut recognizer);
        for reading in readings {
            let (x, y) = (reading.bbox.left(), reading.bbox.top());
            match reading.text {
                Some(digits) => println!("Digit at ({}, {}): {}", x, y, digits),
                None => println!("Digit at ({}, {}): unreadable", x, y),
            }
        }
    }

    Ok(())
}

fn run_warp(image: &Path, params: &Path, output: Option<&PathBuf>, undistort: bool) -> Result<()> {
    let calibration = FullCalibration::load(params).context("Failed to load calibration")?;
    let transform = calibration.transform(params)?;

    let mut frame = load_image(image)?;
    if undistort {
        let intrinsics = calibration.intrinsics(params)?;
        frame = undistort_image(&frame, &intrinsics).context("Failed to undistort image")?;
    }

    let (width, height) = frame.dimensions();
    let warped = apply_transform(&frame, &transform, width, height)
        .context("Failed to apply stored transform")?;

    let output_path = output_path(image, output);
    save_image(&warped, &output_path)?;
    eprintln!(
        "Pixel scale of stored calibration: {:.4} mm/px",
        calibration.pixel_scale
    );
    Ok(())
}

fn save_image(img: &RgbImage, path: &Path) -> Result<()> {
    img.save(path)
        .with_context(|| format!("Failed to save output: {:?}", path))?;
    eprintln!("Saved rectified image: {:?} ({}x{})", path, img.width(), img.height());
    Ok(())
}

fn print_transform(transform: &nalgebra::Matrix3<f64>) {
    eprintln!("Perspective transform:");
    for row in 0..3 {
        eprintln!(
            "  [{:12.6}, {:12.6}, {:12.6}]",
            transform[(row, 0)],
            transform[(row, 1)],
            transform[(row, 2)]
        );
    }
}
