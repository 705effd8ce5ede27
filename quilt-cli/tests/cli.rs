//! End-to-end tests for the quilt CLI.

use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use quilt_cli::{run, CliArgs, CliConfig};
use quilt_core::ViewInterpolation;
use quilt_renderer::{BackendType, RenderMode};

// ============================================================================
// Fixtures
// ============================================================================

const CONFIG: &str = r#"{
    "backend": "cpu",
    "layout": {
        "custom": {
            "quilt_width": 64,
            "quilt_height": 48,
            "view_columns": 4,
            "view_rows": 3,
            "num_views": 12
        }
    }
}"#;

const CALIBRATION: &str = r#"{
    "screen_width": 48,
    "screen_height": 64,
    "pitch": 12.0,
    "slope": -5.0,
    "center": 0.1,
    "subpixel_size": 0.0069,
    "serial": "TEST-0001"
}"#;

fn write_fixtures(dir: &Path) -> (PathBuf, PathBuf) {
    let config = dir.join("renderer.json");
    let calibration = dir.join("visual.json");
    fs::write(&config, CONFIG).unwrap();
    fs::write(&calibration, CALIBRATION).unwrap();
    (config, calibration)
}

fn args(dir: &Path, extra: &[&str]) -> CliArgs {
    let (config, calibration) = write_fixtures(dir);
    let output = dir.join("out.png");
    let mut argv = vec![
        "quilt-cli".to_string(),
        "--config".to_string(),
        config.display().to_string(),
        "--calibration".to_string(),
        calibration.display().to_string(),
        "--output".to_string(),
        output.display().to_string(),
    ];
    argv.extend(extra.iter().map(ToString::to_string));
    CliArgs::try_parse_from(argv).unwrap()
}

// ============================================================================
// Argument Parsing
// ============================================================================

#[test]
fn test_parse_enum_flags() {
    let args = CliArgs::try_parse_from([
        "quilt-cli",
        "--interpolation",
        "every_other",
        "--backend",
        "cpu",
        "--device",
        "four_k",
        "--preview",
    ])
    .unwrap();
    assert_eq!(args.interpolation, Some(ViewInterpolation::EveryOther));
    assert_eq!(args.backend, Some(BackendType::Cpu));
    assert_eq!(args.frames, 1);

    let config = CliConfig::try_from(args).unwrap();
    assert_eq!(config.renderer.mode, RenderMode::Preview2D);
    assert_eq!(config.renderer.interpolation.mode, ViewInterpolation::EveryOther);
}

#[test]
fn test_unknown_enum_value_rejected() {
    let result = CliArgs::try_parse_from(["quilt-cli", "--interpolation", "every_third"]);
    assert!(result.is_err());
}

#[test]
fn test_missing_config_file_is_an_error() {
    let args = CliArgs::try_parse_from(["quilt-cli", "--config", "/nonexistent/renderer.json"]).unwrap();
    let err = CliConfig::try_from(args).unwrap_err();
    assert!(err.to_string().contains("renderer.json"));
}

#[test]
fn test_invalid_calibration_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("visual.json");
    fs::write(&path, r#"{"screen_width": 0, "screen_height": 64}"#).unwrap();
    let args = CliArgs::try_parse_from(["quilt-cli", "--calibration", path.to_str().unwrap()]).unwrap();
    assert!(CliConfig::try_from(args).is_err());
}

// ============================================================================
// Rendering
// ============================================================================

#[test]
fn test_run_writes_lightfield_at_screen_size() {
    let dir = tempfile::tempdir().unwrap();
    let quilt_path = dir.path().join("quilt.png");
    let config = CliConfig::try_from(args(
        dir.path(),
        &["--interpolation", "every_other", "--quilt-output", quilt_path.to_str().unwrap()],
    ))
    .unwrap();

    let summary = run(&config).unwrap();
    assert!(summary.calibration_found);
    assert_eq!(summary.output_size, (48, 64));
    assert_eq!(summary.stats.frames_rendered, 1);

    let lightfield = image::open(&config.output).unwrap();
    assert_eq!((lightfield.width(), lightfield.height()), (48, 64));
    let quilt = image::open(&quilt_path).unwrap();
    assert_eq!((quilt.width(), quilt.height()), (64, 48));
}

#[test]
fn test_run_preview_with_depth_of_field() {
    let dir = tempfile::tempdir().unwrap();
    let config = CliConfig::try_from(args(dir.path(), &["--preview", "--depth-of-field", "--frames", "3"])).unwrap();

    let summary = run(&config).unwrap();
    assert_eq!(summary.stats.frames_rendered, 3);
    assert_eq!(summary.stats.total_views_interpolated, 0);
    assert!(config.output.exists());
}

#[test]
fn test_run_with_override_quilt() {
    let dir = tempfile::tempdir().unwrap();
    let override_path = dir.path().join("override.png");
    image::RgbaImage::from_pixel(64, 48, image::Rgba([200, 40, 10, 255]))
        .save(&override_path)
        .unwrap();

    let config = CliConfig::try_from(args(dir.path(), &["--override-quilt", override_path.to_str().unwrap()])).unwrap();
    let summary = run(&config).unwrap();
    assert_eq!(summary.stats.total_views_rendered, 0);

    // Every subpixel samples the same solid quilt
    let lightfield = image::open(&config.output).unwrap().to_rgba8();
    assert!(lightfield.pixels().all(|p| p.0 == [200, 40, 10, 255]));
}
