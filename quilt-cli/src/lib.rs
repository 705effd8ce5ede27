//! # Saorsa Quilt CLI
//!
//! Command-line host for the quilt renderer. Loads a calibration and a
//! renderer configuration, renders a demo scene for a number of frames and
//! writes the lightfield (and optionally the quilt) as PNG.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p quilt-cli -- --calibration visual.json --interpolation every_other
//! ```
//!
//! ## With a configuration file:
//!
//! ```bash
//! cargo run -p quilt-cli -- --config renderer.json --quilt-output quilt.png
//! ```
//!
//! ## Architecture
//!
//! - `CliArgs` - Command-line arguments parsed with clap
//! - `CliConfig` - Resolved configuration with files loaded
//! - `run` - Drives `quilt-renderer::QuiltRenderer` and writes the images

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use serde::de::DeserializeOwned;

use quilt_core::{Calibration, DeviceKind, LayoutSource, QuiltPreset, ViewInterpolation};
use quilt_renderer::{
    BackendType, CardScene, DepthOfField, FrameContext, FrameImage, FrameStats, QuiltRenderer, RenderMode,
    RendererConfig,
};

/// Parse a snake_case enum value through its serde form.
fn parse_enum<T: DeserializeOwned>(value: &str) -> Result<T, String> {
    serde_json::from_value(serde_json::Value::String(value.to_string()))
        .map_err(|_| format!("unknown value '{value}'"))
}

/// Command-line arguments for quilt-cli.
#[derive(Debug, Clone, Parser)]
#[command(name = "quilt-cli")]
#[command(about = "Render a multi-view quilt and its lightfield image")]
#[command(version)]
pub struct CliArgs {
    /// Renderer configuration (JSON)
    #[arg(long, env = "QUILT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Display calibration (JSON); the emulated device is used without it
    #[arg(long, env = "QUILT_CALIBRATION")]
    pub calibration: Option<PathBuf>,

    /// Device to emulate without a calibration (portrait, four_k, eight_k, legacy)
    #[arg(long, value_parser = parse_enum::<DeviceKind>)]
    pub device: Option<DeviceKind>,

    /// Quilt preset (automatic, portrait, hi_res_portrait, four_k_standard, eight_k_standard)
    #[arg(long, value_parser = parse_enum::<QuiltPreset>)]
    pub preset: Option<QuiltPreset>,

    /// View interpolation (none, every_other, every4th, every8th, four_views, two_views)
    #[arg(long, value_parser = parse_enum::<ViewInterpolation>)]
    pub interpolation: Option<ViewInterpolation>,

    /// Compute backend (gpu, cpu)
    #[arg(long, env = "QUILT_BACKEND", value_parser = parse_enum::<BackendType>)]
    pub backend: Option<BackendType>,

    /// Render the 2D center-view preview instead of the lightfield
    #[arg(long)]
    pub preview: bool,

    /// Apply the depth-of-field post-process
    #[arg(long)]
    pub depth_of_field: bool,

    /// Quilt image to show instead of rendering the scene
    #[arg(long)]
    pub override_quilt: Option<PathBuf>,

    /// Number of frames to render
    #[arg(long, default_value = "1")]
    pub frames: u64,

    /// Output path for the lightfield (or preview) PNG
    #[arg(long, short, default_value = "lightfield.png")]
    pub output: PathBuf,

    /// Also write the quilt PNG here
    #[arg(long)]
    pub quilt_output: Option<PathBuf>,

    /// Log as JSON lines
    #[arg(long, env = "QUILT_JSON_LOGS")]
    pub json_logs: bool,
}

/// Resolved CLI configuration.
#[derive(Debug, Clone)]
pub struct CliConfig {
    /// Renderer configuration.
    pub renderer: RendererConfig,
    /// Loaded calibration, if any.
    pub calibration: Option<Calibration>,
    /// Override quilt path.
    pub override_quilt: Option<PathBuf>,
    /// Apply depth of field.
    pub depth_of_field: bool,
    /// Frames to render.
    pub frames: u64,
    /// Lightfield output path.
    pub output: PathBuf,
    /// Quilt output path.
    pub quilt_output: Option<PathBuf>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            renderer: RendererConfig::default(),
            calibration: None,
            override_quilt: None,
            depth_of_field: false,
            frames: 1,
            output: PathBuf::from("lightfield.png"),
            quilt_output: None,
        }
    }
}

impl TryFrom<CliArgs> for CliConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> anyhow::Result<Self> {
        let mut renderer = match &args.config {
            Some(path) => {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                serde_json::from_str::<RendererConfig>(&text)
                    .with_context(|| format!("parsing config {}", path.display()))?
            }
            None => RendererConfig::default(),
        };

        let calibration = match &args.calibration {
            Some(path) => {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("reading calibration {}", path.display()))?;
                Some(
                    Calibration::from_json(&text)
                        .with_context(|| format!("parsing calibration {}", path.display()))?,
                )
            }
            None => None,
        };

        if let Some(device) = args.device {
            renderer.emulated_device = device;
        }
        if let Some(preset) = args.preset {
            renderer.layout = LayoutSource::Preset(preset);
        }
        if let Some(mode) = args.interpolation {
            renderer.interpolation.mode = mode;
        }
        if let Some(backend) = args.backend {
            renderer.backend = backend;
        }
        if args.preview {
            renderer.mode = RenderMode::Preview2D;
        }

        Ok(Self {
            renderer,
            calibration,
            override_quilt: args.override_quilt,
            depth_of_field: args.depth_of_field,
            frames: args.frames.max(1),
            output: args.output,
            quilt_output: args.quilt_output,
        })
    }
}

/// Outcome of a CLI run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Whether a real calibration was used.
    pub calibration_found: bool,
    /// Frame statistics.
    pub stats: FrameStats,
    /// Size of the written image.
    pub output_size: (u32, u32),
}

fn save_png(image: &FrameImage, path: &Path) -> anyhow::Result<()> {
    let rgba = image
        .to_rgba_image()
        .ok_or_else(|| anyhow::anyhow!("image buffer does not match {}x{}", image.width, image.height))?;
    rgba.save(path)
        .with_context(|| format!("writing {}", path.display()))?;
    tracing::info!("Wrote {}x{} image to {}", image.width, image.height, path.display());
    Ok(())
}

/// Render the demo scene and write the output images.
///
/// # Errors
///
/// Returns an error if the renderer cannot start, a frame fails or an image
/// cannot be read or written.
pub fn run(config: &CliConfig) -> anyhow::Result<RunSummary> {
    let mut renderer = QuiltRenderer::new(config.renderer.clone(), config.calibration.clone())?;

    if let Some(path) = &config.override_quilt {
        let image = image::open(path)
            .with_context(|| format!("reading override quilt {}", path.display()))?
            .to_rgba8();
        renderer.set_override_quilt(Some(FrameImage::from_rgba_image(&image)));
    }
    if config.depth_of_field {
        renderer.set_post_process(Some(Box::new(DepthOfField::default())));
    }

    let mut scene = CardScene::layered();
    let mut last = None;
    for frame in 0..config.frames {
        if let Some(result) = renderer.render_frame(&FrameContext::new(frame), &mut scene)? {
            tracing::debug!(
                "Frame {}: {} rendered, {} interpolated in {:.2} ms",
                result.frame_index,
                result.views_rendered,
                result.views_interpolated,
                result.render_time_ms
            );
            last = Some(result);
        }
    }
    let result = last.ok_or_else(|| anyhow::anyhow!("no frame was rendered"))?;

    save_png(&result.image, &config.output)?;
    if let Some(path) = &config.quilt_output {
        save_png(&renderer.quilt().to_image(), path)?;
    }

    let stats = renderer.stats().clone();
    tracing::info!("Frame stats: {}", serde_json::to_string(&stats)?);
    let summary = RunSummary {
        calibration_found: renderer.calibration_found(),
        stats,
        output_size: (result.image.width, result.image.height),
    };
    renderer.shutdown();
    Ok(summary)
}
