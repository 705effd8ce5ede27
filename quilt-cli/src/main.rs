//! # Saorsa Quilt CLI
//!
//! Renders a quilt and its lightfield image from the command line.

use clap::Parser;
use quilt_cli::{run, CliArgs, CliConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    // Initialize tracing
    let json = args.json_logs;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quilt_cli=info,quilt_renderer=info,quilt_core=info,wgpu=warn".into()),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();

    tracing::info!("Starting Saorsa Quilt");

    let config = CliConfig::try_from(args)?;
    tracing::info!(
        "Rendering {} frame(s) with {:?} backend, output {}",
        config.frames,
        config.renderer.backend,
        config.output.display()
    );

    let summary = run(&config)?;
    tracing::info!(
        "Done: {}x{} image, {} frames, calibration {}",
        summary.output_size.0,
        summary.output_size.1,
        summary.stats.frames_rendered,
        if summary.calibration_found { "found" } else { "emulated" }
    );
    Ok(())
}
