//! framepipe: webcam viewer with CLAHE contrast enhancement
//!
//! Capture and display run on two threads joined by a two-frame buffer that
//! drops new frames instead of stalling the camera.

use std::path::PathBuf;

use clap::Parser;
use color_eyre::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use framepipe::capture::V4l2Capture;
use framepipe::display::Sdl2Display;
use framepipe::filter::ClaheFilter;
use framepipe::pipeline::{Orchestrator, PipelineOptions};
use framepipe::{utils, Config};

#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// TOML configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Capture device, e.g. /dev/video0 (empty string auto-detects)
    #[arg(long)]
    device: Option<String>,

    #[arg(long)]
    width: Option<u32>,

    #[arg(long)]
    height: Option<u32>,

    /// Show frames without contrast enhancement
    #[arg(long)]
    no_filter: bool,
}

impl Args {
    fn load_config(&self) -> Result<Config> {
        let mut config = Config::load(self.config.as_deref())?;

        if let Some(device) = &self.device {
            config.capture.device.path = device.clone();
        }
        if let Some(width) = self.width {
            config.capture.width = width;
        }
        if let Some(height) = self.height {
            config.capture.height = height;
        }
        if self.no_filter {
            config.filter.enabled = false;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("framepipe=info")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("framepipe launching...");

    let mut config = Args::parse().load_config()?;

    // Auto-detect capture device if needed
    if config.capture.device.path.is_empty() {
        config.capture.device = utils::auto_detect_device()?;
    }
    info!("Using capture device: {:?}", config.capture.device);

    let mut options = PipelineOptions::from(&config.pipeline);
    options.resolution = Some((config.capture.width, config.capture.height));

    let orchestrator = Orchestrator::new(options);
    let stop = orchestrator.stop_signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() && stop.set() {
            info!("Ctrl-C received, stopping");
        }
    });

    let capture = V4l2Capture::new(config.capture.clone());
    let filter = ClaheFilter::from_config(&config.filter);
    let display = config.display.clone();

    let report = tokio::task::spawn_blocking(move || {
        orchestrator.run(capture, filter, move || Sdl2Display::open(&display))
    })
    .await??;

    info!(
        "framepipe shutting down: {} frames shown, {} dropped",
        report.consumer.shown, report.buffer.dropped
    );
    Ok(())
}
