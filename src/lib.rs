pub mod capture;
pub mod display;
pub mod error;
pub mod filter;
pub mod pipeline;
pub mod utils;

use std::path::Path;

use capture::frame::PixelFormat;
use color_eyre::Result;
use serde::{Deserialize, Serialize};

pub use error::PipelineError;

use crate::utils::FoundDevice;

/// Prefix for environment overrides, e.g. `FRAMEPIPE_PIPELINE__BUFFER_CAPACITY=4`
pub const ENV_PREFIX: &str = "FRAMEPIPE";

/// System configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub display: DisplayConfig,
    pub pipeline: PipelineConfig,
    pub filter: FilterConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Empty path means auto-detect
    pub device: FoundDevice,
    pub width: u32,
    pub height: u32,
    pub buffer_count: u32,
    /// Longest wait for the driver to hand over a buffer before `acquire` reports a miss
    pub frame_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub vsync: bool,
    /// SDL key names that end the session
    pub quit_keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub buffer_capacity: usize,
    pub put_timeout_ms: u64,
    pub take_timeout_ms: u64,
    pub acquire_backoff_ms: u64,
    /// Stop after this many failed acquisitions in a row; unset retries forever
    pub max_acquire_failures: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub enabled: bool,
    pub clip_limit: f32,
    pub tiles_x: usize,
    pub tiles_y: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: FoundDevice::new("/dev/video0".into(), PixelFormat::Mjpeg),
            width: 640,
            height: 480,
            buffer_count: 4,
            frame_timeout_ms: 200,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            title: "Video".into(),
            width: 640,
            height: 480,
            vsync: false,
            quit_keys: vec!["Q".into(), "Escape".into()],
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 2,
            put_timeout_ms: 100,
            take_timeout_ms: 100,
            acquire_backoff_ms: 0,
            max_acquire_failures: None,
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            clip_limit: 3.0,
            tiles_x: 8,
            tiles_y: 8,
        }
    }
}

impl Config {
    /// Defaults, then the optional TOML file, then `FRAMEPIPE_*` variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize::<Config>()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        let invalid = |msg: &str| Err(PipelineError::InvalidConfig(msg.to_string()));

        if self.pipeline.buffer_capacity == 0 {
            return Err(PipelineError::ZeroCapacity);
        }
        if self.pipeline.put_timeout_ms == 0 || self.pipeline.take_timeout_ms == 0 {
            return invalid("buffer timeouts must be at least 1 ms");
        }
        if self.pipeline.max_acquire_failures == Some(0) {
            return invalid("max_acquire_failures must be at least 1 when set");
        }
        if self.filter.clip_limit.is_nan() || self.filter.clip_limit <= 0.0 {
            return invalid("filter clip_limit must be positive");
        }
        if self.filter.tiles_x == 0 || self.filter.tiles_y == 0 {
            return invalid("filter tile grid must be at least 1x1");
        }
        if self.capture.width == 0 || self.capture.height == 0 {
            return invalid("capture resolution must be non-zero");
        }
        if self.capture.frame_timeout_ms == 0 || self.capture.frame_timeout_ms > i32::MAX as u64 {
            return invalid("capture frame_timeout_ms must be between 1 and i32::MAX");
        }
        Ok(())
    }
}
