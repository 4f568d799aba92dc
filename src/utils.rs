use crate::capture::frame::PixelFormat;
use serde::{Deserialize, Serialize};

// Detected capture device info
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoundDevice {
    pub path: String,
    pub format: PixelFormat,
}

impl FoundDevice {
    pub fn new(path: String, format: PixelFormat) -> Self {
        Self { path, format }
    }
}

/// Auto-detect best capture device
#[cfg(feature = "capture-v4l2")]
pub fn auto_detect_device() -> color_eyre::Result<FoundDevice> {
    use std::path::Path;

    use color_eyre::eyre::eyre;
    use tracing::info;
    use v4l::{capability::Flags, video::Capture, Device, FourCC};

    info!("Auto-detecting capture devices...");

    for i in 0..10 {
        let path = format!("/dev/video{}", i);
        if !Path::new(&path).exists() {
            continue;
        }

        let Ok(dev) = Device::with_path(&path) else {
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        // Check for capture capability
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            continue;
        }
        let Ok(formats) = dev.enum_formats() else {
            continue;
        };

        // Prefer MJPEG, fall back to YUYV
        let fourccs: Vec<FourCC> = formats.iter().map(|fmt| fmt.fourcc).collect();
        if fourccs.contains(&FourCC::new(b"MJPG")) {
            info!("Found MJPEG device: {} - {}", path, caps.card);
            return Ok(FoundDevice::new(path, PixelFormat::Mjpeg));
        }
        if fourccs.contains(&FourCC::new(b"YUYV")) {
            info!("Found YUYV device: {} - {}", path, caps.card);
            return Ok(FoundDevice::new(path, PixelFormat::Yuyv4));
        }
    }

    Err(eyre!("No suitable capture device found"))
}
