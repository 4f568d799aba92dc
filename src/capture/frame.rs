use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Frame data with zero-copy semantics
///
/// The pixel payload is immutable once the frame is built; stages hand the
/// whole frame over by value.
#[derive(Clone)]
pub struct Frame {
    /// Immutable frame data - can be shared across threads without copying
    pub data: Bytes,

    /// Frame metadata
    pub meta: Arc<FrameMetadata>,

    /// Capture timestamp for latency tracking
    pub timestamp: Instant,
}

/// Frame metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: PixelFormat,
    pub device_timestamp: Option<Duration>, // Hardware timestamp if available
}

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgb24,
    Bgr24,
    Yuyv4,
    Mjpeg,
}

impl PixelFormat {
    /// Bytes per pixel for packed formats, `None` for compressed ones.
    pub fn bytes_per_pixel(self) -> Option<u32> {
        match self {
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => Some(3),
            PixelFormat::Yuyv4 => Some(2),
            PixelFormat::Mjpeg => None,
        }
    }
}

impl FrameMetadata {
    /// Metadata for a tightly packed image.
    pub fn packed(sequence: u64, width: u32, height: u32, format: PixelFormat) -> Self {
        let stride = width.saturating_mul(format.bytes_per_pixel().unwrap_or(1));
        Self {
            sequence,
            width,
            height,
            stride,
            format,
            device_timestamp: None,
        }
    }
}

impl Frame {
    pub fn new(data: impl Into<Bytes>, meta: FrameMetadata) -> Self {
        Self {
            data: data.into(),
            meta: Arc::new(meta),
            timestamp: Instant::now(),
        }
    }

    /// Size of the pixel payload in bytes.
    pub fn byte_size(&self) -> usize {
        self.data.len()
    }

    pub fn sequence(&self) -> u64 {
        self.meta.sequence
    }

    /// New frame with the same metadata and capture time but different pixels.
    pub fn with_data(&self, data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            meta: Arc::clone(&self.meta),
            timestamp: self.timestamp,
        }
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.meta.sequence)
            .field("width", &self.meta.width)
            .field("height", &self.meta.height)
            .field("format", &self.meta.format)
            .field("bytes", &self.data.len())
            .finish()
    }
}
