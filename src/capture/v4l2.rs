//! V4L2 webcam source with memory-mapped streaming

use std::sync::Arc;
use std::time::{Duration, Instant};

use color_eyre::{eyre::eyre, Result};
use tracing::{debug, info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::{
    capture::decoder,
    capture::frame::{Frame, FrameMetadata, PixelFormat},
    capture::FrameSource,
    CaptureConfig,
};

/// V4L2 capture device.
///
/// The device is opened by [`FrameSource::open`], the stream is started
/// lazily on the first acquisition so that format negotiation can happen in
/// between.
pub struct V4l2Capture {
    config: CaptureConfig,
    device: Option<Device>,
    stream: Option<MmapStream<'static>>,
    /// Format the driver actually agreed to
    negotiated: Negotiated,
    sequence: u64,
}

#[derive(Debug, Clone, Copy)]
struct Negotiated {
    width: u32,
    height: u32,
    format: PixelFormat,
}

fn fourcc_for(format: PixelFormat) -> FourCC {
    match format {
        PixelFormat::Mjpeg => FourCC::new(b"MJPG"),
        PixelFormat::Yuyv4 => FourCC::new(b"YUYV"),
        PixelFormat::Rgb24 => FourCC::new(b"RGB3"),
        PixelFormat::Bgr24 => FourCC::new(b"BGR3"),
    }
}

fn format_for(fourcc: FourCC) -> Option<PixelFormat> {
    match &fourcc.repr {
        b"MJPG" => Some(PixelFormat::Mjpeg),
        b"YUYV" => Some(PixelFormat::Yuyv4),
        b"RGB3" => Some(PixelFormat::Rgb24),
        b"BGR3" => Some(PixelFormat::Bgr24),
        _ => None,
    }
}

impl V4l2Capture {
    pub fn new(config: CaptureConfig) -> Self {
        let negotiated = Negotiated {
            width: config.width,
            height: config.height,
            format: config.device.format,
        };

        Self {
            config,
            device: None,
            stream: None,
            negotiated,
            sequence: 0,
        }
    }

    fn device(&self) -> Result<&Device> {
        self.device
            .as_ref()
            .ok_or_else(|| eyre!("Capture device is not open"))
    }

    /// Upper bound on a single wait for the driver.
    fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.config.frame_timeout_ms.max(1))
    }

    fn start_stream(&mut self) -> Result<()> {
        let mut stream =
            MmapStream::with_buffers(self.device()?, Type::VideoCapture, self.config.buffer_count)?;
        // Without a timeout a stalled camera blocks `next()` forever
        stream.set_timeout(self.frame_timeout());

        self.stream = Some(stream);
        info!(
            "Capture stream started with {} buffers, {:?} frame timeout",
            self.config.buffer_count,
            self.frame_timeout()
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        if self.stream.is_none() {
            self.start_stream()?;
        }

        let timestamp = Instant::now();
        let negotiated = self.negotiated;
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| eyre!("Stream not started"))?;

        let (buf, meta) = stream.next()?;
        let used = (meta.bytesused as usize).min(buf.len());
        let device_timestamp = Duration::from_secs(meta.timestamp.sec as u64)
            + Duration::from_micros(meta.timestamp.usec as u64);

        let decoded = decoder::decode_frame(
            &buf[..used],
            negotiated.format,
            negotiated.width,
            negotiated.height,
        )?;

        self.sequence += 1;
        metrics::counter!("frames_captured").increment(1);

        let mut frame_meta = FrameMetadata::packed(
            self.sequence,
            decoded.width,
            decoded.height,
            PixelFormat::Rgb24,
        );
        frame_meta.device_timestamp = Some(device_timestamp);

        Ok(Frame {
            data: decoded.pixels,
            meta: Arc::new(frame_meta),
            timestamp,
        })
    }
}

impl FrameSource for V4l2Capture {
    #[instrument(skip(self), fields(device = %self.config.device.path))]
    fn open(&mut self) -> Result<()> {
        if self.device.is_some() {
            return Ok(());
        }

        let device = Device::with_path(&self.config.device.path)
            .map_err(|e| eyre!("Failed to open {}: {}", self.config.device.path, e))?;

        let caps = device.query_caps()?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(eyre!("Device doesn't support video capture"));
        }

        self.device = Some(device);
        Ok(())
    }

    fn configure(&mut self, width: u32, height: u32) -> Result<()> {
        if self.stream.is_some() {
            return Err(eyre!("Cannot change format while streaming"));
        }

        let device = self.device()?;
        let mut fmt = device.format()?;
        fmt.width = width;
        fmt.height = height;
        fmt.fourcc = fourcc_for(self.config.device.format);

        let actual = device.set_format(&fmt)?;
        let format = format_for(actual.fourcc)
            .ok_or_else(|| eyre!("Driver picked unsupported format {}", actual.fourcc))?;

        if actual.width != width || actual.height != height {
            warn!(
                "Requested {}x{}, driver chose {}x{}",
                width, height, actual.width, actual.height
            );
        }

        self.negotiated = Negotiated {
            width: actual.width,
            height: actual.height,
            format,
        };
        info!("Capture format: {:?}", self.negotiated);
        Ok(())
    }

    fn acquire(&mut self) -> Option<Frame> {
        match self.next_frame() {
            Ok(frame) => Some(frame),
            Err(e) => {
                debug!("No frame: {}", e);
                None
            }
        }
    }

    fn release(&mut self) {
        if self.stream.take().is_some() {
            info!("Capture stream stopped");
        }
        if self.device.take().is_some() {
            info!("Capture device released");
        }
    }
}

impl Drop for V4l2Capture {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_wait_follows_the_config() {
        let config = CaptureConfig {
            frame_timeout_ms: 150,
            ..CaptureConfig::default()
        };
        assert_eq!(
            V4l2Capture::new(config).frame_timeout(),
            Duration::from_millis(150)
        );
    }

    #[test]
    fn frame_wait_is_never_unbounded() {
        let config = CaptureConfig {
            frame_timeout_ms: 0,
            ..CaptureConfig::default()
        };
        assert_eq!(
            V4l2Capture::new(config).frame_timeout(),
            Duration::from_millis(1)
        );
    }

    #[test]
    fn acquire_without_an_open_device_is_a_miss() {
        let mut capture = V4l2Capture::new(CaptureConfig::default());
        assert!(capture.acquire().is_none());
    }
}
