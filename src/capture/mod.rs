pub mod decoder;
pub mod frame;
#[cfg(feature = "capture-v4l2")]
pub mod v4l2;

use color_eyre::Result;

pub use frame::Frame;
pub use frame::FrameMetadata;
pub use frame::PixelFormat;
#[cfg(feature = "capture-v4l2")]
pub use v4l2::V4l2Capture;

/// A device that produces frames for the pipeline.
///
/// Owned by the producer thread for the whole run, hence `Send`.
pub trait FrameSource: Send {
    /// Acquire the device. An error means the source is unavailable and the
    /// pipeline must not start.
    fn open(&mut self) -> Result<()>;

    /// Request a capture resolution. Best-effort; callers only log failures.
    fn configure(&mut self, width: u32, height: u32) -> Result<()>;

    /// Grab the next frame. `None` is a transient miss and is safe to retry.
    fn acquire(&mut self) -> Option<Frame>;

    /// Give the device back. Must be safe to call more than once.
    fn release(&mut self);
}
