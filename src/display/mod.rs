#[cfg(feature = "display-sdl2")]
pub mod display;

#[cfg(feature = "display-sdl2")]
pub use display::Sdl2Display;

use color_eyre::Result;

use crate::capture::Frame;

/// Where the consumer sends finished frames.
///
/// A sink lives on the consumer thread for its whole life and does not need
/// to be `Send`; window systems usually tie their handles to one thread.
pub trait FrameSink {
    fn show(&mut self, frame: &Frame) -> Result<()>;

    /// True once the user asked to quit (quit key or closed window).
    fn poll_quit(&mut self) -> bool;

    /// Tear down the window. Must be safe to call more than once.
    fn release(&mut self);
}
