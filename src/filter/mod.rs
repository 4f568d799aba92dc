pub mod clahe;

pub use clahe::ClaheFilter;

use crate::capture::Frame;

/// Per-frame image transform applied by the consumer before display.
///
/// Implementations must be pure: no shared state, and nothing kept from the
/// input frame after `apply` returns.
pub trait FrameTransform {
    fn apply(&self, frame: Frame) -> Frame;
}

impl<F> FrameTransform for F
where
    F: Fn(Frame) -> Frame,
{
    fn apply(&self, frame: Frame) -> Frame {
        self(frame)
    }
}
