//! Display side of the pipeline

use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use super::buffer::BoundedFrameBuffer;
use super::stop::StopSignal;
use crate::display::FrameSink;
use crate::filter::FrameTransform;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerExit {
    Stopped,
    /// The sink reported a quit key or a closed window.
    QuitRequested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerReport {
    pub shown: u64,
    pub show_failures: u64,
    pub exit: ConsumerExit,
}

pub struct ConsumerLoop<'a, T: ?Sized, K: ?Sized> {
    buffer: &'a BoundedFrameBuffer,
    stop: &'a StopSignal,
    transform: &'a T,
    sink: &'a mut K,
    take_timeout: Duration,
}

impl<'a, T, K> ConsumerLoop<'a, T, K>
where
    T: FrameTransform + ?Sized,
    K: FrameSink + ?Sized,
{
    pub fn new(
        buffer: &'a BoundedFrameBuffer,
        stop: &'a StopSignal,
        transform: &'a T,
        sink: &'a mut K,
        take_timeout: Duration,
    ) -> Self {
        Self {
            buffer,
            stop,
            transform,
            sink,
            take_timeout,
        }
    }

    #[instrument(name = "consumer", skip(self))]
    pub fn run(self) -> ConsumerReport {
        let mut report = ConsumerReport {
            shown: 0,
            show_failures: 0,
            exit: ConsumerExit::Stopped,
        };

        info!("Consumer started");
        while !self.stop.is_set() {
            if let Some(frame) = self.buffer.try_take(self.take_timeout) {
                let frame = self.transform.apply(frame);

                match self.sink.show(&frame) {
                    Ok(()) => {
                        report.shown += 1;
                        let latency = frame.timestamp.elapsed();
                        metrics::histogram!("frame_latency_ms")
                            .record(latency.as_secs_f64() * 1000.0);
                    }
                    Err(e) => {
                        report.show_failures += 1;
                        warn!("Display error: {}", e);
                    }
                }
            }

            // Polled on empty takes too, so the window stays responsive while
            // the camera stalls.
            if self.sink.poll_quit() {
                if self.stop.set() {
                    info!("Quit requested from display");
                }
                report.exit = ConsumerExit::QuitRequested;
                break;
            }
        }

        debug!(?report, "Consumer finished");
        report
    }
}
