//! Capture side of the pipeline

use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, instrument};

use super::buffer::{BoundedFrameBuffer, PutOutcome};
use super::stop::StopSignal;
use crate::capture::FrameSource;

/// What to do when the source keeps returning no frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AcquireRetryPolicy {
    /// Pause after each miss. Zero retries immediately.
    pub backoff: Duration,
    /// Give up after this many misses in a row. `None` retries forever.
    pub max_consecutive_failures: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerExit {
    Stopped,
    /// The retry policy gave up on the source.
    SourceFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProducerReport {
    pub acquired: u64,
    pub accepted: u64,
    pub dropped: u64,
    pub acquire_failures: u64,
    pub exit: ProducerExit,
}

pub struct ProducerLoop<'a, S: ?Sized> {
    source: &'a mut S,
    buffer: &'a BoundedFrameBuffer,
    stop: &'a StopSignal,
    put_timeout: Duration,
    retry: AcquireRetryPolicy,
}

impl<'a, S: FrameSource + ?Sized> ProducerLoop<'a, S> {
    pub fn new(
        source: &'a mut S,
        buffer: &'a BoundedFrameBuffer,
        stop: &'a StopSignal,
        put_timeout: Duration,
        retry: AcquireRetryPolicy,
    ) -> Self {
        Self {
            source,
            buffer,
            stop,
            put_timeout,
            retry,
        }
    }

    #[instrument(name = "producer", skip(self))]
    pub fn run(self) -> ProducerReport {
        let mut report = ProducerReport {
            acquired: 0,
            accepted: 0,
            dropped: 0,
            acquire_failures: 0,
            exit: ProducerExit::Stopped,
        };
        let mut misses = 0u32;

        info!("Producer started");
        while !self.stop.is_set() {
            let Some(frame) = self.source.acquire() else {
                report.acquire_failures += 1;
                misses = misses.saturating_add(1);

                if self
                    .retry
                    .max_consecutive_failures
                    .is_some_and(|cap| misses >= cap)
                {
                    error!("Source produced no frame {} times in a row, stopping", misses);
                    self.stop.set();
                    report.exit = ProducerExit::SourceFailed;
                    break;
                }
                if !self.retry.backoff.is_zero() {
                    thread::sleep(self.retry.backoff);
                }
                continue;
            };

            misses = 0;
            report.acquired += 1;

            match self.buffer.try_put(frame, self.put_timeout) {
                PutOutcome::Accepted => report.accepted += 1,
                PutOutcome::Dropped => report.dropped += 1,
            }
        }

        debug!(?report, "Producer finished");
        report
    }
}
