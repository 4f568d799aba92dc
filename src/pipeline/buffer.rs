//! Bounded frame buffer between the producer and consumer threads

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam::utils::CachePadded;
use flume::{Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use tracing::trace;

use crate::capture::Frame;
use crate::error::PipelineError;

/// Outcome of [`BoundedFrameBuffer::try_put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Accepted,
    /// Buffer stayed full for the whole timeout; the frame was discarded.
    Dropped,
}

/// Counter snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStats {
    pub accepted: u64,
    pub dropped: u64,
    pub taken: u64,
}

#[derive(Default)]
struct Stats {
    accepted: AtomicU64,
    dropped: AtomicU64,
    taken: AtomicU64,
}

/// Fixed-capacity FIFO of frames.
///
/// A full buffer never blocks a producer for longer than the put timeout:
/// the newest frame is dropped instead. Both channel ends live here, so the
/// channel never disconnects while the buffer exists.
pub struct BoundedFrameBuffer {
    tx: Sender<Frame>,
    rx: Receiver<Frame>,
    capacity: usize,

    /// Statistics
    stats: CachePadded<Stats>,
}

impl BoundedFrameBuffer {
    pub fn new(capacity: usize) -> Result<Self, PipelineError> {
        if capacity == 0 {
            return Err(PipelineError::ZeroCapacity);
        }

        let (tx, rx) = flume::bounded(capacity);
        Ok(Self {
            tx,
            rx,
            capacity,
            stats: CachePadded::new(Stats::default()),
        })
    }

    /// Producer: append `frame`, waiting at most `timeout` for free space.
    pub fn try_put(&self, frame: Frame, timeout: Duration) -> PutOutcome {
        match self.tx.send_timeout(frame, timeout) {
            Ok(()) => {
                self.stats.accepted.fetch_add(1, Ordering::Relaxed);
                PutOutcome::Accepted
            }
            Err(SendTimeoutError::Timeout(frame)) | Err(SendTimeoutError::Disconnected(frame)) => {
                trace!(sequence = frame.sequence(), "buffer full, dropping frame");
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("frames_dropped").increment(1);
                PutOutcome::Dropped
            }
        }
    }

    /// Consumer: remove the oldest frame, waiting at most `timeout` for one.
    pub fn try_take(&self, timeout: Duration) -> Option<Frame> {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => {
                self.stats.taken.fetch_add(1, Ordering::Relaxed);
                Some(frame)
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            accepted: self.stats.accepted.load(Ordering::Relaxed),
            dropped: self.stats.dropped.load(Ordering::Relaxed),
            taken: self.stats.taken.load(Ordering::Relaxed),
        }
    }
}
