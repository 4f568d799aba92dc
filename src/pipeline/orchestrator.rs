//! Pipeline lifecycle: open, spawn, join, tear down

use std::thread;
use std::time::Duration;

use color_eyre::Result;
use tracing::{error, info, instrument, warn};

use super::buffer::{BoundedFrameBuffer, BufferStats};
use super::consumer::{ConsumerLoop, ConsumerReport};
use super::producer::{AcquireRetryPolicy, ProducerLoop, ProducerReport};
use super::stop::StopSignal;
use crate::capture::FrameSource;
use crate::display::FrameSink;
use crate::error::{flatten_report, PipelineError};
use crate::filter::FrameTransform;
use crate::PipelineConfig;

const PRODUCER: &str = "producer";
const CONSUMER: &str = "consumer";

/// Knobs for one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub capacity: usize,
    pub put_timeout: Duration,
    pub take_timeout: Duration,
    pub retry: AcquireRetryPolicy,
    /// Resolution requested from the source; `None` keeps the device default.
    pub resolution: Option<(u32, u32)>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

impl From<&PipelineConfig> for PipelineOptions {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            capacity: config.buffer_capacity,
            put_timeout: Duration::from_millis(config.put_timeout_ms),
            take_timeout: Duration::from_millis(config.take_timeout_ms),
            retry: AcquireRetryPolicy {
                backoff: Duration::from_millis(config.acquire_backoff_ms),
                max_consecutive_failures: config.max_acquire_failures,
            },
            resolution: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RunReport {
    pub producer: ProducerReport,
    pub consumer: ConsumerReport,
    pub buffer: BufferStats,
}

/// Owns the source; releases it when dropped, unwinding included.
struct SourceGuard<S: FrameSource>(S);

impl<S: FrameSource> Drop for SourceGuard<S> {
    fn drop(&mut self) {
        self.0.release();
    }
}

/// Owns the sink on the consumer thread.
///
/// Dropping it stops the run, waits until the orchestrator has released the
/// source (the gate sender is dropped), then releases the sink.
struct SinkGuard<'a, K: FrameSink> {
    sink: K,
    stop: &'a StopSignal,
    source_released: flume::Receiver<()>,
}

impl<K: FrameSink> Drop for SinkGuard<'_, K> {
    fn drop(&mut self) {
        self.stop.set();
        let _ = self.source_released.recv();
        self.sink.release();
    }
}

/// Runs the producer and consumer threads for exactly one pipeline run.
pub struct Orchestrator {
    options: PipelineOptions,
    stop: StopSignal,
}

impl Orchestrator {
    pub fn new(options: PipelineOptions) -> Self {
        Self {
            options,
            stop: StopSignal::new(),
        }
    }

    /// Handle for stopping the run from outside, e.g. a Ctrl-C handler.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Open `source`, run both loops until one of them stops, then release
    /// the source and the sink, in that order.
    ///
    /// `open_sink` runs on the consumer thread.
    #[instrument(skip_all, fields(capacity = self.options.capacity))]
    pub fn run<S, T, K, F>(
        self,
        source: S,
        transform: T,
        open_sink: F,
    ) -> Result<RunReport, PipelineError>
    where
        S: FrameSource,
        T: FrameTransform + Send,
        K: FrameSink,
        F: FnOnce() -> Result<K> + Send,
    {
        let Self { options, stop } = self;
        let mut source = SourceGuard(source);

        if let Err(e) = source.0.open() {
            error!("Failed to open frame source: {:#}", e);
            return Err(PipelineError::SourceUnavailable(flatten_report(&e)));
        }

        if let Some((width, height)) = options.resolution {
            if let Err(e) = source.0.configure(width, height) {
                warn!("Could not set {}x{}: {}", width, height, e);
            }
        }

        let buffer = BoundedFrameBuffer::new(options.capacity)?;
        let (source_released_tx, source_released) = flume::bounded::<()>(0);
        let (buffer, stop, options) = (&buffer, &stop, &options);

        let (producer, consumer) = thread::scope(|scope| {
            let producer = thread::Builder::new()
                .name("framepipe-producer".into())
                .spawn_scoped(scope, move || {
                    let _stop = stop.set_on_drop();
                    let report = ProducerLoop::new(
                        &mut source.0,
                        buffer,
                        stop,
                        options.put_timeout,
                        options.retry,
                    )
                    .run();
                    (source, report)
                })
                .map_err(|source| PipelineError::Spawn {
                    unit: PRODUCER,
                    source,
                })?;

            let consumer = thread::Builder::new()
                .name("framepipe-consumer".into())
                .spawn_scoped(scope, move || -> Result<ConsumerReport, PipelineError> {
                    let _stop = stop.set_on_drop();
                    let sink = open_sink().map_err(|e| {
                        error!("Failed to open frame sink: {:#}", e);
                        PipelineError::SinkUnavailable(flatten_report(&e))
                    })?;
                    let mut guard = SinkGuard {
                        sink,
                        stop,
                        source_released,
                    };
                    let consumer = ConsumerLoop::new(
                        buffer,
                        stop,
                        &transform,
                        &mut guard.sink,
                        options.take_timeout,
                    );
                    Ok(consumer.run())
                })
                .map_err(|source| PipelineError::Spawn {
                    unit: CONSUMER,
                    source,
                });
            if consumer.is_err() {
                stop.set();
            }

            // Source first: the guard comes back from the thread and is
            // dropped here, or was already dropped while unwinding.
            let produced = match producer.join() {
                Ok((guard, report)) => {
                    drop(guard);
                    Ok(report)
                }
                Err(_) => Err(PipelineError::WorkerPanicked { unit: PRODUCER }),
            };
            drop(source_released_tx);

            let consumed = consumer.and_then(|handle| {
                handle
                    .join()
                    .unwrap_or(Err(PipelineError::WorkerPanicked { unit: CONSUMER }))
            });

            Ok::<_, PipelineError>((produced?, consumed?))
        })?;

        let report = RunReport {
            producer,
            consumer,
            buffer: buffer.stats(),
        };
        info!(?report, "Pipeline finished");
        Ok(report)
    }
}
