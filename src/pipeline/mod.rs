//! Producer/consumer pipeline connected by a bounded, drop-newest buffer

pub mod buffer;
pub mod consumer;
pub mod orchestrator;
pub mod producer;
pub mod stop;

pub use buffer::{BoundedFrameBuffer, BufferStats, PutOutcome};
pub use consumer::{ConsumerExit, ConsumerLoop, ConsumerReport};
pub use orchestrator::{Orchestrator, PipelineOptions, RunReport};
pub use producer::{AcquireRetryPolicy, ProducerExit, ProducerLoop, ProducerReport};
pub use stop::StopSignal;
