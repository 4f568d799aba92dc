use std::io;

use thiserror::Error;

/// Errors surfaced by the pipeline to its caller.
///
/// Everything that happens inside the running loops (empty buffer, dropped
/// frame, failed acquisition) is absorbed locally and never shows up here.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("frame source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("frame sink unavailable: {0}")]
    SinkUnavailable(String),

    #[error("frame buffer capacity must be at least 1")]
    ZeroCapacity,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to spawn {unit} thread")]
    Spawn {
        unit: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("{unit} thread panicked")]
    WorkerPanicked { unit: &'static str },
}

/// Flatten an eyre report into a single line, outermost context first.
pub(crate) fn flatten_report(report: &color_eyre::Report) -> String {
    report
        .chain()
        .map(|cause| cause.to_string())
        .collect::<Vec<_>>()
        .join(": ")
}
