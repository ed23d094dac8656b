//! Error types for the pipeline and its queues.

use thiserror::Error;

/// Errors raised by a [`BoundedQueue`](super::BoundedQueue).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// The queue was torn down; nothing can be put into it anymore.
    #[error("queue is closed")]
    Closed,
}

/// Errors raised by the pipeline orchestrator.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// `run()` was already called on this pipeline.
    #[error("pipeline has already been started")]
    AlreadyStarted,

    /// `join()` or `get_results()` before `run()`.
    #[error("pipeline has not been started")]
    NotStarted,

    /// Rejected configuration or stage options.
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    /// A worker thread could not be spawned.
    #[error("failed to spawn worker for stage '{stage}': {source}")]
    Spawn {
        stage: String,
        #[source]
        source: std::io::Error,
    },

    /// A stage stopped before consuming all of its input, so items were lost.
    #[error("stage '{stage}' stopped early: {reason}")]
    StageAborted { stage: String, reason: String },

    /// A thread panicked outside the worker safety net.
    #[error("thread '{0}' panicked")]
    WorkerPanicked(String),
}
