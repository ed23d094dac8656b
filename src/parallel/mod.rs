//! Staged parallel processing
//!
//! A pipeline is a source stage followed by any number of transform stages,
//! linked by bounded queues of batches. Every stage runs its own pool of
//! worker threads; a full queue blocks its producer, which is what keeps a
//! fast stage from running ahead of a slow one.
//!
//! # Module Structure
//!
//! - `types`: Batches, pipeline configuration and per-stage options
//! - `error`: Queue and orchestrator errors
//! - `queue`: Bounded FIFO of batches with close support
//! - `transform`: The per-item transform trait
//! - `status`: Stage lifecycle and live-worker accounting
//! - `tracker`: Thread-safe per-stage progress counters
//! - `batching`: Source thread, producer items into batches
//! - `worker`: Transform worker thread
//! - `reporter`: Periodic progress reporting
//! - `processor`: Pipeline builder and orchestration

mod batching;
mod error;
mod processor;
mod queue;
mod reporter;
mod status;
mod tracker;
mod transform;
mod types;
mod worker;

pub use error::{PipelineError, QueueError};
pub use processor::{Pipeline, PipelineBuilder};
pub use queue::BoundedQueue;
pub use status::{StageState, StageStatus};
pub use tracker::{ProgressTracker, StageCounters};
pub use transform::Transform;
pub use types::{Batch, PipelineConfig, StageOptions};
pub use worker::{ItemError, ItemErrorHook, ItemErrorKind};
