//! Staged concurrent processing pipelines.
//!
//! A pipeline is a source stage followed by transform stages. Each stage has
//! its own pool of worker threads, and adjacent stages are linked by bounded
//! queues of batches, so a slow stage applies backpressure to everything
//! upstream of it. A failing item is logged and dropped without stopping its
//! stage.
//!
//! ```
//! use streamtask::{Pipeline, PipelineConfig, StageOptions};
//!
//! let mut pipeline = Pipeline::new(PipelineConfig::default())
//!     .add_data(vec![1, 2, 3, 4, 5], StageOptions::default().with_batch_size(2))?
//!     .add_stage("double", |x: i32| Ok(x * 2), StageOptions::new(1))?;
//!
//! pipeline.run(true)?;
//! pipeline.join()?;
//! assert_eq!(pipeline.get_results()?, vec![2, 4, 6, 8, 10]);
//! # Ok::<(), streamtask::PipelineError>(())
//! ```
//!
//! The library logs through `tracing` and installs no subscriber; progress
//! lines use the `streamtask::progress` target.

pub mod parallel;
pub mod stats;

pub use parallel::{
    Batch, BoundedQueue, ItemError, ItemErrorHook, ItemErrorKind, Pipeline, PipelineBuilder,
    PipelineConfig, PipelineError, ProgressTracker, QueueError, StageCounters, StageOptions,
    StageState, StageStatus, Transform,
};
pub use stats::{PipelineStats, StageSummary};
