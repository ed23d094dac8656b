//! Type definitions for the staged pipeline
//!
//! Contains batches, per-stage options and the pipeline-wide configuration.

use std::time::Duration;

use super::error::PipelineError;

/// Configuration shared by every stage of a pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Capacity (in batches) of every internal queue
    pub queue_capacity: usize,
    /// Source batch size when the source's options do not set one
    pub batch_size: usize,
    /// How long a worker waits on an empty queue before re-checking upstream
    pub poll_interval: Duration,
    /// How often the progress reporter renders
    pub progress_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 16,
            batch_size: 1000,
            poll_interval: Duration::from_secs(2),
            progress_interval: Duration::from_secs(1),
        }
    }
}

impl PipelineConfig {
    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_progress_interval(mut self, progress_interval: Duration) -> Self {
        self.progress_interval = progress_interval;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), PipelineError> {
        if self.queue_capacity == 0 {
            return Err(PipelineError::InvalidConfig(
                "queue capacity must be at least 1".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "batch size must be at least 1".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(PipelineError::InvalidConfig(
                "poll interval must be non-zero".to_string(),
            ));
        }
        if self.progress_interval.is_zero() {
            return Err(PipelineError::InvalidConfig(
                "progress interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Options for a single stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageOptions {
    /// Worker threads for this stage. Source stages always run one.
    pub workers: usize,
    /// Source: items per emitted batch. Transform stages: maximum items per
    /// output batch (larger outputs are split). `None` keeps the input
    /// batching.
    pub batch_size: Option<usize>,
}

impl Default for StageOptions {
    fn default() -> Self {
        Self {
            workers: 1,
            batch_size: None,
        }
    }
}

impl StageOptions {
    pub fn new(workers: usize) -> Self {
        Self {
            workers,
            batch_size: None,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub(crate) fn validate(&self, stage: &str) -> Result<(), PipelineError> {
        if self.workers == 0 {
            return Err(PipelineError::InvalidConfig(format!(
                "stage '{}' needs at least one worker",
                stage
            )));
        }
        if self.batch_size == Some(0) {
            return Err(PipelineError::InvalidConfig(format!(
                "stage '{}' batch size must be at least 1",
                stage
            )));
        }
        Ok(())
    }
}

/// A batch of items transferred between stages as one unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch<T> {
    /// Sequence number assigned by the source; kept through transforms
    pub id: u64,
    pub items: Vec<T>,
}

impl<T> Batch<T> {
    pub fn new(id: u64, items: Vec<T>) -> Self {
        Self { id, items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn into_items(self) -> Vec<T> {
        self.items
    }
}
