//! Worker thread for transform stages
//!
//! Contains the loop that pulls batches from a stage's input queue, applies
//! the stage's transform to every item and pushes the surviving results
//! downstream.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use super::error::QueueError;
use super::queue::BoundedQueue;
use super::status::StageStatus;
use super::tracker::ProgressTracker;
use super::transform::Transform;
use super::types::Batch;

/// How an item's transform failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemErrorKind {
    /// The transform returned `Err`
    Error,
    /// The transform panicked
    Panic,
}

/// Description of an item dropped by a stage
#[derive(Debug, Clone)]
pub struct ItemError {
    pub stage: usize,
    pub stage_name: String,
    pub batch: u64,
    pub kind: ItemErrorKind,
    pub message: String,
}

/// Callback receiving every dropped item's description
pub type ItemErrorHook = Arc<dyn Fn(&ItemError) + Send + Sync>;

/// Everything one transform worker needs, cloned per worker slot
pub(crate) struct WorkerContext<I, O> {
    pub worker_id: usize,
    pub status: Arc<StageStatus>,
    pub upstream: Arc<StageStatus>,
    pub input: Arc<BoundedQueue<I>>,
    pub output: Arc<BoundedQueue<O>>,
    pub transform: Arc<dyn Transform<I, O>>,
    pub max_batch: Option<usize>,
    pub tracker: ProgressTracker,
    pub poll_interval: Duration,
    pub error_hook: Option<ItemErrorHook>,
}

/// Releases a worker's slot in its stage exactly once, however it exits.
///
/// The last worker of a stage also closes the stage's input queue: nobody
/// will consume from it again.
pub(crate) struct LiveGuard<'a, T> {
    status: &'a StageStatus,
    input: Option<&'a BoundedQueue<T>>,
    worker_id: usize,
}

impl<'a, T> LiveGuard<'a, T> {
    pub(crate) fn new(
        status: &'a StageStatus,
        input: Option<&'a BoundedQueue<T>>,
        worker_id: usize,
    ) -> Self {
        Self {
            status,
            input,
            worker_id,
        }
    }
}

impl<T> Drop for LiveGuard<'_, T> {
    fn drop(&mut self) {
        tracing::debug!(
            stage = self.status.index(),
            worker = self.worker_id,
            "worker exited"
        );
        if !self.status.release() {
            return;
        }
        if let Some(input) = self.input {
            let stranded = input.size();
            if stranded > 0 {
                tracing::warn!(
                    stage = self.status.index(),
                    name = self.status.name(),
                    batches = stranded,
                    "stage finished with unconsumed input batches"
                );
            }
            input.close();
        }
        tracing::debug!(
            stage = self.status.index(),
            name = self.status.name(),
            "stage finished"
        );
    }
}

/// Worker thread: processes batches until upstream is exhausted
pub(crate) fn worker_thread<I, O>(ctx: WorkerContext<I, O>) {
    let _guard = LiveGuard::new(&ctx.status, Some(&*ctx.input), ctx.worker_id);
    tracing::debug!(
        stage = ctx.status.index(),
        worker = ctx.worker_id,
        "worker started"
    );

    match panic::catch_unwind(AssertUnwindSafe(|| worker_loop(&ctx))) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            tracing::error!(
                stage = ctx.status.index(),
                name = ctx.status.name(),
                worker = ctx.worker_id,
                error = %err,
                "worker aborted"
            );
            ctx.status.record_abort(err.to_string());
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!(
                stage = ctx.status.index(),
                name = ctx.status.name(),
                worker = ctx.worker_id,
                panic = %message,
                "worker panicked outside item processing"
            );
            ctx.status.record_abort(format!("worker panicked: {}", message));
        }
    }
}

fn worker_loop<I, O>(ctx: &WorkerContext<I, O>) -> Result<(), QueueError> {
    loop {
        if ctx.upstream.is_finished() {
            ctx.status.mark_draining();
        }

        match ctx
            .input
            .get_or_wake(ctx.poll_interval, ctx.upstream.done_signal())
        {
            Some(batch) => process_batch(ctx, batch)?,
            None => {
                // Upstream state first: once it reads finished, every batch it
                // produced is already visible in the queue.
                if ctx.upstream.is_finished() && ctx.input.is_empty() {
                    return Ok(());
                }
            }
        }
    }
}

fn process_batch<I, O>(ctx: &WorkerContext<I, O>, batch: Batch<I>) -> Result<(), QueueError> {
    let Batch { id, items } = batch;
    let attempted = items.len() as u64;

    let (results, failed) = apply_batch(
        &ctx.status,
        id,
        items,
        ctx.transform.as_ref(),
        ctx.error_hook.as_ref(),
    );

    for chunk in rebatch(id, results, ctx.max_batch) {
        ctx.output.put(chunk)?;
    }

    ctx.tracker.increment(ctx.status.index(), attempted);
    if failed > 0 {
        ctx.tracker.record_failures(ctx.status.index(), failed);
    }
    tracing::trace!(
        stage = ctx.status.index(),
        worker = ctx.worker_id,
        batch = id,
        items = attempted,
        failed,
        "batch done"
    );
    Ok(())
}

/// Apply `transform` to every item, dropping (and reporting) the failures.
/// Returns the surviving results in input order and the failure count.
pub(crate) fn apply_batch<I, O>(
    stage: &StageStatus,
    batch_id: u64,
    items: Vec<I>,
    transform: &dyn Transform<I, O>,
    error_hook: Option<&ItemErrorHook>,
) -> (Vec<O>, u64) {
    let mut results = Vec::with_capacity(items.len());
    let mut failed = 0u64;

    for item in items {
        let failure = match panic::catch_unwind(AssertUnwindSafe(|| transform.apply(item))) {
            Ok(Ok(result)) => {
                results.push(result);
                continue;
            }
            Ok(Err(err)) => {
                tracing::error!(
                    stage = stage.index(),
                    name = stage.name(),
                    batch = batch_id,
                    error = ?err,
                    "item transform failed, dropping item"
                );
                (ItemErrorKind::Error, format!("{:#}", err))
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(
                    stage = stage.index(),
                    name = stage.name(),
                    batch = batch_id,
                    panic = %message,
                    "item transform panicked, dropping item"
                );
                (ItemErrorKind::Panic, message)
            }
        };

        failed += 1;
        if let Some(hook) = error_hook {
            let (kind, message) = failure;
            let error = ItemError {
                stage: stage.index(),
                stage_name: stage.name().to_string(),
                batch: batch_id,
                kind,
                message,
            };
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| hook(&error))) {
                tracing::warn!(
                    stage = stage.index(),
                    name = stage.name(),
                    batch = batch_id,
                    panic = %panic_message(payload.as_ref()),
                    "item error hook panicked"
                );
            }
        }
    }

    (results, failed)
}

/// Split results into batches of at most `max` items. Empty results produce
/// no batch at all.
pub(crate) fn rebatch<T>(id: u64, items: Vec<T>, max: Option<usize>) -> Vec<Batch<T>> {
    if items.is_empty() {
        return Vec::new();
    }
    let max = match max {
        Some(max) if max > 0 && items.len() > max => max,
        _ => return vec![Batch::new(id, items)],
    };

    let mut chunks = Vec::with_capacity(items.len().div_ceil(max));
    let mut rest = items;
    while rest.len() > max {
        let tail = rest.split_off(max);
        chunks.push(Batch::new(id, rest));
        rest = tail;
    }
    chunks.push(Batch::new(id, rest));
    chunks
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
