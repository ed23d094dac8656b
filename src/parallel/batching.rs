//! Source stage batching
//!
//! Runs the source producer, groups its items into batches and sends them
//! downstream. The source never sends an end-of-stream marker: its stage
//! finishing is what tells consumers no more batches will arrive.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use super::error::QueueError;
use super::queue::BoundedQueue;
use super::status::StageStatus;
use super::tracker::ProgressTracker;
use super::types::Batch;
use super::worker::{panic_message, LiveGuard};

/// Configuration for the source thread
pub(crate) struct SourceContext<T> {
    pub status: Arc<StageStatus>,
    pub output: Arc<BoundedQueue<T>>,
    pub batch_size: usize,
    pub tracker: ProgressTracker,
}

/// Source thread - drives the producer and emits batches
pub(crate) fn source_thread<T, I, P>(ctx: SourceContext<T>, produce: P)
where
    P: FnOnce() -> I,
    I: IntoIterator<Item = T>,
{
    let _guard = LiveGuard::<T>::new(&ctx.status, None, 0);
    tracing::debug!(stage = ctx.status.index(), "source started");

    match panic::catch_unwind(AssertUnwindSafe(|| emit_batches(&ctx, produce))) {
        Ok(Ok(batches)) => {
            tracing::debug!(
                stage = ctx.status.index(),
                batches,
                items = ctx.tracker.completed(ctx.status.index()),
                "source exhausted"
            );
        }
        Ok(Err(err)) => {
            tracing::error!(
                stage = ctx.status.index(),
                name = ctx.status.name(),
                error = %err,
                "source aborted"
            );
            ctx.status.record_abort(err.to_string());
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!(
                stage = ctx.status.index(),
                name = ctx.status.name(),
                panic = %message,
                "source panicked"
            );
            ctx.status.record_abort(format!("source panicked: {}", message));
        }
    }
}

/// Batch everything the producer yields. Returns the number of batches sent.
fn emit_batches<T, I, P>(ctx: &SourceContext<T>, produce: P) -> Result<u64, QueueError>
where
    P: FnOnce() -> I,
    I: IntoIterator<Item = T>,
{
    let items = produce().into_iter();
    if let (lower, Some(upper)) = items.size_hint() {
        if lower == upper {
            ctx.tracker.set_expected_total(upper as u64);
        }
    }

    let mut batch_id = 0u64;
    let mut current_batch = Vec::with_capacity(ctx.batch_size);

    for item in items {
        current_batch.push(item);
        if current_batch.len() >= ctx.batch_size {
            send_batch(ctx, &mut current_batch, &mut batch_id)?;
        }
    }

    // Final, possibly undersized, batch
    if !current_batch.is_empty() {
        send_batch(ctx, &mut current_batch, &mut batch_id)?;
    }

    Ok(batch_id)
}

fn send_batch<T>(
    ctx: &SourceContext<T>,
    current_batch: &mut Vec<T>,
    batch_id: &mut u64,
) -> Result<(), QueueError> {
    let items = std::mem::replace(current_batch, Vec::with_capacity(ctx.batch_size));
    let count = items.len() as u64;

    ctx.output.put(Batch::new(*batch_id, items))?;
    ctx.tracker.increment(ctx.status.index(), count);
    *batch_id += 1;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn context(batch_size: usize) -> (SourceContext<u32>, Arc<BoundedQueue<u32>>) {
        let status = Arc::new(StageStatus::new(0, "numbers", 1));
        status.begin(1);
        let output = Arc::new(BoundedQueue::unbounded());
        let ctx = SourceContext {
            status,
            output: Arc::clone(&output),
            batch_size,
            tracker: ProgressTracker::new(),
        };
        (ctx, output)
    }

    fn drain(queue: &BoundedQueue<u32>) -> Vec<Batch<u32>> {
        std::iter::from_fn(|| queue.get(Duration::ZERO)).collect()
    }

    #[test]
    fn test_source_batches_with_undersized_tail() {
        let (ctx, output) = context(2);
        let status = Arc::clone(&ctx.status);
        let tracker = ctx.tracker.clone();

        source_thread(ctx, || vec![1, 2, 3, 4, 5]);

        let batches = drain(&output);
        let sizes: Vec<usize> = batches.iter().map(Batch::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        let ids: Vec<u64> = batches.iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);

        assert!(status.is_finished());
        assert_eq!(tracker.completed(0), 5);
        assert_eq!(tracker.expected_total(), Some(5));
    }

    #[test]
    fn test_empty_source_sends_nothing() {
        let (ctx, output) = context(4);
        let status = Arc::clone(&ctx.status);

        source_thread(ctx, Vec::<u32>::new);

        assert!(output.is_empty());
        assert!(status.is_finished());
    }

    #[test]
    fn test_unsized_source_has_no_expected_total() {
        let (ctx, output) = context(10);
        let tracker = ctx.tracker.clone();

        source_thread(ctx, || (0..100u32).filter(|n| n % 10 == 0));

        assert_eq!(drain(&output).len(), 1);
        assert_eq!(tracker.expected_total(), None);
        assert_eq!(tracker.completed(0), 10);
    }

    #[test]
    fn test_panicking_source_still_finishes_stage() {
        let (ctx, output) = context(1);
        let status = Arc::clone(&ctx.status);

        source_thread(ctx, || {
            (0..3u32).map(|n| {
                if n == 2 {
                    panic!("source broke");
                }
                n
            })
        });

        assert_eq!(drain(&output).len(), 2);
        assert!(status.is_finished());
        assert_eq!(status.live_workers(), 0);
        assert_eq!(
            status.abort_reason().as_deref(),
            Some("source panicked: source broke")
        );
    }

    #[test]
    fn test_closed_output_aborts_source() {
        let (ctx, output) = context(1);
        let status = Arc::clone(&ctx.status);
        output.close();

        source_thread(ctx, || vec![1, 2, 3]);

        assert!(output.is_empty());
        assert!(status.is_finished());
        assert_eq!(status.abort_reason().as_deref(), Some("queue is closed"));
    }
}
