//! The transform capability applied by stage workers.

use anyhow::Result;

/// Per-item transformation run by every worker of a stage.
///
/// Implementations are shared between the stage's worker threads, so they
/// must be `Send + Sync`. Extra arguments are bound by the implementor at
/// construction time (struct fields or closure captures).
///
/// Returning `Err` drops the item: the error is logged, counted as a
/// failure, and the rest of the batch carries on.
pub trait Transform<I, O>: Send + Sync {
    fn apply(&self, item: I) -> Result<O>;
}

impl<I, O, F> Transform<I, O> for F
where
    F: Fn(I) -> Result<O> + Send + Sync,
{
    fn apply(&self, item: I) -> Result<O> {
        self(item)
    }
}
