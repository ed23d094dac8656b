//! Pipeline orchestrator
//!
//! Contains the typed pipeline builder, which wires stages and queues
//! together, launches workers and coordinates shutdown.

use crossbeam_channel::{bounded, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::stats::PipelineStats;

use super::batching::{source_thread, SourceContext};
use super::error::PipelineError;
use super::queue::BoundedQueue;
use super::reporter::reporter_thread;
use super::status::StageStatus;
use super::tracker::ProgressTracker;
use super::transform::Transform;
use super::types::{PipelineConfig, StageOptions};
use super::worker::{worker_thread, ItemError, ItemErrorHook, WorkerContext};

/// Deferred launch of every stage up to and including the tail. Returns the
/// tail's output queue.
type Launch<T> =
    Box<dyn FnOnce(&mut Wiring, QueueRole) -> Result<Arc<BoundedQueue<T>>, PipelineError> + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueueRole {
    /// Between two stages; bounded in parallel runs
    Internal,
    /// Drained by the caller after `join()`; never bounded
    Terminal,
}

/// Run-time state threaded through the launch chain
struct Wiring {
    parallel: bool,
    config: PipelineConfig,
    tracker: ProgressTracker,
    error_hook: Option<ItemErrorHook>,
    handles: Vec<JoinHandle<()>>,
    closers: Vec<Box<dyn Fn() + Send>>,
    internal_queues: usize,
}

impl Wiring {
    fn queue<T: Send + 'static>(&mut self, role: QueueRole) -> Arc<BoundedQueue<T>> {
        let queue = match role {
            QueueRole::Terminal => Arc::new(BoundedQueue::unbounded()),
            QueueRole::Internal => {
                self.internal_queues += 1;
                if self.parallel {
                    Arc::new(BoundedQueue::bounded(self.config.queue_capacity))
                } else {
                    Arc::new(BoundedQueue::unbounded())
                }
            }
        };
        let closer = Arc::clone(&queue);
        self.closers.push(Box::new(move || closer.close()));
        queue
    }

    /// Start one worker slot: a named thread in parallel runs, inline otherwise
    fn spawn<F>(&mut self, stage: &StageStatus, slot: usize, body: F) -> Result<(), PipelineError>
    where
        F: FnOnce() + Send + 'static,
    {
        if !self.parallel {
            body();
            return Ok(());
        }

        let handle = thread::Builder::new()
            .name(format!("{}#{}", stage.name().replace('\0', ""), slot))
            .spawn(body)
            .map_err(|source| PipelineError::Spawn {
                stage: stage.name().to_string(),
                source,
            })?;
        self.handles.push(handle);
        Ok(())
    }

    fn close_queues(&self) {
        for close in &self.closers {
            close();
        }
    }
}

struct ReporterHandle {
    handle: JoinHandle<()>,
    done_tx: Sender<()>,
}

struct RunState<T> {
    output: Arc<BoundedQueue<T>>,
    workers: Vec<JoinHandle<()>>,
    reporter: Option<ReporterHandle>,
    internal_queues: usize,
}

/// An empty pipeline, waiting for its source stage
#[derive(Default)]
pub struct PipelineBuilder {
    config: PipelineConfig,
    error_hook: Option<ItemErrorHook>,
}

impl PipelineBuilder {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            error_hook: None,
        }
    }

    /// Call `hook` for every item a stage drops. Items are still dropped and
    /// logged; the hook only observes them.
    pub fn on_item_error<H>(mut self, hook: H) -> Self
    where
        H: Fn(&ItemError) + Send + Sync + 'static,
    {
        self.error_hook = Some(Arc::new(hook));
        self
    }

    /// Add the source stage (index 0). `produce` runs once, on the source
    /// thread, and everything it yields is batched and sent downstream.
    ///
    /// A source always runs a single worker; `options.workers` above one is
    /// ignored.
    pub fn add_source<T, I, P>(
        self,
        name: impl Into<String>,
        produce: P,
        options: StageOptions,
    ) -> Result<Pipeline<T>, PipelineError>
    where
        T: Send + 'static,
        I: IntoIterator<Item = T>,
        P: FnOnce() -> I + Send + 'static,
    {
        let name = name.into();
        self.config.validate()?;
        options.validate(&name)?;
        if options.workers > 1 {
            tracing::warn!(
                stage = %name,
                workers = options.workers,
                "source stages run a single worker"
            );
        }

        let batch_size = options.batch_size.unwrap_or(self.config.batch_size);
        let status = Arc::new(StageStatus::new(0, name, 1));
        let stage = Arc::clone(&status);

        let launch: Launch<T> = Box::new(move |wiring: &mut Wiring, role: QueueRole| {
            let output = wiring.queue::<T>(role);
            stage.begin(1);
            let ctx = SourceContext {
                status: Arc::clone(&stage),
                output: Arc::clone(&output),
                batch_size,
                tracker: wiring.tracker.clone(),
            };
            if let Err(err) = wiring.spawn(&stage, 0, move || source_thread(ctx, produce)) {
                stage.release();
                return Err(err);
            }
            Ok(output)
        });

        Ok(Pipeline {
            config: self.config,
            error_hook: self.error_hook,
            tracker: ProgressTracker::new(),
            stages: vec![status],
            launch: Some(launch),
            run: None,
        })
    }

    /// Add a source stage that yields every item of `data`
    pub fn add_data<T, D>(
        self,
        data: D,
        options: StageOptions,
    ) -> Result<Pipeline<T>, PipelineError>
    where
        T: Send + 'static,
        D: IntoIterator<Item = T> + Send + 'static,
    {
        self.add_source("data", move || data, options)
    }
}

/// A chain of stages whose tail produces `T`.
///
/// Built with [`PipelineBuilder`], extended with [`add_stage`](Self::add_stage),
/// then started once with [`run`](Self::run).
pub struct Pipeline<T> {
    config: PipelineConfig,
    error_hook: Option<ItemErrorHook>,
    tracker: ProgressTracker,
    stages: Vec<Arc<StageStatus>>,
    launch: Option<Launch<T>>,
    run: Option<RunState<T>>,
}

impl Pipeline<()> {
    /// Start building a pipeline; same as [`PipelineBuilder::new`]
    pub fn new(config: PipelineConfig) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }
}

impl<T: Send + 'static> Pipeline<T> {
    /// Append a stage applying `f` to every item. The stage's input queue is
    /// the current tail's output queue.
    pub fn add_stage<U, F>(
        self,
        name: impl Into<String>,
        f: F,
        options: StageOptions,
    ) -> Result<Pipeline<U>, PipelineError>
    where
        U: Send + 'static,
        F: Fn(T) -> anyhow::Result<U> + Send + Sync + 'static,
    {
        self.add_transform(name, f, options)
    }

    /// Append a stage backed by any [`Transform`] implementation
    pub fn add_transform<U, X>(
        self,
        name: impl Into<String>,
        transform: X,
        options: StageOptions,
    ) -> Result<Pipeline<U>, PipelineError>
    where
        U: Send + 'static,
        X: Transform<T, U> + 'static,
    {
        let name = name.into();
        options.validate(&name)?;
        let prev = self.launch.ok_or(PipelineError::AlreadyStarted)?;
        let upstream = self
            .stages
            .last()
            .cloned()
            .ok_or_else(|| PipelineError::InvalidConfig("pipeline has no source".to_string()))?;

        let mut stages = self.stages;
        let status = Arc::new(StageStatus::new(stages.len(), name, options.workers));
        stages.push(Arc::clone(&status));

        let transform: Arc<dyn Transform<T, U>> = Arc::new(transform);
        let launch: Launch<U> = Box::new(move |wiring: &mut Wiring, role: QueueRole| {
            let input = prev(wiring, QueueRole::Internal)?;
            let output = wiring.queue::<U>(role);
            let workers = if wiring.parallel { status.workers() } else { 1 };

            status.begin(workers);
            for slot in 0..workers {
                let ctx = WorkerContext {
                    worker_id: slot,
                    status: Arc::clone(&status),
                    upstream: Arc::clone(&upstream),
                    input: Arc::clone(&input),
                    output: Arc::clone(&output),
                    transform: Arc::clone(&transform),
                    max_batch: options.batch_size,
                    tracker: wiring.tracker.clone(),
                    poll_interval: wiring.config.poll_interval,
                    error_hook: wiring.error_hook.clone(),
                };
                if let Err(err) = wiring.spawn(&status, slot, move || worker_thread(ctx)) {
                    // Slots from here on never started
                    for _ in slot..workers {
                        status.release();
                    }
                    return Err(err);
                }
            }
            Ok(output)
        });

        Ok(Pipeline {
            config: self.config,
            error_hook: self.error_hook,
            tracker: self.tracker,
            stages,
            launch: Some(launch),
            run: None,
        })
    }

    /// Call `hook` for every item a stage drops
    pub fn on_item_error<H>(mut self, hook: H) -> Self
    where
        H: Fn(&ItemError) + Send + Sync + 'static,
    {
        self.error_hook = Some(Arc::new(hook));
        self
    }

    /// Start the pipeline.
    ///
    /// With `parallel`, every worker slot gets its own thread plus one
    /// progress reporter thread, and this returns immediately; call
    /// [`join`](Self::join) to wait. Without it, every stage runs to
    /// completion in the calling thread, one after the other.
    ///
    /// A pipeline runs once; a second call fails with
    /// [`PipelineError::AlreadyStarted`].
    pub fn run(&mut self, parallel: bool) -> Result<(), PipelineError> {
        let launch = self.launch.take().ok_or(PipelineError::AlreadyStarted)?;
        let mut wiring = Wiring {
            parallel,
            config: self.config.clone(),
            tracker: self.tracker.clone(),
            error_hook: self.error_hook.clone(),
            handles: Vec::new(),
            closers: Vec::new(),
            internal_queues: 0,
        };

        tracing::info!(stages = self.stages.len(), parallel, "starting pipeline");
        self.tracker.restart();

        let output = match launch(&mut wiring, QueueRole::Terminal) {
            Ok(output) => output,
            Err(err) => {
                // Unblock whatever did start so it winds down on its own
                wiring.close_queues();
                return Err(err);
            }
        };

        let reporter = if parallel {
            self.spawn_reporter()
        } else {
            None
        };

        self.run = Some(RunState {
            output,
            workers: wiring.handles,
            reporter,
            internal_queues: wiring.internal_queues,
        });
        Ok(())
    }

    fn spawn_reporter(&self) -> Option<ReporterHandle> {
        let (done_tx, done_rx) = bounded(0);
        let stages = self.stages.clone();
        let tracker = self.tracker.clone();
        let interval = self.config.progress_interval;

        match thread::Builder::new()
            .name("progress-reporter".to_string())
            .spawn(move || reporter_thread(stages, tracker, interval, done_rx))
        {
            Ok(handle) => Some(ReporterHandle { handle, done_tx }),
            Err(err) => {
                tracing::warn!(error = %err, "could not start progress reporter");
                None
            }
        }
    }

    /// Block until every stage has finished, then until the progress
    /// reporter has exited.
    ///
    /// Fails with [`PipelineError::StageAborted`] when a stage stopped before
    /// consuming all of its input. Closing a queue only shuts down the stages
    /// upstream of it, so the reported stage is the last aborted one. Results
    /// that did reach the terminal queue can still be drained.
    pub fn join(&mut self) -> Result<(), PipelineError> {
        let run = self.run.as_mut().ok_or(PipelineError::NotStarted)?;
        let mut panicked = None;

        for handle in run.workers.drain(..) {
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if handle.join().is_err() && panicked.is_none() {
                panicked = Some(name);
            }
        }

        if let Some(reporter) = run.reporter.take() {
            drop(reporter.done_tx);
            if reporter.handle.join().is_err() && panicked.is_none() {
                panicked = Some("progress-reporter".to_string());
            }
        }

        tracing::info!(
            elapsed = %humantime::format_duration(truncate_millis(self.tracker.elapsed())),
            "pipeline finished"
        );

        if let Some(name) = panicked {
            return Err(PipelineError::WorkerPanicked(name));
        }

        let aborted = self
            .stages
            .iter()
            .rev()
            .find_map(|stage| stage.abort_reason().map(|reason| (stage, reason)));
        match aborted {
            Some((stage, reason)) => Err(PipelineError::StageAborted {
                stage: stage.name().to_string(),
                reason,
            }),
            None => Ok(()),
        }
    }

    /// Drain the terminal queue. Order within a batch is preserved; order
    /// across batches is completion order.
    pub fn get_results(&self) -> Result<Vec<T>, PipelineError> {
        let run = self.run.as_ref().ok_or(PipelineError::NotStarted)?;
        let mut results = Vec::new();
        while let Some(batch) = run.output.get(Duration::ZERO) {
            results.extend(batch.into_items());
        }
        Ok(results)
    }

    /// Index of the most recently added stage
    pub fn last_stage(&self) -> usize {
        self.stages.len() - 1
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn stages(&self) -> &[Arc<StageStatus>] {
        &self.stages
    }

    pub fn tracker(&self) -> &ProgressTracker {
        &self.tracker
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Number of stage-to-stage queues the run created, `None` before `run()`
    pub fn internal_queue_count(&self) -> Option<usize> {
        self.run.as_ref().map(|run| run.internal_queues)
    }

    pub fn is_started(&self) -> bool {
        self.launch.is_none()
    }

    pub fn is_finished(&self) -> bool {
        self.stages.iter().all(|stage| stage.is_finished())
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats::collect(&self.stages, &self.tracker)
    }
}

fn truncate_millis(duration: Duration) -> Duration {
    Duration::from_millis(duration.as_millis() as u64)
}
