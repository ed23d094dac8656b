//! Thread-safe progress tracking for pipeline stages
//!
//! Contains ProgressTracker, the lock-guarded per-stage counters shared by
//! every worker and read by the progress reporter.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Counters kept for one stage
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StageCounters {
    /// Items taken through the stage, whether or not their transform succeeded
    pub completed: u64,
    /// Items dropped because their transform failed
    pub failed: u64,
}

#[derive(Debug)]
struct TrackerState {
    stages: HashMap<usize, StageCounters>,
    expected_total: Option<u64>,
    start_time: Instant,
}

/// Thread-safe per-stage progress counters
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    state: Arc<Mutex<TrackerState>>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(TrackerState {
                stages: HashMap::new(),
                expected_total: None,
                start_time: Instant::now(),
            })),
        }
    }

    /// Lock the counters with poison recovery
    fn lock_state(&self) -> MutexGuard<'_, TrackerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("worker thread panicked while holding progress lock, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Add `delta` completed items to a stage
    pub fn increment(&self, stage: usize, delta: u64) {
        let mut state = self.lock_state();
        let counters = state.stages.entry(stage).or_default();
        counters.completed = counters.completed.saturating_add(delta);
    }

    /// Add `delta` failed items to a stage
    pub fn record_failures(&self, stage: usize, delta: u64) {
        let mut state = self.lock_state();
        let counters = state.stages.entry(stage).or_default();
        counters.failed = counters.failed.saturating_add(delta);
    }

    /// Point-in-time copy of completed counts per stage
    pub fn snapshot(&self) -> HashMap<usize, u64> {
        self.lock_state()
            .stages
            .iter()
            .map(|(stage, counters)| (*stage, counters.completed))
            .collect()
    }

    /// Point-in-time copy of all counters per stage
    pub fn counters(&self) -> HashMap<usize, StageCounters> {
        self.lock_state().stages.clone()
    }

    pub fn completed(&self, stage: usize) -> u64 {
        self.lock_state()
            .stages
            .get(&stage)
            .map(|c| c.completed)
            .unwrap_or(0)
    }

    pub fn failed(&self, stage: usize) -> u64 {
        self.lock_state()
            .stages
            .get(&stage)
            .map(|c| c.failed)
            .unwrap_or(0)
    }

    /// Record how many items the source will emit, when it is known
    pub fn set_expected_total(&self, total: u64) {
        self.lock_state().expected_total = Some(total);
    }

    pub fn expected_total(&self) -> Option<u64> {
        self.lock_state().expected_total
    }

    /// Time since the tracker was created or last restarted
    pub fn elapsed(&self) -> Duration {
        self.lock_state().start_time.elapsed()
    }

    /// Start the clock over; called when the pipeline starts running
    pub(crate) fn restart(&self) {
        self.lock_state().start_time = Instant::now();
    }

    /// Time left for a stage at its average rate so far
    pub fn eta(&self, stage: usize) -> Option<Duration> {
        let (completed, total, elapsed) = {
            let state = self.lock_state();
            let completed = state.stages.get(&stage).map(|c| c.completed)?;
            (completed, state.expected_total?, state.start_time.elapsed())
        };
        estimate_remaining(completed, total, elapsed)
    }
}

/// `remaining / (completed / elapsed)`, or `None` before any progress and
/// when the estimate does not fit in a `Duration`
pub(crate) fn estimate_remaining(
    completed: u64,
    total: u64,
    elapsed: Duration,
) -> Option<Duration> {
    if completed == 0 {
        return None;
    }
    let remaining = total.saturating_sub(completed);
    let rate = completed as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
    Duration::try_from_secs_f64(remaining as f64 / rate).ok()
}
