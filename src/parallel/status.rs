//! Per-stage lifecycle: live-worker accounting and state transitions.

use crossbeam_channel::{bounded, Receiver, Sender};
use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Lifecycle of a stage. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageState {
    Pending,
    Running,
    Draining,
    Finished,
}

impl StageState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => StageState::Pending,
            1 => StageState::Running,
            2 => StageState::Draining,
            _ => StageState::Finished,
        }
    }
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StageState::Pending => "pending",
            StageState::Running => "running",
            StageState::Draining => "draining",
            StageState::Finished => "finished",
        };
        f.write_str(name)
    }
}

/// Shared view of one stage, handed to its workers and to downstream workers
#[derive(Debug)]
pub struct StageStatus {
    index: usize,
    name: String,
    workers: AtomicUsize,
    live: AtomicUsize,
    state: AtomicU8,
    abort: Mutex<Option<String>>,
    done_tx: Mutex<Option<Sender<()>>>,
    done_rx: Receiver<()>,
}

impl StageStatus {
    pub(crate) fn new(index: usize, name: impl Into<String>, workers: usize) -> Self {
        let (done_tx, done_rx) = bounded(0);
        Self {
            index,
            name: name.into(),
            workers: AtomicUsize::new(workers),
            live: AtomicUsize::new(0),
            state: AtomicU8::new(StageState::Pending as u8),
            abort: Mutex::new(None),
            done_tx: Mutex::new(Some(done_tx)),
            done_rx,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Worker count: as configured until the stage starts, then the number
    /// actually launched (one per stage in sequential runs)
    pub fn workers(&self) -> usize {
        self.workers.load(Ordering::SeqCst)
    }

    /// Workers currently alive
    pub fn live_workers(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> StageState {
        StageState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_finished(&self) -> bool {
        self.state() == StageState::Finished
    }

    /// Disconnects when the stage finishes; lets consumers wake without polling
    pub(crate) fn done_signal(&self) -> &Receiver<()> {
        &self.done_rx
    }

    /// Why a worker of this stage stopped before its input was exhausted
    pub fn abort_reason(&self) -> Option<String> {
        self.lock_abort().clone()
    }

    pub fn is_aborted(&self) -> bool {
        self.lock_abort().is_some()
    }

    /// Record an abnormal worker exit. The first reason wins.
    pub(crate) fn record_abort(&self, reason: impl Into<String>) {
        let mut abort = self.lock_abort();
        if abort.is_none() {
            *abort = Some(reason.into());
        }
    }

    fn lock_abort(&self) -> MutexGuard<'_, Option<String>> {
        match self.abort.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Account for `workers` live workers before any of them is spawned
    pub(crate) fn begin(&self, workers: usize) {
        self.workers.store(workers, Ordering::SeqCst);
        self.live.store(workers, Ordering::SeqCst);
        self.advance(StageState::Running);
    }

    pub(crate) fn mark_draining(&self) {
        let _ = self.state.compare_exchange(
            StageState::Running as u8,
            StageState::Draining as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    /// Drop one live worker. Returns true when it was the last one.
    pub(crate) fn release(&self) -> bool {
        let previous = self.live.fetch_sub(1, Ordering::SeqCst);
        if previous == 1 {
            self.advance(StageState::Finished);
            let sender = match self.done_tx.lock() {
                Ok(mut guard) => guard.take(),
                Err(poisoned) => poisoned.into_inner().take(),
            };
            drop(sender);
            return true;
        }
        false
    }

    fn advance(&self, next: StageState) {
        self.state.fetch_max(next as u8, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_lifecycle() {
        let status = StageStatus::new(1, "double", 2);
        assert_eq!(status.state(), StageState::Pending);

        status.begin(2);
        assert_eq!(status.state(), StageState::Running);
        assert_eq!(status.live_workers(), 2);

        status.mark_draining();
        assert_eq!(status.state(), StageState::Draining);

        assert!(!status.release());
        assert!(!status.is_finished());
        assert!(status.release());
        assert!(status.is_finished());
        assert_eq!(status.live_workers(), 0);
    }

    #[test]
    fn test_draining_never_moves_backwards() {
        let status = StageStatus::new(0, "source", 1);
        status.begin(1);
        status.release();
        status.mark_draining();
        assert_eq!(status.state(), StageState::Finished);
    }

    #[test]
    fn test_done_signal_disconnects_on_finish() {
        let status = StageStatus::new(0, "source", 1);
        status.begin(1);
        assert!(status
            .done_signal()
            .recv_timeout(Duration::from_millis(10))
            .is_err());
        status.release();
        assert_eq!(
            status.done_signal().recv_timeout(Duration::from_secs(1)),
            Err(crossbeam_channel::RecvTimeoutError::Disconnected)
        );
    }

    #[test]
    fn test_begin_records_launched_workers() {
        let status = StageStatus::new(2, "upper", 8);
        assert_eq!(status.workers(), 8);
        status.begin(1);
        assert_eq!(status.workers(), 1);
        assert_eq!(status.live_workers(), 1);
    }

    #[test]
    fn test_first_abort_reason_wins() {
        let status = StageStatus::new(1, "copy", 2);
        assert!(!status.is_aborted());
        status.record_abort("output queue is closed");
        status.record_abort("second worker gave up");
        assert_eq!(
            status.abort_reason().as_deref(),
            Some("output queue is closed")
        );
    }

    #[test]
    fn test_state_display() {
        assert_eq!(StageState::Draining.to_string(), "draining");
    }
}
