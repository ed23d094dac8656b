//! Progress reporter thread
//!
//! Periodically snapshots the tracker and renders one status line per stage
//! through `tracing`, until the orchestrator signals completion.

use crossbeam_channel::{select, tick, Receiver};
use std::sync::Arc;
use std::time::Duration;

use super::status::StageStatus;
use super::tracker::{estimate_remaining, ProgressTracker, StageCounters};

/// Reporter thread: renders progress every `interval`
pub(crate) fn reporter_thread(
    stages: Vec<Arc<StageStatus>>,
    tracker: ProgressTracker,
    interval: Duration,
    done_rx: Receiver<()>,
) {
    let ticker = tick(interval);

    loop {
        select! {
            recv(done_rx) -> _ => break,
            recv(ticker) -> _ => {
                report(&stages, &tracker);
                if stages.iter().all(|stage| stage.is_finished()) {
                    return;
                }
            }
        }
    }

    report(&stages, &tracker);
}

fn report(stages: &[Arc<StageStatus>], tracker: &ProgressTracker) {
    let counters = tracker.counters();
    let expected_total = tracker.expected_total();
    let elapsed = tracker.elapsed();

    for stage in stages {
        let stage_counters = counters.get(&stage.index()).copied().unwrap_or_default();
        let eta = expected_total
            .and_then(|total| estimate_remaining(stage_counters.completed, total, elapsed));
        tracing::info!(
            target: "streamtask::progress",
            "{}",
            render_stage_line(stage, stage_counters, eta)
        );
    }
}

/// One status line, e.g. `[1] double: running, 2/2 workers, 1200 done, 3 failed, eta 4s`
pub(crate) fn render_stage_line(
    stage: &StageStatus,
    counters: StageCounters,
    eta: Option<Duration>,
) -> String {
    let mut line = format!(
        "[{}] {}: {}, {}/{} workers, {} done",
        stage.index(),
        stage.name(),
        stage.state(),
        stage.live_workers(),
        stage.workers(),
        counters.completed
    );

    if counters.failed > 0 {
        line.push_str(&format!(", {} failed", counters.failed));
    }

    if let Some(eta) = eta {
        if !stage.is_finished() {
            // Whole seconds; sub-second precision is noise here
            let eta = Duration::from_secs(eta.as_secs());
            line.push_str(&format!(", eta {}", humantime::format_duration(eta)));
        }
    }

    line
}
