use serde::{Serialize, Serializer};
use std::sync::Arc;
use std::time::Duration;

use crate::parallel::{ProgressTracker, StageState, StageStatus};

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Final (or in-flight) numbers for one stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageSummary {
    pub index: usize,
    pub name: String,
    pub workers: usize,
    pub state: StageState,
    pub completed: u64,
    pub failed: u64,
}

/// Statistics collected during a pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStats {
    pub stages: Vec<StageSummary>,
    pub expected_total: Option<u64>,
    #[serde(serialize_with = "serialize_duration")]
    pub elapsed: Duration,
}

impl PipelineStats {
    pub fn collect(stages: &[Arc<StageStatus>], tracker: &ProgressTracker) -> Self {
        let counters = tracker.counters();
        let stages = stages
            .iter()
            .map(|stage| {
                let stage_counters = counters.get(&stage.index()).copied().unwrap_or_default();
                StageSummary {
                    index: stage.index(),
                    name: stage.name().to_string(),
                    workers: stage.workers(),
                    state: stage.state(),
                    completed: stage_counters.completed,
                    failed: stage_counters.failed,
                }
            })
            .collect();

        Self {
            stages,
            expected_total: tracker.expected_total(),
            elapsed: tracker.elapsed(),
        }
    }

    /// Items the source emitted
    pub fn source_items(&self) -> u64 {
        self.stages.first().map(|s| s.completed).unwrap_or(0)
    }

    /// Items that made it out of the last stage
    pub fn output_items(&self) -> u64 {
        self.stages
            .last()
            .map(|s| s.completed - s.failed)
            .unwrap_or(0)
    }

    pub fn total_failed(&self) -> u64 {
        self.stages.iter().map(|s| s.failed).sum()
    }

    pub fn format_stats(&self) -> String {
        let mut output = String::new();

        for stage in &self.stages {
            output.push_str(&format!(
                "Stage {} '{}': {} items",
                stage.index, stage.name, stage.completed
            ));
            if stage.failed > 0 {
                output.push_str(&format!(", {} failed", stage.failed));
            }
            let plural = if stage.workers == 1 { "" } else { "s" };
            output.push_str(&format!(
                ", {} worker{}, {}\n",
                stage.workers, plural, stage.state
            ));
        }

        let processing_time_ms = self.elapsed.as_millis();
        output.push_str(&format!(
            "Items processed: {} in, {} out",
            self.source_items(),
            self.output_items()
        ));

        let failed = self.total_failed();
        if failed > 0 {
            output.push_str(&format!(", {} dropped", failed));
        }

        output.push_str(&format!(" in {}ms", processing_time_ms));

        if processing_time_ms > 0 && self.source_items() > 0 {
            let items_per_sec = (self.source_items() as f64 * 1000.0) / processing_time_ms as f64;
            output.push_str(&format!(" ({:.0} items/s)", items_per_sec));
        }

        output
    }
}
