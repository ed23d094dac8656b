// Command-line interface definitions for the streamtask driver

use clap::Parser;
use std::time::Duration;

use crate::ops::StageSpec;
use streamtask::PipelineConfig;

#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StatsFormat {
    #[default]
    Table,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "streamtask")]
#[command(about = "Run input lines through a staged, multi-threaded pipeline")]
#[command(
    long_about = "Run input lines through a staged, multi-threaded pipeline\n\nEvery --stage appends one stage with its own worker pool. Stages are linked by bounded queues, so a slow stage throttles the ones before it.\n\nEXAMPLES:\n  streamtask access.log -s trim -s upper@4\n  streamtask numbers.txt.gz -s int -s double --stats\n  printf 'a\\nb\\n' | streamtask -s 'prefix=> ' --sequential"
)]
#[command(version)]
#[command(args_override_self = true)]
pub struct Cli {
    /// Input files (stdin if not specified, or use "-" to explicitly specify stdin)
    pub files: Vec<String>,

    /// Append a stage: trim, upper, lower, reverse, len, int, double, prefix=TEXT, suffix=TEXT, replace=FROM/TO.
    /// A trailing @N sets the stage's worker count, e.g. upper@4.
    #[arg(
        short = 's',
        long = "stage",
        value_name = "OP[=ARG][@WORKERS]",
        help_heading = "Pipeline Options"
    )]
    pub stages: Vec<StageSpec>,

    /// Run every stage to completion in turn on the calling thread
    #[arg(long = "sequential", help_heading = "Pipeline Options")]
    pub sequential: bool,

    /// Workers for stages without @N (0 = number of CPUs)
    #[arg(
        short = 'j',
        long = "threads",
        default_value_t = 0,
        help_heading = "Performance Options"
    )]
    pub threads: usize,

    /// Items per source batch
    #[arg(short = 'b', long = "batch-size", help_heading = "Performance Options")]
    pub batch_size: Option<usize>,

    /// Batches an internal queue holds before its producer blocks
    #[arg(long = "queue-capacity", help_heading = "Performance Options")]
    pub queue_capacity: Option<usize>,

    /// How long an idle worker waits before re-checking for shutdown (e.g. 500ms, 2s)
    #[arg(long = "poll", value_parser = humantime::parse_duration, help_heading = "Performance Options")]
    pub poll: Option<Duration>,

    /// Interval between progress lines (logged at info level, see -v)
    #[arg(long = "progress-interval", value_parser = humantime::parse_duration, help_heading = "Performance Options")]
    pub progress_interval: Option<Duration>,

    /// Print per-stage statistics to stderr when done
    #[arg(long = "stats", help_heading = "Metrics and Stats")]
    pub stats: bool,

    /// Format for --stats
    #[arg(
        long = "stats-format",
        value_enum,
        default_value = "table",
        help_heading = "Metrics and Stats"
    )]
    pub stats_format: StatsFormat,

    /// More log output (-v info, -vv debug, -vvv trace). RUST_LOG takes precedence.
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, help_heading = "Logging")]
    pub verbose: u8,

    /// Only log errors
    #[arg(short = 'q', long = "quiet", help_heading = "Logging", conflicts_with = "verbose")]
    pub quiet: bool,

    /// Specify custom configuration file path
    #[arg(long = "config-file", help_heading = "Configuration Options")]
    pub config_file: Option<String>,

    /// Ignore configuration file
    #[arg(long = "ignore-config", help_heading = "Configuration Options")]
    pub ignore_config: bool,

    /// Use alias from configuration file
    #[arg(short = 'a', long = "alias", help_heading = "Configuration Options")]
    pub alias: Vec<String>,

    /// Show configuration file and exit
    #[arg(long = "show-config", help_heading = "Configuration Options")]
    pub show_config: bool,
}

impl Cli {
    /// Pipeline configuration: library defaults overridden by whatever was given
    pub fn pipeline_config(&self) -> PipelineConfig {
        let mut config = PipelineConfig::default();
        if let Some(capacity) = self.queue_capacity {
            config = config.with_queue_capacity(capacity);
        }
        if let Some(batch_size) = self.batch_size {
            config = config.with_batch_size(batch_size);
        }
        if let Some(poll) = self.poll {
            config = config.with_poll_interval(poll);
        }
        if let Some(interval) = self.progress_interval {
            config = config.with_progress_interval(interval);
        }
        config
    }

    /// Worker count for stages that do not set their own
    pub fn default_workers(&self) -> usize {
        if self.threads == 0 {
            num_cpus::get()
        } else {
            self.threads
        }
    }

    /// Log filter directive implied by -v/-q
    pub fn log_level(&self) -> &'static str {
        if self.quiet {
            return "error";
        }
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::LineOp;

    fn parse_cli(args: &[&str]) -> Cli {
        let mut full = vec!["streamtask"];
        full.extend_from_slice(args);
        Cli::try_parse_from(full).expect("arguments should parse")
    }

    #[test]
    fn stages_keep_command_line_order() {
        let cli = parse_cli(&["-s", "trim", "--stage", "upper@3", "-s", "suffix=!", "in.txt"]);
        let ops: Vec<&LineOp> = cli.stages.iter().map(|s| &s.op).collect();
        assert_eq!(
            ops,
            vec![&LineOp::Trim, &LineOp::Upper, &LineOp::Suffix("!".to_string())]
        );
        assert_eq!(cli.stages[1].workers, Some(3));
        assert_eq!(cli.files, vec!["in.txt"]);
    }

    #[test]
    fn unknown_stage_is_a_usage_error() {
        let err = Cli::try_parse_from(["streamtask", "-s", "explode"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn pipeline_config_overrides() {
        let cli = parse_cli(&[
            "--queue-capacity",
            "2",
            "-b",
            "50",
            "--poll",
            "250ms",
            "--progress-interval",
            "5s",
        ]);
        let config = cli.pipeline_config();
        assert_eq!(config.queue_capacity, 2);
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.progress_interval, Duration::from_secs(5));

        let defaults = parse_cli(&[]).pipeline_config();
        assert_eq!(defaults.queue_capacity, PipelineConfig::default().queue_capacity);
    }

    #[test]
    fn default_workers_uses_cpu_count_for_zero() {
        assert_eq!(parse_cli(&["-j", "3"]).default_workers(), 3);
        assert_eq!(parse_cli(&[]).default_workers(), num_cpus::get());
    }

    #[test]
    fn log_level_from_flags() {
        assert_eq!(parse_cli(&[]).log_level(), "warn");
        assert_eq!(parse_cli(&["-vv"]).log_level(), "debug");
        assert_eq!(parse_cli(&["-vvvv"]).log_level(), "trace");
        assert_eq!(parse_cli(&["-q"]).log_level(), "error");
    }

    #[test]
    fn stats_format_parses() {
        let cli = parse_cli(&["--stats", "--stats-format", "json"]);
        assert!(cli.stats);
        assert_eq!(cli.stats_format, StatsFormat::Json);
    }
}
