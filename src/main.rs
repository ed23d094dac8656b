use anyhow::{Context, Result};
use clap::Parser;
use std::io::{self, BufWriter, Write};
use std::process::ExitCode;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use streamtask::{Pipeline, PipelineStats, StageOptions};

mod cli;
mod config_file;
mod ops;
mod readers;

use cli::{Cli, StatsFormat};
use config_file::ConfigFile;

fn main() -> ExitCode {
    let raw_args: Vec<String> = std::env::args().collect();

    let cli = match parse_args(raw_args) {
        Ok(Some(cli)) => cli,
        Ok(None) => return ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("streamtask: Config error: {:#}", e);
            return ExitCode::from(1);
        }
    };

    init_logging(&cli);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("streamtask: Error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

/// Apply config file defaults and aliases, then parse. `Ok(None)` means the
/// invocation was fully handled (e.g. --show-config).
fn parse_args(raw_args: Vec<String>) -> Result<Option<Cli>> {
    if raw_args.iter().any(|arg| arg == "--show-config") {
        ConfigFile::show_config(&mut io::stdout().lock())?;
        return Ok(None);
    }

    let processed_args = if raw_args.iter().any(|arg| arg == "--ignore-config") {
        raw_args
    } else {
        let config_file_path = extract_config_file_arg(&raw_args);
        ConfigFile::load_with_custom_path(config_file_path.as_deref())?.process_args(raw_args)?
    };

    // clap prints usage errors itself and exits with status 2
    Ok(Some(Cli::parse_from(processed_args)))
}

/// Extract --config-file argument from raw args
fn extract_config_file_arg(args: &[String]) -> Option<String> {
    args.iter()
        .position(|arg| arg == "--config-file")
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn init_logging(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_level()));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr).with_target(false))
        .with(filter)
        .init();
}

fn run(cli: &Cli) -> Result<()> {
    let lines = readers::InputLines::new(readers::open_inputs(&cli.files)?);
    let read_failure = lines.failure();
    let default_workers = cli.default_workers();

    let mut pipeline = Pipeline::new(cli.pipeline_config()).add_source(
        "input",
        move || lines,
        StageOptions::default(),
    )?;

    for (position, spec) in cli.stages.iter().enumerate() {
        let workers = spec.workers.unwrap_or(default_workers);
        let name = format!("{}-{}", spec.op.name(), position + 1);
        let op = spec.op.clone();
        pipeline = pipeline.add_stage(
            name,
            move |line: String| op.apply(line),
            StageOptions::new(workers),
        )?;
    }

    tracing::info!(
        stages = pipeline.stage_count(),
        sequential = cli.sequential,
        "pipeline assembled"
    );

    pipeline.run(!cli.sequential)?;
    pipeline.join()?;

    let results = pipeline.get_results()?;
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    for line in &results {
        if let Err(e) = writeln!(out, "{}", line) {
            // Downstream closed the pipe (e.g. `| head`)
            if e.kind() == io::ErrorKind::BrokenPipe {
                return Ok(());
            }
            return Err(e).context("Failed to write output");
        }
    }
    out.flush().context("Failed to write output")?;

    if cli.stats {
        print_stats(&pipeline.stats(), cli.stats_format)?;
    }

    // Whatever was read before the failure has been written; the run still fails
    match read_failure.take() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn print_stats(stats: &PipelineStats, format: StatsFormat) -> Result<()> {
    let rendered = match format {
        StatsFormat::Table => stats.format_stats(),
        StatsFormat::Json => serde_json::to_string_pretty(stats).context("Failed to render stats")?,
    };
    eprintln!("{}", rendered);
    Ok(())
}
