use std::path::PathBuf;

use anyhow::{anyhow, Context};
use chrono::NaiveDateTime;
use clap::Args;

use etl_overseer::overseer::ActionStatus;
use etl_overseer::{
    parse_datetime, parse_end_datetime, ConfigLoader, OptionOverride, Overseer, ProgressEvent,
    ProgressReporter, RunOptions,
};

use crate::output::print_json;

#[derive(Args)]
pub struct RunArgs {
    /// Configuration file
    #[arg(short, long, env = "ETL_OVERSEER_CONFIG")]
    pub config: PathBuf,

    /// Pipeline to run (repeatable). All pipelines run when neither
    /// --pipeline nor --action is given.
    #[arg(short, long = "pipeline")]
    pub pipelines: Vec<String>,

    /// Standalone action as section.action (repeatable)
    #[arg(short, long = "action")]
    pub actions: Vec<String>,

    /// Start of the run (YYYY-MM-DD or YYYY-MM-DD HH:MM:SS)
    #[arg(short, long, value_parser = parse_start)]
    pub start: Option<NaiveDateTime>,

    /// End of the run, inclusive. A bare date covers the whole day.
    #[arg(short, long, value_parser = parse_end)]
    pub end: Option<NaiveDateTime>,

    /// Split the range into chunks of this many days
    #[arg(long)]
    pub chunk_size_days: Option<u32>,

    /// Verify and walk the plan without writing data or journal entries
    #[arg(long)]
    pub dry_run: bool,

    /// Re-run windows already recorded in the journal
    #[arg(short, long)]
    pub force: bool,

    /// Override an action option, KEY=VALUE with a JSON value (repeatable)
    #[arg(short = 'o', long = "option", value_name = "KEY=VALUE")]
    pub overrides: Vec<OptionOverride>,

    /// Directory for the run lock file
    #[arg(long, env = "ETL_OVERSEER_LOCK_DIR")]
    pub lock_dir: Option<PathBuf>,
}

fn parse_start(value: &str) -> Result<NaiveDateTime, String> {
    parse_datetime(value).ok_or_else(|| format!("invalid date '{}'", value))
}

fn parse_end(value: &str) -> Result<NaiveDateTime, String> {
    parse_end_datetime(value).ok_or_else(|| format!("invalid date '{}'", value))
}

/// Prints progress lines to stderr so stdout stays parseable.
struct ConsoleProgress;

impl ProgressReporter for ConsoleProgress {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::PipelineStarted { pipeline, range } => {
                eprintln!("==> {} [{}]", pipeline, range);
            }
            ProgressEvent::ChunkStarted {
                index,
                total,
                chunk,
                ..
            } => {
                if total > 1 {
                    eprintln!("  chunk {}/{} [{}]", index + 1, total, chunk);
                }
            }
            ProgressEvent::ActionFinished(result) => match result.status {
                ActionStatus::Completed => eprintln!(
                    "    {} examined={} loaded={} ({}ms)",
                    result.action, result.stats.examined, result.stats.loaded, result.elapsed_ms
                ),
                ActionStatus::Skipped => eprintln!(
                    "    {} skipped: {}",
                    result.action,
                    result.message.as_deref().unwrap_or("")
                ),
                ActionStatus::Failed => eprintln!(
                    "    {} FAILED: {}",
                    result.action,
                    result.message.as_deref().unwrap_or("")
                ),
            },
            ProgressEvent::PipelineFinished { pipeline, state } => {
                eprintln!("<== {} {}", pipeline, state);
            }
        }
    }
}

/// Returns `Ok(false)` when a pipeline failed.
pub fn run(args: RunArgs, json: bool) -> anyhow::Result<bool> {
    let config = ConfigLoader::new(&args.config)
        .with_overrides(args.overrides)
        .load()
        .with_context(|| format!("Failed to load {}", args.config.display()))?;

    let mut options = RunOptions::new()
        .range(args.start, args.end)
        .dry_run(args.dry_run)
        .force(args.force);
    options.pipelines = args.pipelines;
    options.actions = args.actions;
    if let Some(days) = args.chunk_size_days {
        if days == 0 {
            return Err(anyhow!("--chunk-size-days must be positive"));
        }
        options = options.chunk_size_days(days);
    }
    if let Some(dir) = args.lock_dir {
        options = options.lock_dir(dir);
    }

    let mut overseer = Overseer::new(config);
    if !json {
        overseer = overseer.with_progress(Box::new(ConsoleProgress));
    }
    let summary = overseer.run(&options)?;

    if json {
        print_json(&summary)?;
    } else {
        println!("{}", summary);
    }
    Ok(summary.is_success())
}
