//! Runs pipelines: plans, verifies, chunks the date range, executes each
//! action per chunk and journals completed windows.

use std::time::Instant;

use chrono::{Duration, Local, NaiveDateTime, Timelike};
use tracing::{error, info, info_span, warn};
use uuid::Uuid;

use crate::action::{build_action, Action, ActionContext, ActionStats, ExecutionWindow};
use crate::config::{ActionSpec, EtlConfig};
use crate::db::Database;
use crate::error::{EtlError, Result};
use crate::journal::Journal;
use crate::period::{format_datetime, DateRange};

pub mod lock;
pub mod options;
pub mod plan;
pub mod progress;
pub mod summary;

pub use lock::LockFile;
pub use options::RunOptions;
pub use plan::{order_actions, plan_run, PipelinePlan};
pub use progress::{NoopProgress, ProgressEvent, ProgressReporter};
pub use summary::{
    ActionExecutionResult, ActionStatus, ActionTotals, PipelineReport, PipelineState, RunSummary,
};

/// Opens the run's connection hub: an in-memory main database with every
/// sqlite endpoint attached under its schema name.
pub fn open_hub(config: &EtlConfig) -> Result<Database> {
    let db = Database::open_in_memory()?;
    for (name, path, schema) in config.sqlite_endpoints() {
        db.attach(schema, path)
            .map_err(|e| EtlError::source_unavailable(name, e.to_string()))?;
    }
    Ok(db)
}

/// Opens the journal in the journal endpoint's schema, or in the hub's main
/// database when that endpoint is not configured.
pub fn open_journal(config: &EtlConfig, db: &Database) -> Result<Journal> {
    let schema = config.journal_schema();
    if schema.is_none() {
        warn!(
            endpoint = %config.journal_endpoint,
            "journal endpoint not configured; journal kept in the main database for this run only"
        );
    }
    Journal::open(db.clone(), schema)
}

struct PlannedAction<'a> {
    spec: &'a ActionSpec,
    /// `None` for disabled actions.
    action: Option<Box<dyn Action>>,
    initialized: bool,
    executions: usize,
    failed: bool,
}

pub struct Overseer {
    config: EtlConfig,
    progress: Box<dyn ProgressReporter>,
}

impl Overseer {
    pub fn new(config: EtlConfig) -> Self {
        Self {
            config,
            progress: Box::new(NoopProgress),
        }
    }

    pub fn with_progress(mut self, progress: Box<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &EtlConfig {
        &self.config
    }

    pub fn plan(&self, options: &RunOptions) -> Result<Vec<PipelinePlan>> {
        plan_run(&self.config, options)
    }

    /// Runs on a fresh connection hub.
    pub fn run(&self, options: &RunOptions) -> Result<RunSummary> {
        let db = open_hub(&self.config)?;
        self.run_on(&db, options)
    }

    /// Runs on an existing hub. Returns `Err` only for problems found before
    /// execution (bad request, cycle, verification, lock, journal); action
    /// failures are reported in the summary.
    pub fn run_on(&self, db: &Database, options: &RunOptions) -> Result<RunSummary> {
        let started = Instant::now();
        let plans = self.plan(options)?;
        let run_id = Uuid::new_v4().to_string();

        let end = match options.end {
            Some(end) => end,
            None => {
                let now = Local::now().naive_local();
                now.with_nanosecond(0).unwrap_or(now)
            }
        };
        if let Some(start) = options.start {
            if start > end {
                return Err(EtlError::InvalidRequest(format!(
                    "start {} is after end {}",
                    format_datetime(&start),
                    format_datetime(&end)
                )));
            }
        }

        let _lock = match &options.lock_dir {
            Some(dir) => {
                let prefix = options
                    .lock_prefix
                    .clone()
                    .unwrap_or_else(|| format!("{}-", self.config.module));
                let names: Vec<String> = plans.iter().flat_map(|p| p.actions.clone()).collect();
                Some(LockFile::acquire(dir, &prefix, &names)?)
            }
            None => None,
        };

        let _run_span = info_span!("run", run_id = %run_id, dry_run = options.dry_run).entered();
        let journal = open_journal(&self.config, db)?;
        let ctx = ActionContext::new(&self.config, db, &run_id, options.dry_run);

        let mut pipelines = self.build_and_verify(&ctx, &plans)?;

        let ranges = plans
            .iter()
            .zip(&pipelines)
            .map(|(plan, actions)| self.pipeline_range(plan, actions, &journal, options, end))
            .collect::<Result<Vec<_>>>()?;

        let mut reports = Vec::with_capacity(plans.len());
        for ((plan, actions), range) in plans.iter().zip(pipelines.iter_mut()).zip(ranges) {
            reports.push(self.run_pipeline(&ctx, &journal, plan, actions, range, options));
        }

        let summary = RunSummary {
            run_id,
            dry_run: options.dry_run,
            pipelines: reports,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        let totals = summary.totals();
        info!(
            success = summary.is_success(),
            examined = totals.examined,
            loaded = totals.loaded,
            errors = totals.errors,
            elapsed_ms = summary.elapsed_ms,
            "run finished"
        );
        Ok(summary)
    }

    /// Instantiates every planned action and checks its inputs. All
    /// problems are collected into a single `Verification` error.
    fn build_and_verify<'a>(
        &'a self,
        ctx: &ActionContext<'_>,
        plans: &[PipelinePlan],
    ) -> Result<Vec<Vec<PlannedAction<'a>>>> {
        let _span = info_span!("verify").entered();
        let mut errors = Vec::new();
        let mut pipelines = Vec::with_capacity(plans.len());

        for plan in plans {
            let mut actions = Vec::with_capacity(plan.actions.len());
            for spec in plan.specs(&self.config) {
                let action = if spec.enabled {
                    match build_action(spec, &self.config) {
                        Ok(action) => {
                            if let Err(e) = action.verify(ctx) {
                                errors.push(format!("{}: {}", spec.qualified_name(), e));
                            }
                            Some(action)
                        }
                        Err(e) => {
                            errors.push(format!("{}: {}", spec.qualified_name(), e));
                            None
                        }
                    }
                } else {
                    None
                };
                actions.push(PlannedAction {
                    spec,
                    action,
                    initialized: false,
                    executions: 0,
                    failed: false,
                });
            }
            pipelines.push(actions);
        }

        if errors.is_empty() {
            Ok(pipelines)
        } else {
            Err(EtlError::Verification { errors })
        }
    }

    /// Date range of one pipeline. Without an explicit start, journaled
    /// actions resume one second past the earliest watermark; an action
    /// that never completed (or `force`) needs a configured `start_date`.
    fn pipeline_range(
        &self,
        plan: &PipelinePlan,
        actions: &[PlannedAction<'_>],
        journal: &Journal,
        options: &RunOptions,
        end: NaiveDateTime,
    ) -> Result<DateRange> {
        let configured = self
            .config
            .pipeline(&plan.pipeline)
            .and_then(|p| p.start_date)
            .or(self.config.start_date);

        let start = match options.start {
            Some(start) => start,
            None => {
                let mut earliest: Option<NaiveDateTime> = None;
                let mut needs_configured = false;
                let mut journaled = false;
                for action in actions.iter().filter_map(|a| a.action.as_ref()) {
                    if !action.is_chunked() {
                        continue;
                    }
                    let Some(key) = action.journal_key() else {
                        continue;
                    };
                    journaled = true;
                    match journal.last_modified(&key)? {
                        Some(wm) if !options.force => {
                            let next = wm + Duration::seconds(1);
                            earliest = Some(earliest.map_or(next, |e| e.min(next)));
                        }
                        _ => needs_configured = true,
                    }
                }

                if needs_configured {
                    configured.ok_or_else(|| {
                        EtlError::InvalidRequest(format!(
                            "pipeline '{}' has no start date: pass one or set defaults start_date",
                            plan.pipeline
                        ))
                    })?
                } else if journaled {
                    earliest.unwrap_or(end)
                } else {
                    configured.unwrap_or(end)
                }
            }
        };

        // Fully journaled pipelines collapse to an empty window at `end`.
        let start = start.min(end);
        DateRange::new(start, end).ok_or_else(|| {
            EtlError::InvalidRequest(format!("pipeline '{}' has an empty date range", plan.pipeline))
        })
    }

    fn run_pipeline(
        &self,
        ctx: &ActionContext<'_>,
        journal: &Journal,
        plan: &PipelinePlan,
        actions: &mut [PlannedAction<'_>],
        range: DateRange,
        options: &RunOptions,
    ) -> PipelineReport {
        let _pipeline_span = info_span!("pipeline", name = %plan.pipeline, range = %range).entered();
        let started = Instant::now();

        let mut report = PipelineReport::new(&plan.pipeline);
        report.range = Some(range);
        report.state = PipelineState::Running;
        self.progress.report(ProgressEvent::PipelineStarted {
            pipeline: plan.pipeline.clone(),
            range,
        });

        let chunk_size = options
            .chunk_size_days
            .or_else(|| self.config.pipeline(&plan.pipeline).and_then(|p| p.chunk_size_days))
            .or(self.config.chunk_size_days);
        let chunks = range.chunks(chunk_size);
        info!(chunks = chunks.len(), actions = actions.len(), "pipeline started");

        'chunks: for (index, chunk) in chunks.iter().enumerate() {
            let _chunk_span =
                info_span!("chunk", index = index + 1, total = chunks.len(), window = %chunk)
                    .entered();
            self.progress.report(ProgressEvent::ChunkStarted {
                pipeline: plan.pipeline.clone(),
                index,
                total: chunks.len(),
                chunk: *chunk,
            });

            for planned in actions.iter_mut() {
                let name = planned.spec.qualified_name();
                let Some(action) = planned.action.as_mut() else {
                    if index == 0 {
                        self.record(&mut report, ActionExecutionResult::skipped(&name, None, "disabled"));
                    }
                    continue;
                };
                if planned.failed || (!action.is_chunked() && index > 0) {
                    continue;
                }

                let window = if action.is_chunked() { *chunk } else { range };
                let started = Instant::now();
                let outcome = execute_action(
                    ctx,
                    journal,
                    &mut **action,
                    &mut planned.initialized,
                    planned.executions == 0,
                    window,
                    options.force,
                );
                match outcome {
                    Ok(result) => {
                        if result.status == ActionStatus::Completed {
                            planned.executions += 1;
                        }
                        self.record(&mut report, result);
                    }
                    Err(e) => {
                        error!(action = %name, error = %e, "action failed");
                        planned.failed = true;
                        self.record(
                            &mut report,
                            ActionExecutionResult::failed(&name, Some(window), e.to_string(), started.elapsed()),
                        );
                        let journal_lost = matches!(e, EtlError::JournalUnavailable(_));
                        if planned.spec.stop_on_error || journal_lost {
                            report.state = PipelineState::Failed;
                            report.failed_action = Some(name);
                            report.error = Some(e.to_string());
                            break 'chunks;
                        }
                        warn!(action = %name, "stop_on_error is false; pipeline continues");
                    }
                }
            }
        }

        if report.state == PipelineState::Running {
            report.state = PipelineState::Completed;
        }
        report.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(state = %report.state, elapsed_ms = report.elapsed_ms, "pipeline finished");
        self.progress.report(ProgressEvent::PipelineFinished {
            pipeline: plan.pipeline.clone(),
            state: report.state,
        });
        report
    }

    fn record(&self, report: &mut PipelineReport, result: ActionExecutionResult) {
        self.progress.report(ProgressEvent::ActionFinished(result.clone()));
        report.results.push(result);
    }
}

/// One action over one window: journal check, lazy initialization,
/// execution and journal update in the same transaction.
fn execute_action(
    ctx: &ActionContext<'_>,
    journal: &Journal,
    action: &mut dyn Action,
    initialized: &mut bool,
    first: bool,
    range: DateRange,
    force: bool,
) -> Result<ActionExecutionResult> {
    let name = action.name();
    let _span = info_span!("action", name = %name).entered();
    let key = action.journal_key();

    let mut window = ExecutionWindow {
        range,
        last_modified: None,
        first,
    };
    if let Some(key) = &key {
        window.last_modified = journal.last_modified(key)?;
        if let (Some(watermark), false) = (window.last_modified, force) {
            match range.after_watermark(&watermark) {
                Some(remaining) => window.range = remaining,
                None => {
                    info!(watermark = %format_datetime(&watermark), "window already journaled");
                    return Ok(ActionExecutionResult::skipped(
                        &name,
                        Some(range),
                        format!("journaled through {}", format_datetime(&watermark)),
                    ));
                }
            }
        }
    }

    if !*initialized {
        action.initialize(ctx)?;
        *initialized = true;
    }

    let started = Instant::now();
    let stats = if ctx.dry_run {
        ctx.db.with_session(|conn| action.execute(ctx, conn, &window))?
    } else {
        let transactional = action.is_transactional();
        let run = |conn: &rusqlite::Connection| -> Result<ActionStats> {
            let stats = action.execute(ctx, conn, &window)?;
            if let Some(key) = &key {
                journal.record(conn, key, &window.range, Some(ctx.run_id), Some(&name))?;
            }
            Ok(stats)
        };
        if transactional {
            ctx.db.with_transaction(run)?
        } else {
            ctx.db.with_session(run)?
        }
    };

    info!(
        window = %window.range,
        examined = stats.examined,
        loaded = stats.loaded,
        errors = stats.errors,
        "action completed"
    );
    Ok(ActionExecutionResult::completed(
        &name,
        window.range,
        stats,
        started.elapsed(),
    ))
}
