//! Run results, as returned to callers and printed by the CLI.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::action::ActionStats;
use crate::period::DateRange;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Pending => "pending",
            PipelineState::Running => "running",
            PipelineState::Completed => "completed",
            PipelineState::Failed => "failed",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Completed,
    Skipped,
    Failed,
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ActionStatus::Completed => "completed",
            ActionStatus::Skipped => "skipped",
            ActionStatus::Failed => "failed",
        })
    }
}

/// Outcome of one action over one window.
#[derive(Debug, Clone, Serialize)]
pub struct ActionExecutionResult {
    pub action: String,
    pub window: Option<DateRange>,
    pub status: ActionStatus,
    pub stats: ActionStats,
    pub elapsed_ms: u64,
    /// Skip reason or failure message.
    pub message: Option<String>,
}

impl ActionExecutionResult {
    pub fn completed(action: &str, window: DateRange, stats: ActionStats, elapsed: Duration) -> Self {
        Self {
            action: action.to_string(),
            window: Some(window),
            status: ActionStatus::Completed,
            stats,
            elapsed_ms: elapsed.as_millis() as u64,
            message: None,
        }
    }

    pub fn skipped(action: &str, window: Option<DateRange>, reason: impl Into<String>) -> Self {
        Self {
            action: action.to_string(),
            window,
            status: ActionStatus::Skipped,
            stats: ActionStats::default(),
            elapsed_ms: 0,
            message: Some(reason.into()),
        }
    }

    pub fn failed(
        action: &str,
        window: Option<DateRange>,
        message: impl Into<String>,
        elapsed: Duration,
    ) -> Self {
        Self {
            action: action.to_string(),
            window,
            status: ActionStatus::Failed,
            stats: ActionStats::default(),
            elapsed_ms: elapsed.as_millis() as u64,
            message: Some(message.into()),
        }
    }
}

/// Per-action rollup across chunks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionTotals {
    pub action: String,
    pub status: ActionStatus,
    pub executions: usize,
    pub stats: ActionStats,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub name: String,
    pub state: PipelineState,
    pub range: Option<DateRange>,
    pub results: Vec<ActionExecutionResult>,
    pub failed_action: Option<String>,
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

impl PipelineReport {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: PipelineState::Pending,
            range: None,
            results: Vec::new(),
            failed_action: None,
            error: None,
            elapsed_ms: 0,
        }
    }

    pub fn totals(&self) -> ActionStats {
        let mut total = ActionStats::default();
        for result in &self.results {
            total += result.stats;
        }
        total
    }

    /// One rollup per action, in first execution order. An action that
    /// failed in any chunk is failed; one that never ran is skipped.
    pub fn action_totals(&self) -> Vec<ActionTotals> {
        let mut rollup: Vec<ActionTotals> = Vec::new();
        for result in &self.results {
            let index = match rollup.iter().position(|t| t.action == result.action) {
                Some(i) => i,
                None => {
                    rollup.push(ActionTotals {
                        action: result.action.clone(),
                        status: ActionStatus::Skipped,
                        executions: 0,
                        stats: ActionStats::default(),
                        message: None,
                    });
                    rollup.len() - 1
                }
            };
            let entry = &mut rollup[index];
            entry.stats += result.stats;
            match result.status {
                ActionStatus::Completed => {
                    entry.executions += 1;
                    if entry.status == ActionStatus::Skipped {
                        entry.status = ActionStatus::Completed;
                    }
                }
                ActionStatus::Failed => {
                    entry.executions += 1;
                    entry.status = ActionStatus::Failed;
                }
                ActionStatus::Skipped => {}
            }
            if result.message.is_some() {
                entry.message = result.message.clone();
            }
        }
        rollup
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub dry_run: bool,
    pub pipelines: Vec<PipelineReport>,
    pub elapsed_ms: u64,
}

impl RunSummary {
    pub fn totals(&self) -> ActionStats {
        let mut total = ActionStats::default();
        for pipeline in &self.pipelines {
            total += pipeline.totals();
        }
        total
    }

    pub fn is_success(&self) -> bool {
        self.pipelines
            .iter()
            .all(|p| p.state == PipelineState::Completed)
    }

    pub fn pipeline(&self, name: &str) -> Option<&PipelineReport> {
        self.pipelines.iter().find(|p| p.name == name)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Run {}", self.run_id)?;
        if self.dry_run {
            write!(f, " (dry run)")?;
        }
        writeln!(f)?;

        for pipeline in &self.pipelines {
            write!(f, "Pipeline {}: {}", pipeline.name, pipeline.state)?;
            if let Some(range) = &pipeline.range {
                write!(f, " [{}]", range)?;
            }
            writeln!(f, " {}ms", pipeline.elapsed_ms)?;

            for totals in pipeline.action_totals() {
                write!(
                    f,
                    "  {:<32} {:<9} examined={} loaded={} errors={}",
                    totals.action,
                    totals.status,
                    totals.stats.examined,
                    totals.stats.loaded,
                    totals.stats.errors
                )?;
                if let Some(message) = &totals.message {
                    write!(f, " ({})", message)?;
                }
                writeln!(f)?;
            }
            if let (Some(action), Some(error)) = (&pipeline.failed_action, &pipeline.error) {
                writeln!(f, "  failed at {}: {}", action, error)?;
            }
        }

        let totals = self.totals();
        write!(
            f,
            "Totals: examined={} loaded={} errors={} elapsed={}ms",
            totals.examined, totals.loaded, totals.errors, self.elapsed_ms
        )
    }
}
