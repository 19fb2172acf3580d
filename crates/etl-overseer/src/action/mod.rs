//! Executable units of a pipeline.
//!
//! Every action goes through `initialize` once per run (schema work, input
//! checks) and then `execute` once per date window. Data-bearing actions
//! are re-runnable over the same window without producing duplicates.

use std::ops::AddAssign;

use chrono::NaiveTime;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{ActionKind, ActionSpec, EtlConfig};
use crate::dbmodel::SqlType;
use crate::error::{EtlError, Result};
use crate::period::{format_datetime, DateRange, DATE_FORMAT};

pub mod aggregate;
pub mod context;
pub mod ingest;
pub mod maintenance;
pub mod manage_table;
pub mod source;

pub use aggregate::{AggregateAction, AggregateOptions, MetricSpec};
pub use context::{ActionContext, ExecutionWindow};
pub use ingest::{IngestAction, IngestOptions};
pub use maintenance::{MaintenanceAction, MaintenanceOptions};
pub use manage_table::{ManageTableAction, ManageTableOptions};

/// Record counters of one execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionStats {
    pub examined: u64,
    pub loaded: u64,
    pub errors: u64,
}

impl AddAssign for ActionStats {
    fn add_assign(&mut self, other: Self) {
        self.examined += other.examined;
        self.loaded += other.loaded;
        self.errors += other.errors;
    }
}

pub trait Action {
    fn spec(&self) -> &ActionSpec;

    fn name(&self) -> String {
        self.spec().qualified_name()
    }

    /// Chunked actions run once per date chunk, the others once per run.
    fn is_chunked(&self) -> bool {
        true
    }

    /// Whether `execute` runs inside the data transaction.
    fn is_transactional(&self) -> bool {
        true
    }

    /// Key under which completed windows are journaled. `None` for actions
    /// that keep no journal.
    fn journal_key(&self) -> Option<String>;

    /// Checks inputs without changing anything.
    fn verify(&self, _ctx: &ActionContext<'_>) -> Result<()> {
        Ok(())
    }

    /// One-time preparation. Destination DDL happens here, before any data
    /// transaction is opened.
    fn initialize(&mut self, ctx: &ActionContext<'_>) -> Result<()>;

    fn execute(
        &mut self,
        ctx: &ActionContext<'_>,
        conn: &Connection,
        window: &ExecutionWindow,
    ) -> Result<ActionStats>;
}

/// Typed options of each action variant.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOptions {
    Ingest(IngestOptions),
    Aggregate(AggregateOptions),
    ManageTable(ManageTableOptions),
    Maintenance(MaintenanceOptions),
}

impl ActionOptions {
    /// Deserializes `value` into the options of `kind`. Unknown fields are
    /// rejected.
    pub fn parse(kind: ActionKind, value: Value) -> serde_json::Result<Self> {
        Ok(match kind {
            ActionKind::Ingest => ActionOptions::Ingest(serde_json::from_value(value)?),
            ActionKind::Aggregate => ActionOptions::Aggregate(serde_json::from_value(value)?),
            ActionKind::ManageTable => ActionOptions::ManageTable(serde_json::from_value(value)?),
            ActionKind::Maintenance => ActionOptions::Maintenance(serde_json::from_value(value)?),
        })
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            ActionOptions::Ingest(_) => ActionKind::Ingest,
            ActionOptions::Aggregate(_) => ActionKind::Aggregate,
            ActionOptions::ManageTable(_) => ActionKind::ManageTable,
            ActionOptions::Maintenance(_) => ActionKind::Maintenance,
        }
    }
}

/// Instantiates the action described by `spec`.
pub fn build_action(spec: &ActionSpec, config: &EtlConfig) -> Result<Box<dyn Action>> {
    Ok(match &spec.options {
        ActionOptions::Ingest(o) => Box::new(IngestAction::new(spec.clone(), o.clone(), config)?),
        ActionOptions::Aggregate(o) => {
            Box::new(AggregateAction::new(spec.clone(), o.clone(), config)?)
        }
        ActionOptions::ManageTable(o) => {
            Box::new(ManageTableAction::new(spec.clone(), o.clone(), config)?)
        }
        ActionOptions::Maintenance(o) => {
            Box::new(MaintenanceAction::new(spec.clone(), o.clone(), config)?)
        }
    })
}

/// Configuration error attributed to one of the action's fields.
pub(crate) fn option_error(
    spec: &ActionSpec,
    config: &EtlConfig,
    field: &str,
    message: impl Into<String>,
) -> EtlError {
    EtlError::config(
        config.source_name.clone(),
        format!("{} {}", spec.qualified_name(), field),
        message,
    )
}

/// Schema of the sqlite endpoint named by `role` (`source` or
/// `destination`). `Ok(None)` when the action has no such endpoint.
pub(crate) fn endpoint_schema(
    spec: &ActionSpec,
    config: &EtlConfig,
    role: &str,
) -> Result<Option<String>> {
    let name = match role {
        "source" => spec.source.as_deref(),
        _ => spec.destination.as_deref(),
    };
    let Some(name) = name else {
        return Ok(None);
    };
    match config.endpoint(name) {
        Some(endpoint) => match endpoint.schema() {
            Some(schema) => Ok(Some(schema.to_string())),
            None => Err(option_error(
                spec,
                config,
                &format!("endpoints.{}", role),
                format!("endpoint '{}' is not a database endpoint", name),
            )),
        },
        None => Err(option_error(
            spec,
            config,
            &format!("endpoints.{}", role),
            format!("unknown endpoint '{}'", name),
        )),
    }
}

/// Fails with `SourceUnavailable` unless `schema` is attached to the run.
pub(crate) fn require_schema(ctx: &ActionContext<'_>, endpoint: &str, schema: &str) -> Result<()> {
    if ctx.db.has_schema(schema)? {
        Ok(())
    } else {
        Err(EtlError::source_unavailable(
            endpoint,
            format!("database schema '{}' is not attached", schema),
        ))
    }
}

/// Bind values of a `BETWEEN ?1 AND ?2` filter on a timestamp column, in
/// the format the column stores. A `date` column matches the days whose
/// midnight lies inside the range; `None` when there is no such day.
pub(crate) fn window_params(range: &DateRange, column_type: &SqlType) -> Option<[String; 2]> {
    match column_type {
        SqlType::Date => {
            let first = if range.start.time() == NaiveTime::MIN {
                range.start.date()
            } else {
                range.start.date().succ_opt()?
            };
            let last = range.end.date();
            (first <= last).then(|| {
                [
                    first.format(DATE_FORMAT).to_string(),
                    last.format(DATE_FORMAT).to_string(),
                ]
            })
        }
        _ => Some([format_datetime(&range.start), format_datetime(&range.end)]),
    }
}

/// Whether `column_type` can hold the record time of a window filter.
pub(crate) fn is_timestamp_type(column_type: &SqlType) -> bool {
    matches!(
        column_type,
        SqlType::Date | SqlType::DateTime | SqlType::Timestamp
    )
}
