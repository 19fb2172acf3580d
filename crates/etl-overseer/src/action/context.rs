use chrono::NaiveDateTime;

use crate::config::EtlConfig;
use crate::db::Database;
use crate::period::DateRange;

/// Run-wide state handed to every action.
pub struct ActionContext<'a> {
    pub config: &'a EtlConfig,
    pub db: &'a Database,
    pub run_id: &'a str,
    /// No data writes and no journal updates; DDL is only logged.
    pub dry_run: bool,
}

impl<'a> ActionContext<'a> {
    pub fn new(config: &'a EtlConfig, db: &'a Database, run_id: &'a str, dry_run: bool) -> Self {
        Self {
            config,
            db,
            run_id,
            dry_run,
        }
    }
}

/// Window of a single execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionWindow {
    pub range: DateRange,
    /// Journal watermark of the action before this execution.
    pub last_modified: Option<NaiveDateTime>,
    /// True for the first execution of the action in this run.
    pub first: bool,
}
