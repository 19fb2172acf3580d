pub mod action;
pub mod config;
pub mod db;
pub mod dbmodel;
pub mod error;
pub mod journal;
pub mod overseer;
pub mod period;

pub use action::{build_action, Action, ActionContext, ActionOptions, ActionStats, ExecutionWindow};
pub use config::{load_config, load_config_from_str, ConfigLoader, EtlConfig, OptionOverride};
pub use db::{Database, DatabaseError};
pub use dbmodel::{Dialect, SchemaChange, TableDefinition, TableSync};
pub use error::{EtlError, RecordError, Result};
pub use journal::{Journal, JournalEntry, JournalSummary};
pub use overseer::{
    open_hub, open_journal, LockFile, NoopProgress, Overseer, PipelineReport, PipelineState,
    ProgressEvent, ProgressReporter, RunOptions, RunSummary,
};
pub use period::{parse_datetime, parse_end_datetime, DateRange, TimeUnit};
