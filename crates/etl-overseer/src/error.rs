use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Configuration error in '{source_name}' at {context}: {message}")]
    ConfigParse {
        source_name: String,
        context: String,
        message: String,
    },

    #[error("Cyclic dependency detected among actions: {}", .actions.join(" -> "))]
    CyclicDependency { actions: Vec<String> },

    #[error("Schema validation failed for table '{table}': {message}")]
    SchemaValidation { table: String, message: String },

    #[error("Source '{source_name}' is unavailable: {message}")]
    SourceUnavailable {
        source_name: String,
        message: String,
    },

    #[error("Journal unavailable: {0}")]
    JournalUnavailable(String),

    #[error("Action '{action}' failed: {message}")]
    ActionFailed { action: String, message: String },

    #[error("Verification failed:\n  {}", .errors.join("\n  "))]
    Verification { errors: Vec<String> },

    #[error("Invalid run request: {0}")]
    InvalidRequest(String),

    #[error("Lock conflict: {0}")]
    Lock(String),

    #[error("Failed to read '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

impl EtlError {
    /// Builds a `ConfigParse` error for the given source file (or inline label)
    /// and key path.
    pub fn config(
        source_name: impl Into<String>,
        context: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::ConfigParse {
            source_name: source_name.into(),
            context: context.into(),
            message: message.into(),
        }
    }

    pub fn schema(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SchemaValidation {
            table: table.into(),
            message: message.into(),
        }
    }

    pub fn source_unavailable(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            source_name: source_name.into(),
            message: message.into(),
        }
    }
}

impl From<rusqlite::Error> for EtlError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(crate::db::DatabaseError::Sqlite(e))
    }
}

/// A single malformed input record. Never propagated past the action that
/// read it; only counted.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("record {index}: {message}")]
pub struct RecordError {
    pub index: usize,
    pub message: String,
}

impl RecordError {
    pub fn new(index: usize, message: impl Into<String>) -> Self {
        Self {
            index,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;
