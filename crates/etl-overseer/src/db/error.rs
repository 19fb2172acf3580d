use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to attach '{path}' as schema '{schema}': {source}")]
    Attach {
        schema: String,
        path: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Invalid schema name '{0}'")]
    InvalidSchemaName(String),

    #[error("Database lock poisoned")]
    LockPoisoned,
}
