//! Declarative table model.
//!
//! A [`TableDefinition`] describes columns, indexes, foreign keys and
//! triggers as data. It
//! is parsed from JSON definition files, verified, rendered to DDL through a
//! [`Dialect`], compared against another definition to produce the minimal
//! set of [`SchemaChange`]s, and reconciled against a live SQLite table with
//! [`sync_table`].

pub mod column;
pub mod dialect;
pub mod diff;
pub mod discover;
pub mod foreign_key;
pub mod index;
pub mod sql_type;
pub mod sync;
pub mod table;
pub mod trigger;

pub use column::ColumnDefinition;
pub use dialect::Dialect;
pub use diff::SchemaChange;
pub use discover::discover_table;
pub use foreign_key::{ForeignKeyDefinition, ReferentialAction};
pub use index::{IndexDefinition, PRIMARY_KEY_NAME};
pub use sql_type::SqlType;
pub use sync::{sync_table, TableSync};
pub use table::TableDefinition;
pub use trigger::{TriggerDefinition, TriggerEvent, TriggerTime};

/// Structural problem in a declaration, located by JSON pointer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclarationError {
    pub pointer: String,
    pub message: String,
}

impl DeclarationError {
    pub fn new(pointer: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            pointer: pointer.into(),
            message: message.into(),
        }
    }
}

/// `modw.jobfact` -> `jobfact`.
pub fn unqualified(name: &str) -> &str {
    name.rsplit_once('.').map(|(_, n)| n).unwrap_or(name)
}

/// `modw.jobfact` -> `(Some("modw"), "jobfact")`.
pub fn split_qualified(name: &str) -> (Option<&str>, &str) {
    match name.rsplit_once('.') {
        Some((schema, table)) => (Some(schema), table),
        None => (None, name),
    }
}
