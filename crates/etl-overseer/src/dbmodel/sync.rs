use rusqlite::Connection;

use crate::error::Result;

use super::dialect::Dialect;
use super::discover::discover_table;
use super::table::TableDefinition;

/// Outcome of reconciling a live table with its definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableSync {
    Created { statements: Vec<String> },
    Altered { statements: Vec<String> },
    Unchanged,
}

impl TableSync {
    pub fn statements(&self) -> &[String] {
        match self {
            TableSync::Created { statements } | TableSync::Altered { statements } => statements,
            TableSync::Unchanged => &[],
        }
    }
}

/// Makes the live SQLite table match `target`: creates it when absent,
/// applies the diff when it differs. Rows are never touched except by a
/// rebuild, which copies them. With `dry_run` the statements are only
/// returned and logged.
pub fn sync_table(conn: &Connection, target: &TableDefinition, dry_run: bool) -> Result<TableSync> {
    target.verify()?;
    let dialect = Dialect::Sqlite;

    let outcome = match discover_table(conn, target.schema.as_deref(), &target.name)? {
        None => TableSync::Created {
            statements: target.create_sql(dialect)?,
        },
        Some(current) => {
            let statements = current.alter_sql(target, dialect)?;
            if statements.is_empty() {
                TableSync::Unchanged
            } else {
                TableSync::Altered { statements }
            }
        }
    };

    for sql in outcome.statements() {
        if dry_run {
            log::info!("[dry-run] {}", sql);
        } else {
            log::debug!("Executing DDL: {}", sql);
            conn.execute_batch(sql)?;
        }
    }

    match &outcome {
        TableSync::Created { .. } => log::info!("Created table {}", target.qualified_name()),
        TableSync::Altered { statements } => log::info!(
            "Altered table {} ({} statements)",
            target.qualified_name(),
            statements.len()
        ),
        TableSync::Unchanged => log::debug!("Table {} is up to date", target.qualified_name()),
    }

    Ok(outcome)
}
