//! Incremental-progress journal.
//!
//! Each completed window is a row keyed by a stable identifier such as
//! `modw.jobfact`. The watermark of a key is the greatest end date ever
//! recorded for it. Rows are only ever added, except by an explicit reset.
//! The journal table describes itself through the table model and is
//! created or migrated on open.

use chrono::{Local, NaiveDateTime};
use rusqlite::{params, Connection};
use serde::Serialize;

use crate::db::Database;
use crate::dbmodel::{sync_table, ColumnDefinition, Dialect, IndexDefinition, SqlType, TableDefinition};
use crate::error::{EtlError, Result};
use crate::period::{format_datetime, parse_datetime, DateRange};

pub const JOURNAL_TABLE: &str = "etl_journal";
pub const MAX_KEY_LENGTH: usize = 64;

/// One completed window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JournalEntry {
    pub key: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub completed_at: NaiveDateTime,
    pub run_id: Option<String>,
    pub action: Option<String>,
}

/// Per-key overview used by `journal list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JournalSummary {
    pub key: String,
    pub entries: usize,
    pub first_start: NaiveDateTime,
    pub watermark: NaiveDateTime,
    pub last_completed: NaiveDateTime,
}

/// Table definition of the journal store in `schema`.
pub fn journal_table(schema: Option<&str>) -> Result<TableDefinition> {
    let ty = |s: &str| -> Result<SqlType> {
        s.parse()
            .map_err(|e: String| EtlError::schema(JOURNAL_TABLE, e))
    };

    let mut table = TableDefinition::new(JOURNAL_TABLE).with_schema(schema);
    table.comment = Some("Completed ETL windows per journal key".to_string());
    table
        .add_column(ColumnDefinition::new("id", ty("bigint")?).auto_increment())?
        .add_column(ColumnDefinition::new("journal_key", ty("varchar(64)")?).not_null())?
        .add_column(ColumnDefinition::new("start_date", ty("datetime")?).not_null())?
        .add_column(ColumnDefinition::new("end_date", ty("datetime")?).not_null())?
        .add_column(ColumnDefinition::new("completed_at", ty("datetime")?).not_null())?
        .add_column(ColumnDefinition::new("run_id", ty("char(36)")?))?
        .add_column(ColumnDefinition::new("action", ty("varchar(255)")?))?
        .add_index(IndexDefinition::primary(&["id"]))?
        .add_index(IndexDefinition::new(&["journal_key", "start_date", "end_date"], true))?
        .add_index(IndexDefinition::new(&["journal_key", "end_date"], false))?;
    Ok(table)
}

fn unavailable(e: impl std::fmt::Display) -> EtlError {
    EtlError::JournalUnavailable(e.to_string())
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(EtlError::InvalidRequest("journal key is empty".to_string()));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(EtlError::InvalidRequest(format!(
            "journal key '{}' exceeds {} characters",
            key, MAX_KEY_LENGTH
        )));
    }
    Ok(())
}

fn parse_stored(value: &str) -> Result<NaiveDateTime> {
    parse_datetime(value).ok_or_else(|| unavailable(format!("corrupt journal date '{}'", value)))
}

#[derive(Clone)]
pub struct Journal {
    db: Database,
    table: String,
}

impl Journal {
    /// Opens the journal in `schema` (the hub's `main` when `None`),
    /// creating or migrating its table.
    pub fn open(db: Database, schema: Option<&str>) -> Result<Self> {
        let definition = journal_table(schema)?;
        db.with_session(|conn| sync_table(conn, &definition, false).map(|_| ()))
            .map_err(unavailable)?;
        Ok(Self {
            db,
            table: Dialect::Sqlite.table_name(&definition),
        })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Latest end date recorded for `key`, `None` if it never completed.
    pub fn last_modified(&self, key: &str) -> Result<Option<NaiveDateTime>> {
        validate_key(key)?;
        let raw: Option<String> = self
            .db
            .with_conn(|conn| {
                Ok(conn.query_row(
                    &format!(
                        "SELECT MAX(end_date) FROM {} WHERE journal_key = ?1",
                        self.table
                    ),
                    [key],
                    |row| row.get(0),
                )?)
            })
            .map_err(unavailable)?;
        raw.as_deref().map(parse_stored).transpose()
    }

    /// Records `[start, end]` as done for `key`. Recording the same window
    /// twice has no effect.
    pub fn mark_as_done(&self, key: &str, start: NaiveDateTime, end: NaiveDateTime) -> Result<()> {
        let range = DateRange::new(start, end).ok_or_else(|| {
            EtlError::InvalidRequest(format!(
                "journal window start {} is after end {}",
                format_datetime(&start),
                format_datetime(&end)
            ))
        })?;
        self.db
            .with_session(|conn| self.record(conn, key, &range, None, None))
    }

    /// Same as [`Journal::mark_as_done`] on a caller-supplied connection,
    /// so the entry commits in the caller's data transaction.
    pub fn record(
        &self,
        conn: &Connection,
        key: &str,
        range: &DateRange,
        run_id: Option<&str>,
        action: Option<&str>,
    ) -> Result<()> {
        validate_key(key)?;
        conn.execute(
            &format!(
                "INSERT OR IGNORE INTO {} (journal_key, start_date, end_date, completed_at, run_id, action) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                self.table
            ),
            params![
                key,
                format_datetime(&range.start),
                format_datetime(&range.end),
                format_datetime(&Local::now().naive_local()),
                run_id,
                action
            ],
        )
        .map_err(unavailable)?;
        tracing::debug!(key, window = %range, "journal updated");
        Ok(())
    }

    /// Every window recorded for `key`, oldest first.
    pub fn entries(&self, key: &str) -> Result<Vec<JournalEntry>> {
        validate_key(key)?;
        let rows: Vec<(String, String, String, String, Option<String>, Option<String>)> = self
            .db
            .with_conn(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT journal_key, start_date, end_date, completed_at, run_id, action \
                     FROM {} WHERE journal_key = ?1 ORDER BY start_date, end_date",
                    self.table
                ))?;
                let rows = stmt
                    .query_map([key], |r| {
                        Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .map_err(unavailable)?;

        rows.into_iter()
            .map(|(key, start, end, completed, run_id, action)| {
                Ok(JournalEntry {
                    key,
                    start: parse_stored(&start)?,
                    end: parse_stored(&end)?,
                    completed_at: parse_stored(&completed)?,
                    run_id,
                    action,
                })
            })
            .collect()
    }

    /// One summary per key, ordered by key.
    pub fn list(&self) -> Result<Vec<JournalSummary>> {
        let rows: Vec<(String, i64, String, String, String)> = self
            .db
            .with_conn(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT journal_key, COUNT(*), MIN(start_date), MAX(end_date), MAX(completed_at) \
                     FROM {} GROUP BY journal_key ORDER BY journal_key",
                    self.table
                ))?;
                let rows = stmt
                    .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .map_err(unavailable)?;

        rows.into_iter()
            .map(|(key, count, first, watermark, completed)| {
                Ok(JournalSummary {
                    key,
                    entries: usize::try_from(count).unwrap_or_default(),
                    first_start: parse_stored(&first)?,
                    watermark: parse_stored(&watermark)?,
                    last_completed: parse_stored(&completed)?,
                })
            })
            .collect()
    }

    /// Forgets every window of `key`. Returns the number of rows removed.
    pub fn reset(&self, key: &str) -> Result<usize> {
        validate_key(key)?;
        let removed = self
            .db
            .with_conn(|conn| {
                Ok(conn.execute(
                    &format!("DELETE FROM {} WHERE journal_key = ?1", self.table),
                    [key],
                )?)
            })
            .map_err(unavailable)?;
        log::info!("Journal key '{}' reset ({} entries removed)", key, removed);
        Ok(removed)
    }
}
