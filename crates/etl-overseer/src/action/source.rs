//! Record sources for ingestion: structured files and SQL queries.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::Connection;
use serde_json::{Map, Number, Value};

use crate::config::FileFormat;
use crate::error::{EtlError, RecordError, Result};
use crate::period::format_datetime;

use super::context::ExecutionWindow;

/// One input record keyed by field name.
pub type Record = Map<String, Value>;

/// Records read from a source plus the ones that could not be parsed.
#[derive(Debug, Default)]
pub struct SourceBatch {
    pub records: Vec<Record>,
    pub errors: Vec<RecordError>,
}

/// Reads every record of a file endpoint. A missing or unreadable file is
/// fatal; a malformed line or row is reported in [`SourceBatch::errors`].
pub fn read_file(path: &Path, format: FileFormat) -> Result<SourceBatch> {
    let source_name = path.display().to_string();
    let unavailable = |e: &dyn std::fmt::Display| EtlError::source_unavailable(&source_name, e.to_string());

    match format {
        FileFormat::Json => {
            let content = std::fs::read_to_string(path).map_err(|e| unavailable(&e))?;
            let value: Value = serde_json::from_str(&content).map_err(|e| unavailable(&e))?;
            let Value::Array(items) = value else {
                return Err(unavailable(&"expected a JSON array of records"));
            };
            let mut batch = SourceBatch::default();
            for (index, item) in items.into_iter().enumerate() {
                match item {
                    Value::Object(record) => batch.records.push(record),
                    other => batch
                        .errors
                        .push(RecordError::new(index, format!("expected an object, got {}", other))),
                }
            }
            Ok(batch)
        }
        FileFormat::Jsonl => {
            let file = File::open(path).map_err(|e| unavailable(&e))?;
            let mut batch = SourceBatch::default();
            for (index, line) in BufReader::new(file).lines().enumerate() {
                let line = line.map_err(|e| unavailable(&e))?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Value>(&line) {
                    Ok(Value::Object(record)) => batch.records.push(record),
                    Ok(other) => batch
                        .errors
                        .push(RecordError::new(index, format!("expected an object, got {}", other))),
                    Err(e) => batch.errors.push(RecordError::new(index, e.to_string())),
                }
            }
            Ok(batch)
        }
        FileFormat::Csv => {
            let mut reader = csv::ReaderBuilder::new()
                .has_headers(true)
                .trim(csv::Trim::All)
                .from_path(path)
                .map_err(|e| unavailable(&e))?;
            let headers = reader.headers().map_err(|e| unavailable(&e))?.clone();
            let mut batch = SourceBatch::default();
            for (index, row) in reader.records().enumerate() {
                match row {
                    Ok(row) => {
                        let record = headers
                            .iter()
                            .zip(row.iter())
                            .map(|(field, value)| {
                                let value = if value.is_empty() {
                                    Value::Null
                                } else {
                                    Value::String(value.to_string())
                                };
                                (field.to_string(), value)
                            })
                            .collect();
                        batch.records.push(record);
                    }
                    Err(e) => batch.errors.push(RecordError::new(index, e.to_string())),
                }
            }
            Ok(batch)
        }
    }
}

/// Runs `sql` on the run connection. The named parameters `:start_date`,
/// `:end_date` and `:last_modified` are bound when the query uses them.
pub fn query_records(conn: &Connection, sql: &str, window: &ExecutionWindow) -> Result<Vec<Record>> {
    let mut stmt = conn.prepare(sql)?;
    let binds = [
        (":start_date", Some(format_datetime(&window.range.start))),
        (":end_date", Some(format_datetime(&window.range.end))),
        (":last_modified", window.last_modified.as_ref().map(format_datetime)),
    ];
    for (name, value) in binds {
        if let Some(index) = stmt.parameter_index(name)? {
            stmt.raw_bind_parameter(index, value)?;
        }
    }

    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let mut rows = stmt.raw_query();
    let mut records = Vec::new();
    while let Some(row) = rows.next()? {
        let mut record = Map::with_capacity(columns.len());
        for (i, column) in columns.iter().enumerate() {
            record.insert(column.clone(), sql_to_json(row.get_ref(i)?));
        }
        records.push(record);
    }
    Ok(records)
}

pub fn sql_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Number(i.into()),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
    }
}

pub fn json_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => n.as_f64().map(SqlValue::Real).unwrap_or(SqlValue::Null),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}
