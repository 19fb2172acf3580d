use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::NaiveDateTime;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, ErrorCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::config::{ActionSpec, EndpointConfig, EtlConfig, FileFormat};
use crate::dbmodel::{sync_table, ColumnDefinition, Dialect, SqlType, TableDefinition};
use crate::error::{EtlError, RecordError, Result};
use crate::period::{format_datetime, parse_datetime, DATE_FORMAT};

use super::context::{ActionContext, ExecutionWindow};
use super::source::{json_to_sql, query_records, read_file, Record, SourceBatch};
use super::{
    endpoint_schema, is_timestamp_type, option_error, require_schema, window_params, Action,
    ActionStats,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IngestOptions {
    /// Destination table definition file.
    #[serde(default)]
    pub definition_file: Option<String>,
    /// Inline destination table definition.
    #[serde(default)]
    pub table_definition: Option<Value>,
    /// Query against a database source endpoint.
    #[serde(default)]
    pub source_query: Option<String>,
    /// Destination column -> source field, for fields whose names differ.
    #[serde(default)]
    pub field_map: BTreeMap<String, String>,
    /// Destination column holding the record time. When set, a window is
    /// replaced by deleting its rows before inserting.
    #[serde(default)]
    pub timestamp_column: Option<String>,
    #[serde(default)]
    pub truncate_destination: bool,
}

#[derive(Debug, Clone)]
enum IngestSource {
    File {
        endpoint: String,
        path: PathBuf,
        format: FileFormat,
    },
    Query {
        endpoint: String,
        schema: String,
        sql: String,
    },
}

/// Loads records from a file or query into a destination table.
pub struct IngestAction {
    spec: ActionSpec,
    options: IngestOptions,
    source: IngestSource,
    table: TableDefinition,
    destination_endpoint: String,
    /// File records, read on first execution and reused for later windows.
    file_batch: Option<SourceBatch>,
}

impl IngestAction {
    pub fn new(spec: ActionSpec, options: IngestOptions, config: &EtlConfig) -> Result<Self> {
        let destination_schema = endpoint_schema(&spec, config, "destination")?.ok_or_else(|| {
            option_error(
                &spec,
                config,
                "endpoints.destination",
                "ingest requires a database destination endpoint",
            )
        })?;
        let destination_endpoint = spec.destination.clone().unwrap_or_default();

        let source_endpoint = spec.source.clone().ok_or_else(|| {
            option_error(&spec, config, "endpoints.source", "ingest requires a source endpoint")
        })?;
        let source = match config.endpoint(&source_endpoint) {
            Some(EndpointConfig::File { path, format }) => {
                if options.source_query.is_some() {
                    return Err(option_error(
                        &spec,
                        config,
                        "options.source_query",
                        "a query cannot be used with a file endpoint",
                    ));
                }
                IngestSource::File {
                    endpoint: source_endpoint,
                    path: path.clone(),
                    format: *format,
                }
            }
            Some(EndpointConfig::Sqlite { schema, .. }) => {
                let sql = options.source_query.clone().ok_or_else(|| {
                    option_error(
                        &spec,
                        config,
                        "options.source_query",
                        "a database source endpoint requires source_query",
                    )
                })?;
                IngestSource::Query {
                    endpoint: source_endpoint,
                    schema: schema.clone(),
                    sql,
                }
            }
            None => {
                return Err(option_error(
                    &spec,
                    config,
                    "endpoints.source",
                    format!("unknown endpoint '{}'", source_endpoint),
                ))
            }
        };

        let table = match (&options.definition_file, &options.table_definition) {
            (Some(file), None) => TableDefinition::from_file(&spec.resolve_path(file))?,
            (None, Some(value)) => TableDefinition::from_value(value, &spec.qualified_name())?,
            _ => {
                return Err(option_error(
                    &spec,
                    config,
                    "options",
                    "exactly one of definition_file or table_definition is required",
                ))
            }
        }
        .with_schema(Some(destination_schema.as_str()));

        if let Some(column) = options.field_map.keys().find(|c| !table.has_column(c)) {
            return Err(option_error(
                &spec,
                config,
                "options.field_map",
                format!("'{}' is not a column of {}", column, table.qualified_name()),
            ));
        }
        if let Some(ts) = &options.timestamp_column {
            match table.column(ts) {
                None => {
                    return Err(option_error(
                        &spec,
                        config,
                        "options.timestamp_column",
                        format!("'{}' is not a column of {}", ts, table.qualified_name()),
                    ))
                }
                Some(c) if !is_timestamp_type(&c.sql_type) => {
                    return Err(option_error(
                        &spec,
                        config,
                        "options.timestamp_column",
                        format!(
                            "'{}' is {}; a date, datetime or timestamp column is required",
                            ts, c.sql_type
                        ),
                    ))
                }
                Some(_) => {}
            }
        }

        Ok(Self {
            spec,
            options,
            source,
            table,
            destination_endpoint,
            file_batch: None,
        })
    }

    pub fn table(&self) -> &TableDefinition {
        &self.table
    }

    fn source_field<'a>(&'a self, column: &'a str) -> &'a str {
        self.options
            .field_map
            .get(column)
            .map(String::as_str)
            .unwrap_or(column)
    }

    /// Columns written by the insert. Auto-increment columns are left to
    /// the database unless explicitly mapped.
    fn insert_columns(&self) -> Vec<&ColumnDefinition> {
        self.table
            .columns
            .iter()
            .filter(|c| !c.auto_increment || self.options.field_map.contains_key(&c.name))
            .collect()
    }

    fn insert_sql(&self) -> String {
        let dialect = Dialect::Sqlite;
        let columns = self.insert_columns();
        let names: Vec<String> = columns.iter().map(|c| dialect.quote(&c.name)).collect();
        let values: Vec<String> = columns
            .iter()
            .enumerate()
            .map(|(i, c)| match (&c.default, c.nullable) {
                (Some(default), false) => format!("COALESCE(?{}, {})", i + 1, default),
                _ => format!("?{}", i + 1),
            })
            .collect();
        let verb = if self.options.timestamp_column.is_some() {
            "INSERT"
        } else {
            "INSERT OR REPLACE"
        };
        format!(
            "{} INTO {} ({}) VALUES ({})",
            verb,
            dialect.table_name(&self.table),
            names.join(", "),
            values.join(", ")
        )
    }

    fn row_values(&self, record: &Record) -> std::result::Result<Vec<SqlValue>, String> {
        self.insert_columns()
            .into_iter()
            .map(|column| {
                let value = record
                    .get(self.source_field(&column.name))
                    .unwrap_or(&Value::Null);
                coerce(value, column).map_err(|m| format!("column '{}': {}", column.name, m))
            })
            .collect()
    }

    fn record_time(&self, record: &Record, column: &str) -> Option<NaiveDateTime> {
        record
            .get(self.source_field(column))
            .and_then(Value::as_str)
            .and_then(parse_datetime)
    }
}

impl Action for IngestAction {
    fn spec(&self) -> &ActionSpec {
        &self.spec
    }

    fn journal_key(&self) -> Option<String> {
        Some(
            self.spec
                .journal_key
                .clone()
                .unwrap_or_else(|| self.spec.qualified_name()),
        )
    }

    fn verify(&self, ctx: &ActionContext<'_>) -> Result<()> {
        match &self.source {
            IngestSource::File { endpoint, path, .. } => {
                if !path.is_file() {
                    return Err(EtlError::source_unavailable(
                        endpoint,
                        format!("file '{}' does not exist", path.display()),
                    ));
                }
            }
            IngestSource::Query {
                endpoint, schema, ..
            } => require_schema(ctx, endpoint, schema)?,
        }
        let schema = self.table.schema.as_deref().unwrap_or("main");
        require_schema(ctx, &self.destination_endpoint, schema)
    }

    fn initialize(&mut self, ctx: &ActionContext<'_>) -> Result<()> {
        self.table.verify()?;
        if self.options.timestamp_column.is_none() && !self.table.has_unique_key() {
            return Err(EtlError::schema(
                self.table.qualified_name(),
                "ingesting without a timestamp_column requires a primary or unique key",
            ));
        }
        let outcome = ctx
            .db
            .with_session(|conn| sync_table(conn, &self.table, ctx.dry_run))?;
        info!(
            action = %self.name(),
            table = %self.table.qualified_name(),
            statements = outcome.statements().len(),
            "destination ready"
        );
        Ok(())
    }

    fn execute(
        &mut self,
        ctx: &ActionContext<'_>,
        conn: &Connection,
        window: &ExecutionWindow,
    ) -> Result<ActionStats> {
        let name = self.name();
        let mut stats = ActionStats::default();

        // Unparsable file records are counted once, when the file is read.
        if let IngestSource::File { path, format, .. } = &self.source {
            if self.file_batch.is_none() {
                let batch = read_file(path, *format)?;
                for e in &batch.errors {
                    warn!(action = %name, error = %e, "skipping malformed record");
                }
                stats.examined += batch.errors.len() as u64;
                stats.errors += batch.errors.len() as u64;
                self.file_batch = Some(batch);
            }
        }
        let queried = match &self.source {
            IngestSource::Query { sql, .. } => Some(SourceBatch {
                records: query_records(conn, sql, window)?,
                errors: Vec::new(),
            }),
            IngestSource::File { .. } => None,
        };
        let Some(batch) = queried.as_ref().or(self.file_batch.as_ref()) else {
            return Ok(stats);
        };

        let mut rows = Vec::with_capacity(batch.records.len());
        for (index, record) in batch.records.iter().enumerate() {
            if let Some(ts) = &self.options.timestamp_column {
                match self.record_time(record, ts) {
                    Some(t) if window.range.contains(&t) => {}
                    Some(_) => continue,
                    None => {
                        stats.examined += 1;
                        stats.errors += 1;
                        let e = RecordError::new(index, format!("missing or invalid '{}'", ts));
                        warn!(action = %name, error = %e, "skipping malformed record");
                        continue;
                    }
                }
            }
            stats.examined += 1;
            match self.row_values(record) {
                Ok(values) => rows.push((index, values)),
                Err(message) => {
                    stats.errors += 1;
                    let e = RecordError::new(index, message);
                    warn!(action = %name, error = %e, "skipping malformed record");
                }
            }
        }

        if ctx.dry_run {
            info!(action = %name, rows = rows.len(), window = %window.range, "[dry-run] rows not written");
            return Ok(stats);
        }

        let dialect = Dialect::Sqlite;
        let table_name = dialect.table_name(&self.table);
        if self.options.truncate_destination && window.first {
            let removed = conn.execute(&format!("DELETE FROM {}", table_name), [])?;
            info!(action = %name, removed, "destination truncated");
        }
        if let Some(ts) = &self.options.timestamp_column {
            let bounds = self
                .table
                .column(ts)
                .and_then(|c| window_params(&window.range, &c.sql_type));
            if let Some(bounds) = bounds {
                conn.execute(
                    &format!(
                        "DELETE FROM {} WHERE {} BETWEEN ?1 AND ?2",
                        table_name,
                        dialect.quote(ts)
                    ),
                    bounds,
                )?;
            }
        }

        let mut stmt = conn.prepare(&self.insert_sql())?;
        for (index, values) in rows {
            match stmt.execute(rusqlite::params_from_iter(values.iter())) {
                Ok(_) => stats.loaded += 1,
                Err(rusqlite::Error::SqliteFailure(e, message))
                    if e.code == ErrorCode::ConstraintViolation =>
                {
                    stats.errors += 1;
                    let e = RecordError::new(index, message.unwrap_or_else(|| e.to_string()));
                    warn!(action = %name, error = %e, "record rejected by destination");
                }
                Err(e) => return Err(e.into()),
            }
        }

        info!(
            action = %name,
            window = %window.range,
            examined = stats.examined,
            loaded = stats.loaded,
            errors = stats.errors,
            "ingest complete"
        );
        Ok(stats)
    }
}

/// Converts a source value to what the destination column stores.
fn coerce(value: &Value, column: &ColumnDefinition) -> std::result::Result<SqlValue, String> {
    if value.is_null() {
        if !column.nullable && column.default.is_none() && !column.auto_increment {
            return Err("missing value for NOT NULL column".to_string());
        }
        return Ok(SqlValue::Null);
    }

    match &column.sql_type {
        SqlType::Integer { .. } | SqlType::Year => match value {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
                .map(SqlValue::Integer)
                .ok_or_else(|| format!("'{}' is not an integer", n)),
            Value::Bool(b) => Ok(SqlValue::Integer(i64::from(*b))),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(SqlValue::Integer)
                .map_err(|_| format!("'{}' is not an integer", s)),
            other => Err(format!("'{}' is not an integer", other)),
        },
        SqlType::Boolean => match value {
            Value::Bool(b) => Ok(SqlValue::Integer(i64::from(*b))),
            Value::Number(n) => Ok(SqlValue::Integer(i64::from(n.as_f64() != Some(0.0)))),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(SqlValue::Integer(1)),
                "false" | "0" | "no" => Ok(SqlValue::Integer(0)),
                _ => Err(format!("'{}' is not a boolean", s)),
            },
            other => Err(format!("'{}' is not a boolean", other)),
        },
        SqlType::Decimal { .. } | SqlType::Float(_) => match value {
            Value::Number(n) => n
                .as_f64()
                .map(SqlValue::Real)
                .ok_or_else(|| format!("'{}' is not a number", n)),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map(SqlValue::Real)
                .map_err(|_| format!("'{}' is not a number", s)),
            other => Err(format!("'{}' is not a number", other)),
        },
        SqlType::Date => value
            .as_str()
            .and_then(parse_datetime)
            .map(|d| SqlValue::Text(d.format(DATE_FORMAT).to_string()))
            .ok_or_else(|| format!("'{}' is not a date", value)),
        SqlType::DateTime | SqlType::Timestamp => value
            .as_str()
            .and_then(parse_datetime)
            .map(|d| SqlValue::Text(format_datetime(&d)))
            .ok_or_else(|| format!("'{}' is not a datetime", value)),
        SqlType::Enum(allowed) => match value.as_str() {
            Some(s) if allowed.iter().any(|a| a == s) => Ok(SqlValue::Text(s.to_string())),
            _ => Err(format!("'{}' is not one of {}", value, allowed.join(", "))),
        },
        _ => Ok(json_to_sql(value)),
    }
}
