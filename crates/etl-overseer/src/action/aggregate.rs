use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{ActionSpec, EtlConfig};
use crate::db::is_valid_identifier;
use crate::dbmodel::sql_type::TextKind;
use crate::dbmodel::{
    discover_table, split_qualified, sync_table, ColumnDefinition, Dialect, IndexDefinition,
    SqlType, TableDefinition,
};
use crate::error::{EtlError, Result};
use crate::period::{format_datetime, TimeUnit};

use super::context::{ActionContext, ExecutionWindow};
use super::{
    endpoint_schema, is_timestamp_type, option_error, require_schema, window_params, Action,
    ActionStats,
};

const PERIOD_KEY: &str = "period_key";
const PERIOD_START: &str = "period_start";
const PERIOD_END: &str = "period_end";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AggregateOptions {
    /// Fact table, optionally `schema.table`. Unqualified names resolve to
    /// the source endpoint.
    pub source_table: String,
    pub timestamp_column: String,
    /// Summary tables are named `<table_prefix><unit>`.
    pub table_prefix: String,
    #[serde(default = "default_units")]
    pub units: Vec<TimeUnit>,
    #[serde(default)]
    pub dimensions: Vec<String>,
    pub metrics: Vec<MetricSpec>,
    /// Extra SQL condition on fact rows.
    #[serde(default)]
    pub filter: Option<String>,
}

fn default_units() -> Vec<TimeUnit> {
    TimeUnit::ALL.to_vec()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricSpec {
    pub name: String,
    /// Aggregate expression over fact rows, e.g. `SUM(cpu_time) / 3600.0`.
    pub sql: String,
    #[serde(rename = "type", default = "default_metric_type")]
    pub sql_type: String,
}

fn default_metric_type() -> String {
    "double".to_string()
}

/// Summarizes a fact table per time-aggregation period.
pub struct AggregateAction {
    spec: ActionSpec,
    options: AggregateOptions,
    source_schema: Option<String>,
    source_table: String,
    source_endpoint: String,
    destination_schema: String,
    metric_types: Vec<SqlType>,
    /// Type of the fact timestamp column, known after `initialize`.
    timestamp_type: SqlType,
    tables: Vec<(TimeUnit, TableDefinition)>,
}

impl AggregateAction {
    pub fn new(spec: ActionSpec, options: AggregateOptions, config: &EtlConfig) -> Result<Self> {
        let destination_schema = endpoint_schema(&spec, config, "destination")?.ok_or_else(|| {
            option_error(
                &spec,
                config,
                "endpoints.destination",
                "aggregate requires a database destination endpoint",
            )
        })?;

        let (schema, table) = split_qualified(&options.source_table);
        let source_schema = match schema {
            Some(s) => Some(s.to_string()),
            None => endpoint_schema(&spec, config, "source")?,
        };
        let source_table = table.to_string();

        if options.metrics.is_empty() {
            return Err(option_error(&spec, config, "options.metrics", "at least one metric is required"));
        }
        if options.units.is_empty() {
            return Err(option_error(&spec, config, "options.units", "at least one unit is required"));
        }
        if !is_valid_identifier(&format!("{}day", options.table_prefix)) {
            return Err(option_error(
                &spec,
                config,
                "options.table_prefix",
                format!("'{}' cannot prefix a table name", options.table_prefix),
            ));
        }
        let metric_types = options
            .metrics
            .iter()
            .map(|m| {
                m.sql_type.parse::<SqlType>().map_err(|e| {
                    option_error(&spec, config, &format!("options.metrics.{}", m.name), e)
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            source_endpoint: spec.source.clone().unwrap_or_else(|| "main".to_string()),
            spec,
            options,
            source_schema,
            source_table,
            destination_schema,
            metric_types,
            timestamp_type: SqlType::DateTime,
            tables: Vec::new(),
        })
    }

    /// Summary tables, available after `initialize`.
    pub fn tables(&self) -> &[(TimeUnit, TableDefinition)] {
        &self.tables
    }

    fn source_name(&self) -> String {
        Dialect::Sqlite.qualify(self.source_schema.as_deref(), &self.source_table)
    }

    fn summary_table(&self, unit: TimeUnit, source: Option<&TableDefinition>) -> Result<TableDefinition> {
        let mut table = TableDefinition::new(&format!("{}{}", self.options.table_prefix, unit.as_str()))
            .with_schema(Some(self.destination_schema.as_str()));
        table
            .add_column(ColumnDefinition::new(PERIOD_KEY, SqlType::Varchar(16)).not_null())?
            .add_column(ColumnDefinition::new(PERIOD_START, SqlType::DateTime).not_null())?
            .add_column(ColumnDefinition::new(PERIOD_END, SqlType::DateTime).not_null())?;

        for dimension in &self.options.dimensions {
            let column = match source.and_then(|s| s.column(dimension)) {
                Some(c) => {
                    let mut c = c.clone();
                    c.auto_increment = false;
                    c.default = None;
                    c.nullable = true;
                    c
                }
                None => ColumnDefinition::new(dimension.clone(), SqlType::Text(TextKind::Text)),
            };
            table.add_column(column)?;
        }
        for (metric, sql_type) in self.options.metrics.iter().zip(&self.metric_types) {
            table.add_column(ColumnDefinition::new(metric.name.clone(), sql_type.clone()))?;
        }
        table.add_index(IndexDefinition::new(&[PERIOD_KEY], false))?;
        Ok(table)
    }

    /// Condition on fact rows; `first` is the placeholder number of the
    /// lower bound, the upper bound follows it.
    fn fact_filter(&self, first: usize) -> String {
        let mut clause = format!(
            "{} BETWEEN ?{} AND ?{}",
            Dialect::Sqlite.quote(&self.options.timestamp_column),
            first,
            first + 1
        );
        if let Some(filter) = &self.options.filter {
            clause.push_str(&format!(" AND ({})", filter));
        }
        clause
    }

    fn insert_sql(&self, table: &TableDefinition) -> String {
        let dialect = Dialect::Sqlite;
        let dimensions: Vec<String> = self
            .options
            .dimensions
            .iter()
            .map(|d| dialect.quote(d))
            .collect();
        let columns: Vec<String> = table.columns.iter().map(|c| dialect.quote(&c.name)).collect();

        let mut select = vec!["?1".to_string(), "?2".to_string(), "?3".to_string()];
        select.extend(dimensions.iter().cloned());
        select.extend(self.options.metrics.iter().map(|m| m.sql.clone()));

        let group_by = if dimensions.is_empty() {
            String::new()
        } else {
            format!(" GROUP BY {}", dimensions.join(", "))
        };

        format!(
            "INSERT INTO {} ({}) SELECT {} FROM {} WHERE {}{} HAVING COUNT(*) > 0",
            dialect.table_name(table),
            columns.join(", "),
            select.join(", "),
            self.source_name(),
            self.fact_filter(4),
            group_by
        )
    }
}

impl Action for AggregateAction {
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
        if let Some(schema) = &self.source_schema {
            require_schema(ctx, &self.source_endpoint, schema)?;
        }
        require_schema(
            ctx,
            self.spec.destination.as_deref().unwrap_or_default(),
            &self.destination_schema,
        )
    }

    fn initialize(&mut self, ctx: &ActionContext<'_>) -> Result<()> {
        let source = ctx.db.with_session(|conn| {
            discover_table(conn, self.source_schema.as_deref(), &self.source_table)
        })?;

        match &source {
            Some(table) => {
                let required = std::iter::once(&self.options.timestamp_column)
                    .chain(self.options.dimensions.iter());
                for column in required {
                    if !table.has_column(column) {
                        return Err(EtlError::schema(
                            table.qualified_name(),
                            format!("aggregation column '{}' does not exist", column),
                        ));
                    }
                }
                if let Some(ts) = table.column(&self.options.timestamp_column) {
                    if !is_timestamp_type(&ts.sql_type) {
                        return Err(EtlError::schema(
                            table.qualified_name(),
                            format!(
                                "timestamp column '{}' is {}; a date, datetime or timestamp column is required",
                                ts.name, ts.sql_type
                            ),
                        ));
                    }
                    self.timestamp_type = ts.sql_type.clone();
                }
            }
            None if ctx.dry_run => warn!(
                action = %self.name(),
                table = %self.source_name(),
                "[dry-run] source table does not exist yet"
            ),
            None => {
                return Err(EtlError::schema(
                    self.source_name(),
                    "source table does not exist",
                ))
            }
        }

        let mut tables = Vec::with_capacity(self.options.units.len());
        for unit in &self.options.units {
            let table = self.summary_table(*unit, source.as_ref())?;
            ctx.db
                .with_session(|conn| sync_table(conn, &table, ctx.dry_run))?;
            tables.push((*unit, table));
        }
        self.tables = tables;
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

        if ctx.dry_run {
            for (unit, _) in &self.tables {
                let periods = unit.periods_overlapping(&window.range);
                info!(action = %name, unit = %unit, periods = periods.len(), "[dry-run] periods not recomputed");
            }
            return Ok(stats);
        }

        if let Some([start, end]) = window_params(&window.range, &self.timestamp_type) {
            let examined: i64 = conn.query_row(
                &format!(
                    "SELECT COUNT(*) FROM {} WHERE {}",
                    self.source_name(),
                    self.fact_filter(1)
                ),
                params![start, end],
                |row| row.get(0),
            )?;
            stats.examined = examined.max(0) as u64;
        }

        for (unit, table) in &self.tables {
            let delete = format!(
                "DELETE FROM {} WHERE {} = ?1",
                Dialect::Sqlite.table_name(table),
                Dialect::Sqlite.quote(PERIOD_KEY)
            );
            let insert = self.insert_sql(table);
            for period in unit.periods_overlapping(&window.range) {
                conn.execute(&delete, [&period.key])?;
                let Some([start, end]) = window_params(&period.range, &self.timestamp_type) else {
                    continue;
                };
                let inserted = conn.execute(
                    &insert,
                    params![
                        period.key,
                        format_datetime(&period.range.start),
                        format_datetime(&period.range.end),
                        start,
                        end
                    ],
                )?;
                stats.loaded += inserted as u64;
            }
        }

        info!(
            action = %name,
            window = %window.range,
            examined = stats.examined,
            loaded = stats.loaded,
            "aggregation complete"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config_from_str;
    use crate::db::Database;
    use crate::period::{parse_datetime, DateRange};
    use serde_json::json;

    fn setup(options: serde_json::Value) -> (tempfile::TempDir, EtlConfig, Database) {
        let dir = tempfile::tempdir().unwrap();
        let document = json!({
            "endpoints": {
                "warehouse": {"type": "sqlite", "path": ":memory:", "schema": "modw"},
                "aggregates": {"type": "sqlite", "path": ":memory:", "schema": "modw_aggregates"}
            },
            "jobs": [{
                "name": "aggregate",
                "type": "aggregate",
                "endpoints": {"source": "warehouse", "destination": "aggregates"},
                "options": options
            }]
        });
        let config = load_config_from_str(&document.to_string(), dir.path()).unwrap();
        let db = Database::open_in_memory().unwrap();
        db.attach("modw", ":memory:").unwrap();
        db.attach("modw_aggregates", ":memory:").unwrap();
        db.with_session(|conn| {
            conn.execute_batch(
                "CREATE TABLE modw.jobfact (
                    job_id integer PRIMARY KEY,
                    resource varchar(40) NOT NULL,
                    cpu_hours double,
                    end_time datetime NOT NULL
                );
                INSERT INTO modw.jobfact VALUES
                    (1, 'alpha', 1.0, '2020-01-02 10:00:00'),
                    (2, 'alpha', 2.0, '2020-01-02 11:00:00'),
                    (3, 'beta',  4.0, '2020-01-20 09:00:00'),
                    (4, 'alpha', 8.0, '2020-02-01 00:00:00');",
            )?;
            Ok(())
        })
        .unwrap();
        (dir, config, db)
    }

    fn options() -> serde_json::Value {
        json!({
            "source_table": "jobfact",
            "timestamp_column": "end_time",
            "table_prefix": "jobfact_by_",
            "units": ["day", "month"],
            "dimensions": ["resource"],
            "metrics": [
                {"name": "job_count", "sql": "COUNT(*)", "type": "bigint"},
                {"name": "cpu_hours", "sql": "SUM(cpu_hours)"}
            ]
        })
    }

    fn build(config: &EtlConfig) -> AggregateAction {
        let spec = config.action("jobs.aggregate").unwrap().clone();
        let options = match &spec.options {
            crate::action::ActionOptions::Aggregate(o) => o.clone(),
            other => panic!("unexpected options {other:?}"),
        };
        AggregateAction::new(spec, options, config).unwrap()
    }

    fn window(start: &str, end: &str) -> ExecutionWindow {
        ExecutionWindow {
            range: DateRange::new(parse_datetime(start).unwrap(), parse_datetime(end).unwrap())
                .unwrap(),
            last_modified: None,
            first: true,
        }
    }

    fn month_rows(db: &Database) -> Vec<(String, String, i64, f64)> {
        db.with_session(|conn| {
            let mut stmt = conn.prepare(
                "SELECT period_key, resource, job_count, cpu_hours
                 FROM modw_aggregates.jobfact_by_month ORDER BY period_key, resource",
            )?;
            let rows = stmt
                .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .unwrap()
    }

    #[test]
    fn test_partial_window_recomputes_whole_period() {
        let (_dir, config, db) = setup(options());
        let mut action = build(&config);
        let ctx = ActionContext::new(&config, &db, "run-1", false);
        action.initialize(&ctx).unwrap();
        assert_eq!(action.tables().len(), 2);

        let w = window("2020-01-15", "2020-01-20 23:59:59");
        let stats = db
            .with_transaction(|conn| action.execute(&ctx, conn, &w))
            .unwrap();
        assert_eq!(stats.examined, 1);

        assert_eq!(
            month_rows(&db),
            vec![
                ("2020-01".to_string(), "alpha".to_string(), 2, 3.0),
                ("2020-01".to_string(), "beta".to_string(), 1, 4.0),
            ]
        );
    }

    #[test]
    fn test_rerun_is_idempotent() {
        let (_dir, config, db) = setup(options());
        let mut action = build(&config);
        let ctx = ActionContext::new(&config, &db, "run-1", false);
        action.initialize(&ctx).unwrap();

        let w = window("2020-01-01", "2020-02-29 23:59:59");
        for _ in 0..2 {
            db.with_transaction(|conn| action.execute(&ctx, conn, &w))
                .unwrap();
        }
        let rows = month_rows(&db);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2], ("2020-02".to_string(), "alpha".to_string(), 1, 8.0));

        let days: i64 = db
            .with_session(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM modw_aggregates.jobfact_by_day",
                    [],
                    |r| r.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(days, 3);
    }

    #[test]
    fn test_empty_period_leaves_no_rows() {
        let (_dir, config, db) = setup(options());
        let mut action = build(&config);
        let ctx = ActionContext::new(&config, &db, "run-1", false);
        action.initialize(&ctx).unwrap();

        let w = window("2021-06-01", "2021-06-30 23:59:59");
        let stats = db
            .with_transaction(|conn| action.execute(&ctx, conn, &w))
            .unwrap();
        assert_eq!(stats.loaded, 0);
    }

    #[test]
    fn test_unknown_dimension_is_schema_error() {
        let mut opts = options();
        opts["dimensions"] = json!(["queue"]);
        let (_dir, config, db) = setup(opts);
        let mut action = build(&config);
        let ctx = ActionContext::new(&config, &db, "run-1", false);
        assert!(matches!(
            action.initialize(&ctx).unwrap_err(),
            EtlError::SchemaValidation { .. }
        ));
    }

    #[test]
    fn test_invalid_metric_type_rejected() {
        let mut opts = options();
        opts["metrics"] = json!([{"name": "x", "sql": "COUNT(*)", "type": "hyperint"}]);
        let (_dir, config, _db) = setup(opts);
        let spec = config.action("jobs.aggregate").unwrap().clone();
        let options = match &spec.options {
            crate::action::ActionOptions::Aggregate(o) => o.clone(),
            other => panic!("unexpected options {other:?}"),
        };
        assert!(matches!(
            AggregateAction::new(spec, options, &config),
            Err(EtlError::ConfigParse { .. })
        ));
    }

    fn visit_options(column_type: &str) -> (tempfile::TempDir, EtlConfig, Database) {
        let (dir, config, db) = setup(json!({
            "source_table": "visitfact",
            "timestamp_column": "day",
            "table_prefix": "visits_by_",
            "units": ["month"],
            "dimensions": ["resource"],
            "metrics": [{"name": "visits", "sql": "COUNT(*)", "type": "bigint"}]
        }));
        db.with_session(|conn| {
            conn.execute_batch(&format!(
                "CREATE TABLE modw.visitfact (resource varchar(40) NOT NULL, day {} NOT NULL);
                 INSERT INTO modw.visitfact VALUES
                     ('alpha', '2020-01-01'), ('alpha', '2020-01-31'), ('alpha', '2020-02-01');",
                column_type
            ))?;
            Ok(())
        })
        .unwrap();
        (dir, config, db)
    }

    #[test]
    fn test_date_timestamp_includes_first_day_of_period() {
        let (_dir, config, db) = visit_options("date");
        let mut action = build(&config);
        let ctx = ActionContext::new(&config, &db, "run-1", false);
        action.initialize(&ctx).unwrap();

        let w = window("2020-01-01", "2020-02-29 23:59:59");
        let stats = db
            .with_transaction(|conn| action.execute(&ctx, conn, &w))
            .unwrap();
        assert_eq!(stats.examined, 3);

        let rows: Vec<(String, i64)> = db
            .with_session(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT period_key, visits FROM modw_aggregates.visits_by_month ORDER BY period_key",
                )?;
                let rows = stmt
                    .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .unwrap();
        assert_eq!(
            rows,
            vec![("2020-01".to_string(), 2), ("2020-02".to_string(), 1)]
        );
    }

    #[test]
    fn test_text_timestamp_column_is_schema_error() {
        let (_dir, config, db) = visit_options("text");
        let mut action = build(&config);
        let ctx = ActionContext::new(&config, &db, "run-1", false);
        assert!(matches!(
            action.initialize(&ctx).unwrap_err(),
            EtlError::SchemaValidation { .. }
        ));
    }
}
