//! Introspection of live SQLite tables into [`TableDefinition`]s.

use std::sync::LazyLock;

use regex::Regex;
use rusqlite::{Connection, OptionalExtension};

use crate::error::{EtlError, Result};

use super::column::ColumnDefinition;
use super::dialect::Dialect;
use super::foreign_key::{default_foreign_key_name, ForeignKeyDefinition};
use super::index::IndexDefinition;
use super::table::TableDefinition;
use super::trigger::TriggerDefinition;

static RE_AUTOINCREMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bAUTOINCREMENT\b").unwrap());
static RE_TRIGGER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)\b(BEFORE|AFTER)\s+(INSERT|UPDATE|DELETE)\b.*?\bBEGIN\b(.*)\bEND\s*;?\s*$")
        .unwrap()
});

struct ColumnInfo {
    name: String,
    declared_type: String,
    not_null: bool,
    default: Option<String>,
    pk: i64,
}

/// Reads the structure of `schema.table`. Returns `None` when the table
/// does not exist.
pub fn discover_table(
    conn: &Connection,
    schema: Option<&str>,
    table: &str,
) -> Result<Option<TableDefinition>> {
    let dialect = Dialect::Sqlite;
    let schema_prefix = match schema {
        Some(s) => format!("{}.", dialect.quote(s)),
        None => String::new(),
    };

    let create_sql: Option<String> = conn
        .query_row(
            &format!(
                "SELECT sql FROM {}sqlite_master WHERE type = 'table' AND name = ?1",
                schema_prefix
            ),
            [table],
            |row| row.get(0),
        )
        .optional()?;
    let Some(create_sql) = create_sql else {
        return Ok(None);
    };

    let mut definition = TableDefinition::new(table).with_schema(schema);

    let columns = {
        let mut stmt = conn.prepare(&format!(
            "PRAGMA {}table_info({})",
            schema_prefix,
            dialect.quote(table)
        ))?;
        let rows = stmt.query_map([], |row| {
            Ok(ColumnInfo {
                name: row.get(1)?,
                declared_type: row.get(2)?,
                not_null: row.get::<_, i64>(3)? != 0,
                default: row.get(4)?,
                pk: row.get(5)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()?
    };

    let mut pk_columns: Vec<(i64, String)> = columns
        .iter()
        .filter(|c| c.pk > 0)
        .map(|c| (c.pk, c.name.clone()))
        .collect();
    pk_columns.sort();
    let autoincrement = pk_columns.len() == 1 && RE_AUTOINCREMENT.is_match(&create_sql);

    for info in &columns {
        let sql_type = info.declared_type.parse().map_err(|e: String| {
            EtlError::schema(definition.qualified_name(), format!("column '{}': {}", info.name, e))
        })?;
        let mut column = ColumnDefinition::new(&info.name, sql_type);
        column.nullable = !info.not_null;
        column.default = info.default.clone();
        column.auto_increment = autoincrement && info.pk == 1;
        definition.add_column(column)?;
    }

    if !pk_columns.is_empty() {
        let names: Vec<&str> = pk_columns.iter().map(|(_, n)| n.as_str()).collect();
        definition.add_index(IndexDefinition::primary(&names))?;
    }

    for (name, unique) in list_indexes(conn, &schema_prefix, table)? {
        let mut stmt = conn.prepare(&format!(
            "PRAGMA {}index_info({})",
            schema_prefix,
            dialect.quote(&name)
        ))?;
        let mut cols: Vec<(i64, String)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(2)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        cols.sort();
        let logical = name
            .strip_prefix(&format!("{}_", table))
            .unwrap_or(&name)
            .to_string();
        let cols: Vec<&str> = cols.iter().map(|(_, c)| c.as_str()).collect();
        definition.add_index(IndexDefinition::new(&cols, unique).named(logical))?;
    }

    for fk in list_foreign_keys(conn, &schema_prefix, table)? {
        definition.add_foreign_key(fk)?;
    }

    let mut stmt = conn.prepare(&format!(
        "SELECT name, sql FROM {}sqlite_master WHERE type = 'trigger' AND tbl_name = ?1 ORDER BY name",
        schema_prefix
    ))?;
    let triggers: Vec<(String, String)> = stmt
        .query_map([table], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    for (name, sql) in triggers {
        let caps = RE_TRIGGER.captures(&sql).ok_or_else(|| {
            EtlError::schema(
                definition.qualified_name(),
                format!("unrecognized trigger definition for '{}'", name),
            )
        })?;
        let time = caps[1]
            .parse()
            .map_err(|e: String| EtlError::schema(definition.qualified_name(), e))?;
        let event = caps[2]
            .parse()
            .map_err(|e: String| EtlError::schema(definition.qualified_name(), e))?;
        definition.add_trigger(TriggerDefinition::new(name, time, event, table, &caps[3]))?;
    }

    Ok(Some(definition))
}

struct ForeignKeyRow {
    id: i64,
    seq: i64,
    parent: String,
    from: String,
    to: Option<String>,
    on_update: String,
    on_delete: String,
}

/// Foreign keys from `PRAGMA foreign_key_list`, one per constraint id.
/// SQLite keeps no constraint names, so each gets the default name. A
/// reference without parent columns points at the parent's primary key.
fn list_foreign_keys(
    conn: &Connection,
    schema_prefix: &str,
    table: &str,
) -> Result<Vec<ForeignKeyDefinition>> {
    let mut stmt = conn.prepare(&format!(
        "PRAGMA {}foreign_key_list({})",
        schema_prefix,
        Dialect::Sqlite.quote(table)
    ))?;
    let mut rows: Vec<ForeignKeyRow> = stmt
        .query_map([], |row| {
            Ok(ForeignKeyRow {
                id: row.get(0)?,
                seq: row.get(1)?,
                parent: row.get(2)?,
                from: row.get(3)?,
                to: row.get(4)?,
                on_update: row.get(5)?,
                on_delete: row.get(6)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.sort_by_key(|r| (r.id, r.seq));

    let invalid = |e: String| EtlError::schema(table, e);
    let mut foreign_keys: Vec<ForeignKeyDefinition> = Vec::new();
    for group in rows.chunk_by(|a, b| a.id == b.id) {
        let first = &group[0];
        let columns: Vec<String> = group.iter().map(|r| r.from.clone()).collect();
        let referenced_columns = if group.iter().all(|r| r.to.is_some()) {
            group.iter().filter_map(|r| r.to.clone()).collect()
        } else {
            primary_key_columns(conn, schema_prefix, &first.parent)?
        };

        let mut name = default_foreign_key_name(&columns);
        if foreign_keys.iter().any(|f| f.name == name) {
            name = format!("{}_{}", name, first.id);
        }
        foreign_keys.push(ForeignKeyDefinition {
            name,
            columns,
            referenced_table: first.parent.clone(),
            referenced_columns,
            on_delete: first.on_delete.parse().map_err(invalid)?,
            on_update: first.on_update.parse().map_err(invalid)?,
        });
    }
    Ok(foreign_keys)
}

fn primary_key_columns(conn: &Connection, schema_prefix: &str, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!(
        "PRAGMA {}table_info({})",
        schema_prefix,
        Dialect::Sqlite.quote(table)
    ))?;
    let mut pk: Vec<(i64, String)> = stmt
        .query_map([], |row| Ok((row.get(5)?, row.get(1)?)))?
        .filter(|r| !matches!(r, Ok((0, _))))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    pk.sort();
    Ok(pk.into_iter().map(|(_, name)| name).collect())
}

/// Explicitly created indexes (`origin = 'c'`), sorted by name.
fn list_indexes(conn: &Connection, schema_prefix: &str, table: &str) -> Result<Vec<(String, bool)>> {
    let mut stmt = conn.prepare(&format!(
        "PRAGMA {}index_list({})",
        schema_prefix,
        Dialect::Sqlite.quote(table)
    ))?;
    let mut indexes: Vec<(String, bool)> = stmt
        .query_map([], |row| {
            let name: String = row.get(1)?;
            let unique: i64 = row.get(2)?;
            let origin: String = row.get(3)?;
            Ok((name, unique != 0, origin))
        })?
        .filter_map(|r| match r {
            Ok((name, unique, origin)) if origin == "c" => Some(Ok((name, unique))),
            Ok(_) => None,
            Err(e) => Some(Err(e)),
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;
    indexes.sort();
    Ok(indexes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dbmodel::{ReferentialAction, TriggerEvent, TriggerTime};
    use serde_json::json;

    fn definition() -> TableDefinition {
        TableDefinition::from_value(
            &json!({
                "name": "jobfact",
                "schema": "modw",
                "comment": "dropped by normalization",
                "columns": [
                    {"name": "id", "type": "bigint(20) unsigned", "auto_increment": true},
                    {"name": "resource", "type": "varchar(40)", "nullable": false, "comment": "x"},
                    {"name": "end_time", "type": "datetime", "nullable": false},
                    {"name": "cpu", "type": "decimal(18,4)", "default": 0},
                    {"name": "state", "type": "enum('ok','failed')", "default": "ok"}
                ],
                "indexes": [
                    {"name": "PRIMARY", "columns": ["id"]},
                    {"columns": ["resource", "end_time"]},
                    {"name": "uniq", "columns": ["resource", "id"], "unique": true}
                ],
                "triggers": [
                    {"name": "jobfact_ins", "time": "AFTER", "event": "INSERT", "table": "jobfact",
                     "body": "UPDATE counts SET n = n + 1;"}
                ]
            }),
            "jobfact.json",
        )
        .unwrap()
    }

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "ATTACH DATABASE ':memory:' AS modw; CREATE TABLE modw.counts (n INTEGER);",
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_missing_table_is_none() {
        let conn = setup();
        assert!(discover_table(&conn, Some("modw"), "nope").unwrap().is_none());
    }

    #[test]
    fn test_discovered_matches_normalized_declaration() {
        let conn = setup();
        let declared = definition();
        for sql in Dialect::Sqlite.create_sql(&declared) {
            conn.execute_batch(&sql).unwrap();
        }

        let live = discover_table(&conn, Some("modw"), "jobfact").unwrap().unwrap();
        let normalized = Dialect::Sqlite.normalize(&declared);

        assert_eq!(live.column_names(), normalized.column_names());
        assert_eq!(live.columns, normalized.columns);
        assert!(live.diff(&normalized).is_empty(), "{:?}", live.diff(&normalized));
        assert!(live
            .alter_sql(&declared, Dialect::Sqlite)
            .unwrap()
            .is_empty());

        let trigger = &live.triggers[0];
        assert_eq!(trigger.time, TriggerTime::After);
        assert_eq!(trigger.event, TriggerEvent::Insert);
        assert_eq!(trigger.body, "UPDATE counts SET n = n + 1;");
    }

    #[test]
    fn test_composite_primary_key() {
        let conn = setup();
        conn.execute_batch(
            "CREATE TABLE modw.pairs (a integer NOT NULL, b text NOT NULL, PRIMARY KEY (b, a))",
        )
        .unwrap();
        let live = discover_table(&conn, Some("modw"), "pairs").unwrap().unwrap();
        let pk = live.primary_key().unwrap();
        assert_eq!(pk.columns, vec!["b".to_string(), "a".to_string()]);
        assert!(!live.column("a").unwrap().auto_increment);
    }

    #[test]
    fn test_foreign_keys_are_discovered() {
        let conn = setup();
        conn.execute_batch(
            "CREATE TABLE modw.accounts (id integer NOT NULL, code text NOT NULL, PRIMARY KEY (id))",
        )
        .unwrap();
        let declared = TableDefinition::from_value(
            &json!({
                "name": "visits",
                "schema": "modw",
                "columns": [
                    {"name": "account_id", "type": "int", "nullable": false},
                    {"name": "account_code", "type": "varchar(10)"}
                ],
                "foreign_keys": [
                    {"name": "visits_account", "columns": ["account_id"],
                     "referenced_table": "modw.accounts", "referenced_columns": ["id"],
                     "on_delete": "CASCADE"},
                    {"columns": ["account_code"], "referenced_table": "accounts",
                     "referenced_columns": ["code"], "on_update": "SET NULL"}
                ]
            }),
            "visits.json",
        )
        .unwrap();
        for sql in Dialect::Sqlite.create_sql(&declared) {
            conn.execute_batch(&sql).unwrap();
        }

        let live = discover_table(&conn, Some("modw"), "visits").unwrap().unwrap();
        assert_eq!(live.foreign_keys.len(), 2);
        let by_id = live
            .foreign_keys
            .iter()
            .find(|f| f.columns == vec!["account_id".to_string()])
            .unwrap();
        assert_eq!(by_id.referenced_table, "accounts");
        assert_eq!(by_id.referenced_columns, vec!["id".to_string()]);
        assert_eq!(by_id.on_delete, ReferentialAction::Cascade);
        assert_eq!(by_id.on_update, ReferentialAction::NoAction);
        assert!(live
            .alter_sql(&declared, Dialect::Sqlite)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_implicit_parent_columns_resolve_to_primary_key() {
        let conn = setup();
        conn.execute_batch(
            "CREATE TABLE modw.accounts (id integer PRIMARY KEY);
             CREATE TABLE modw.logins (account integer REFERENCES accounts);",
        )
        .unwrap();
        let live = discover_table(&conn, Some("modw"), "logins").unwrap().unwrap();
        let fk = &live.foreign_keys[0];
        assert_eq!(fk.name, "fk_account");
        assert_eq!(fk.referenced_columns, vec!["id".to_string()]);
    }
}
