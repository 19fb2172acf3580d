//! DDL rendering per SQL dialect.
//!
//! `MySql` renders warehouse-style DDL (backticks, `MODIFY COLUMN`, table
//! options). `Sqlite` renders statements the bundled store can execute; the
//! changes SQLite cannot express in place, foreign key changes among them,
//! become a table rebuild.

use std::fmt;
use std::str::FromStr;

use super::column::ColumnDefinition;
use super::diff::SchemaChange;
use super::foreign_key::{ForeignKeyDefinition, ReferentialAction};
use super::index::IndexDefinition;
use super::sql_type::{IntKind, SqlType, TextKind};
use super::table::TableDefinition;
use super::trigger::TriggerDefinition;
use super::{split_qualified, unqualified};

const REBUILD_SUFFIX: &str = "__rebuild";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    MySql,
    #[default]
    Sqlite,
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mysql" => Ok(Dialect::MySql),
            "sqlite" => Ok(Dialect::Sqlite),
            other => Err(format!("unknown dialect '{}'", other)),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Dialect::MySql => "mysql",
            Dialect::Sqlite => "sqlite",
        })
    }
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

impl Dialect {
    pub fn quote(&self, identifier: &str) -> String {
        match self {
            Dialect::MySql => format!("`{}`", identifier.replace('`', "``")),
            Dialect::Sqlite => format!("\"{}\"", identifier.replace('"', "\"\"")),
        }
    }

    /// `schema.table` with each part quoted.
    pub fn table_name(&self, table: &TableDefinition) -> String {
        self.qualify(table.schema.as_deref(), &table.name)
    }

    pub fn qualify(&self, schema: Option<&str>, name: &str) -> String {
        match schema {
            Some(s) => format!("{}.{}", self.quote(s), self.quote(name)),
            None => self.quote(name),
        }
    }

    /// Strips what this dialect cannot store, so that a declared definition
    /// compares equal to the same table introspected from a live database.
    pub fn normalize(&self, table: &TableDefinition) -> TableDefinition {
        match self {
            Dialect::MySql => table.clone(),
            Dialect::Sqlite => {
                let mut table = table.clone();
                table.engine = None;
                table.charset = None;
                table.collation = None;
                table.comment = None;
                for column in &mut table.columns {
                    column.sql_type = sqlite_storage_type(&column.sql_type);
                    column.comment = None;
                    column.charset = None;
                    column.collation = None;
                }
                // SQLite parents always live in the child's schema.
                for fk in &mut table.foreign_keys {
                    fk.referenced_table = unqualified(&fk.referenced_table).to_string();
                }
                table
            }
        }
    }

    pub fn type_name(&self, sql_type: &SqlType) -> String {
        match self {
            Dialect::MySql => sql_type.to_string(),
            Dialect::Sqlite => match sqlite_storage_type(sql_type) {
                SqlType::Integer { .. } => "integer".to_string(),
                other => other.to_string(),
            },
        }
    }

    pub fn column_sql(&self, column: &ColumnDefinition) -> String {
        let mut sql = format!(
            "{} {}",
            self.quote(&column.name),
            self.type_name(&column.sql_type)
        );
        if *self == Dialect::MySql {
            if let Some(charset) = &column.charset {
                sql.push_str(&format!(" CHARACTER SET {}", charset));
            }
            if let Some(collation) = &column.collation {
                sql.push_str(&format!(" COLLATE {}", collation));
            }
        }
        if !column.nullable {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = &column.default {
            sql.push_str(&format!(" DEFAULT {}", default));
        }
        if column.auto_increment {
            match self {
                Dialect::MySql => sql.push_str(" AUTO_INCREMENT"),
                Dialect::Sqlite => sql.push_str(" PRIMARY KEY AUTOINCREMENT"),
            }
        }
        if *self == Dialect::MySql {
            if let Some(comment) = &column.comment {
                sql.push_str(&format!(" COMMENT {}", quote_literal(comment)));
            }
        }
        sql
    }

    fn column_list(&self, columns: &[String]) -> String {
        columns
            .iter()
            .map(|c| self.quote(c))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Physical index name. SQLite index names are unique per schema, so the
    /// table name is prefixed.
    pub fn index_name(&self, table: &str, index: &IndexDefinition) -> String {
        match self {
            Dialect::MySql => index.name.clone(),
            Dialect::Sqlite => format!("{}_{}", table, index.name),
        }
    }

    /// `CONSTRAINT ... FOREIGN KEY ... REFERENCES ...` clause, shared by
    /// CREATE TABLE and MySQL's `ADD CONSTRAINT`.
    pub fn foreign_key_sql(&self, fk: &ForeignKeyDefinition) -> String {
        let parent = match self {
            Dialect::MySql => {
                let (schema, table) = split_qualified(&fk.referenced_table);
                self.qualify(schema, table)
            }
            Dialect::Sqlite => self.quote(unqualified(&fk.referenced_table)),
        };
        let mut sql = format!(
            "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
            self.quote(&fk.name),
            self.column_list(&fk.columns),
            parent,
            self.column_list(&fk.referenced_columns)
        );
        if fk.on_delete != ReferentialAction::NoAction {
            sql.push_str(&format!(" ON DELETE {}", fk.on_delete));
        }
        if fk.on_update != ReferentialAction::NoAction {
            sql.push_str(&format!(" ON UPDATE {}", fk.on_update));
        }
        sql
    }

    fn create_table_statement(&self, table: &TableDefinition, name: &str) -> String {
        let mut lines: Vec<String> = table
            .columns
            .iter()
            .map(|c| format!("  {}", self.column_sql(c)))
            .collect();

        let inline_pk = *self == Dialect::Sqlite && table.columns.iter().any(|c| c.auto_increment);
        if let Some(pk) = table.primary_key() {
            if !inline_pk {
                lines.push(format!("  PRIMARY KEY ({})", self.column_list(&pk.columns)));
            }
        }
        for fk in &table.foreign_keys {
            lines.push(format!("  {}", self.foreign_key_sql(fk)));
        }

        let mut sql = format!(
            "CREATE TABLE {} (\n{}\n)",
            self.qualify(table.schema.as_deref(), name),
            lines.join(",\n")
        );
        if *self == Dialect::MySql {
            sql.push_str(&self.table_options_sql(
                table.engine.as_deref(),
                table.charset.as_deref(),
                table.collation.as_deref(),
                table.comment.as_deref(),
            ));
        }
        sql
    }

    fn table_options_sql(
        &self,
        engine: Option<&str>,
        charset: Option<&str>,
        collation: Option<&str>,
        comment: Option<&str>,
    ) -> String {
        let mut sql = String::new();
        if let Some(engine) = engine {
            sql.push_str(&format!(" ENGINE = {}", engine));
        }
        if let Some(charset) = charset {
            sql.push_str(&format!(" CHARSET = {}", charset));
        }
        if let Some(collation) = collation {
            sql.push_str(&format!(" COLLATE = {}", collation));
        }
        if let Some(comment) = comment {
            sql.push_str(&format!(" COMMENT = {}", quote_literal(comment)));
        }
        sql
    }

    fn create_index_sql(&self, table: &TableDefinition, index: &IndexDefinition) -> String {
        let unique = if index.unique { "UNIQUE " } else { "" };
        match self {
            Dialect::MySql => format!(
                "CREATE {}INDEX {} ON {} ({})",
                unique,
                self.quote(&index.name),
                self.table_name(table),
                self.column_list(&index.columns)
            ),
            Dialect::Sqlite => format!(
                "CREATE {}INDEX {} ON {} ({})",
                unique,
                self.qualify(table.schema.as_deref(), &self.index_name(&table.name, index)),
                self.quote(&table.name),
                self.column_list(&index.columns)
            ),
        }
    }

    fn drop_index_sql(&self, table: &TableDefinition, index: &IndexDefinition) -> String {
        match self {
            Dialect::MySql if index.is_primary() => {
                format!("ALTER TABLE {} DROP PRIMARY KEY", self.table_name(table))
            }
            Dialect::MySql => format!(
                "ALTER TABLE {} DROP INDEX {}",
                self.table_name(table),
                self.quote(&index.name)
            ),
            Dialect::Sqlite => format!(
                "DROP INDEX IF EXISTS {}",
                self.qualify(table.schema.as_deref(), &self.index_name(&table.name, index))
            ),
        }
    }

    fn create_trigger_sql(&self, table: &TableDefinition, trigger: &TriggerDefinition) -> String {
        let (name, target) = match self {
            Dialect::MySql => (
                self.qualify(table.schema.as_deref(), &trigger.name),
                self.table_name(table),
            ),
            Dialect::Sqlite => (
                self.qualify(table.schema.as_deref(), &trigger.name),
                self.quote(&table.name),
            ),
        };
        format!(
            "CREATE TRIGGER {} {} {} ON {} FOR EACH ROW BEGIN\n{}\nEND",
            name, trigger.time, trigger.event, target, trigger.body
        )
    }

    fn drop_trigger_sql(&self, table: &TableDefinition, trigger: &TriggerDefinition) -> String {
        format!(
            "DROP TRIGGER IF EXISTS {}",
            self.qualify(table.schema.as_deref(), &trigger.name)
        )
    }

    /// CREATE TABLE followed by one statement per secondary index and trigger.
    pub fn create_sql(&self, table: &TableDefinition) -> Vec<String> {
        let table = self.normalize(table);
        let mut statements = vec![self.create_table_statement(&table, &table.name)];
        statements.extend(self.secondary_objects_sql(&table));
        statements
    }

    fn secondary_objects_sql(&self, table: &TableDefinition) -> Vec<String> {
        let mut statements = Vec::new();
        for index in table.indexes.iter().filter(|i| !i.is_primary()) {
            statements.push(self.create_index_sql(table, index));
        }
        for trigger in &table.triggers {
            statements.push(self.create_trigger_sql(table, trigger));
        }
        statements
    }

    pub fn drop_sql(&self, table: &TableDefinition) -> String {
        format!("DROP TABLE IF EXISTS {}", self.table_name(table))
    }

    /// Statements applying `changes`, as produced by diffing the normalized
    /// `current` against the normalized `target`.
    pub fn alter_sql(
        &self,
        current: &TableDefinition,
        target: &TableDefinition,
        changes: &[SchemaChange],
    ) -> Vec<String> {
        match self {
            Dialect::MySql => self.mysql_alter(target, changes),
            Dialect::Sqlite if sqlite_needs_rebuild(current, target, changes) => {
                self.sqlite_rebuild(current, target)
            }
            Dialect::Sqlite => self.sqlite_alter(target, changes),
        }
    }

    fn mysql_alter(&self, target: &TableDefinition, changes: &[SchemaChange]) -> Vec<String> {
        let table = self.table_name(target);
        changes
            .iter()
            .map(|change| match change {
                SchemaChange::DropForeignKey(f) => format!(
                    "ALTER TABLE {} DROP FOREIGN KEY {}",
                    table,
                    self.quote(&f.name)
                ),
                SchemaChange::DropTrigger(t) => self.drop_trigger_sql(target, t),
                SchemaChange::DropIndex(i) => self.drop_index_sql(target, i),
                SchemaChange::DropColumn(c) => {
                    format!("ALTER TABLE {} DROP COLUMN {}", table, self.quote(&c.name))
                }
                SchemaChange::ModifyColumn { to, .. } => {
                    format!("ALTER TABLE {} MODIFY COLUMN {}", table, self.column_sql(to))
                }
                SchemaChange::TableOptions {
                    engine,
                    charset,
                    collation,
                    comment,
                } => format!(
                    "ALTER TABLE {}{}",
                    table,
                    self.table_options_sql(
                        engine.as_deref(),
                        charset.as_deref(),
                        collation.as_deref(),
                        Some(comment.as_deref().unwrap_or_default()),
                    )
                ),
                SchemaChange::AddColumn { column, after } => format!(
                    "ALTER TABLE {} ADD COLUMN {} {}",
                    table,
                    self.column_sql(column),
                    match after {
                        Some(prev) => format!("AFTER {}", self.quote(prev)),
                        None => "FIRST".to_string(),
                    }
                ),
                SchemaChange::AddIndex(i) if i.is_primary() => format!(
                    "ALTER TABLE {} ADD PRIMARY KEY ({})",
                    table,
                    self.column_list(&i.columns)
                ),
                SchemaChange::AddIndex(i) => self.create_index_sql(target, i),
                SchemaChange::AddForeignKey(f) => {
                    format!("ALTER TABLE {} ADD {}", table, self.foreign_key_sql(f))
                }
                SchemaChange::CreateTrigger(t) => self.create_trigger_sql(target, t),
            })
            .collect()
    }

    fn sqlite_alter(&self, target: &TableDefinition, changes: &[SchemaChange]) -> Vec<String> {
        let table = self.table_name(target);
        changes
            .iter()
            .filter_map(|change| match change {
                SchemaChange::DropTrigger(t) => Some(self.drop_trigger_sql(target, t)),
                SchemaChange::DropIndex(i) => Some(self.drop_index_sql(target, i)),
                SchemaChange::DropColumn(c) => Some(format!(
                    "ALTER TABLE {} DROP COLUMN {}",
                    table,
                    self.quote(&c.name)
                )),
                SchemaChange::AddColumn { column, .. } => Some(format!(
                    "ALTER TABLE {} ADD COLUMN {}",
                    table,
                    self.column_sql(column)
                )),
                SchemaChange::AddIndex(i) => Some(self.create_index_sql(target, i)),
                SchemaChange::CreateTrigger(t) => Some(self.create_trigger_sql(target, t)),
                // Not representable in SQLite; normalization removes them.
                SchemaChange::TableOptions { .. } => None,
                // Force a rebuild, never reached here.
                SchemaChange::ModifyColumn { .. }
                | SchemaChange::DropForeignKey(_)
                | SchemaChange::AddForeignKey(_) => None,
            })
            .collect()
    }

    /// Copies the rows of `current` into a table created from `target`,
    /// then swaps the tables. Columns present in both are carried over.
    fn sqlite_rebuild(&self, current: &TableDefinition, target: &TableDefinition) -> Vec<String> {
        let temp_name = format!("{}{}", target.name, REBUILD_SUFFIX);
        let common: Vec<String> = target
            .columns
            .iter()
            .filter(|c| current.has_column(&c.name))
            .map(|c| c.name.clone())
            .collect();
        let temp = self.qualify(target.schema.as_deref(), &temp_name);

        let mut statements = vec![
            format!("DROP TABLE IF EXISTS {}", temp),
            self.create_table_statement(target, &temp_name),
        ];
        if !common.is_empty() {
            let cols = self.column_list(&common);
            statements.push(format!(
                "INSERT INTO {} ({}) SELECT {} FROM {}",
                temp,
                cols,
                cols,
                self.table_name(target)
            ));
        }
        statements.push(self.drop_sql(target));
        statements.push(format!(
            "ALTER TABLE {} RENAME TO {}",
            temp,
            self.quote(&target.name)
        ));
        statements.extend(self.secondary_objects_sql(target));
        statements
    }
}

/// Storage type SQLite reports back for a declared type.
fn sqlite_storage_type(sql_type: &SqlType) -> SqlType {
    match sql_type {
        SqlType::Integer { .. } => SqlType::Integer {
            kind: IntKind::Int,
            width: None,
            unsigned: false,
        },
        SqlType::Enum(_) | SqlType::Set(_) => SqlType::Text(TextKind::Text),
        other => other.clone(),
    }
}

fn is_constant_default(default: &str) -> bool {
    let upper = default.to_ascii_uppercase();
    !(upper.starts_with("CURRENT_") || upper.starts_with('('))
}

fn sqlite_needs_rebuild(
    current: &TableDefinition,
    target: &TableDefinition,
    changes: &[SchemaChange],
) -> bool {
    let current_pk: Vec<&str> = current
        .primary_key()
        .map(|pk| pk.columns.iter().map(String::as_str).collect())
        .unwrap_or_default();

    changes.iter().any(|change| match change {
        SchemaChange::ModifyColumn { .. }
        | SchemaChange::DropForeignKey(_)
        | SchemaChange::AddForeignKey(_) => true,
        SchemaChange::DropIndex(i) | SchemaChange::AddIndex(i) => i.is_primary(),
        SchemaChange::DropColumn(c) => current_pk.contains(&c.name.as_str()),
        SchemaChange::AddColumn { column, .. } => {
            column.auto_increment
                || target
                    .primary_key()
                    .is_some_and(|pk| pk.columns.contains(&column.name))
                || match &column.default {
                    None => !column.nullable,
                    Some(d) => !is_constant_default(d),
                }
        }
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dbmodel::{TriggerEvent, TriggerTime};

    fn ty(s: &str) -> SqlType {
        s.parse().unwrap()
    }

    fn base_table(name_len: u32) -> TableDefinition {
        let mut t = TableDefinition::new("t");
        t.add_column(ColumnDefinition::new("id", ty("int")))
            .unwrap()
            .add_column(ColumnDefinition::new(
                "name",
                ty(&format!("varchar({})", name_len)),
            ))
            .unwrap();
        t
    }

    #[test]
    fn test_mysql_alter_scenario() {
        let current = base_table(50);
        let mut target = base_table(100);
        target
            .add_column(ColumnDefinition::new("email", ty("varchar(100)")))
            .unwrap();

        let sql = current.alter_sql(&target, Dialect::MySql).unwrap();
        assert_eq!(
            sql,
            vec![
                "ALTER TABLE `t` MODIFY COLUMN `name` varchar(100)".to_string(),
                "ALTER TABLE `t` ADD COLUMN `email` varchar(100) AFTER `name`".to_string(),
            ]
        );
    }

    #[test]
    fn test_alter_against_itself_is_empty() {
        let table = base_table(50);
        for dialect in [Dialect::MySql, Dialect::Sqlite] {
            assert!(table.alter_sql(&table.clone(), dialect).unwrap().is_empty());
        }
    }

    #[test]
    fn test_mysql_create_sql() {
        let mut table = TableDefinition::new("modw.jobs");
        table.engine = Some("InnoDB".into());
        table.comment = Some("jobs".into());
        table
            .add_column(ColumnDefinition::new("id", ty("int(11) unsigned")).auto_increment())
            .unwrap()
            .add_column(
                ColumnDefinition::new("state", ty("varchar(10)"))
                    .not_null()
                    .with_default("'ok'")
                    .with_comment("exit state"),
            )
            .unwrap()
            .add_index(IndexDefinition::primary(&["id"]))
            .unwrap()
            .add_index(IndexDefinition::new(&["state"], false))
            .unwrap();

        let sql = table.create_sql(Dialect::MySql).unwrap();
        assert_eq!(
            sql[0],
            "CREATE TABLE `modw`.`jobs` (\n  `id` int(11) unsigned NOT NULL AUTO_INCREMENT,\n  `state` varchar(10) NOT NULL DEFAULT 'ok' COMMENT 'exit state',\n  PRIMARY KEY (`id`)\n) ENGINE = InnoDB COMMENT = 'jobs'"
        );
        assert_eq!(
            sql[1],
            "CREATE INDEX `index_state` ON `modw`.`jobs` (`state`)"
        );
        assert_eq!(sql.len(), 2);
    }

    #[test]
    fn test_sqlite_create_sql() {
        let mut table = TableDefinition::new("modw.jobs");
        table.comment = Some("ignored".into());
        table
            .add_column(ColumnDefinition::new("id", ty("bigint(20) unsigned")).auto_increment())
            .unwrap()
            .add_column(ColumnDefinition::new("state", ty("enum('a','b')")))
            .unwrap()
            .add_index(IndexDefinition::primary(&["id"]))
            .unwrap()
            .add_index(IndexDefinition::new(&["state"], true))
            .unwrap()
            .add_trigger(TriggerDefinition::new(
                "jobs_ins",
                TriggerTime::After,
                TriggerEvent::Insert,
                "jobs",
                "SELECT 1",
            ))
            .unwrap();

        let sql = table.create_sql(Dialect::Sqlite).unwrap();
        assert_eq!(
            sql,
            vec![
                "CREATE TABLE \"modw\".\"jobs\" (\n  \"id\" integer NOT NULL PRIMARY KEY AUTOINCREMENT,\n  \"state\" text\n)".to_string(),
                "CREATE UNIQUE INDEX \"modw\".\"jobs_index_state\" ON \"jobs\" (\"state\")".to_string(),
                "CREATE TRIGGER \"modw\".\"jobs_ins\" AFTER INSERT ON \"jobs\" FOR EACH ROW BEGIN\nSELECT 1;\nEND".to_string(),
            ]
        );
    }

    #[test]
    fn test_sqlite_modify_triggers_rebuild() {
        let current = Dialect::Sqlite.normalize(&base_table(50));
        let mut target = base_table(100);
        target
            .add_column(ColumnDefinition::new("email", ty("varchar(100)")))
            .unwrap();

        let sql = current.alter_sql(&target, Dialect::Sqlite).unwrap();
        assert_eq!(sql[0], "DROP TABLE IF EXISTS \"t__rebuild\"");
        assert!(sql[1].starts_with("CREATE TABLE \"t__rebuild\""));
        assert_eq!(
            sql[2],
            "INSERT INTO \"t__rebuild\" (\"id\",\"name\") SELECT \"id\",\"name\" FROM \"t\""
        );
        assert_eq!(sql[3], "DROP TABLE IF EXISTS \"t\"");
        assert_eq!(sql[4], "ALTER TABLE \"t__rebuild\" RENAME TO \"t\"");
        assert_eq!(sql.len(), 5);
    }

    #[test]
    fn test_sqlite_add_nullable_column_in_place() {
        let current = Dialect::Sqlite.normalize(&base_table(50));
        let mut target = base_table(50);
        target
            .add_column(ColumnDefinition::new("email", ty("varchar(100)")))
            .unwrap()
            .add_index(IndexDefinition::new(&["email"], false))
            .unwrap();

        let sql = current.alter_sql(&target, Dialect::Sqlite).unwrap();
        assert_eq!(
            sql,
            vec![
                "ALTER TABLE \"t\" ADD COLUMN \"email\" varchar(100)".to_string(),
                "CREATE INDEX \"t_index_email\" ON \"t\" (\"email\")".to_string(),
            ]
        );
    }

    #[test]
    fn test_sqlite_not_null_without_default_rebuilds() {
        let current = base_table(50);
        let mut target = base_table(50);
        target
            .add_column(ColumnDefinition::new("n", ty("int")).not_null())
            .unwrap();
        let sql = current.alter_sql(&target, Dialect::Sqlite).unwrap();
        assert!(sql.iter().any(|s| s.contains("RENAME TO")));
    }

    #[test]
    fn test_dialect_from_str() {
        assert_eq!("MySQL".parse::<Dialect>().unwrap(), Dialect::MySql);
        assert_eq!("sqlite".parse::<Dialect>().unwrap(), Dialect::Sqlite);
        assert!("oracle".parse::<Dialect>().is_err());
    }

    fn with_account_link(mut table: TableDefinition, on_delete: ReferentialAction) -> TableDefinition {
        table
            .add_foreign_key(
                ForeignKeyDefinition::new(&["id"], "modw.accounts", &["account_id"])
                    .named("t_account")
                    .on_delete(on_delete),
            )
            .unwrap();
        table
    }

    #[test]
    fn test_create_sql_renders_foreign_keys() {
        let table = with_account_link(base_table(50), ReferentialAction::Cascade);
        let mysql = table.create_sql(Dialect::MySql).unwrap();
        assert!(
            mysql[0].contains(
                "  CONSTRAINT `t_account` FOREIGN KEY (`id`) REFERENCES `modw`.`accounts` (`account_id`) ON DELETE CASCADE\n)"
            ),
            "{}",
            mysql[0]
        );
        let sqlite = table.create_sql(Dialect::Sqlite).unwrap();
        assert!(
            sqlite[0].contains(
                "  CONSTRAINT \"t_account\" FOREIGN KEY (\"id\") REFERENCES \"accounts\" (\"account_id\") ON DELETE CASCADE\n)"
            ),
            "{}",
            sqlite[0]
        );
    }

    #[test]
    fn test_mysql_foreign_key_change_drops_then_adds() {
        let current = with_account_link(base_table(50), ReferentialAction::NoAction);
        let target = with_account_link(base_table(50), ReferentialAction::SetNull);
        let sql = current.alter_sql(&target, Dialect::MySql).unwrap();
        assert_eq!(
            sql,
            vec![
                "ALTER TABLE `t` DROP FOREIGN KEY `t_account`".to_string(),
                "ALTER TABLE `t` ADD CONSTRAINT `t_account` FOREIGN KEY (`id`) REFERENCES `modw`.`accounts` (`account_id`) ON DELETE SET NULL".to_string(),
            ]
        );
    }

    #[test]
    fn test_sqlite_foreign_key_change_rebuilds() {
        let current = base_table(50);
        let target = with_account_link(base_table(50), ReferentialAction::Cascade);
        let sql = current.alter_sql(&target, Dialect::Sqlite).unwrap();
        assert!(sql[1].contains("REFERENCES \"accounts\""), "{}", sql[1]);
        assert!(sql.iter().any(|s| s.contains("RENAME TO")));

        let qualified = Dialect::Sqlite.normalize(&target);
        assert_eq!(qualified.foreign_keys[0].referenced_table, "accounts");
        assert!(target.alter_sql(&target.clone(), Dialect::Sqlite).unwrap().is_empty());
    }
}
