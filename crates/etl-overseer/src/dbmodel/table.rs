use std::collections::HashSet;
use std::path::Path;

use serde_json::{Map, Value};

use crate::error::{EtlError, Result};

use super::column::ColumnDefinition;
use super::dialect::Dialect;
use super::diff::{self, SchemaChange};
use super::foreign_key::ForeignKeyDefinition;
use super::index::IndexDefinition;
use super::trigger::TriggerDefinition;
use super::{split_qualified, DeclarationError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDefinition {
    pub name: String,
    pub schema: Option<String>,
    pub columns: Vec<ColumnDefinition>,
    pub indexes: Vec<IndexDefinition>,
    pub foreign_keys: Vec<ForeignKeyDefinition>,
    pub triggers: Vec<TriggerDefinition>,
    pub engine: Option<String>,
    pub charset: Option<String>,
    pub collation: Option<String>,
    pub comment: Option<String>,
}

impl TableDefinition {
    /// Empty table. A qualified name (`schema.table`) sets the schema.
    pub fn new(name: &str) -> Self {
        let (schema, table) = split_qualified(name);
        Self {
            name: table.to_string(),
            schema: schema.map(str::to_string),
            columns: Vec::new(),
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
            triggers: Vec::new(),
            engine: None,
            charset: None,
            collation: None,
            comment: None,
        }
    }

    /// Explicit schema override, used when the same definition is deployed
    /// to whichever schema an endpoint names.
    pub fn with_schema(mut self, schema: Option<&str>) -> Self {
        self.schema = schema.map(str::to_string);
        self
    }

    pub fn qualified_name(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", schema, self.name),
            None => self.name.clone(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn primary_key(&self) -> Option<&IndexDefinition> {
        self.indexes.iter().find(|i| i.is_primary())
    }

    /// Primary key or any unique index: rows can be replaced by key.
    pub fn has_unique_key(&self) -> bool {
        self.indexes.iter().any(|i| i.unique)
    }

    // Mutators

    pub fn add_column(&mut self, column: ColumnDefinition) -> Result<&mut Self> {
        self.try_add_column(column)
            .map_err(|m| EtlError::schema(self.qualified_name(), m))?;
        Ok(self)
    }

    pub fn add_index(&mut self, index: IndexDefinition) -> Result<&mut Self> {
        self.try_add_index(index)
            .map_err(|m| EtlError::schema(self.qualified_name(), m))?;
        Ok(self)
    }

    pub fn add_foreign_key(&mut self, foreign_key: ForeignKeyDefinition) -> Result<&mut Self> {
        self.try_add_foreign_key(foreign_key)
            .map_err(|m| EtlError::schema(self.qualified_name(), m))?;
        Ok(self)
    }

    pub fn add_trigger(&mut self, trigger: TriggerDefinition) -> Result<&mut Self> {
        self.try_add_trigger(trigger)
            .map_err(|m| EtlError::schema(self.qualified_name(), m))?;
        Ok(self)
    }

    /// Removes the named columns, returning how many were removed.
    pub fn delete_columns(&mut self, names: &[&str]) -> usize {
        let before = self.columns.len();
        self.columns.retain(|c| !names.contains(&c.name.as_str()));
        before - self.columns.len()
    }

    pub fn delete_indexes(&mut self, names: &[&str]) -> usize {
        let before = self.indexes.len();
        self.indexes.retain(|i| !names.contains(&i.name.as_str()));
        before - self.indexes.len()
    }

    pub fn delete_foreign_keys(&mut self, names: &[&str]) -> usize {
        let before = self.foreign_keys.len();
        self.foreign_keys.retain(|f| !names.contains(&f.name.as_str()));
        before - self.foreign_keys.len()
    }

    pub fn delete_triggers(&mut self, names: &[&str]) -> usize {
        let before = self.triggers.len();
        self.triggers.retain(|t| !names.contains(&t.name.as_str()));
        before - self.triggers.len()
    }

    fn try_add_column(&mut self, column: ColumnDefinition) -> std::result::Result<(), String> {
        if self.has_column(&column.name) {
            return Err(format!("duplicate column '{}'", column.name));
        }
        self.columns.push(column);
        Ok(())
    }

    fn try_add_index(&mut self, index: IndexDefinition) -> std::result::Result<(), String> {
        if let Some(missing) = index.columns.iter().find(|c| !self.has_column(c)) {
            return Err(format!(
                "index '{}' references unknown column '{}'",
                index.name, missing
            ));
        }
        if self.indexes.iter().any(|i| i.name == index.name) {
            return Err(format!("duplicate index '{}'", index.name));
        }
        self.indexes.push(index);
        Ok(())
    }

    fn try_add_foreign_key(
        &mut self,
        foreign_key: ForeignKeyDefinition,
    ) -> std::result::Result<(), String> {
        if let Some(missing) = foreign_key.columns.iter().find(|c| !self.has_column(c)) {
            return Err(format!(
                "foreign key '{}' references unknown column '{}'",
                foreign_key.name, missing
            ));
        }
        if self.foreign_keys.iter().any(|f| f.name == foreign_key.name) {
            return Err(format!("duplicate foreign key '{}'", foreign_key.name));
        }
        self.foreign_keys.push(foreign_key);
        Ok(())
    }

    fn try_add_trigger(&mut self, trigger: TriggerDefinition) -> std::result::Result<(), String> {
        if self.triggers.iter().any(|t| t.name == trigger.name) {
            return Err(format!("duplicate trigger '{}'", trigger.name));
        }
        self.triggers.push(trigger);
        Ok(())
    }

    /// Structural consistency check, run before any DDL is generated from
    /// the definition.
    pub fn verify(&self) -> Result<()> {
        let fail = |message: String| Err(EtlError::schema(self.qualified_name(), message));

        if self.columns.is_empty() {
            return fail("table has no columns".to_string());
        }

        let mut seen = HashSet::new();
        for column in &self.columns {
            if !seen.insert(column.name.as_str()) {
                return fail(format!("duplicate column '{}'", column.name));
            }
        }

        for index in &self.indexes {
            if let Some(missing) = index.columns.iter().find(|c| !self.has_column(c)) {
                return fail(format!(
                    "index '{}' references undefined column '{}'",
                    index.name, missing
                ));
            }
        }

        let mut fk_names = HashSet::new();
        for fk in &self.foreign_keys {
            if !fk_names.insert(fk.name.as_str()) {
                return fail(format!("duplicate foreign key '{}'", fk.name));
            }
            if fk.columns.is_empty() {
                return fail(format!("foreign key '{}' has no columns", fk.name));
            }
            if let Some(missing) = fk.columns.iter().find(|c| !self.has_column(c)) {
                return fail(format!(
                    "foreign key '{}' references undefined column '{}'",
                    fk.name, missing
                ));
            }
            if fk.columns.len() != fk.referenced_columns.len() {
                return fail(format!(
                    "foreign key '{}' pairs {} column(s) with {} referenced column(s)",
                    fk.name,
                    fk.columns.len(),
                    fk.referenced_columns.len()
                ));
            }
        }

        if self.indexes.iter().filter(|i| i.is_primary()).count() > 1 {
            return fail("more than one primary key".to_string());
        }

        let auto: Vec<&ColumnDefinition> =
            self.columns.iter().filter(|c| c.auto_increment).collect();
        if auto.len() > 1 {
            return fail(format!(
                "more than one auto_increment column: {}",
                auto.iter()
                    .map(|c| c.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }
        if let Some(column) = auto.first() {
            if !column.sql_type.is_integer() {
                return fail(format!(
                    "auto_increment column '{}' must have an integer type",
                    column.name
                ));
            }
            let covered = self
                .primary_key()
                .is_some_and(|pk| pk.columns.len() == 1 && pk.columns[0] == column.name);
            if !covered {
                return fail(format!(
                    "auto_increment column '{}' must be the sole primary key column",
                    column.name
                ));
            }
        }

        for trigger in &self.triggers {
            if trigger.table != self.name {
                return fail(format!(
                    "trigger '{}' targets table '{}'",
                    trigger.name, trigger.table
                ));
            }
        }

        Ok(())
    }

    // Parsing and serialization

    /// Reads a definition file. Errors carry the file path.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| EtlError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        let source_name = path.display().to_string();
        let value: Value = serde_json::from_str(&content).map_err(|e| {
            EtlError::config(
                &source_name,
                format!("line {}, column {}", e.line(), e.column()),
                e.to_string(),
            )
        })?;
        Self::from_value(&value, &source_name)
    }

    /// Parses an in-memory declaration. A top-level `table_definition`
    /// wrapper is accepted.
    pub fn from_value(value: &Value, source_name: &str) -> Result<Self> {
        let (value, base) = match value.get("table_definition") {
            Some(inner) => (inner, "/table_definition"),
            None => (value, ""),
        };
        Self::parse_declaration(value, base)
            .map_err(|e| EtlError::config(source_name, pointer_or_root(&e.pointer), e.message))
    }

    fn parse_declaration(value: &Value, base: &str) -> std::result::Result<Self, DeclarationError> {
        let object = value
            .as_object()
            .ok_or_else(|| DeclarationError::new(base, "table definition must be an object"))?;

        let name = object
            .get("name")
            .and_then(Value::as_str)
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| DeclarationError::new(format!("{}/name", base), "missing table name"))?;

        let mut table = TableDefinition::new(name);
        if let Some(schema) = object.get("schema").and_then(Value::as_str) {
            table.schema = Some(schema.to_string());
        }
        table.engine = string_field(object, "engine");
        table.charset = string_field(object, "charset");
        table.collation = string_field(object, "collation");
        table.comment = string_field(object, "comment");

        for (i, item) in array_field(object, "columns", base)?.iter().enumerate() {
            let pointer = format!("{}/columns/{}", base, i);
            let column = ColumnDefinition::from_value(item, &pointer)?;
            table
                .try_add_column(column)
                .map_err(|m| DeclarationError::new(&pointer, m))?;
        }
        if table.columns.is_empty() {
            return Err(DeclarationError::new(
                format!("{}/columns", base),
                "table must define at least one column",
            ));
        }

        for (i, item) in array_field(object, "indexes", base)?.iter().enumerate() {
            let pointer = format!("{}/indexes/{}", base, i);
            let index = IndexDefinition::from_value(item, &pointer)?;
            table
                .try_add_index(index)
                .map_err(|m| DeclarationError::new(&pointer, m))?;
        }

        for (i, item) in array_field(object, "foreign_keys", base)?.iter().enumerate() {
            let pointer = format!("{}/foreign_keys/{}", base, i);
            let foreign_key = ForeignKeyDefinition::from_value(item, &pointer)?;
            table
                .try_add_foreign_key(foreign_key)
                .map_err(|m| DeclarationError::new(&pointer, m))?;
        }

        for (i, item) in array_field(object, "triggers", base)?.iter().enumerate() {
            let pointer = format!("{}/triggers/{}", base, i);
            let trigger = TriggerDefinition::from_value(item, &pointer)?;
            table
                .try_add_trigger(trigger)
                .map_err(|m| DeclarationError::new(&pointer, m))?;
        }

        Ok(table)
    }

    /// Serializes back to the declarative format accepted by
    /// [`TableDefinition::from_value`].
    pub fn to_declaration(&self) -> Value {
        let mut object = Map::new();
        object.insert("name".into(), Value::String(self.name.clone()));
        let options = [
            ("schema", &self.schema),
            ("engine", &self.engine),
            ("charset", &self.charset),
            ("collation", &self.collation),
            ("comment", &self.comment),
        ];
        for (key, value) in options {
            if let Some(v) = value {
                object.insert(key.into(), Value::String(v.clone()));
            }
        }
        object.insert(
            "columns".into(),
            Value::Array(self.columns.iter().map(ColumnDefinition::to_value).collect()),
        );
        object.insert(
            "indexes".into(),
            Value::Array(self.indexes.iter().map(IndexDefinition::to_value).collect()),
        );
        if !self.foreign_keys.is_empty() {
            object.insert(
                "foreign_keys".into(),
                Value::Array(
                    self.foreign_keys
                        .iter()
                        .map(ForeignKeyDefinition::to_value)
                        .collect(),
                ),
            );
        }
        object.insert(
            "triggers".into(),
            Value::Array(self.triggers.iter().map(TriggerDefinition::to_value).collect()),
        );
        Value::Object(object)
    }

    // DDL

    pub fn create_sql(&self, dialect: Dialect) -> Result<Vec<String>> {
        self.verify()?;
        Ok(dialect.create_sql(self))
    }

    /// Changes turning `self` into `target`. Empty when nothing differs.
    pub fn diff(&self, target: &TableDefinition) -> Vec<SchemaChange> {
        diff::diff(self, target)
    }

    /// Statements turning `self` into `target`. Empty when nothing differs.
    ///
    /// Both sides are normalized for the dialect first, so attributes the
    /// dialect cannot store never produce a change.
    pub fn alter_sql(&self, target: &TableDefinition, dialect: Dialect) -> Result<Vec<String>> {
        target.verify()?;
        let current = dialect.normalize(self);
        let target = dialect.normalize(target);
        let changes = current.diff(&target);
        if changes.is_empty() {
            return Ok(Vec::new());
        }
        Ok(dialect.alter_sql(&current, &target, &changes))
    }
}

fn pointer_or_root(pointer: &str) -> String {
    if pointer.is_empty() {
        "/".to_string()
    } else {
        pointer.to_string()
    }
}

fn string_field(object: &Map<String, Value>, key: &str) -> Option<String> {
    object.get(key).and_then(Value::as_str).map(str::to_string)
}

fn array_field<'a>(
    object: &'a Map<String, Value>,
    key: &str,
    base: &str,
) -> std::result::Result<&'a [Value], DeclarationError> {
    match object.get(key) {
        None | Some(Value::Null) => Ok(&[]),
        Some(Value::Array(items)) => Ok(items.as_slice()),
        Some(_) => Err(DeclarationError::new(
            format!("{}/{}", base, key),
            format!("'{}' must be an array", key),
        )),
    }
}
