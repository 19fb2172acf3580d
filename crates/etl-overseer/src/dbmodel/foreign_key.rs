use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::DeclarationError;

/// `ON DELETE` / `ON UPDATE` behaviour of a foreign key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReferentialAction {
    #[default]
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl FromStr for ReferentialAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let words: Vec<String> = s.split_whitespace().map(str::to_ascii_uppercase).collect();
        match words.join(" ").as_str() {
            "NO ACTION" => Ok(ReferentialAction::NoAction),
            "RESTRICT" => Ok(ReferentialAction::Restrict),
            "CASCADE" => Ok(ReferentialAction::Cascade),
            "SET NULL" => Ok(ReferentialAction::SetNull),
            "SET DEFAULT" => Ok(ReferentialAction::SetDefault),
            other => Err(format!("invalid referential action '{}'", other)),
        }
    }
}

impl fmt::Display for ReferentialAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReferentialAction::NoAction => "NO ACTION",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::SetDefault => "SET DEFAULT",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyDefinition {
    pub name: String,
    pub columns: Vec<String>,
    /// Parent table, optionally `schema.table`.
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
    pub on_delete: ReferentialAction,
    pub on_update: ReferentialAction,
}

impl ForeignKeyDefinition {
    /// Foreign key with the default name `fk_<col1>_<col2>...` and no
    /// referential actions.
    pub fn new(columns: &[&str], referenced_table: &str, referenced_columns: &[&str]) -> Self {
        let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        Self {
            name: default_foreign_key_name(&columns),
            columns,
            referenced_table: referenced_table.to_string(),
            referenced_columns: referenced_columns.iter().map(|c| c.to_string()).collect(),
            on_delete: ReferentialAction::NoAction,
            on_update: ReferentialAction::NoAction,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn on_delete(mut self, action: ReferentialAction) -> Self {
        self.on_delete = action;
        self
    }

    pub fn on_update(mut self, action: ReferentialAction) -> Self {
        self.on_update = action;
        self
    }

    /// Identity used when diffing. SQLite does not keep constraint names,
    /// so the name is not part of it.
    pub fn signature(&self) -> (&[String], &str, &[String], ReferentialAction, ReferentialAction) {
        (
            &self.columns,
            &self.referenced_table,
            &self.referenced_columns,
            self.on_delete,
            self.on_update,
        )
    }

    pub(crate) fn from_value(value: &Value, pointer: &str) -> Result<Self, DeclarationError> {
        let spec = ForeignKeySpec::deserialize(value)
            .map_err(|e| DeclarationError::new(pointer, e.to_string()))?;
        if spec.columns.is_empty() {
            return Err(DeclarationError::new(
                format!("{}/columns", pointer),
                "foreign key must list at least one column",
            ));
        }
        if spec.referenced_table.trim().is_empty() {
            return Err(DeclarationError::new(
                format!("{}/referenced_table", pointer),
                "missing referenced table",
            ));
        }
        if spec.referenced_columns.len() != spec.columns.len() {
            return Err(DeclarationError::new(
                format!("{}/referenced_columns", pointer),
                format!(
                    "{} referenced column(s) for {} column(s)",
                    spec.referenced_columns.len(),
                    spec.columns.len()
                ),
            ));
        }
        let action = |raw: Option<String>, key: &str| match raw {
            None => Ok(ReferentialAction::NoAction),
            Some(s) => s
                .parse()
                .map_err(|e: String| DeclarationError::new(format!("{}/{}", pointer, key), e)),
        };
        Ok(Self {
            name: spec
                .name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| default_foreign_key_name(&spec.columns)),
            on_delete: action(spec.on_delete, "on_delete")?,
            on_update: action(spec.on_update, "on_update")?,
            columns: spec.columns,
            referenced_table: spec.referenced_table,
            referenced_columns: spec.referenced_columns,
        })
    }

    pub(crate) fn to_value(&self) -> Value {
        let action = |a: ReferentialAction| {
            (a != ReferentialAction::NoAction).then(|| a.to_string())
        };
        let spec = ForeignKeySpec {
            name: Some(self.name.clone()),
            columns: self.columns.clone(),
            referenced_table: self.referenced_table.clone(),
            referenced_columns: self.referenced_columns.clone(),
            on_delete: action(self.on_delete),
            on_update: action(self.on_update),
        };
        serde_json::to_value(spec).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ForeignKeySpec {
    #[serde(default)]
    name: Option<String>,
    columns: Vec<String>,
    #[serde(alias = "references")]
    referenced_table: String,
    referenced_columns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    on_delete: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    on_update: Option<String>,
}

pub fn default_foreign_key_name(columns: &[String]) -> String {
    format!("fk_{}", columns.join("_"))
}
