use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::DeclarationError;

pub const PRIMARY_KEY_NAME: &str = "PRIMARY";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDefinition {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

impl IndexDefinition {
    /// Index with the default name `index_<col1>_<col2>...`.
    pub fn new(columns: &[&str], unique: bool) -> Self {
        let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        Self {
            name: default_index_name(&columns),
            columns,
            unique,
        }
    }

    pub fn primary(columns: &[&str]) -> Self {
        Self {
            name: PRIMARY_KEY_NAME.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique: true,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self.unique = self.unique || self.is_primary();
        self
    }

    pub fn is_primary(&self) -> bool {
        self.name.eq_ignore_ascii_case(PRIMARY_KEY_NAME)
    }

    /// Identity used when diffing: column list plus uniqueness.
    pub fn signature(&self) -> (bool, &[String]) {
        (self.unique, &self.columns)
    }

    pub(crate) fn from_value(value: &Value, pointer: &str) -> Result<Self, DeclarationError> {
        let spec = IndexSpec::deserialize(value)
            .map_err(|e| DeclarationError::new(pointer, e.to_string()))?;
        if spec.columns.is_empty() {
            return Err(DeclarationError::new(
                format!("{}/columns", pointer),
                "index must list at least one column",
            ));
        }
        let name = spec
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| default_index_name(&spec.columns));
        let primary = name.eq_ignore_ascii_case(PRIMARY_KEY_NAME);
        Ok(Self {
            name: if primary {
                PRIMARY_KEY_NAME.to_string()
            } else {
                name
            },
            columns: spec.columns,
            unique: spec.unique || primary,
        })
    }

    pub(crate) fn to_value(&self) -> Value {
        let spec = IndexSpec {
            name: Some(self.name.clone()),
            columns: self.columns.clone(),
            unique: self.unique,
        };
        serde_json::to_value(spec).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexSpec {
    #[serde(default)]
    name: Option<String>,
    columns: Vec<String>,
    #[serde(default, alias = "is_unique")]
    unique: bool,
}

pub fn default_index_name(columns: &[String]) -> String {
    format!("index_{}", columns.join("_"))
}
