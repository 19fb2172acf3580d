use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::sql_type::SqlType;
use super::DeclarationError;

static RE_NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^-?\d+(\.\d+)?$").unwrap());

const DEFAULT_KEYWORDS: &[&str] = &[
    "NULL",
    "CURRENT_TIMESTAMP",
    "CURRENT_TIMESTAMP()",
    "CURRENT_DATE",
    "CURRENT_TIME",
    "TRUE",
    "FALSE",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    pub name: String,
    pub sql_type: SqlType,
    pub nullable: bool,
    /// Default as SQL text: `0`, `'abc'`, `CURRENT_TIMESTAMP`, `NULL`.
    pub default: Option<String>,
    pub comment: Option<String>,
    pub auto_increment: bool,
    pub charset: Option<String>,
    pub collation: Option<String>,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            name: name.into(),
            sql_type,
            nullable: true,
            default: None,
            comment: None,
            auto_increment: false,
            charset: None,
            collation: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Sets the default as SQL text (string literals must carry their quotes).
    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self.nullable = false;
        self
    }

    pub(crate) fn from_value(value: &Value, pointer: &str) -> Result<Self, DeclarationError> {
        let spec = ColumnSpec::deserialize(value)
            .map_err(|e| DeclarationError::new(pointer, e.to_string()))?;
        spec.into_definition(pointer)
    }

    pub(crate) fn to_value(&self) -> Value {
        serde_json::to_value(ColumnSpec::from(self)).unwrap_or(Value::Null)
    }
}

/// Declarative form of a column as it appears in table definition files.
#[derive(Debug, Serialize, Deserialize)]
struct ColumnSpec {
    name: String,
    #[serde(rename = "type")]
    sql_type: String,
    #[serde(default = "default_nullable")]
    nullable: bool,
    #[serde(
        default,
        deserialize_with = "explicit_value",
        skip_serializing_if = "Option::is_none"
    )]
    default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    comment: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    auto_increment: bool,
    /// Legacy spelling: `"extra": "auto_increment"`.
    #[serde(default, skip_serializing)]
    extra: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    charset: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    collation: Option<String>,
}

fn default_nullable() -> bool {
    true
}

/// Keeps an explicit `null` distinct from an absent key.
fn explicit_value<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl ColumnSpec {
    fn into_definition(self, pointer: &str) -> Result<ColumnDefinition, DeclarationError> {
        if self.name.trim().is_empty() {
            return Err(DeclarationError::new(pointer, "column name is empty"));
        }
        let sql_type: SqlType = self
            .sql_type
            .parse()
            .map_err(|e: String| DeclarationError::new(format!("{}/type", pointer), e))?;

        let auto_increment = self.auto_increment
            || self
                .extra
                .as_deref()
                .is_some_and(|e| e.eq_ignore_ascii_case("auto_increment"));

        let default = match self.default {
            None => None,
            Some(value) => Some(default_to_sql(&value).ok_or_else(|| {
                DeclarationError::new(
                    format!("{}/default", pointer),
                    "default must be a string, number, boolean or null",
                )
            })?),
        };

        Ok(ColumnDefinition {
            name: self.name,
            sql_type,
            nullable: self.nullable && !auto_increment,
            default,
            comment: self.comment,
            auto_increment,
            charset: self.charset,
            collation: self.collation,
        })
    }
}

impl From<&ColumnDefinition> for ColumnSpec {
    fn from(column: &ColumnDefinition) -> Self {
        Self {
            name: column.name.clone(),
            sql_type: column.sql_type.to_string(),
            nullable: column.nullable,
            default: column.default.as_deref().map(default_to_value),
            comment: column.comment.clone(),
            auto_increment: column.auto_increment,
            extra: None,
            charset: column.charset.clone(),
            collation: column.collation.clone(),
        }
    }
}

/// Converts a declared default into SQL text. Strings that are neither
/// numbers, keywords, parenthesized expressions nor already quoted become
/// quoted literals.
pub fn default_to_sql(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some("NULL".to_string()),
        Value::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => {
            let trimmed = s.trim();
            let keyword = DEFAULT_KEYWORDS
                .iter()
                .any(|k| k.eq_ignore_ascii_case(trimmed));
            let quoted = trimmed.len() >= 2 && trimmed.starts_with('\'') && trimmed.ends_with('\'');
            let expression = trimmed.starts_with('(') && trimmed.ends_with(')');
            if keyword {
                Some(trimmed.to_ascii_uppercase())
            } else if quoted || expression || RE_NUMBER.is_match(trimmed) {
                Some(trimmed.to_string())
            } else {
                Some(format!("'{}'", s.replace('\'', "''")))
            }
        }
        Value::Array(_) | Value::Object(_) => None,
    }
}

fn default_to_value(sql: &str) -> Value {
    if sql.eq_ignore_ascii_case("NULL") {
        Value::Null
    } else {
        Value::String(sql.to_string())
    }
}
