use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::action::ActionOptions;

use super::variables::VariableStore;

/// Fully loaded configuration: overrides merged, variables substituted,
/// options typed. Immutable once built.
#[derive(Debug, Clone)]
pub struct EtlConfig {
    /// Path of the base file, or a label for in-memory documents.
    pub source_name: String,
    pub module: String,
    pub base_dir: PathBuf,
    pub paths: BTreeMap<String, PathBuf>,
    /// Built-ins, paths and top-level variables.
    pub variables: VariableStore,
    pub endpoints: BTreeMap<String, EndpointConfig>,
    pub journal_endpoint: String,
    pub chunk_size_days: Option<u32>,
    pub start_date: Option<NaiveDateTime>,
    /// Pipelines in declaration order.
    pub pipelines: Vec<PipelineConfig>,
}

impl EtlConfig {
    pub fn pipeline(&self, name: &str) -> Option<&PipelineConfig> {
        self.pipelines.iter().find(|p| p.name == name)
    }

    /// Looks up an action by `section.action`.
    pub fn action(&self, qualified: &str) -> Option<&ActionSpec> {
        let (section, name) = qualified.split_once('.')?;
        self.pipeline(section)?
            .actions
            .iter()
            .find(|a| a.name == name)
    }

    pub fn actions(&self) -> impl Iterator<Item = &ActionSpec> {
        self.pipelines.iter().flat_map(|p| p.actions.iter())
    }

    pub fn endpoint(&self, name: &str) -> Option<&EndpointConfig> {
        self.endpoints.get(name)
    }

    /// `(name, path, schema)` of every sqlite endpoint.
    pub fn sqlite_endpoints(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.endpoints.iter().filter_map(|(name, ep)| match ep {
            EndpointConfig::Sqlite { path, schema } => {
                Some((name.as_str(), path.as_str(), schema.as_str()))
            }
            EndpointConfig::File { .. } => None,
        })
    }

    /// Schema holding the journal, `None` when the journal endpoint is not
    /// configured and the hub's main database is used instead.
    pub fn journal_schema(&self) -> Option<&str> {
        self.endpoints
            .get(&self.journal_endpoint)
            .and_then(EndpointConfig::schema)
    }
}

/// One configuration section: an ordered list of actions.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub name: String,
    pub chunk_size_days: Option<u32>,
    pub start_date: Option<NaiveDateTime>,
    pub actions: Vec<ActionSpec>,
}

#[derive(Debug, Clone)]
pub struct ActionSpec {
    pub section: String,
    pub name: String,
    pub kind: ActionKind,
    pub description: Option<String>,
    pub enabled: bool,
    pub stop_on_error: bool,
    pub source: Option<String>,
    pub destination: Option<String>,
    /// Qualified names of the actions that must run first.
    pub depends_on: Vec<String>,
    pub journal_key: Option<String>,
    pub options: ActionOptions,
    /// Every variable visible to the action, layers flattened.
    pub variables: VariableStore,
    pub base_dir: PathBuf,
}

impl ActionSpec {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.section, self.name)
    }

    /// Resolves a path from the options against the configuration directory.
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        resolve_path(&self.base_dir, path)
    }
}

pub(crate) fn resolve_path(base_dir: &Path, path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base_dir.join(p)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Ingest,
    Aggregate,
    ManageTable,
    Maintenance,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Ingest => "ingest",
            ActionKind::Aggregate => "aggregate",
            ActionKind::ManageTable => "manage_table",
            ActionKind::Maintenance => "maintenance",
        }
    }
}

impl FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ingest" | "ingestor" => Ok(ActionKind::Ingest),
            "aggregate" | "aggregator" => Ok(ActionKind::Aggregate),
            "manage_table" | "table_manager" => Ok(ActionKind::ManageTable),
            "maintenance" => Ok(ActionKind::Maintenance),
            other => Err(format!(
                "unknown action type '{}' (expected ingest, aggregate, manage_table or maintenance)",
                other
            )),
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EndpointConfig {
    /// Database file attached to the run's connection under `schema`.
    Sqlite { path: String, schema: String },
    File { path: PathBuf, format: FileFormat },
}

impl EndpointConfig {
    pub fn schema(&self) -> Option<&str> {
        match self {
            EndpointConfig::Sqlite { schema, .. } => Some(schema),
            EndpointConfig::File { .. } => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            EndpointConfig::Sqlite { .. } => "sqlite",
            EndpointConfig::File { .. } => "file",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    Json,
    Jsonl,
    Csv,
}

impl FileFormat {
    pub fn from_extension(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "json" => Some(FileFormat::Json),
            "jsonl" | "ndjson" => Some(FileFormat::Jsonl),
            "csv" => Some(FileFormat::Csv),
            _ => None,
        }
    }
}

/// A `key=value` replacement for an action option.
#[derive(Debug, Clone, PartialEq)]
pub struct OptionOverride {
    pub key: String,
    pub value: Value,
}

impl FromStr for OptionOverride {
    type Err = String;

    /// The value is read as JSON when it parses, as a plain string otherwise.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (key, raw) = s
            .split_once('=')
            .ok_or_else(|| format!("option override '{}' is not of the form key=value", s))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(format!("option override '{}' has an empty key", s));
        }
        let value =
            serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        Ok(Self {
            key: key.to_string(),
            value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_kind_parsing() {
        assert_eq!("ingest".parse::<ActionKind>().unwrap(), ActionKind::Ingest);
        assert_eq!("aggregator".parse::<ActionKind>().unwrap(), ActionKind::Aggregate);
        assert_eq!(
            "manage_table".parse::<ActionKind>().unwrap(),
            ActionKind::ManageTable
        );
        assert!("rest".parse::<ActionKind>().is_err());
        assert_eq!(ActionKind::ManageTable.to_string(), "manage_table");
    }

    #[test]
    fn test_option_override_parsing() {
        let o: OptionOverride = "truncate_destination=true".parse().unwrap();
        assert_eq!(o.key, "truncate_destination");
        assert_eq!(o.value, json!(true));

        let o: OptionOverride = "source_query=SELECT * FROM t".parse().unwrap();
        assert_eq!(o.value, json!("SELECT * FROM t"));

        let o: OptionOverride = "units=[\"day\"]".parse().unwrap();
        assert_eq!(o.value, json!(["day"]));

        assert!("novalue".parse::<OptionOverride>().is_err());
        assert!("=1".parse::<OptionOverride>().is_err());
    }

    #[test]
    fn test_file_format_from_extension() {
        assert_eq!(
            FileFormat::from_extension(Path::new("jobs.CSV")),
            Some(FileFormat::Csv)
        );
        assert_eq!(
            FileFormat::from_extension(Path::new("jobs.ndjson")),
            Some(FileFormat::Jsonl)
        );
        assert_eq!(FileFormat::from_extension(Path::new("jobs.txt")), None);
    }
}
