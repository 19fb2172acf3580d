//! Builders for configuration documents used across integration tests.

#![allow(dead_code)]

use serde_json::{json, Map, Value};

/// Builder for a configuration document. Starts with a `warehouse`
/// endpoint (schema `modw`) and the `utility` journal endpoint, both
/// sqlite files under `data/`.
pub struct ConfigBuilder {
    document: Map<String, Value>,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        let mut document = Map::new();
        document.insert(
            "endpoints".to_string(),
            json!({
                "warehouse": {"type": "sqlite", "path": "data/warehouse.db", "schema": "modw"},
                "utility": {"type": "sqlite", "path": "data/utility.db"}
            }),
        );
        Self { document }
    }

    pub fn module(mut self, module: &str) -> Self {
        self.document.insert("module".to_string(), json!(module));
        self
    }

    pub fn endpoint(mut self, name: &str, endpoint: Value) -> Self {
        self.document["endpoints"][name] = endpoint;
        self
    }

    /// Adds a file endpoint; the format is inferred from the extension.
    pub fn file_endpoint(self, name: &str, path: &str) -> Self {
        self.endpoint(name, json!({"type": "file", "path": path}))
    }

    pub fn variable(mut self, name: &str, value: Value) -> Self {
        self.document
            .entry("variables")
            .or_insert_with(|| json!({}))[name] = value;
        self
    }

    pub fn path(mut self, name: &str, value: &str) -> Self {
        self.document
            .entry("paths")
            .or_insert_with(|| json!({}))[name] = json!(value);
        self
    }

    /// Sets `defaults.<section>.<key>`.
    pub fn default_value(mut self, section: &str, key: &str, value: Value) -> Self {
        let defaults = self
            .document
            .entry("defaults")
            .or_insert_with(|| json!({}));
        if defaults.get(section).is_none() {
            defaults[section] = json!({});
        }
        defaults[section][key] = value;
        self
    }

    pub fn start_date(self, date: &str) -> Self {
        self.default_value("global", "start_date", json!(date))
    }

    pub fn pipeline(mut self, name: &str, actions: Vec<Value>) -> Self {
        self.document.insert(name.to_string(), Value::Array(actions));
        self
    }

    pub fn build(self) -> Value {
        Value::Object(self.document)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for one action entry.
pub struct ActionBuilder {
    action: Map<String, Value>,
}

impl ActionBuilder {
    pub fn new(name: &str, kind: &str) -> Self {
        let mut action = Map::new();
        action.insert("name".to_string(), json!(name));
        action.insert("type".to_string(), json!(kind));
        action.insert("options".to_string(), json!({}));
        Self { action }
    }

    pub fn ingest(name: &str) -> Self {
        Self::new(name, "ingest").destination("warehouse")
    }

    pub fn aggregate(name: &str) -> Self {
        Self::new(name, "aggregate")
            .source("warehouse")
            .destination("warehouse")
    }

    pub fn maintenance(name: &str, statements: &[&str]) -> Self {
        Self::new(name, "maintenance").option("statements", json!(statements))
    }

    /// Maintenance action appending its own name to `utility.run_log`.
    pub fn logging(name: &str) -> Self {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS utility.run_log (seq INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT); \
             INSERT INTO utility.run_log (name) VALUES ('{}');",
            name
        );
        Self::maintenance(name, &[sql.as_str()])
    }

    pub fn source(self, endpoint: &str) -> Self {
        self.endpoint("source", endpoint)
    }

    pub fn destination(self, endpoint: &str) -> Self {
        self.endpoint("destination", endpoint)
    }

    fn endpoint(mut self, role: &str, endpoint: &str) -> Self {
        self.action
            .entry("endpoints")
            .or_insert_with(|| json!({}))[role] = json!(endpoint);
        self
    }

    pub fn option(mut self, key: &str, value: Value) -> Self {
        self.action["options"][key] = value;
        self
    }

    pub fn depends_on(mut self, names: &[&str]) -> Self {
        self.action.insert("depends_on".to_string(), json!(names));
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.action.insert("enabled".to_string(), json!(enabled));
        self
    }

    pub fn stop_on_error(mut self, stop: bool) -> Self {
        self.action.insert("stop_on_error".to_string(), json!(stop));
        self
    }

    pub fn build(self) -> Value {
        Value::Object(self.action)
    }
}

/// Definition of the `jobfact` fact table.
pub fn jobfact_table() -> Value {
    json!({
        "name": "jobfact",
        "columns": [
            {"name": "job_id", "type": "int", "nullable": false},
            {"name": "resource", "type": "varchar(40)", "nullable": false},
            {"name": "cpu_hours", "type": "double"},
            {"name": "end_time", "type": "datetime", "nullable": false}
        ],
        "indexes": [{"name": "PRIMARY", "columns": ["job_id"]}]
    })
}

pub fn job(id: i64, resource: &str, cpu_hours: f64, end_time: &str) -> Value {
    json!({
        "job_id": id,
        "resource": resource,
        "cpu_hours": cpu_hours,
        "end_time": end_time
    })
}

/// One job per day from 2020-01-01 through 2020-03-31, alternating
/// between two resources.
pub fn daily_jobs() -> Vec<Value> {
    let start = chrono::NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
    (0..91)
        .map(|day| {
            let date = start + chrono::Duration::days(day);
            let resource = if day % 2 == 0 { "alpha" } else { "beta" };
            job(
                day + 1,
                resource,
                1.5,
                &format!("{} 12:00:00", date.format("%Y-%m-%d")),
            )
        })
        .collect()
}

/// Ingest of `raw` records into `modw.jobfact`, replacing windows by
/// `end_time`.
pub fn ingest_jobs(name: &str) -> ActionBuilder {
    ActionBuilder::ingest(name)
        .source("raw")
        .option("definition_file", json!("tables/jobfact.json"))
        .option("timestamp_column", json!("end_time"))
}
