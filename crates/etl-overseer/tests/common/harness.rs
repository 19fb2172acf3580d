//! Test harness for isolated pipeline runs.
//!
//! Every harness owns a temp directory holding the configuration file,
//! input files and the sqlite files of the endpoints.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use rusqlite::Connection;
use serde_json::Value;
use tempfile::TempDir;

use etl_overseer::config::{load_config, ConfigLoader, OptionOverride};
use etl_overseer::{
    open_hub, open_journal, EtlConfig, Journal, Overseer, Result, RunOptions, RunSummary,
};

pub const CONFIG_FILE: &str = "etl.json";

pub struct TestHarness {
    temp_dir: TempDir,
    /// Directory of the configuration file; relative paths resolve here.
    pub root: PathBuf,
    /// Directory of the sqlite endpoint files.
    pub data_dir: PathBuf,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path().to_path_buf();
        let data_dir = root.join("data");
        std::fs::create_dir_all(&data_dir).expect("Failed to create data directory");
        Self {
            temp_dir,
            root,
            data_dir,
        }
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    pub fn write_file(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.path(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directory");
        }
        std::fs::write(&path, content).expect("Failed to write file");
        path
    }

    pub fn write_json(&self, relative: &str, value: &Value) -> PathBuf {
        self.write_file(relative, &serde_json::to_string_pretty(value).unwrap())
    }

    /// Writes newline-delimited records.
    pub fn write_jsonl(&self, relative: &str, records: &[Value]) -> PathBuf {
        let lines: Vec<String> = records.iter().map(Value::to_string).collect();
        self.write_file(relative, &(lines.join("\n") + "\n"))
    }

    pub fn write_config(&self, document: &Value) -> PathBuf {
        self.write_json(CONFIG_FILE, document)
    }

    pub fn config_path(&self) -> PathBuf {
        self.path(CONFIG_FILE)
    }

    pub fn load(&self) -> Result<EtlConfig> {
        load_config(self.config_path())
    }

    pub fn load_with_overrides(&self, overrides: &[&str]) -> Result<EtlConfig> {
        let overrides: Vec<OptionOverride> = overrides
            .iter()
            .map(|o| o.parse().expect("invalid override"))
            .collect();
        ConfigLoader::new(self.config_path())
            .with_overrides(overrides)
            .load()
    }

    pub fn overseer(&self) -> Overseer {
        Overseer::new(self.load().expect("config should load"))
    }

    pub fn run(&self, options: &RunOptions) -> Result<RunSummary> {
        self.overseer().run(options)
    }

    /// Opens the configured journal on a fresh hub.
    pub fn journal(&self) -> Journal {
        let config = self.load().expect("config should load");
        let db = open_hub(&config).expect("hub should open");
        open_journal(&config, &db).expect("journal should open")
    }

    /// Connection to one endpoint file under `data/`.
    pub fn connect(&self, file: &str) -> Connection {
        Connection::open(self.data_dir.join(file)).expect("Failed to open sqlite file")
    }

    pub fn query_i64(&self, file: &str, sql: &str) -> i64 {
        self.connect(file)
            .query_row(sql, [], |row| row.get(0))
            .expect("query failed")
    }

    pub fn table_exists(&self, file: &str, table: &str) -> bool {
        let path = self.data_dir.join(file);
        if !path.exists() {
            return false;
        }
        self.query_i64(
            file,
            &format!(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = '{}'",
                table
            ),
        ) > 0
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
