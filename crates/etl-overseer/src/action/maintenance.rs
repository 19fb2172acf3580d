use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{ActionSpec, EtlConfig};
use crate::error::{EtlError, Result};

use super::context::{ActionContext, ExecutionWindow};
use super::{option_error, Action, ActionStats};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MaintenanceOptions {
    /// SQL script, relative to the configuration directory. `${var}`
    /// references are substituted from the action's variables.
    #[serde(default)]
    pub sql_file: Option<String>,
    #[serde(default)]
    pub statements: Vec<String>,
}

/// Runs housekeeping SQL outside the data transaction.
pub struct MaintenanceAction {
    spec: ActionSpec,
    options: MaintenanceOptions,
    script: Vec<String>,
}

impl MaintenanceAction {
    pub fn new(spec: ActionSpec, options: MaintenanceOptions, config: &EtlConfig) -> Result<Self> {
        if options.sql_file.is_none() && options.statements.is_empty() {
            return Err(option_error(
                &spec,
                config,
                "options",
                "one of sql_file or statements is required",
            ));
        }
        Ok(Self {
            spec,
            options,
            script: Vec::new(),
        })
    }

    /// Statements to run, available after `initialize`.
    pub fn script(&self) -> &[String] {
        &self.script
    }
}

impl Action for MaintenanceAction {
    fn spec(&self) -> &ActionSpec {
        &self.spec
    }

    fn is_chunked(&self) -> bool {
        false
    }

    fn is_transactional(&self) -> bool {
        false
    }

    fn journal_key(&self) -> Option<String> {
        None
    }

    fn verify(&self, _ctx: &ActionContext<'_>) -> Result<()> {
        if let Some(file) = &self.options.sql_file {
            let path = self.spec.resolve_path(file);
            if !path.is_file() {
                return Err(EtlError::source_unavailable(
                    path.display().to_string(),
                    "SQL file does not exist",
                ));
            }
        }
        Ok(())
    }

    fn initialize(&mut self, _ctx: &ActionContext<'_>) -> Result<()> {
        let mut script = Vec::new();
        if let Some(file) = &self.options.sql_file {
            let path = self.spec.resolve_path(file);
            let content = std::fs::read_to_string(&path).map_err(|e| EtlError::ReadFile {
                path: path.clone(),
                source: e,
            })?;
            let source_name = path.display().to_string();
            script.push(self.spec.variables.substitute_at(&content, &source_name, "")?);
        }
        script.extend(self.options.statements.iter().cloned());
        self.script = script;
        Ok(())
    }

    fn execute(
        &mut self,
        ctx: &ActionContext<'_>,
        conn: &Connection,
        _window: &ExecutionWindow,
    ) -> Result<ActionStats> {
        let name = self.name();
        let mut stats = ActionStats::default();
        for sql in &self.script {
            stats.examined += 1;
            if ctx.dry_run {
                info!(action = %name, sql = %sql, "[dry-run] maintenance SQL not executed");
                continue;
            }
            conn.execute_batch(sql).map_err(|e| EtlError::ActionFailed {
                action: name.clone(),
                message: e.to_string(),
            })?;
            stats.loaded += 1;
        }
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

    fn setup(options: serde_json::Value) -> (tempfile::TempDir, EtlConfig) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("cleanup.sql"),
            "DELETE FROM ${table} WHERE id < 2;\nVACUUM;\n",
        )
        .unwrap();
        let document = json!({
            "variables": {"table": "staging"},
            "housekeeping": [{
                "name": "cleanup",
                "type": "maintenance",
                "options": options
            }]
        });
        let config = load_config_from_str(&document.to_string(), dir.path()).unwrap();
        (dir, config)
    }

    fn build(config: &EtlConfig) -> Result<MaintenanceAction> {
        let spec = config.action("housekeeping.cleanup").unwrap().clone();
        let options = match &spec.options {
            crate::action::ActionOptions::Maintenance(o) => o.clone(),
            other => panic!("unexpected options {other:?}"),
        };
        MaintenanceAction::new(spec, options, config)
    }

    fn window() -> ExecutionWindow {
        ExecutionWindow {
            range: DateRange::new(
                parse_datetime("2020-01-01").unwrap(),
                parse_datetime("2020-01-01 23:59:59").unwrap(),
            )
            .unwrap(),
            last_modified: None,
            first: true,
        }
    }

    #[test]
    fn test_script_substitutes_variables_and_runs() {
        let (_dir, config) = setup(json!({
            "sql_file": "cleanup.sql",
            "statements": ["INSERT INTO staging VALUES (9)"]
        }));
        let db = Database::open_in_memory().unwrap();
        db.with_session(|conn| {
            conn.execute_batch("CREATE TABLE staging (id INTEGER); INSERT INTO staging VALUES (1), (2);")?;
            Ok(())
        })
        .unwrap();

        let mut action = build(&config).unwrap();
        assert!(!action.is_transactional());
        let ctx = ActionContext::new(&config, &db, "run-1", false);
        action.verify(&ctx).unwrap();
        action.initialize(&ctx).unwrap();
        assert!(action.script()[0].starts_with("DELETE FROM staging"));

        let stats = db
            .with_session(|conn| action.execute(&ctx, conn, &window()))
            .unwrap();
        assert_eq!(stats.loaded, 2);

        let ids: Vec<i64> = db
            .with_session(|conn| {
                let mut stmt = conn.prepare("SELECT id FROM staging ORDER BY id")?;
                let ids = stmt
                    .query_map([], |r| r.get(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(ids)
            })
            .unwrap();
        assert_eq!(ids, vec![2, 9]);
    }

    #[test]
    fn test_requires_sql() {
        let (_dir, config) = setup(json!({}));
        assert!(matches!(build(&config), Err(EtlError::ConfigParse { .. })));
    }

    #[test]
    fn test_unresolved_variable_in_script() {
        let (dir, config) = setup(json!({"sql_file": "other.sql"}));
        std::fs::write(dir.path().join("other.sql"), "DELETE FROM ${missing};").unwrap();
        let db = Database::open_in_memory().unwrap();
        let mut action = build(&config).unwrap();
        let ctx = ActionContext::new(&config, &db, "run-1", false);
        let err = action.initialize(&ctx).unwrap_err();
        assert!(err.to_string().contains("missing"), "{err}");
    }

    #[test]
    fn test_dry_run_skips_execution() {
        let (_dir, config) = setup(json!({"statements": ["DROP TABLE nowhere"]}));
        let db = Database::open_in_memory().unwrap();
        let mut action = build(&config).unwrap();
        let ctx = ActionContext::new(&config, &db, "run-1", true);
        action.initialize(&ctx).unwrap();
        let stats = db
            .with_session(|conn| action.execute(&ctx, conn, &window()))
            .unwrap();
        assert_eq!((stats.examined, stats.loaded), (1, 0));
    }
}
