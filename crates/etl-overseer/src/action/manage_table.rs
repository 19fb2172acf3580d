use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{ActionSpec, EtlConfig};
use crate::dbmodel::{sync_table, TableDefinition, TableSync};
use crate::error::Result;

use super::context::{ActionContext, ExecutionWindow};
use super::{endpoint_schema, option_error, require_schema, Action, ActionStats};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManageTableOptions {
    /// Table definition files, relative to the configuration directory.
    pub definition_files: Vec<String>,
}

/// Brings destination tables in line with their definition files.
pub struct ManageTableAction {
    spec: ActionSpec,
    schema: Option<String>,
    tables: Vec<TableDefinition>,
}

impl ManageTableAction {
    pub fn new(spec: ActionSpec, options: ManageTableOptions, config: &EtlConfig) -> Result<Self> {
        if options.definition_files.is_empty() {
            return Err(option_error(
                &spec,
                config,
                "options.definition_files",
                "at least one definition file is required",
            ));
        }
        let schema = endpoint_schema(&spec, config, "destination")?;
        let tables = options
            .definition_files
            .iter()
            .map(|file| {
                let table = TableDefinition::from_file(&spec.resolve_path(file))?;
                Ok(match &schema {
                    Some(s) => table.with_schema(Some(s.as_str())),
                    None => table,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            spec,
            schema,
            tables,
        })
    }

    pub fn tables(&self) -> &[TableDefinition] {
        &self.tables
    }
}

impl Action for ManageTableAction {
    fn spec(&self) -> &ActionSpec {
        &self.spec
    }

    fn is_chunked(&self) -> bool {
        false
    }

    fn journal_key(&self) -> Option<String> {
        None
    }

    fn verify(&self, ctx: &ActionContext<'_>) -> Result<()> {
        for table in &self.tables {
            table.verify()?;
        }
        if let Some(schema) = &self.schema {
            require_schema(ctx, self.spec.destination.as_deref().unwrap_or_default(), schema)?;
        }
        Ok(())
    }

    fn initialize(&mut self, _ctx: &ActionContext<'_>) -> Result<()> {
        for table in &self.tables {
            table.verify()?;
        }
        Ok(())
    }

    fn execute(
        &mut self,
        ctx: &ActionContext<'_>,
        conn: &Connection,
        _window: &ExecutionWindow,
    ) -> Result<ActionStats> {
        let mut stats = ActionStats::default();
        for table in &self.tables {
            stats.examined += 1;
            match sync_table(conn, table, ctx.dry_run)? {
                TableSync::Unchanged => {}
                sync => {
                    stats.loaded += 1;
                    info!(
                        action = %self.name(),
                        table = %table.qualified_name(),
                        statements = sync.statements().len(),
                        "table synchronized"
                    );
                }
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config_from_str;
    use crate::db::Database;
    use crate::dbmodel::discover_table;
    use crate::period::{parse_datetime, DateRange};
    use serde_json::json;

    fn setup(files: &[(&str, serde_json::Value)]) -> (tempfile::TempDir, EtlConfig, Database) {
        let dir = tempfile::tempdir().unwrap();
        for (name, content) in files {
            std::fs::write(dir.path().join(name), content.to_string()).unwrap();
        }
        let names: Vec<&str> = files.iter().map(|(n, _)| *n).collect();
        let document = json!({
            "endpoints": {
                "warehouse": {"type": "sqlite", "path": ":memory:", "schema": "modw"}
            },
            "setup": [{
                "name": "tables",
                "type": "manage_table",
                "endpoints": {"destination": "warehouse"},
                "options": {"definition_files": names}
            }]
        });
        let config = load_config_from_str(&document.to_string(), dir.path()).unwrap();
        let db = Database::open_in_memory().unwrap();
        db.attach("modw", ":memory:").unwrap();
        (dir, config, db)
    }

    fn build(config: &EtlConfig) -> Result<ManageTableAction> {
        let spec = config.action("setup.tables").unwrap().clone();
        let options = match &spec.options {
            crate::action::ActionOptions::ManageTable(o) => o.clone(),
            other => panic!("unexpected options {other:?}"),
        };
        ManageTableAction::new(spec, options, config)
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

    fn resource_table() -> serde_json::Value {
        json!({
            "name": "resourcefact",
            "columns": [
                {"name": "id", "type": "int", "nullable": false},
                {"name": "code", "type": "varchar(32)", "nullable": false}
            ],
            "indexes": [{"name": "PRIMARY", "columns": ["id"]}]
        })
    }

    #[test]
    fn test_creates_then_leaves_unchanged() {
        let (_dir, config, db) = setup(&[("resourcefact.json", resource_table())]);
        let mut action = build(&config).unwrap();
        assert!(!action.is_chunked());
        assert_eq!(action.journal_key(), None);
        assert_eq!(action.tables()[0].qualified_name(), "modw.resourcefact");

        let ctx = ActionContext::new(&config, &db, "run-1", false);
        action.verify(&ctx).unwrap();
        action.initialize(&ctx).unwrap();
        let first = db
            .with_session(|conn| action.execute(&ctx, conn, &window()))
            .unwrap();
        assert_eq!((first.examined, first.loaded), (1, 1));

        let second = db
            .with_session(|conn| action.execute(&ctx, conn, &window()))
            .unwrap();
        assert_eq!((second.examined, second.loaded), (1, 0));

        let found = db
            .with_session(|conn| discover_table(conn, Some("modw"), "resourcefact"))
            .unwrap();
        assert!(found.is_some());
    }

    #[test]
    fn test_dry_run_changes_nothing() {
        let (_dir, config, db) = setup(&[("resourcefact.json", resource_table())]);
        let mut action = build(&config).unwrap();
        let ctx = ActionContext::new(&config, &db, "run-1", true);
        action.initialize(&ctx).unwrap();
        let stats = db
            .with_session(|conn| action.execute(&ctx, conn, &window()))
            .unwrap();
        assert_eq!(stats.loaded, 1);

        let found = db
            .with_session(|conn| discover_table(conn, Some("modw"), "resourcefact"))
            .unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn test_missing_definition_file() {
        let (dir, config, _db) = setup(&[("resourcefact.json", resource_table())]);
        std::fs::remove_file(dir.path().join("resourcefact.json")).unwrap();
        assert!(matches!(
            build(&config),
            Err(crate::EtlError::ReadFile { .. })
        ));
    }
}
