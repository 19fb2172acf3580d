use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Subcommand;
use serde_json::json;

use etl_overseer::dbmodel::{discover_table, unqualified};
use etl_overseer::{Database, Dialect, TableDefinition};

use crate::output::print_json;

#[derive(Subcommand)]
pub enum TableSubcommand {
    /// Print the CREATE statements of a table definition
    Create {
        /// Table definition file (JSON)
        #[arg(short, long)]
        definition: PathBuf,

        /// SQL dialect of the output
        #[arg(long, default_value = "sqlite")]
        dialect: Dialect,
    },
    /// Print the statements that bring a live sqlite table in line with a definition
    Diff {
        /// Table definition file (JSON)
        #[arg(short, long)]
        definition: PathBuf,

        /// SQLite database file holding the live table
        #[arg(short, long)]
        target: PathBuf,

        /// SQL dialect of the output
        #[arg(long, default_value = "sqlite")]
        dialect: Dialect,
    },
}

pub fn run(subcmd: TableSubcommand, json: bool) -> anyhow::Result<()> {
    let (table, statements) = match subcmd {
        TableSubcommand::Create {
            definition,
            dialect,
        } => {
            let table = load_definition(&definition)?;
            let sql = table.create_sql(dialect)?;
            (table, sql)
        }
        TableSubcommand::Diff {
            definition,
            target,
            dialect,
        } => {
            // The target file is opened on its own, so the live table is unqualified.
            let table = load_definition(&definition)?.with_schema(None);
            let db = Database::open(&target)
                .with_context(|| format!("Failed to open {}", target.display()))?;
            let name = unqualified(&table.name).to_string();
            let live = db.with_session(|conn| discover_table(conn, None, &name))?;
            let sql = match live {
                Some(live) => live.alter_sql(&table, dialect)?,
                None => table.create_sql(dialect)?,
            };
            (table, sql)
        }
    };

    if json {
        return print_json(&json!({ "table": table.name, "statements": statements }));
    }
    if statements.is_empty() {
        println!("-- {} is up to date", table.name);
    }
    for stmt in statements {
        println!("{};", stmt.trim_end_matches(';'));
    }
    Ok(())
}

fn load_definition(path: &Path) -> anyhow::Result<TableDefinition> {
    TableDefinition::from_file(path).with_context(|| format!("Failed to load {}", path.display()))
}
