use std::path::Path;

use anyhow::Context;
use clap::Subcommand;
use serde_json::json;

use etl_overseer::period::format_datetime;
use etl_overseer::{load_config, open_hub, open_journal};

use crate::output::{print_json, print_table};

#[derive(Subcommand)]
pub enum JournalSubcommand {
    /// Show the watermark of every journal key
    List,
    /// Show every recorded window of one key
    Show {
        /// Journal key, usually section.action
        key: String,
    },
    /// Forget every window of one key so the next run starts over
    Reset {
        /// Journal key, usually section.action
        key: String,
    },
}

pub fn run(config_path: &Path, subcmd: JournalSubcommand, json: bool) -> anyhow::Result<()> {
    let config = load_config(config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    let db = open_hub(&config)?;
    let journal = open_journal(&config, &db)?;

    match subcmd {
        JournalSubcommand::List => {
            let summaries = journal.list()?;
            if json {
                return print_json(&summaries);
            }
            if summaries.is_empty() {
                println!("Journal is empty.");
                return Ok(());
            }
            print_table(
                &["KEY", "ENTRIES", "FIRST START", "WATERMARK", "LAST RUN"],
                summaries
                    .iter()
                    .map(|s| {
                        vec![
                            s.key.clone(),
                            s.entries.to_string(),
                            format_datetime(&s.first_start),
                            format_datetime(&s.watermark),
                            format_datetime(&s.last_completed),
                        ]
                    })
                    .collect(),
            );
        }
        JournalSubcommand::Show { key } => {
            let entries = journal.entries(&key)?;
            if json {
                return print_json(&entries);
            }
            if entries.is_empty() {
                println!("No journal entries for '{}'.", key);
                return Ok(());
            }
            print_table(
                &["START", "END", "COMPLETED", "RUN"],
                entries
                    .iter()
                    .map(|e| {
                        vec![
                            format_datetime(&e.start),
                            format_datetime(&e.end),
                            format_datetime(&e.completed_at),
                            e.run_id.clone().unwrap_or_default(),
                        ]
                    })
                    .collect(),
            );
        }
        JournalSubcommand::Reset { key } => {
            let removed = journal.reset(&key)?;
            if json {
                return print_json(&json!({ "key": key, "removed": removed }));
            }
            println!("Removed {} journal entries for '{}'.", removed, key);
        }
    }
    Ok(())
}
