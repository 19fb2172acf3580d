use std::path::Path;

use anyhow::Context;
use serde::Serialize;

use etl_overseer::{load_config, Overseer, RunOptions};

use crate::output::{print_json, print_table};

#[derive(Serialize)]
struct ActionRow {
    pipeline: String,
    action: String,
    #[serde(rename = "type")]
    kind: String,
    enabled: bool,
    depends_on: Vec<String>,
}

/// Lists every pipeline's actions in execution order.
pub fn run(config_path: &Path, json: bool) -> anyhow::Result<()> {
    let config = load_config(config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    let overseer = Overseer::new(config);
    let plans = overseer.plan(&RunOptions::new())?;

    let mut rows = Vec::new();
    for plan in &plans {
        for spec in plan.specs(overseer.config()) {
            rows.push(ActionRow {
                pipeline: plan.pipeline.clone(),
                action: spec.name.clone(),
                kind: spec.kind.to_string(),
                enabled: spec.enabled,
                depends_on: spec.depends_on.clone(),
            });
        }
    }

    if json {
        return print_json(&rows);
    }
    if rows.is_empty() {
        println!("No pipelines configured.");
        return Ok(());
    }
    print_table(
        &["PIPELINE", "ACTION", "TYPE", "ENABLED", "DEPENDS ON"],
        rows.into_iter()
            .map(|r| {
                vec![
                    r.pipeline,
                    r.action,
                    r.kind,
                    if r.enabled { "yes" } else { "no" }.to_string(),
                    r.depends_on.join(", "),
                ]
            })
            .collect(),
    );
    Ok(())
}
