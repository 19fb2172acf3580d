//! Resolves a run request into ordered per-pipeline action lists.

use std::collections::{BTreeSet, HashMap};

use crate::config::{ActionSpec, EtlConfig, PipelineConfig};
use crate::error::{EtlError, Result};

use super::options::RunOptions;

/// Actions of one pipeline in execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelinePlan {
    pub pipeline: String,
    /// Qualified action names.
    pub actions: Vec<String>,
}

impl PipelinePlan {
    pub fn specs<'c>(&self, config: &'c EtlConfig) -> Vec<&'c ActionSpec> {
        self.actions
            .iter()
            .filter_map(|name| config.action(name))
            .collect()
    }
}

/// Builds the plan of every requested pipeline. With no pipelines and no
/// actions requested, every pipeline runs. Cycles are reported before
/// anything executes.
pub fn plan_run(config: &EtlConfig, options: &RunOptions) -> Result<Vec<PipelinePlan>> {
    let mut requested: Vec<(&PipelineConfig, Option<BTreeSet<&str>>)> = Vec::new();

    if options.pipelines.is_empty() && options.actions.is_empty() {
        requested.extend(config.pipelines.iter().map(|p| (p, None)));
    }

    for name in &options.pipelines {
        let pipeline = config
            .pipeline(name)
            .ok_or_else(|| EtlError::InvalidRequest(format!("unknown pipeline '{}'", name)))?;
        match requested.iter_mut().find(|(p, _)| p.name == pipeline.name) {
            Some(entry) => entry.1 = None,
            None => requested.push((pipeline, None)),
        }
    }

    for qualified in &options.actions {
        let spec = config.action(qualified).ok_or_else(|| {
            EtlError::InvalidRequest(format!(
                "unknown action '{}' (expected section.action)",
                qualified
            ))
        })?;
        let pipeline = config
            .pipeline(&spec.section)
            .ok_or_else(|| EtlError::InvalidRequest(format!("unknown pipeline '{}'", spec.section)))?;
        match requested.iter_mut().find(|(p, _)| p.name == pipeline.name) {
            Some((_, Some(subset))) => {
                subset.insert(spec.name.as_str());
            }
            Some((_, None)) => {}
            None => requested.push((pipeline, Some(BTreeSet::from([spec.name.as_str()])))),
        }
    }

    requested
        .into_iter()
        .map(|(pipeline, subset)| {
            let specs: Vec<&ActionSpec> = pipeline
                .actions
                .iter()
                .filter(|a| subset.as_ref().map_or(true, |s| s.contains(a.name.as_str())))
                .collect();
            Ok(PipelinePlan {
                pipeline: pipeline.name.clone(),
                actions: order_actions(&specs)?
                    .into_iter()
                    .map(|i| specs[i].qualified_name())
                    .collect(),
            })
        })
        .collect()
}

/// Kahn's algorithm over `depends_on` edges between the given actions,
/// using declaration order as the tie-break. Dependencies on actions
/// outside the set are ignored. Returns indices into `specs`.
pub fn order_actions(specs: &[&ActionSpec]) -> Result<Vec<usize>> {
    let index: HashMap<String, usize> = specs
        .iter()
        .enumerate()
        .map(|(i, s)| (s.qualified_name(), i))
        .collect();

    let predecessors: Vec<Vec<usize>> = specs
        .iter()
        .map(|s| {
            let mut preds: Vec<usize> = s
                .depends_on
                .iter()
                .filter_map(|d| index.get(d).copied())
                .collect();
            preds.sort_unstable();
            preds.dedup();
            preds
        })
        .collect();

    let mut in_degree: Vec<usize> = predecessors.iter().map(Vec::len).collect();
    let mut successors = vec![Vec::new(); specs.len()];
    for (node, preds) in predecessors.iter().enumerate() {
        for &p in preds {
            successors[p].push(node);
        }
    }

    // Ready set kept ordered so the lowest declaration index goes first.
    let mut ready: BTreeSet<usize> = (0..specs.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(specs.len());
    while let Some(node) = ready.pop_first() {
        order.push(node);
        for &next in &successors[node] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.insert(next);
            }
        }
    }

    if order.len() < specs.len() {
        let cycle = find_cycle(&predecessors, &in_degree);
        return Err(EtlError::CyclicDependency {
            actions: cycle.into_iter().map(|i| specs[i].qualified_name()).collect(),
        });
    }
    Ok(order)
}

/// Walks unresolved predecessors from the first unresolved node until a
/// node repeats. Every unresolved node has at least one unresolved
/// predecessor, so the walk always closes a cycle.
fn find_cycle(predecessors: &[Vec<usize>], in_degree: &[usize]) -> Vec<usize> {
    let Some(start) = in_degree.iter().position(|&d| d > 0) else {
        return Vec::new();
    };
    let mut path = vec![start];
    let mut node = start;
    loop {
        let Some(&pred) = predecessors[node].iter().find(|&&p| in_degree[p] > 0) else {
            return path;
        };
        if let Some(pos) = path.iter().position(|&n| n == pred) {
            // Path is in walk order (successor first); report in execution order.
            let mut cycle: Vec<usize> = path[pos..].to_vec();
            cycle.reverse();
            cycle.push(cycle[0]);
            return cycle;
        }
        path.push(pred);
        node = pred;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config_from_str;
    use serde_json::json;

    fn manage(name: &str, depends_on: &[&str]) -> serde_json::Value {
        json!({
            "name": name,
            "type": "maintenance",
            "depends_on": depends_on,
            "options": {"statements": ["SELECT 1"]}
        })
    }

    fn config(document: serde_json::Value) -> EtlConfig {
        load_config_from_str(&document.to_string(), std::path::Path::new("/tmp")).unwrap()
    }

    #[test]
    fn test_dependencies_reverse_declaration_order() {
        let cfg = config(json!({
            "jobs": [manage("a", &["b"]), manage("b", &["c"]), manage("c", &[])]
        }));
        let plans = plan_run(&cfg, &RunOptions::default()).unwrap();
        assert_eq!(plans[0].actions, vec!["jobs.c", "jobs.b", "jobs.a"]);
    }

    #[test]
    fn test_declaration_order_breaks_ties() {
        let cfg = config(json!({
            "jobs": [manage("x", &[]), manage("y", &["z"]), manage("z", &[]), manage("w", &[])]
        }));
        let plans = plan_run(&cfg, &RunOptions::default()).unwrap();
        assert_eq!(plans[0].actions, vec!["jobs.x", "jobs.z", "jobs.y", "jobs.w"]);
    }

    #[test]
    fn test_cycle_names_members() {
        let cfg = config(json!({
            "jobs": [manage("a", &["b"]), manage("b", &["a"]), manage("c", &["a"])]
        }));
        match plan_run(&cfg, &RunOptions::default()).unwrap_err() {
            EtlError::CyclicDependency { actions } => {
                assert_eq!(actions.len(), 3);
                assert_eq!(actions.first(), actions.last());
                assert!(actions.contains(&"jobs.a".to_string()));
                assert!(actions.contains(&"jobs.b".to_string()));
                assert!(!actions.contains(&"jobs.c".to_string()));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_standalone_actions_grouped_by_section() {
        let cfg = config(json!({
            "jobs": [manage("a", &[]), manage("b", &["a"]), manage("c", &[])],
            "aggregates": [manage("d", &[])]
        }));
        let options = RunOptions {
            actions: vec!["jobs.b".into(), "aggregates.d".into(), "jobs.c".into()],
            ..RunOptions::default()
        };
        let plans = plan_run(&cfg, &options).unwrap();
        assert_eq!(plans.len(), 2);
        assert_eq!(plans[0].actions, vec!["jobs.b", "jobs.c"]);
        assert_eq!(plans[1].actions, vec!["aggregates.d"]);
    }

    #[test]
    fn test_whole_pipeline_request_wins_over_subset() {
        let cfg = config(json!({
            "jobs": [manage("a", &[]), manage("b", &[])]
        }));
        let options = RunOptions {
            pipelines: vec!["jobs".into()],
            actions: vec!["jobs.b".into()],
            ..RunOptions::default()
        };
        let plans = plan_run(&cfg, &options).unwrap();
        assert_eq!(plans[0].actions, vec!["jobs.a", "jobs.b"]);
    }

    #[test]
    fn test_unknown_request_rejected() {
        let cfg = config(json!({"jobs": [manage("a", &[])]}));
        let options = RunOptions {
            pipelines: vec!["nope".into()],
            ..RunOptions::default()
        };
        assert!(matches!(
            plan_run(&cfg, &options),
            Err(EtlError::InvalidRequest(_))
        ));
        let options = RunOptions {
            actions: vec!["jobs.zzz".into()],
            ..RunOptions::default()
        };
        assert!(matches!(
            plan_run(&cfg, &options),
            Err(EtlError::InvalidRequest(_))
        ));
    }
}
