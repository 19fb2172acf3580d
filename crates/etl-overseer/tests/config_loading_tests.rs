//! Table-driven tests for configuration loading, overrides and variables.

mod common;

use serde_json::json;

use common::{ActionBuilder, ConfigBuilder, TestHarness};
use etl_overseer::action::ActionOptions;
use etl_overseer::config::{load_config_from_str, EndpointConfig};
use etl_overseer::EtlError;

/// Represents a single config loading test case.
struct ConfigTestCase {
    name: &'static str,
    config_json: &'static str,
    should_succeed: bool,
    /// Expected error substring when loading fails.
    expected_error: Option<&'static str>,
}

const CONFIG_TESTS: &[ConfigTestCase] = &[
    ConfigTestCase {
        name: "minimal",
        config_json: r#"{"jobs": []}"#,
        should_succeed: true,
        expected_error: None,
    },
    ConfigTestCase {
        name: "malformed_json",
        config_json: "{\n  \"jobs\": [\n",
        should_succeed: false,
        expected_error: Some("line"),
    },
    ConfigTestCase {
        name: "unresolved_variable",
        config_json: r#"{
            "jobs": [{
                "name": "cleanup",
                "type": "maintenance",
                "options": {"statements": ["DELETE FROM ${schema}.staging"]}
            }]
        }"#,
        should_succeed: false,
        expected_error: Some("${schema}"),
    },
    ConfigTestCase {
        name: "unknown_type",
        config_json: r#"{"jobs": [{"name": "x", "type": "teleport"}]}"#,
        should_succeed: false,
        expected_error: Some("/jobs/0/type"),
    },
    ConfigTestCase {
        name: "unknown_predecessor",
        config_json: r#"{
            "jobs": [{
                "name": "a",
                "type": "maintenance",
                "depends_on": ["ghost"],
                "options": {"statements": ["SELECT 1"]}
            }]
        }"#,
        should_succeed: false,
        expected_error: Some("ghost"),
    },
    ConfigTestCase {
        name: "predecessor_in_other_pipeline",
        config_json: r#"{
            "ingest": [{
                "name": "x",
                "type": "maintenance",
                "options": {"statements": ["SELECT 1"]}
            }],
            "aggregate": [{
                "name": "y",
                "type": "maintenance",
                "depends_on": ["ingest.x"],
                "options": {"statements": ["SELECT 1"]}
            }]
        }"#,
        should_succeed: false,
        expected_error: Some("ingest.x"),
    },
    ConfigTestCase {
        name: "dotted_action_name",
        config_json: r#"{
            "jobs": [{
                "name": "a.b",
                "type": "maintenance",
                "options": {"statements": ["SELECT 1"]}
            }]
        }"#,
        should_succeed: false,
        expected_error: Some("a.b"),
    },
    ConfigTestCase {
        name: "variables_layered",
        config_json: r#"{
            "variables": {"schema": "modw", "table": "${schema}.jobfact"},
            "jobs": [{
                "name": "cleanup",
                "type": "maintenance",
                "variables": {"schema": "modw_aggregates"},
                "options": {"statements": ["DELETE FROM ${table}", "DELETE FROM ${schema}.x"]}
            }]
        }"#,
        should_succeed: true,
        expected_error: None,
    },
];

#[test]
fn test_config_cases() {
    let dir = tempfile::tempdir().unwrap();
    for case in CONFIG_TESTS {
        let result = load_config_from_str(case.config_json, dir.path());
        match (case.should_succeed, result) {
            (true, Ok(_)) => {}
            (true, Err(e)) => panic!("case '{}' failed unexpectedly: {}", case.name, e),
            (false, Ok(_)) => panic!("case '{}' should have failed", case.name),
            (false, Err(e)) => {
                assert!(
                    matches!(e, EtlError::ConfigParse { .. }),
                    "case '{}': unexpected error kind {}",
                    case.name,
                    e
                );
                if let Some(expected) = case.expected_error {
                    assert!(
                        e.to_string().contains(expected),
                        "case '{}': '{}' does not mention '{}'",
                        case.name,
                        e,
                        expected
                    );
                }
            }
        }
    }
}

#[test]
fn test_action_variables_win_over_top_level() {
    let case = CONFIG_TESTS
        .iter()
        .find(|c| c.name == "variables_layered")
        .unwrap();
    let config = load_config_from_str(case.config_json, std::path::Path::new("/tmp")).unwrap();
    let spec = config.action("jobs.cleanup").unwrap();
    match &spec.options {
        ActionOptions::Maintenance(o) => {
            // `table` was resolved at the top level, before the action layer.
            assert_eq!(o.statements[0], "DELETE FROM modw.jobfact");
            assert_eq!(o.statements[1], "DELETE FROM modw_aggregates.x");
        }
        other => panic!("unexpected options {other:?}"),
    }
}

#[test]
fn test_local_overrides_merge_in_name_order() {
    let harness = TestHarness::new();
    harness.write_config(
        &ConfigBuilder::new()
            .path("local_config_dir", "conf.d")
            .pipeline(
                "jobs",
                vec![
                    ActionBuilder::maintenance("a", &["SELECT 1"]).build(),
                    ActionBuilder::maintenance("b", &["SELECT 2"]).build(),
                ],
            )
            .build(),
    );
    harness.write_json(
        "conf.d/10-endpoints.json",
        &json!({
            "endpoints": {"warehouse": {"path": "data/other.db"}},
            "jobs": [{"name": "b", "enabled": false}]
        }),
    );
    harness.write_json(
        "conf.d/20-more.json",
        &json!({
            "endpoints": {"warehouse": {"path": "data/final.db"}},
            "jobs": [{
                "name": "c",
                "type": "maintenance",
                "options": {"statements": ["SELECT 3"]}
            }]
        }),
    );
    harness.write_file("conf.d/notes.txt", "ignored");

    let config = harness.load().unwrap();
    match config.endpoint("warehouse").unwrap() {
        EndpointConfig::Sqlite { path, schema } => {
            assert!(path.ends_with("data/final.db"), "{path}");
            assert_eq!(schema, "modw");
        }
        other => panic!("unexpected endpoint {other:?}"),
    }

    let jobs = config.pipeline("jobs").unwrap();
    let names: Vec<&str> = jobs.actions.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["a", "b", "c"]);
    assert!(jobs.actions[0].enabled);
    assert!(!jobs.actions[1].enabled);
}

#[test]
fn test_local_override_null_deletes_key() {
    let harness = TestHarness::new();
    harness.write_config(
        &ConfigBuilder::new()
            .path("local_config_dir", "conf.d")
            .endpoint("scratch", json!({"type": "sqlite", "path": ":memory:"}))
            .pipeline("jobs", vec![])
            .build(),
    );
    harness.write_json("conf.d/local.json", &json!({"endpoints": {"scratch": null}}));

    let config = harness.load().unwrap();
    assert!(config.endpoint("scratch").is_none());
    assert!(config.endpoint("warehouse").is_some());
}

#[test]
fn test_option_overrides_from_command_line() {
    let harness = TestHarness::new();
    harness.write_config(
        &ConfigBuilder::new()
            .pipeline(
                "jobs",
                vec![
                    ActionBuilder::maintenance("a", &["SELECT 1"]).build(),
                    ActionBuilder::new("tables", "manage_table")
                        .destination("warehouse")
                        .option("definition_files", json!(["tables/a.json"]))
                        .build(),
                ],
            )
            .build(),
    );

    let config = harness
        .load_with_overrides(&["statements=[\"SELECT 42\"]"])
        .unwrap();
    match &config.action("jobs.a").unwrap().options {
        ActionOptions::Maintenance(o) => assert_eq!(o.statements, vec!["SELECT 42"]),
        other => panic!("unexpected options {other:?}"),
    }
    match &config.action("jobs.tables").unwrap().options {
        ActionOptions::ManageTable(o) => assert_eq!(o.definition_files, vec!["tables/a.json"]),
        other => panic!("unexpected options {other:?}"),
    }
}
