use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::action::ActionOptions;
use crate::error::{EtlError, Result};
use crate::period::parse_datetime;

use super::merge::{merge, override_files};
use super::schema::{
    resolve_path, ActionKind, ActionSpec, EndpointConfig, EtlConfig, FileFormat, OptionOverride,
    PipelineConfig,
};
use super::variables::{escape_pointer, VariableStore};

const SCHEMA_JSON: &str = include_str!("../../schema/etl-config-v1.json");

/// Top-level keys that are not pipelines.
pub const RESERVED_KEYS: [&str; 5] = ["module", "paths", "variables", "defaults", "endpoints"];
pub const DEFAULT_JOURNAL_ENDPOINT: &str = "utility";
pub const DEFAULT_MODULE: &str = "etl";
const LOCAL_CONFIG_DIR_KEY: &str = "local_config_dir";

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<EtlConfig> {
    ConfigLoader::new(path).load()
}

/// Loads an in-memory document. Relative paths resolve against `base_dir`.
pub fn load_config_from_str(content: &str, base_dir: &Path) -> Result<EtlConfig> {
    let source_name = "<inline>";
    let mut document = parse_json(content, source_name)?;
    apply_local_overrides(&mut document, base_dir, source_name)?;
    Builder::new(source_name, base_dir, &[]).build(document)
}

/// Configuration file loader with command-line option overrides.
pub struct ConfigLoader {
    path: PathBuf,
    overrides: Vec<OptionOverride>,
}

impl ConfigLoader {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            overrides: Vec::new(),
        }
    }

    pub fn with_overrides(mut self, overrides: Vec<OptionOverride>) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn load(&self) -> Result<EtlConfig> {
        let source_name = self.path.display().to_string();
        let content = std::fs::read_to_string(&self.path).map_err(|e| EtlError::ReadFile {
            path: self.path.clone(),
            source: e,
        })?;

        let base_dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut document = parse_json(&content, &source_name)?;
        apply_local_overrides(&mut document, &base_dir, &source_name)?;
        let config = Builder::new(&source_name, &base_dir, &self.overrides).build(document)?;

        log::info!(
            "Loaded configuration '{}' ({} pipelines, {} endpoints)",
            source_name,
            config.pipelines.len(),
            config.endpoints.len()
        );
        Ok(config)
    }
}

fn parse_json(content: &str, source_name: &str) -> Result<Value> {
    serde_json::from_str(content).map_err(|e| {
        EtlError::config(
            source_name,
            format!("line {}, column {}", e.line(), e.column()),
            e.to_string(),
        )
    })
}

fn builtin_variables(base_dir: &Path, module: &str) -> VariableStore {
    let mut store = VariableStore::new();
    store
        .set("base_dir", base_dir.display().to_string())
        .set("module", module);
    store
}

fn module_name(document: &Value) -> String {
    document
        .get("module")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_MODULE)
        .to_string()
}

/// Merges every file of `paths.local_config_dir` over `document`.
fn apply_local_overrides(document: &mut Value, base_dir: &Path, source_name: &str) -> Result<()> {
    let Some(dir) = document
        .get("paths")
        .and_then(|p| p.get(LOCAL_CONFIG_DIR_KEY))
        .and_then(Value::as_str)
        .map(str::to_string)
    else {
        return Ok(());
    };

    let builtins = builtin_variables(base_dir, &module_name(document));
    let dir = builtins.substitute_at(
        &dir,
        source_name,
        &format!("/paths/{}", LOCAL_CONFIG_DIR_KEY),
    )?;
    let dir = resolve_path(base_dir, &dir);

    for file in override_files(&dir)? {
        let file_name = file.display().to_string();
        let content = std::fs::read_to_string(&file).map_err(|e| EtlError::ReadFile {
            path: file.clone(),
            source: e,
        })?;
        let overlay = parse_json(&content, &file_name)?;
        if !overlay.is_object() {
            return Err(EtlError::config(
                file_name,
                "/",
                "local configuration file must contain a JSON object",
            ));
        }
        merge(document, overlay);
        log::info!("Applied local configuration {}", file_name);
    }
    Ok(())
}

fn validate_schema(document: &Value, source_name: &str) -> Result<()> {
    let schema: Value = serde_json::from_str(SCHEMA_JSON).map_err(|e| {
        EtlError::config(source_name, "schema", format!("Invalid embedded schema JSON: {}", e))
    })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| {
        EtlError::config(source_name, "schema", format!("Failed to compile JSON schema: {}", e))
    })?;

    let errors: Vec<String> = validator
        .iter_errors(document)
        .map(|e| e.to_string())
        .collect();
    if !errors.is_empty() {
        return Err(EtlError::config(source_name, "schema", errors.join("; ")));
    }
    Ok(())
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawActionEndpoints {
    source: Option<String>,
    destination: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDefaults {
    #[serde(default)]
    endpoints: RawActionEndpoints,
    #[serde(default)]
    variables: Map<String, Value>,
    chunk_size_days: Option<u32>,
    start_date: Option<String>,
    stop_on_error: Option<bool>,
    journal_endpoint: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEndpoint {
    #[serde(rename = "type")]
    kind: String,
    path: String,
    schema: Option<String>,
    format: Option<FileFormat>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawAction {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    description: Option<String>,
    enabled: Option<bool>,
    stop_on_error: Option<bool>,
    journal_key: Option<String>,
    #[serde(default)]
    endpoints: RawActionEndpoints,
    #[serde(default = "empty_object")]
    options: Value,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default)]
    variables: Map<String, Value>,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

/// Turns a merged document into an [`EtlConfig`].
struct Builder<'a> {
    source_name: &'a str,
    base_dir: &'a Path,
    overrides: &'a [OptionOverride],
    used_overrides: HashSet<usize>,
}

impl<'a> Builder<'a> {
    fn new(source_name: &'a str, base_dir: &'a Path, overrides: &'a [OptionOverride]) -> Self {
        Self {
            source_name,
            base_dir,
            overrides,
            used_overrides: HashSet::new(),
        }
    }

    fn error(&self, pointer: impl Into<String>, message: impl Into<String>) -> EtlError {
        EtlError::config(self.source_name, pointer, message)
    }

    fn build(mut self, document: Value) -> Result<EtlConfig> {
        validate_schema(&document, self.source_name)?;
        let Value::Object(root) = document else {
            return Err(self.error("/", "configuration must be a JSON object"));
        };

        let module = root
            .get("module")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_MODULE)
            .to_string();
        let mut variables = builtin_variables(self.base_dir, &module);

        let mut paths = BTreeMap::new();
        if let Some(Value::Object(declared)) = root.get("paths") {
            for (name, value) in declared {
                let pointer = format!("/paths/{}", escape_pointer(name));
                let raw = value.as_str().unwrap_or_default();
                let resolved = resolve_path(
                    self.base_dir,
                    &variables.substitute_at(raw, self.source_name, &pointer)?,
                );
                variables.set(name.clone(), resolved.display().to_string());
                paths.insert(name.clone(), resolved);
            }
        }
        if let Some(Value::Object(declared)) = root.get("variables") {
            variables.extend_from_json(declared, self.source_name, "/variables")?;
        }

        let defaults = root.get("defaults").and_then(Value::as_object);
        let global = self.parse_defaults(defaults, "global")?;
        let mut global_vars = variables.clone();
        global_vars.extend_from_json(&global.variables, self.source_name, "/defaults/global/variables")?;

        let endpoints = self.parse_endpoints(root.get("endpoints"), &global_vars)?;
        for (pointer, name) in [
            ("/defaults/global/endpoints/source", &global.endpoints.source),
            ("/defaults/global/endpoints/destination", &global.endpoints.destination),
        ] {
            if let Some(name) = name {
                check_endpoint(&endpoints, name).map_err(|m| self.error(pointer, m))?;
            }
        }

        let journal_endpoint = global
            .journal_endpoint
            .clone()
            .unwrap_or_else(|| DEFAULT_JOURNAL_ENDPOINT.to_string());
        match endpoints.get(&journal_endpoint) {
            Some(EndpointConfig::File { .. }) => {
                return Err(self.error(
                    "/defaults/global/journal_endpoint",
                    format!("journal endpoint '{}' must be a sqlite endpoint", journal_endpoint),
                ))
            }
            Some(EndpointConfig::Sqlite { .. }) => {}
            None => log::warn!(
                "Journal endpoint '{}' is not configured, the journal lives in the run database",
                journal_endpoint
            ),
        }

        let start_date = self.parse_start_date(global.start_date.as_deref(), "/defaults/global/start_date")?;

        let mut pipelines = Vec::new();
        for (section, value) in &root {
            if RESERVED_KEYS.contains(&section.as_str()) {
                continue;
            }
            let section_defaults = self.parse_defaults(defaults, section)?;
            pipelines.push(self.build_pipeline(
                section,
                value,
                &global,
                &section_defaults,
                &global_vars,
                &endpoints,
            )?);
        }

        if let Some(defaults) = defaults {
            for name in defaults.keys() {
                if name != "global" && !root.contains_key(name) {
                    log::warn!("Defaults given for unknown section '{}'", name);
                }
            }
        }

        self.validate_dependencies(&pipelines)?;

        for (i, o) in self.overrides.iter().enumerate() {
            if !self.used_overrides.contains(&i) {
                log::warn!("Option override '{}' matched no action", o.key);
            }
        }

        Ok(EtlConfig {
            source_name: self.source_name.to_string(),
            module,
            base_dir: self.base_dir.to_path_buf(),
            paths,
            variables,
            endpoints,
            journal_endpoint,
            chunk_size_days: global.chunk_size_days,
            start_date,
            pipelines,
        })
    }

    fn parse_defaults(&self, defaults: Option<&Map<String, Value>>, section: &str) -> Result<RawDefaults> {
        match defaults.and_then(|d| d.get(section)) {
            None => Ok(RawDefaults::default()),
            Some(value) => serde_json::from_value(value.clone()).map_err(|e| {
                self.error(format!("/defaults/{}", escape_pointer(section)), e.to_string())
            }),
        }
    }

    fn parse_start_date(&self, value: Option<&str>, pointer: &str) -> Result<Option<chrono::NaiveDateTime>> {
        value
            .map(|s| {
                parse_datetime(s)
                    .ok_or_else(|| self.error(pointer, format!("invalid start date '{}'", s)))
            })
            .transpose()
    }

    fn parse_endpoints(
        &self,
        value: Option<&Value>,
        variables: &VariableStore,
    ) -> Result<BTreeMap<String, EndpointConfig>> {
        let mut endpoints = BTreeMap::new();
        let Some(Value::Object(declared)) = value else {
            return Ok(endpoints);
        };

        for (name, value) in declared {
            let pointer = format!("/endpoints/{}", escape_pointer(name));
            let value = variables.substitute_value(value, self.source_name, &pointer)?;
            let raw: RawEndpoint = serde_json::from_value(value)
                .map_err(|e| self.error(pointer.as_str(), e.to_string()))?;

            let endpoint = match raw.kind.as_str() {
                "sqlite" => {
                    let schema = raw.schema.unwrap_or_else(|| name.clone());
                    if !crate::db::is_valid_identifier(&schema) {
                        return Err(self.error(
                            format!("{}/schema", pointer),
                            format!("'{}' is not a valid schema name", schema),
                        ));
                    }
                    let path = if raw.path == ":memory:" {
                        raw.path
                    } else {
                        resolve_path(self.base_dir, &raw.path).display().to_string()
                    };
                    EndpointConfig::Sqlite { path, schema }
                }
                "file" => {
                    let path = resolve_path(self.base_dir, &raw.path);
                    let format = raw
                        .format
                        .or_else(|| FileFormat::from_extension(&path))
                        .ok_or_else(|| {
                            self.error(
                                format!("{}/format", pointer),
                                format!("cannot infer the format of '{}'", raw.path),
                            )
                        })?;
                    EndpointConfig::File { path, format }
                }
                other => {
                    return Err(self.error(
                        format!("{}/type", pointer),
                        format!("unknown endpoint type '{}'", other),
                    ))
                }
            };
            endpoints.insert(name.clone(), endpoint);
        }

        let mut schemas = HashSet::new();
        for (name, endpoint) in &endpoints {
            if let Some(schema) = endpoint.schema() {
                if !schemas.insert(schema) {
                    return Err(self.error(
                        format!("/endpoints/{}/schema", escape_pointer(name)),
                        format!("schema '{}' is used by more than one endpoint", schema),
                    ));
                }
            }
        }
        Ok(endpoints)
    }

    fn build_pipeline(
        &mut self,
        section: &str,
        value: &Value,
        global: &RawDefaults,
        section_defaults: &RawDefaults,
        global_vars: &VariableStore,
        endpoints: &BTreeMap<String, EndpointConfig>,
    ) -> Result<PipelineConfig> {
        let section_pointer = format!("/{}", escape_pointer(section));
        if section.is_empty() || section.contains('.') || section.contains(char::is_whitespace) {
            return Err(self.error(
                section_pointer,
                format!("invalid section name '{}': dots and whitespace are not allowed", section),
            ));
        }
        let Value::Array(items) = value else {
            return Err(self.error(section_pointer, "a section must be an array of actions"));
        };

        let mut section_vars = global_vars.clone();
        section_vars.extend_from_json(
            &section_defaults.variables,
            self.source_name,
            &format!("/defaults/{}/variables", escape_pointer(section)),
        )?;

        let mut actions: Vec<ActionSpec> = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let pointer = format!("{}/{}", section_pointer, i);
            let raw: RawAction = serde_json::from_value(item.clone())
                .map_err(|e| self.error(pointer.as_str(), e.to_string()))?;

            if raw.name.contains('.') || raw.name.trim().is_empty() {
                return Err(self.error(
                    format!("{}/name", pointer),
                    format!("invalid action name '{}': dots are not allowed", raw.name),
                ));
            }
            if actions.iter().any(|a| a.name == raw.name) {
                return Err(self.error(
                    format!("{}/name", pointer),
                    format!("duplicate action name '{}' in section '{}'", raw.name, section),
                ));
            }

            let kind: ActionKind = raw
                .kind
                .parse()
                .map_err(|e: String| self.error(format!("{}/type", pointer), e))?;

            let source = raw
                .endpoints
                .source
                .clone()
                .or_else(|| section_defaults.endpoints.source.clone())
                .or_else(|| global.endpoints.source.clone());
            let destination = raw
                .endpoints
                .destination
                .clone()
                .or_else(|| section_defaults.endpoints.destination.clone())
                .or_else(|| global.endpoints.destination.clone());

            let mut vars = section_vars.clone();
            for (role, endpoint) in [("source", &source), ("destination", &destination)] {
                if let Some(name) = endpoint {
                    let ep = check_endpoint(endpoints, name)
                        .map_err(|m| self.error(format!("{}/endpoints/{}", pointer, role), m))?;
                    if let Some(schema) = ep.schema() {
                        vars.set(format!("{}_schema", role), schema);
                    }
                }
            }
            vars.extend_from_json(&raw.variables, self.source_name, &format!("{}/variables", pointer))?;

            let mut options =
                vars.substitute_value(&raw.options, self.source_name, &format!("{}/options", pointer))?;
            self.apply_overrides(&mut options);
            let options = ActionOptions::parse(kind, options)
                .map_err(|e| self.error(format!("{}/options", pointer), e.to_string()))?;

            let description = raw
                .description
                .as_deref()
                .map(|d| vars.substitute_at(d, self.source_name, &format!("{}/description", pointer)))
                .transpose()?;
            let journal_key = raw
                .journal_key
                .as_deref()
                .map(|k| vars.substitute_at(k, self.source_name, &format!("{}/journal_key", pointer)))
                .transpose()?;

            let depends_on = raw
                .depends_on
                .iter()
                .map(|d| {
                    if d.contains('.') {
                        d.clone()
                    } else {
                        format!("{}.{}", section, d)
                    }
                })
                .collect();

            actions.push(ActionSpec {
                section: section.to_string(),
                name: raw.name,
                kind,
                description,
                enabled: raw.enabled.unwrap_or(true),
                stop_on_error: raw
                    .stop_on_error
                    .or(section_defaults.stop_on_error)
                    .or(global.stop_on_error)
                    .unwrap_or(true),
                source,
                destination,
                depends_on,
                journal_key,
                options,
                variables: vars,
                base_dir: self.base_dir.to_path_buf(),
            });
        }

        let start_date = match section_defaults.start_date.as_deref() {
            Some(s) => self.parse_start_date(
                Some(s),
                &format!("/defaults/{}/start_date", escape_pointer(section)),
            )?,
            None => self.parse_start_date(global.start_date.as_deref(), "/defaults/global/start_date")?,
        };

        Ok(PipelineConfig {
            name: section.to_string(),
            chunk_size_days: section_defaults.chunk_size_days.or(global.chunk_size_days),
            start_date,
            actions,
        })
    }

    fn apply_overrides(&mut self, options: &mut Value) {
        let Value::Object(map) = options else {
            return;
        };
        for (i, o) in self.overrides.iter().enumerate() {
            if let Some(slot) = map.get_mut(&o.key) {
                *slot = o.value.clone();
                self.used_overrides.insert(i);
            }
        }
    }

    /// Predecessors must name actions of the same pipeline.
    fn validate_dependencies(&self, pipelines: &[PipelineConfig]) -> Result<()> {
        for pipeline in pipelines {
            let known: HashSet<String> = pipeline
                .actions
                .iter()
                .map(ActionSpec::qualified_name)
                .collect();
            for (i, action) in pipeline.actions.iter().enumerate() {
                if let Some(missing) = action.depends_on.iter().find(|d| !known.contains(*d)) {
                    return Err(self.error(
                        format!("/{}/{}/depends_on", escape_pointer(&pipeline.name), i),
                        format!(
                            "unknown predecessor '{}' of '{}' in pipeline '{}'",
                            missing,
                            action.qualified_name(),
                            pipeline.name
                        ),
                    ));
                }
            }
        }
        Ok(())
    }
}

fn check_endpoint<'e>(
    endpoints: &'e BTreeMap<String, EndpointConfig>,
    name: &str,
) -> std::result::Result<&'e EndpointConfig, String> {
    endpoints
        .get(name)
        .ok_or_else(|| format!("unknown endpoint '{}'", name))
}
