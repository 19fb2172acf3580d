use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::error::{EtlError, Result};

static RE_VARIABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

/// `${name}` substitution values.
///
/// Layers are built by cloning the parent store and setting more values on
/// the clone, so a later layer shadows an earlier one without changing it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariableStore {
    values: BTreeMap<String, String>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Adds a layer of declared variables. Values may reference variables
    /// of lower layers and ones declared before them in the same map.
    pub fn extend_from_json(
        &mut self,
        declared: &Map<String, Value>,
        source_name: &str,
        pointer: &str,
    ) -> Result<()> {
        for (name, value) in declared {
            let raw = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                other => {
                    return Err(EtlError::config(
                        source_name,
                        format!("{}/{}", pointer, name),
                        format!("variable value must be a scalar, got {}", other),
                    ))
                }
            };
            let resolved = self.substitute_at(&raw, source_name, &format!("{}/{}", pointer, name))?;
            self.set(name.clone(), resolved);
        }
        Ok(())
    }

    /// Replaces every `${name}` in `template`. Returns the name of the first
    /// unknown variable on failure.
    pub fn substitute(&self, template: &str) -> std::result::Result<String, String> {
        if let Some(missing) = RE_VARIABLE
            .captures_iter(template)
            .map(|c| c[1].to_string())
            .find(|name| !self.values.contains_key(name))
        {
            return Err(missing);
        }
        Ok(RE_VARIABLE
            .replace_all(template, |caps: &regex::Captures<'_>| {
                self.values
                    .get(&caps[1])
                    .cloned()
                    .unwrap_or_default()
            })
            .into_owned())
    }

    /// [`VariableStore::substitute`] with the failure reported as a
    /// configuration error at `pointer`.
    pub fn substitute_at(&self, template: &str, source_name: &str, pointer: &str) -> Result<String> {
        self.substitute(template).map_err(|missing| {
            EtlError::config(
                source_name,
                display_pointer(pointer),
                format!("undefined variable '${{{}}}'", missing),
            )
        })
    }

    /// Substitutes every string inside `value`, recursively. Object keys are
    /// left alone.
    pub fn substitute_value(&self, value: &Value, source_name: &str, pointer: &str) -> Result<Value> {
        Ok(match value {
            Value::String(s) => Value::String(self.substitute_at(s, source_name, pointer)?),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, v)| self.substitute_value(v, source_name, &format!("{}/{}", pointer, i)))
                    .collect::<Result<Vec<_>>>()?,
            ),
            Value::Object(map) => {
                let mut out = Map::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(
                        k.clone(),
                        self.substitute_value(v, source_name, &format!("{}/{}", pointer, escape_pointer(k)))?,
                    );
                }
                Value::Object(out)
            }
            other => other.clone(),
        })
    }
}

/// Names referenced by `template`, in order of appearance.
pub fn references(template: &str) -> Vec<String> {
    RE_VARIABLE
        .captures_iter(template)
        .map(|c| c[1].to_string())
        .collect()
}

/// JSON-pointer escaping of a single reference token.
pub fn escape_pointer(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

fn display_pointer(pointer: &str) -> String {
    if pointer.is_empty() {
        "/".to_string()
    } else {
        pointer.to_string()
    }
}
