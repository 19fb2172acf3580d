use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{unqualified, DeclarationError};

static RE_BEGIN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)^\s*BEGIN\b").unwrap());
static RE_END: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)\bEND\s*;?\s*$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerTime {
    Before,
    After,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerEvent {
    Insert,
    Update,
    Delete,
}

impl FromStr for TriggerTime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BEFORE" => Ok(TriggerTime::Before),
            "AFTER" => Ok(TriggerTime::After),
            other => Err(format!("invalid trigger time '{}'", other)),
        }
    }
}

impl FromStr for TriggerEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INSERT" => Ok(TriggerEvent::Insert),
            "UPDATE" => Ok(TriggerEvent::Update),
            "DELETE" => Ok(TriggerEvent::Delete),
            other => Err(format!("invalid trigger event '{}'", other)),
        }
    }
}

impl fmt::Display for TriggerTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TriggerTime::Before => "BEFORE",
            TriggerTime::After => "AFTER",
        })
    }
}

impl fmt::Display for TriggerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TriggerEvent::Insert => "INSERT",
            TriggerEvent::Update => "UPDATE",
            TriggerEvent::Delete => "DELETE",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerDefinition {
    pub name: String,
    pub time: TriggerTime,
    pub event: TriggerEvent,
    pub table: String,
    /// Statements between `BEGIN` and `END`, always `;`-terminated.
    pub body: String,
}

impl TriggerDefinition {
    pub fn new(
        name: impl Into<String>,
        time: TriggerTime,
        event: TriggerEvent,
        table: &str,
        body: &str,
    ) -> Self {
        Self {
            name: name.into(),
            time,
            event,
            table: unqualified(table).to_string(),
            body: normalize_body(body),
        }
    }

    /// Same trigger modulo whitespace in the body.
    pub fn is_equivalent(&self, other: &TriggerDefinition) -> bool {
        self.name == other.name
            && self.time == other.time
            && self.event == other.event
            && self.table == other.table
            && collapse_whitespace(&self.body) == collapse_whitespace(&other.body)
    }

    pub(crate) fn from_value(value: &Value, pointer: &str) -> Result<Self, DeclarationError> {
        let spec = TriggerSpec::deserialize(value)
            .map_err(|e| DeclarationError::new(pointer, e.to_string()))?;
        let time = spec
            .time
            .parse()
            .map_err(|e: String| DeclarationError::new(format!("{}/time", pointer), e))?;
        let event = spec
            .event
            .parse()
            .map_err(|e: String| DeclarationError::new(format!("{}/event", pointer), e))?;
        if spec.body.trim().is_empty() {
            return Err(DeclarationError::new(
                format!("{}/body", pointer),
                "trigger body is empty",
            ));
        }
        Ok(Self::new(spec.name, time, event, &spec.table, &spec.body))
    }

    pub(crate) fn to_value(&self) -> Value {
        let spec = TriggerSpec {
            name: self.name.clone(),
            time: self.time.to_string(),
            event: self.event.to_string(),
            table: self.table.clone(),
            body: self.body.clone(),
        };
        serde_json::to_value(spec).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct TriggerSpec {
    name: String,
    time: String,
    event: String,
    table: String,
    body: String,
}

/// Strips an enclosing `BEGIN ... END` and guarantees a trailing `;`.
pub fn normalize_body(body: &str) -> String {
    let mut text = body.trim().to_string();
    if RE_BEGIN.is_match(&text) && RE_END.is_match(&text) {
        text = RE_BEGIN.replace(&text, "").to_string();
        text = RE_END.replace(&text, "").to_string();
    }
    let mut text = text.trim().to_string();
    if !text.ends_with(';') {
        text.push(';');
    }
    text
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_body_normalization() {
        let cases = [
            ("UPDATE t SET x = 1", "UPDATE t SET x = 1;"),
            ("BEGIN UPDATE t SET x = 1; END", "UPDATE t SET x = 1;"),
            ("begin\n  DELETE FROM t;\nend;", "DELETE FROM t;"),
            ("  SELECT 1;  ", "SELECT 1;"),
        ];
        for (input, expected) in cases {
            assert_eq!(normalize_body(input), expected, "input {:?}", input);
        }
    }

    #[test]
    fn test_from_value_strips_table_schema() {
        let trig = TriggerDefinition::from_value(
            &json!({
                "name": "jobfact_ins",
                "time": "after",
                "event": "insert",
                "table": "modw.jobfact",
                "body": "BEGIN UPDATE counts SET n = n + 1; END"
            }),
            "/triggers/0",
        )
        .unwrap();
        assert_eq!(trig.table, "jobfact");
        assert_eq!(trig.time, TriggerTime::After);
        assert_eq!(trig.event, TriggerEvent::Insert);
        assert_eq!(trig.body, "UPDATE counts SET n = n + 1;");
    }

    #[test]
    fn test_invalid_event_points_at_event() {
        let err = TriggerDefinition::from_value(
            &json!({"name": "t", "time": "AFTER", "event": "TRUNCATE", "table": "x", "body": "x"}),
            "/triggers/1",
        )
        .unwrap_err();
        assert_eq!(err.pointer, "/triggers/1/event");
    }

    #[test]
    fn test_equivalence_ignores_whitespace() {
        let a = TriggerDefinition::new("t", TriggerTime::Before, TriggerEvent::Update, "x", "SET NEW.a = 1;");
        let b = TriggerDefinition::new("t", TriggerTime::Before, TriggerEvent::Update, "x", "SET  NEW.a =\n 1;");
        assert!(a.is_equivalent(&b));
        assert_ne!(a, b);
    }
}
