//! Column type grammar.
//!
//! Types are parsed into a structured value so that `INT(11)` and `int(11)`
//! compare equal and so each dialect can render its own spelling.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntKind {
    TinyInt,
    SmallInt,
    MediumInt,
    Int,
    BigInt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatKind {
    Float,
    Double,
    Real,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextKind {
    TinyText,
    Text,
    MediumText,
    LongText,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobKind {
    TinyBlob,
    Blob,
    MediumBlob,
    LongBlob,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlType {
    Integer {
        kind: IntKind,
        width: Option<u32>,
        unsigned: bool,
    },
    Decimal {
        precision: Option<u32>,
        scale: Option<u32>,
    },
    Float(FloatKind),
    Char(Option<u32>),
    Varchar(u32),
    Text(TextKind),
    Blob(BlobKind),
    Date,
    DateTime,
    Timestamp,
    Time,
    Year,
    Boolean,
    Json,
    Enum(Vec<String>),
    Set(Vec<String>),
}

static RE_TYPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*([a-z]+)\s*(?:\((.*)\))?\s*(unsigned)?\s*(zerofill)?\s*$").unwrap()
});

impl SqlType {
    pub fn is_integer(&self) -> bool {
        matches!(self, SqlType::Integer { .. })
    }

    pub fn is_textual(&self) -> bool {
        matches!(
            self,
            SqlType::Char(_)
                | SqlType::Varchar(_)
                | SqlType::Text(_)
                | SqlType::Enum(_)
                | SqlType::Set(_)
        )
    }
}

fn parse_u32(value: &str, raw: &str) -> Result<u32, String> {
    value
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("invalid size '{}' in type '{}'", value.trim(), raw))
}

fn parse_values(args: &str) -> Vec<String> {
    let mut values = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    let mut chars = args.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\'' if in_quote && chars.peek() == Some(&'\'') => {
                current.push('\'');
                chars.next();
            }
            '\'' => in_quote = !in_quote,
            ',' if !in_quote => values.push(std::mem::take(&mut current).trim().to_string()),
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() || !values.is_empty() {
        values.push(current.trim().to_string());
    }
    values
}

impl FromStr for SqlType {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let caps = RE_TYPE
            .captures(raw)
            .ok_or_else(|| format!("unparsable column type '{}'", raw))?;
        let base = caps[1].to_ascii_lowercase();
        let args = caps.get(2).map(|m| m.as_str());
        let unsigned = caps.get(3).is_some();

        let nums = |required: usize| -> Result<Vec<u32>, String> {
            let parts: Vec<u32> = match args {
                Some(a) if !a.trim().is_empty() => a
                    .split(',')
                    .map(|p| parse_u32(p, raw))
                    .collect::<Result<_, _>>()?,
                _ => Vec::new(),
            };
            if parts.len() > required {
                return Err(format!("too many arguments in type '{}'", raw));
            }
            Ok(parts)
        };

        let int = |kind: IntKind| -> Result<SqlType, String> {
            let width = nums(1)?.first().copied();
            Ok(SqlType::Integer {
                kind,
                width,
                unsigned,
            })
        };

        if unsigned && !matches!(
            base.as_str(),
            "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "bigint"
        ) {
            return Err(format!("'unsigned' not allowed on type '{}'", raw));
        }

        let no_args = |ty: SqlType| -> Result<SqlType, String> {
            if args.is_some_and(|a| !a.trim().is_empty()) {
                return Err(format!("type '{}' takes no arguments", raw));
            }
            Ok(ty)
        };

        match base.as_str() {
            "tinyint" => int(IntKind::TinyInt),
            "smallint" => int(IntKind::SmallInt),
            "mediumint" => int(IntKind::MediumInt),
            "int" | "integer" => int(IntKind::Int),
            "bigint" => int(IntKind::BigInt),
            "decimal" | "numeric" => {
                let parts = nums(2)?;
                Ok(SqlType::Decimal {
                    precision: parts.first().copied(),
                    scale: parts.get(1).copied(),
                })
            }
            "float" => {
                nums(2)?;
                Ok(SqlType::Float(FloatKind::Float))
            }
            "double" => {
                nums(2)?;
                Ok(SqlType::Float(FloatKind::Double))
            }
            "real" => {
                nums(2)?;
                Ok(SqlType::Float(FloatKind::Real))
            }
            "char" => Ok(SqlType::Char(nums(1)?.first().copied())),
            "varchar" => match nums(1)?.first() {
                Some(len) => Ok(SqlType::Varchar(*len)),
                None => Err(format!("varchar requires a length in '{}'", raw)),
            },
            "tinytext" => no_args(SqlType::Text(TextKind::TinyText)),
            "text" => no_args(SqlType::Text(TextKind::Text)),
            "mediumtext" => no_args(SqlType::Text(TextKind::MediumText)),
            "longtext" => no_args(SqlType::Text(TextKind::LongText)),
            "tinyblob" => no_args(SqlType::Blob(BlobKind::TinyBlob)),
            "blob" => no_args(SqlType::Blob(BlobKind::Blob)),
            "mediumblob" => no_args(SqlType::Blob(BlobKind::MediumBlob)),
            "longblob" => no_args(SqlType::Blob(BlobKind::LongBlob)),
            "date" => no_args(SqlType::Date),
            "datetime" => no_args(SqlType::DateTime),
            "timestamp" => no_args(SqlType::Timestamp),
            "time" => no_args(SqlType::Time),
            "year" => {
                nums(1)?;
                Ok(SqlType::Year)
            }
            "bool" | "boolean" => no_args(SqlType::Boolean),
            "json" => no_args(SqlType::Json),
            "enum" | "set" => {
                let values = parse_values(args.unwrap_or_default());
                if values.is_empty() {
                    return Err(format!("'{}' requires at least one value", raw));
                }
                Ok(if base == "enum" {
                    SqlType::Enum(values)
                } else {
                    SqlType::Set(values)
                })
            }
            other => Err(format!("unknown column type '{}'", other)),
        }
    }
}

fn quote_values(values: &[String]) -> String {
    values
        .iter()
        .map(|v| format!("'{}'", v.replace('\'', "''")))
        .collect::<Vec<_>>()
        .join(",")
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlType::Integer {
                kind,
                width,
                unsigned,
            } => {
                let name = match kind {
                    IntKind::TinyInt => "tinyint",
                    IntKind::SmallInt => "smallint",
                    IntKind::MediumInt => "mediumint",
                    IntKind::Int => "int",
                    IntKind::BigInt => "bigint",
                };
                f.write_str(name)?;
                if let Some(w) = width {
                    write!(f, "({})", w)?;
                }
                if *unsigned {
                    f.write_str(" unsigned")?;
                }
                Ok(())
            }
            SqlType::Decimal { precision, scale } => match (precision, scale) {
                (Some(p), Some(s)) => write!(f, "decimal({},{})", p, s),
                (Some(p), None) => write!(f, "decimal({})", p),
                _ => f.write_str("decimal"),
            },
            SqlType::Float(FloatKind::Float) => f.write_str("float"),
            SqlType::Float(FloatKind::Double) => f.write_str("double"),
            SqlType::Float(FloatKind::Real) => f.write_str("real"),
            SqlType::Char(Some(n)) => write!(f, "char({})", n),
            SqlType::Char(None) => f.write_str("char"),
            SqlType::Varchar(n) => write!(f, "varchar({})", n),
            SqlType::Text(kind) => f.write_str(match kind {
                TextKind::TinyText => "tinytext",
                TextKind::Text => "text",
                TextKind::MediumText => "mediumtext",
                TextKind::LongText => "longtext",
            }),
            SqlType::Blob(kind) => f.write_str(match kind {
                BlobKind::TinyBlob => "tinyblob",
                BlobKind::Blob => "blob",
                BlobKind::MediumBlob => "mediumblob",
                BlobKind::LongBlob => "longblob",
            }),
            SqlType::Date => f.write_str("date"),
            SqlType::DateTime => f.write_str("datetime"),
            SqlType::Timestamp => f.write_str("timestamp"),
            SqlType::Time => f.write_str("time"),
            SqlType::Year => f.write_str("year"),
            SqlType::Boolean => f.write_str("boolean"),
            SqlType::Json => f.write_str("json"),
            SqlType::Enum(values) => write!(f, "enum({})", quote_values(values)),
            SqlType::Set(values) => write!(f, "set({})", quote_values(values)),
        }
    }
}
