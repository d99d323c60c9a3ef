//! Pattern text parsing.
//!
//! A pattern is a JSON object whose leaves are arrays of value specs:
//!
//! ```text
//! {"detail": {"state": ["running", "pending"], "size": [{"numeric": [">", 100]}]}}
//! ```
//!
//! Nested objects become paths joined by `\n`. Fields are ANDed; the specs
//! in one leaf array are ORed.

use serde_json::{Map, Value};

use crate::numbers;
use crate::numeric::NumericConstraints;
use crate::QuaminaError;

/// Joins the segments of a nested field path.
pub const PATH_SEPARATOR: &str = "\n";

/// One acceptable value for a field.
#[derive(Clone, Debug, PartialEq)]
pub enum ValueSpec {
    /// Exact bytes as the flattener renders them: strings with their quotes,
    /// `true`, `false`, `null`, or a number too large to canonicalize.
    Literal(String),
    /// A canonicalized number.
    Number(String),
    /// `{"numeric": [rel, n, ...]}`
    Numeric(NumericConstraints),
    /// `{"extension": spec}`, holding the spec's JSON text.
    Extension(String),
}

/// A field path with its acceptable values.
#[derive(Clone, Debug, PartialEq)]
pub struct PatternField {
    pub path: String,
    pub values: Vec<ValueSpec>,
}

/// Parse pattern text into fields sorted by path.
pub fn parse_pattern(text: &str) -> Result<Vec<PatternField>, QuaminaError> {
    let parsed: Value =
        serde_json::from_str(text).map_err(|e| QuaminaError::InvalidPattern(e.to_string()))?;
    let Value::Object(obj) = parsed else {
        return Err(QuaminaError::InvalidPattern(
            "pattern must be a JSON object".into(),
        ));
    };

    let mut fields = Vec::new();
    collect_fields(&obj, "", &mut fields)?;
    if fields.is_empty() {
        return Err(QuaminaError::InvalidPattern("pattern has no fields".into()));
    }
    fields.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(fields)
}

fn collect_fields(
    obj: &Map<String, Value>,
    prefix: &str,
    fields: &mut Vec<PatternField>,
) -> Result<(), QuaminaError> {
    for (key, val) in obj {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}{PATH_SEPARATOR}{key}")
        };
        match val {
            Value::Object(nested) => collect_fields(nested, &path, fields)?,
            Value::Array(items) => {
                if items.is_empty() {
                    return Err(QuaminaError::InvalidPattern(format!(
                        "empty array for field {path:?}"
                    )));
                }
                let values = items
                    .iter()
                    .map(|item| parse_value(&path, item))
                    .collect::<Result<Vec<_>, _>>()?;
                fields.push(PatternField { path, values });
            }
            other => {
                return Err(QuaminaError::InvalidPattern(format!(
                    "value for field {path:?} must be an array, got {other}"
                )))
            }
        }
    }
    Ok(())
}

fn parse_value(path: &str, item: &Value) -> Result<ValueSpec, QuaminaError> {
    match item {
        Value::String(_) | Value::Bool(_) | Value::Null => Ok(ValueSpec::Literal(item.to_string())),
        Value::Number(n) => {
            let text = n.to_string();
            match numbers::canonicalize(text.as_bytes()) {
                Ok(canonical) => Ok(ValueSpec::Number(canonical)),
                Err(QuaminaError::OutOfRangeNumeric(_)) => Ok(ValueSpec::Literal(
                    String::from_utf8_lossy(&numbers::numeral_text(text.as_bytes())).into_owned(),
                )),
                Err(e) => Err(e),
            }
        }
        Value::Object(op) => {
            let mut entries = op.iter();
            let (Some((name, arg)), None) = (entries.next(), entries.next()) else {
                return Err(QuaminaError::InvalidPattern(format!(
                    "operator object for field {path:?} must have exactly one key"
                )));
            };
            match (name.as_str(), arg) {
                ("numeric", Value::Array(spec)) => {
                    Ok(ValueSpec::Numeric(NumericConstraints::compile(spec)?))
                }
                ("numeric", other) => Err(QuaminaError::InvalidPattern(format!(
                    "value for 'numeric' must be an array, got {other}"
                ))),
                ("extension", spec) => Ok(ValueSpec::Extension(spec.to_string())),
                (unknown, _) => Err(QuaminaError::InvalidPattern(format!(
                    "unsupported operator {unknown:?} for field {path:?}"
                ))),
            }
        }
        Value::Array(_) => Err(QuaminaError::InvalidPattern(format!(
            "nested array in values for field {path:?}"
        ))),
    }
}
