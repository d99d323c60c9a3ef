//! Flattener trait for pluggable event flattening.
//!
//! A `Flattener` turns raw event bytes into the `(path, value)` pairs that
//! the matcher runs through its automata. The default implementation handles
//! JSON events; custom flatteners can support other formats.
//!
//! # Example
//!
//! ```
//! use quamina::{Field, Flattener, QuaminaError};
//!
//! /// Treats each `key=value` line as a string field.
//! struct LinesFlattener;
//!
//! impl Flattener for LinesFlattener {
//!     fn flatten(&self, event: &[u8]) -> Result<Vec<Field>, QuaminaError> {
//!         let text = std::str::from_utf8(event)
//!             .map_err(|e| QuaminaError::InvalidJson(e.to_string()))?;
//!         let mut fields: Vec<Field> = text
//!             .lines()
//!             .filter_map(|line| line.split_once('='))
//!             .map(|(k, v)| Field::new(k, format!("{v:?}")))
//!             .collect();
//!         fields.sort_by(|a, b| a.path.cmp(&b.path));
//!         Ok(fields)
//!     }
//! }
//! ```

use serde_json::Value;

use crate::numbers;
use crate::pattern::PATH_SEPARATOR;
use crate::QuaminaError;

/// A field's position within one array of the event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArrayPos {
    /// Identifies the array, unique within one event
    pub array: i32,
    /// Index of the element the field came from
    pub pos: i32,
}

/// A flattened field.
///
/// - `path`: the newline-separated path from the event root (e.g. `"context\nuser\nid"`)
/// - `val`: the value bytes, with strings including their quotes (e.g. `b"\"active\""`)
/// - `array_trail`: the array elements the field sits in, used to keep a
///   pattern from matching across elements of the same array
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Field {
    pub path: String,
    pub val: Vec<u8>,
    pub array_trail: Vec<ArrayPos>,
}

impl Field {
    /// A field outside of any array.
    pub fn new(path: impl Into<String>, val: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            val: val.into(),
            array_trail: Vec::new(),
        }
    }
}

/// Trait for flattening events into field lists.
///
/// # Contract
///
/// Implementations must:
/// - Return fields sorted by path, using '\n' as the segment separator
/// - Include quotes around string values, rendered the way `serde_json`
///   writes them
/// - Render numbers as numerals. Spellings that differ only in the case of
///   the exponent mark or a `+` after it are treated alike, and any
///   numeral within canonicalization range matches by value
/// - Track array positions to prevent cross-element matching
///
/// Flatteners are shared by every reader of a matcher, so `flatten` takes
/// `&self` and must be safe to call concurrently.
pub trait Flattener: Send + Sync {
    fn flatten(&self, event: &[u8]) -> Result<Vec<Field>, QuaminaError>;
}

/// Default JSON flattener, built on `serde_json`.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonFlattener;

impl JsonFlattener {
    pub fn new() -> Self {
        JsonFlattener
    }
}

impl Flattener for JsonFlattener {
    fn flatten(&self, event: &[u8]) -> Result<Vec<Field>, QuaminaError> {
        let parsed: Value =
            serde_json::from_slice(event).map_err(|e| QuaminaError::InvalidJson(e.to_string()))?;
        let Value::Object(_) = parsed else {
            return Err(QuaminaError::InvalidJson(
                "event must be a JSON object".into(),
            ));
        };

        let mut walk = Walk::default();
        walk.value(&parsed, "");
        walk.fields.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(walk.fields)
    }
}

#[derive(Default)]
struct Walk {
    fields: Vec<Field>,
    trail: Vec<ArrayPos>,
    arrays: i32,
}

impl Walk {
    fn value(&mut self, val: &Value, path: &str) {
        match val {
            Value::Object(obj) => {
                for (key, member) in obj {
                    if path.is_empty() {
                        self.value(member, key);
                    } else {
                        self.value(member, &format!("{path}{PATH_SEPARATOR}{key}"));
                    }
                }
            }
            Value::Array(items) => {
                self.arrays += 1;
                let array = self.arrays;
                for (pos, item) in items.iter().enumerate() {
                    self.trail.push(ArrayPos {
                        array,
                        pos: pos as i32,
                    });
                    self.value(item, path);
                    self.trail.pop();
                }
            }
            Value::Number(n) => {
                let text = n.to_string();
                self.push(path, numbers::numeral_text(text.as_bytes()).into_owned());
            }
            scalar => self.push(path, scalar.to_string().into_bytes()),
        }
    }

    fn push(&mut self, path: &str, val: Vec<u8>) {
        self.fields.push(Field {
            path: path.to_string(),
            val,
            array_trail: self.trail.clone(),
        });
    }
}
