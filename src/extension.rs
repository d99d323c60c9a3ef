//! Extension predicates.
//!
//! A pattern clause `{"extension": <spec>}` is handed to the matcher's
//! [`PredicateParser`], which turns the spec into an opaque [`Predicate`]
//! over a field's raw value bytes. Extension terminals are evaluated for
//! every value of their field that reaches them, alongside the literal and
//! numeric automata.
//!
//! ```
//! use std::sync::Arc;
//! use quamina::{Quamina, StdPredicateParser, using_extension};
//!
//! let mut q = Quamina::builder()
//!     .with_predicate_parser(Arc::new(StdPredicateParser))
//!     .build();
//! let pattern = using_extension(r#"{"likes":[{"length":5}]}"#, &["length"]);
//! q.add_pattern("five", &pattern).unwrap();
//! assert_eq!(q.matches_for_event(br#"{"likes":"tacos"}"#).unwrap(), vec!["five"]);
//! ```

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::numeric::{NumericConstraints, Relation};
use crate::QuaminaError;

/// A boolean function over a field's raw value bytes. Strings arrive with
/// their JSON quotes.
pub type Predicate = Arc<dyn Fn(&[u8]) -> bool + Send + Sync>;

/// Turns an extension clause's spec into a [`Predicate`].
pub trait PredicateParser: Send + Sync {
    fn parse(&self, spec: &[u8]) -> Result<Predicate, QuaminaError>;
}

impl<F> PredicateParser for F
where
    F: Fn(&[u8]) -> Result<Predicate, QuaminaError> + Send + Sync,
{
    fn parse(&self, spec: &[u8]) -> Result<Predicate, QuaminaError> {
        self(spec)
    }
}

/// A predicate from the approximate numeric relations, which have no
/// automaton form.
pub(crate) fn numeric_predicate(constraints: NumericConstraints) -> Predicate {
    Arc::new(move |bs: &[u8]| match serde_json::from_slice::<f64>(bs) {
        Ok(x) => constraints.matches(x),
        Err(_) => false,
    })
}

/// One relation over strings, compared bytewise.
#[derive(Clone, Debug, PartialEq)]
pub struct StringConstraint {
    pub rel: Relation,
    pub arg: String,
}

/// A conjunction of string relations.
#[derive(Clone, Debug, PartialEq)]
pub struct StringConstraints(pub Vec<StringConstraint>);

impl StringConstraints {
    /// Compile a flat `[rel, arg, rel, arg, ...]` list.
    pub fn compile(spec: &[Value]) -> Result<StringConstraints, QuaminaError> {
        if spec.is_empty() {
            return Err(QuaminaError::Extension(
                "need at least one string constraint".into(),
            ));
        }
        if spec.len() % 2 != 0 {
            return Err(QuaminaError::Extension(format!(
                "odd number of args: {}",
                spec.len()
            )));
        }

        let mut constraints = Vec::with_capacity(spec.len() / 2);
        for pair in spec.chunks(2) {
            let rel = Relation::from_value(&pair[0])?;
            let Value::String(arg) = &pair[1] else {
                return Err(QuaminaError::Extension(format!("{} isn't a string", pair[1])));
            };
            constraints.push(StringConstraint {
                rel,
                arg: arg.clone(),
            });
        }
        Ok(StringConstraints(constraints))
    }

    /// True if every relation holds. `~=` is not defined for strings and
    /// never holds.
    pub fn matches(&self, x: &str) -> bool {
        self.0.iter().all(|c| {
            let arg = c.arg.as_str();
            match c.rel {
                Relation::Lt => x < arg,
                Relation::Gt => x > arg,
                Relation::Lte => x <= arg,
                Relation::Gte => x >= arg,
                Relation::Eq => x == arg,
                Relation::Ne => x != arg,
                Relation::Near => false,
            }
        })
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct StdSpec {
    numeric: Option<Vec<Value>>,
    string: Option<Vec<Value>>,
    length: Option<usize>,
    #[serde(rename = "equals-insensitive")]
    equals_insensitive: Option<Vec<String>>,
}

/// The standard extension vocabulary.
///
/// Accepts a JSON object with exactly one of:
/// - `numeric`: a numeric relation list, e.g. `["<", 10, ">=", 2]`
/// - `string`: a string relation list, e.g. `[">=", "m"]`
/// - `length`: the exact length in bytes of a string value
/// - `equals-insensitive`: strings to compare without regard to case
#[derive(Clone, Copy, Debug, Default)]
pub struct StdPredicateParser;

impl StdPredicateParser {
    /// Properties handled by this parser, for use with [`using_extension`].
    pub const PROPERTIES: [&'static str; 4] = ["numeric", "string", "length", "equals-insensitive"];
}

impl PredicateParser for StdPredicateParser {
    fn parse(&self, spec: &[u8]) -> Result<Predicate, QuaminaError> {
        let parsed: StdSpec = serde_json::from_slice(spec).map_err(|e| {
            QuaminaError::Extension(format!(
                "failed to parse {}: {e}",
                String::from_utf8_lossy(spec)
            ))
        })?;

        let given = [
            parsed.numeric.is_some(),
            parsed.string.is_some(),
            parsed.length.is_some(),
            parsed.equals_insensitive.is_some(),
        ];
        if given.iter().filter(|&&g| g).count() != 1 {
            return Err(QuaminaError::Extension(
                "standard predicates require exactly one field".into(),
            ));
        }

        if let Some(numeric) = parsed.numeric {
            let constraints = NumericConstraints::compile(&numeric)
                .map_err(|e| QuaminaError::Extension(format!("numeric: {e}")))?;
            return Ok(numeric_predicate(constraints));
        }

        if let Some(string) = parsed.string {
            let constraints = StringConstraints::compile(&string)?;
            return Ok(Arc::new(move |bs: &[u8]| match serde_json::from_slice::<String>(bs) {
                Ok(s) => constraints.matches(&s),
                Err(_) => false,
            }));
        }

        if let Some(length) = parsed.length {
            return Ok(Arc::new(move |bs: &[u8]| {
                matches!(serde_json::from_slice::<String>(bs), Ok(s) if s.len() == length)
            }));
        }

        let allowed: Vec<String> = parsed
            .equals_insensitive
            .unwrap_or_default()
            .iter()
            .map(|s| s.to_lowercase())
            .collect();
        Ok(Arc::new(move |bs: &[u8]| match serde_json::from_slice::<String>(bs) {
            Ok(s) => {
                let s = s.to_lowercase();
                allowed.iter().any(|a| *a == s)
            }
            Err(_) => false,
        }))
    }
}

/// Rewrite clauses naming one of `props` into extension form.
///
/// `{"likes":[{"numeric":["<",42]}]}` with `props = ["numeric"]` becomes
/// `{"likes":[{"extension":{"numeric":["<",42]}}]}`. Only single-element
/// value arrays whose object has exactly one key are rewritten. Text that
/// isn't JSON is returned unchanged.
pub fn using_extension(pattern: &str, props: &[&str]) -> String {
    match serde_json::from_str::<Value>(pattern) {
        Ok(parsed) => {
            let rewritten = rewrite(parsed, props);
            serde_json::to_string(&rewritten).unwrap_or_else(|_| pattern.to_string())
        }
        Err(_) => pattern.to_string(),
    }
}

fn rewrite(value: Value, props: &[&str]) -> Value {
    match value {
        Value::Array(mut items) => {
            if let [Value::Object(obj)] = items.as_slice() {
                let demoted = match obj.iter().next() {
                    Some((prop, spec)) if obj.len() == 1 && props.contains(&prop.as_str()) => {
                        let mut inner = Map::new();
                        inner.insert(prop.clone(), spec.clone());
                        let mut outer = Map::new();
                        outer.insert("extension".to_string(), Value::Object(inner));
                        Some(Value::Object(outer))
                    }
                    _ => None,
                };
                if let Some(demoted) = demoted {
                    items[0] = demoted;
                }
            }
            Value::Array(items)
        }
        Value::Object(obj) => Value::Object(
            obj.into_iter()
                .map(|(k, v)| (k, rewrite(v, props)))
                .collect(),
        ),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(spec: &str) -> Result<Predicate, QuaminaError> {
        StdPredicateParser.parse(spec.as_bytes())
    }

    fn accepts(p: &Predicate, val: &str) -> bool {
        p(val.as_bytes())
    }

    #[test]
    fn test_using_extension_rewrites() {
        let props = ["numeric", "weird", "equals-insensitive", "foo"];
        let cases = [
            (
                r#"{"likes":[{"numeric":["<",10,">",3]}]}"#,
                r#"{"likes":[{"extension":{"numeric":["<",10,">",3]}}]}"#,
            ),
            (
                r#"{"likes":[{"foo":{"likes":"tacos"}}]}"#,
                r#"{"likes":[{"extension":{"foo":{"likes":"tacos"}}}]}"#,
            ),
            (
                r#"{"likes":[{"equals-insensitive":["tacos"]}]}"#,
                r#"{"likes":[{"extension":{"equals-insensitive":["tacos"]}}]}"#,
            ),
        ];
        for (pattern, want) in cases {
            assert_eq!(using_extension(pattern, &props), want);
        }
    }

    #[test]
    fn test_using_extension_leaves_others_alone() {
        let props = ["numeric"];
        // Two alternatives: not rewritten
        let pattern = r#"{"a":[{"numeric":["<",1]},2]}"#;
        assert_eq!(using_extension(pattern, &props), pattern);
        assert_eq!(using_extension("not json", &props), "not json");
    }

    #[test]
    fn test_std_numeric() {
        let p = parse(r#"{"numeric":["<",200,">",100]}"#).unwrap();
        assert!(accepts(&p, "1.23e2"));
        assert!(!accepts(&p, "1.24e3"));
        assert!(!accepts(&p, "\"150\""));
    }

    #[test]
    fn test_std_string() {
        let p = parse(r#"{"string":[">=","m","<","p"]}"#).unwrap();
        assert!(accepts(&p, "\"mango\""));
        assert!(accepts(&p, "\"oats\""));
        assert!(!accepts(&p, "\"pear\""));
        assert!(!accepts(&p, "12"));

        let near = parse(r#"{"string":["~=","x"]}"#).unwrap();
        assert!(!accepts(&near, "\"x\""));
    }

    #[test]
    fn test_std_length_and_case() {
        let p = parse(r#"{"length":5}"#).unwrap();
        assert!(accepts(&p, "\"tacos\""));
        assert!(!accepts(&p, "\"queso!\""));

        let p = parse(r#"{"equals-insensitive":["Queso","nachos"]}"#).unwrap();
        assert!(accepts(&p, "\"QUESO\""));
        assert!(accepts(&p, "\"Nachos\""));
        assert!(!accepts(&p, "\"salsa\""));
    }

    #[test]
    fn test_std_requires_exactly_one_field() {
        assert!(parse(r#"{}"#).is_err());
        assert!(parse(r#"{"length":3,"numeric":["<",1]}"#).is_err());
        assert!(parse(r#"{"colour":"red"}"#).is_err());
        assert!(parse(r#"{"numeric":["<"]}"#).is_err());
        assert!(parse("nope").is_err());
    }

    #[test]
    fn test_string_constraints_compile_errors() {
        assert!(StringConstraints::compile(&[]).is_err());
        assert!(StringConstraints::compile(&[json!("<")]).is_err());
        assert!(StringConstraints::compile(&[json!("<"), json!(3)]).is_err());
        assert!(StringConstraints::compile(&[json!("=<"), json!("a")]).is_err());
    }

    #[test]
    fn test_closure_is_a_parser() {
        let parser = |spec: &[u8]| -> Result<Predicate, QuaminaError> {
            let want = spec.to_vec();
            Ok(Arc::new(move |bs: &[u8]| bs == want.as_slice()))
        };
        let p = parser.parse(b"\"x\"").unwrap();
        assert!(accepts(&p, "\"x\""));
        assert!(!accepts(&p, "\"y\""));
    }
}
