//! Numeric relation constraints.
//!
//! A constraint list such as `["<", 10, ">=", 2]` is a conjunction of
//! relations. Exact relations are turned into a set of intervals over
//! canonical keys (see [`crate::numbers`]) and compiled into byte-range
//! automata. `~=` is approximate and can only be evaluated as a float
//! comparison at match time.

use serde_json::Value;

use crate::numbers::{self, CANONICAL_WIDTH, MAX_KEY};
use crate::QuaminaError;

/// Maximum difference for `~=` to consider two numbers equal.
pub const FLOAT_NEAR_MAX_DELTA: f64 = 1e-08;

/// A comparison operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Relation {
    Lt,
    Gt,
    Lte,
    Gte,
    Eq,
    Ne,
    Near,
}

impl Relation {
    /// Parse an operator: `<`, `>`, `<=`, `>=`, `==`/`=`, `!=`/`<>`, `~=`.
    pub fn parse(op: &str) -> Option<Relation> {
        Some(match op {
            "<" => Relation::Lt,
            ">" => Relation::Gt,
            "<=" => Relation::Lte,
            ">=" => Relation::Gte,
            "==" | "=" => Relation::Eq,
            "!=" | "<>" => Relation::Ne,
            "~=" => Relation::Near,
            _ => return None,
        })
    }

    pub(crate) fn from_value(rel: &Value) -> Result<Relation, QuaminaError> {
        let op = rel
            .as_str()
            .ok_or_else(|| QuaminaError::InvalidPattern(format!("bad relation {rel}")))?;
        Relation::parse(op)
            .ok_or_else(|| QuaminaError::InvalidPattern(format!("unknown relation {op}")))
    }
}

/// One relation with its argument, keeping the numeral as written.
#[derive(Clone, Debug, PartialEq)]
pub struct NumericConstraint {
    pub rel: Relation,
    pub arg: f64,
    pub numeral: String,
}

impl NumericConstraint {
    pub fn matches(&self, x: f64) -> bool {
        match self.rel {
            Relation::Lt => x < self.arg,
            Relation::Gt => x > self.arg,
            Relation::Lte => x <= self.arg,
            Relation::Gte => x >= self.arg,
            Relation::Eq => x == self.arg,
            Relation::Ne => x != self.arg,
            Relation::Near => (x - self.arg).abs() < FLOAT_NEAR_MAX_DELTA,
        }
    }

    /// Key intervals satisfying this relation. Not defined for `~=`.
    fn intervals(&self) -> Result<Vec<KeyInterval>, QuaminaError> {
        let k = numbers::canonical_key(self.numeral.as_bytes())?;
        let below = k.checked_sub(1).map(|hi| KeyInterval::new(0, hi));
        let above = k.checked_add(1).filter(|&lo| lo <= MAX_KEY).map(|lo| KeyInterval::new(lo, MAX_KEY));
        Ok(match self.rel {
            Relation::Lt => below.into_iter().collect(),
            Relation::Lte => vec![KeyInterval::new(0, k)],
            Relation::Gt => above.into_iter().collect(),
            Relation::Gte => vec![KeyInterval::new(k, MAX_KEY)],
            Relation::Eq => vec![KeyInterval::new(k, k)],
            Relation::Ne => below.into_iter().chain(above).collect(),
            Relation::Near => {
                return Err(QuaminaError::InvalidPattern(
                    "~= has no exact key interval".into(),
                ))
            }
        })
    }
}

/// A conjunction of numeric constraints.
#[derive(Clone, Debug, PartialEq)]
pub struct NumericConstraints(pub Vec<NumericConstraint>);

impl NumericConstraints {
    /// Compile a flat `[rel, arg, rel, arg, ...]` list.
    pub fn compile(spec: &[Value]) -> Result<NumericConstraints, QuaminaError> {
        if spec.is_empty() {
            return Err(QuaminaError::InvalidPattern(
                "need at least one numeric constraint".into(),
            ));
        }
        if spec.len() % 2 != 0 {
            return Err(QuaminaError::InvalidPattern(format!(
                "odd number of numeric args: {}",
                spec.len()
            )));
        }

        let mut constraints = Vec::with_capacity(spec.len() / 2);
        for pair in spec.chunks(2) {
            let rel = Relation::from_value(&pair[0])?;
            let Value::Number(n) = &pair[1] else {
                return Err(QuaminaError::InvalidPattern(format!(
                    "{} isn't numeric enough",
                    pair[1]
                )));
            };
            let arg = n
                .as_f64()
                .ok_or_else(|| QuaminaError::InvalidNumber(n.to_string()))?;
            constraints.push(NumericConstraint {
                rel,
                arg,
                numeral: n.to_string(),
            });
        }
        Ok(NumericConstraints(constraints))
    }

    /// True if every constraint holds for `x`.
    pub fn matches(&self, x: f64) -> bool {
        self.0.iter().all(|c| c.matches(x))
    }

    /// True if the list can only be evaluated as a float comparison.
    pub fn is_approximate(&self) -> bool {
        self.0.iter().any(|c| c.rel == Relation::Near)
    }

    /// The sorted, disjoint key intervals satisfying every constraint.
    ///
    /// Fails with `OutOfRangeNumeric` when an argument can't be canonicalized.
    pub fn intervals(&self) -> Result<Vec<KeyInterval>, QuaminaError> {
        let mut acc = vec![KeyInterval::new(0, MAX_KEY)];
        for constraint in &self.0 {
            acc = intersect(&acc, &constraint.intervals()?);
        }
        Ok(acc)
    }
}

/// An inclusive range of canonical keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeyInterval {
    pub lo: u64,
    pub hi: u64,
}

impl KeyInterval {
    pub fn new(lo: u64, hi: u64) -> Self {
        debug_assert!(lo <= hi);
        Self { lo, hi }
    }

    pub fn contains(&self, key: u64) -> bool {
        self.lo <= key && key <= self.hi
    }

    pub fn lo_digits(&self) -> [u8; CANONICAL_WIDTH] {
        numbers::key_digits(self.lo)
    }

    pub fn hi_digits(&self) -> [u8; CANONICAL_WIDTH] {
        numbers::key_digits(self.hi)
    }
}

/// Intersect two sorted, disjoint interval lists.
fn intersect(a: &[KeyInterval], b: &[KeyInterval]) -> Vec<KeyInterval> {
    let mut out = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        let lo = a[i].lo.max(b[j].lo);
        let hi = a[i].hi.min(b[j].hi);
        if lo <= hi {
            out.push(KeyInterval::new(lo, hi));
        }
        if a[i].hi < b[j].hi {
            i += 1;
        } else {
            j += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn compile(spec: Value) -> Result<NumericConstraints, QuaminaError> {
        match spec {
            Value::Array(items) => NumericConstraints::compile(&items),
            _ => panic!("spec must be an array"),
        }
    }

    fn key(n: &str) -> u64 {
        numbers::canonical_key(n.as_bytes()).unwrap()
    }

    #[test]
    fn test_relation_aliases() {
        assert_eq!(Relation::parse("=="), Some(Relation::Eq));
        assert_eq!(Relation::parse("="), Some(Relation::Eq));
        assert_eq!(Relation::parse("!="), Some(Relation::Ne));
        assert_eq!(Relation::parse("<>"), Some(Relation::Ne));
        assert_eq!(Relation::parse("~="), Some(Relation::Near));
        assert_eq!(Relation::parse("=>"), None);
    }

    #[test]
    fn test_compile_errors() {
        assert!(compile(json!([])).is_err());
        assert!(compile(json!(["<"])).is_err());
        assert!(compile(json!([3, 4])).is_err());
        assert!(compile(json!(["<", "four"])).is_err());
        assert!(compile(json!(["=~", 4])).is_err());
    }

    #[test]
    fn test_float_matching() {
        let cs = compile(json!(["<", 200, ">", 100])).unwrap();
        assert!(cs.matches(123.0));
        assert!(!cs.matches(1240.0));
        assert!(!cs.matches(100.0));

        let near = compile(json!(["~=", 0.3])).unwrap();
        assert!(near.is_approximate());
        assert!(near.matches(0.1 + 0.2));
        assert!(!near.matches(0.31));
    }

    #[test]
    fn test_intervals_conjunction() {
        let cs = compile(json!([">", 100, "<=", 200])).unwrap();
        let intervals = cs.intervals().unwrap();
        assert_eq!(intervals, vec![KeyInterval::new(key("100") + 1, key("200"))]);
    }

    #[test]
    fn test_intervals_not_equal_splits() {
        let cs = compile(json!(["!=", 5])).unwrap();
        let intervals = cs.intervals().unwrap();
        assert_eq!(intervals.len(), 2);
        assert!(!intervals.iter().any(|i| i.contains(key("5"))));
        assert!(intervals.iter().any(|i| i.contains(key("4.999"))));
        assert!(intervals.iter().any(|i| i.contains(key("5.001"))));
    }

    #[test]
    fn test_intervals_unsatisfiable() {
        let cs = compile(json!(["<", 1, ">", 2])).unwrap();
        assert!(cs.intervals().unwrap().is_empty());
    }

    #[test]
    fn test_intervals_out_of_range_argument() {
        let cs = compile(json!(["<", 1e10])).unwrap();
        assert!(matches!(cs.intervals(), Err(QuaminaError::OutOfRangeNumeric(_))));
    }
}
