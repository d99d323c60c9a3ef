//! quamina: fast pattern matching for filtering JSON events, with an
//! incrementally rebuilt matcher for pattern sets that change while they
//! are being queried.
//!
//! [`Quamina`] compiles patterns into a single byte-level automaton. Each
//! added pattern is compiled on its own and union-merged into the existing
//! automaton, so matching cost grows with the size of the event and with
//! how many patterns accept its values, not with the total number of
//! patterns. Extension predicates are the exception: each one on a field is
//! evaluated against every value of that field.
//!
//! ```
//! use quamina::Quamina;
//!
//! let mut q = Quamina::new();
//! q.add_pattern("cheap", r#"{"price": [{"numeric": ["<", 10]}]}"#).unwrap();
//! q.add_pattern("red", r#"{"colour": ["red"]}"#).unwrap();
//!
//! let matches = q.matches_for_event(br#"{"price": 3.5, "colour": "blue"}"#).unwrap();
//! assert_eq!(matches, vec!["cheap"]);
//! ```
//!
//! [`IncrementalMatcher`] keeps a published snapshot queryable while pattern
//! additions and deletions are folded in and recompiled in the background.

pub mod automaton;
mod extension;
mod flattener;
mod incremental;
pub mod numbers;
mod numeric;
mod pattern;

use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;

use thiserror::Error;
use tracing::trace;

use automaton::{
    make_numeric_range_fa, make_number_fa, make_string_fa, merge_fas_with, merge_field_matchers,
    FieldMatcher, MergeMemo, PredicateTransition, SmallTable, ValueMatcher,
};
use pattern::{PatternField, ValueSpec};

pub use extension::{
    using_extension, Predicate, PredicateParser, StdPredicateParser, StringConstraint,
    StringConstraints,
};
pub use flattener::{ArrayPos, Field, Flattener, JsonFlattener};
pub use incremental::{
    IncrementalMatcher, Mutation, Policy, RebuildConfig, RebuildReport, Runner, TempoPolicy,
};
pub use numeric::{KeyInterval, NumericConstraint, NumericConstraints, Relation, FLOAT_NEAR_MAX_DELTA};
pub use pattern::PATH_SEPARATOR;
pub use tokio_util::sync::CancellationToken;

/// Errors that can occur during pattern compilation and matching
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum QuaminaError {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    #[error("invalid pattern: {0}")]
    InvalidPattern(String),
    #[error("invalid number: {0}")]
    InvalidNumber(String),
    #[error("numeric value out of range: {0}")]
    OutOfRangeNumeric(String),
    #[error("extension: {0}")]
    Extension(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("rebuild failed: {0}")]
    Rebuild(String),
    #[error("incremental matcher is closed")]
    Closed,
}

impl QuaminaError {
    /// True for cancellation, after which the whole operation may be retried.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, QuaminaError::Cancelled)
    }
}

/// The main pattern matcher
///
/// Quamina is Clone; a clone shares the compiled automaton, and adding
/// patterns to one clone never affects the other:
/// ```
/// # use quamina::Quamina;
/// let mut q = Quamina::new();
/// q.add_pattern("p1", r#"{"status": ["active"]}"#).unwrap();
///
/// let snapshot = q.clone();
/// q.add_pattern("p2", r#"{"status": ["active"]}"#).unwrap();
/// assert_eq!(snapshot.matches_for_event(br#"{"status": "active"}"#).unwrap(), vec!["p1"]);
/// ```
pub struct Quamina<X = String> {
    root: Arc<FieldMatcher<X>>,
    flattener: Arc<dyn Flattener>,
    predicate_parser: Option<Arc<dyn PredicateParser>>,
    pattern_count: usize,
}

impl<X> Clone for Quamina<X> {
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
            flattener: self.flattener.clone(),
            predicate_parser: self.predicate_parser.clone(),
            pattern_count: self.pattern_count,
        }
    }
}

impl<X: fmt::Debug> fmt::Debug for Quamina<X> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Quamina")
            .field("pattern_count", &self.pattern_count)
            .field("has_predicate_parser", &self.predicate_parser.is_some())
            .finish()
    }
}

impl<X> Quamina<X> {
    /// Start configuring a matcher.
    pub fn builder() -> QuaminaBuilder<X> {
        QuaminaBuilder::new()
    }

    /// An empty matcher with the same flattener and predicate parser.
    pub fn empty_like(&self) -> Self {
        Self {
            root: Arc::new(FieldMatcher::new()),
            flattener: self.flattener.clone(),
            predicate_parser: self.predicate_parser.clone(),
            pattern_count: 0,
        }
    }

    /// Number of pattern texts compiled into this matcher.
    pub fn pattern_count(&self) -> usize {
        self.pattern_count
    }

    /// Returns true if no patterns have been added
    pub fn is_empty(&self) -> bool {
        self.pattern_count == 0
    }
}

impl<X: Clone + Eq + Hash> Quamina<X> {
    /// Create a new Quamina instance with the JSON flattener and no
    /// predicate parser.
    pub fn new() -> Self {
        QuaminaBuilder::new().build()
    }

    /// Add a pattern with the given identifier.
    ///
    /// Patterns are additive: an identifier matches if any of its patterns
    /// does.
    pub fn add_pattern(&mut self, x: X, pattern: &str) -> Result<(), QuaminaError> {
        let fields = pattern::parse_pattern(pattern)?;
        let fragment = self.compile_fragment(x, &fields)?;

        let mut memo = MergeMemo::default();
        self.root = merge_field_matchers(&self.root, &fragment, &mut memo);
        self.pattern_count += 1;
        trace!(
            fields = fields.len(),
            merged_states = memo.len(),
            pattern_count = self.pattern_count,
            "added pattern"
        );
        Ok(())
    }

    /// Find all patterns that match the given event
    pub fn matches_for_event(&self, event: &[u8]) -> Result<Vec<X>, QuaminaError> {
        let fields = self.flattener.flatten(event)?;
        self.matches_for_fields(&fields)
    }

    /// Find all patterns that match already-flattened fields.
    ///
    /// Fields need not be sorted.
    pub fn matches_for_fields(&self, fields: &[Field]) -> Result<Vec<X>, QuaminaError> {
        if fields.windows(2).all(|w| w[0].path <= w[1].path) {
            return Ok(self.match_sorted(fields));
        }
        let mut sorted = fields.to_vec();
        sorted.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(self.match_sorted(&sorted))
    }

    fn match_sorted(&self, fields: &[Field]) -> Vec<X> {
        let mut matches = MatchSet::new();
        for index in 0..fields.len() {
            try_to_match(fields, index, &self.root, &mut matches);
        }
        matches.into_vec()
    }

    /// Build the field chain for one pattern, last field first, ending in a
    /// matcher that completes `x`.
    fn compile_fragment(&self, x: X, fields: &[PatternField]) -> Result<Arc<FieldMatcher<X>>, QuaminaError> {
        let mut next = Arc::new(FieldMatcher::with_match(x));
        for field in fields.iter().rev() {
            let vm = self.compile_values(&field.values, &next)?;
            next = Arc::new(FieldMatcher::with_transition(field.path.clone(), vm));
        }
        Ok(next)
    }

    fn compile_values(&self, values: &[ValueSpec], next: &Arc<FieldMatcher<X>>) -> Result<ValueMatcher<X>, QuaminaError> {
        let mut vm = ValueMatcher::new();
        let mut table = SmallTable::new();
        let mut memo = MergeMemo::default();

        for spec in values {
            let fragment = match spec {
                ValueSpec::Literal(text) => make_string_fa(text.as_bytes(), next.clone()),
                ValueSpec::Number(canonical) => {
                    vm.has_numbers = true;
                    make_number_fa(canonical, next.clone())
                }
                ValueSpec::Numeric(constraints) if constraints.is_approximate() => {
                    vm.predicates.push(Arc::new(PredicateTransition {
                        predicate: extension::numeric_predicate(constraints.clone()),
                        next: next.clone(),
                    }));
                    continue;
                }
                ValueSpec::Numeric(constraints) => {
                    vm.has_numbers = true;
                    make_numeric_range_fa(&constraints.intervals()?, next.clone())
                }
                ValueSpec::Extension(spec) => {
                    let predicate = self.parse_extension(spec)?;
                    vm.predicates.push(Arc::new(PredicateTransition {
                        predicate,
                        next: next.clone(),
                    }));
                    continue;
                }
            };
            table = merge_fas_with(&table, &fragment, &mut memo);
        }

        vm.start_table = table;
        Ok(vm)
    }

    fn parse_extension(&self, spec: &str) -> Result<Predicate, QuaminaError> {
        let parser = self
            .predicate_parser
            .as_ref()
            .ok_or_else(|| QuaminaError::Extension("no predicate parser configured".into()))?;
        parser.parse(spec.as_bytes()).map_err(|e| match e {
            QuaminaError::Extension(_) => e,
            other => QuaminaError::Extension(format!("parsing {spec}: {other}")),
        })
    }
}

impl<X: Clone + Eq + Hash> Default for Quamina<X> {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`Quamina`].
pub struct QuaminaBuilder<X = String> {
    flattener: Option<Arc<dyn Flattener>>,
    predicate_parser: Option<Arc<dyn PredicateParser>>,
    _ids: PhantomData<fn() -> X>,
}

impl<X> Default for QuaminaBuilder<X> {
    fn default() -> Self {
        Self::new()
    }
}

impl<X> QuaminaBuilder<X> {
    pub fn new() -> Self {
        Self {
            flattener: None,
            predicate_parser: None,
            _ids: PhantomData,
        }
    }

    /// Use a custom flattener instead of [`JsonFlattener`].
    pub fn with_flattener(mut self, flattener: Arc<dyn Flattener>) -> Self {
        self.flattener = Some(flattener);
        self
    }

    /// Enable `{"extension": ...}` clauses, parsed by `parser`.
    pub fn with_predicate_parser(mut self, parser: Arc<dyn PredicateParser>) -> Self {
        self.predicate_parser = Some(parser);
        self
    }

    pub fn build(self) -> Quamina<X> {
        Quamina {
            root: Arc::new(FieldMatcher::new()),
            flattener: self.flattener.unwrap_or_else(|| Arc::new(JsonFlattener::new())),
            predicate_parser: self.predicate_parser,
            pattern_count: 0,
        }
    }
}

/// Match fields from `index` on, starting at `state`.
fn try_to_match<X: Clone + Eq + Hash>(
    fields: &[Field],
    index: usize,
    state: &Arc<FieldMatcher<X>>,
    matches: &mut MatchSet<X>,
) {
    let field = &fields[index];
    let mut next_states = Vec::new();
    state.transition_on(&field.path, &field.val, &mut next_states);

    for next_state in &next_states {
        for m in &next_state.matches {
            matches.add(m.clone());
        }
        for next_index in (index + 1)..fields.len() {
            if no_array_trail_conflict(&field.array_trail, &fields[next_index].array_trail) {
                try_to_match(fields, next_index, next_state, matches);
            }
        }
    }
}

/// Check if two array trails have no conflicts
fn no_array_trail_conflict(from: &[ArrayPos], to: &[ArrayPos]) -> bool {
    for from_pos in from {
        for to_pos in to {
            if from_pos.array == to_pos.array && from_pos.pos != to_pos.pos {
                return false;
            }
        }
    }
    true
}

/// A set of matches (deduplicated, in first-seen order)
struct MatchSet<X> {
    seen: HashSet<X>,
    matches: Vec<X>,
}

impl<X: Clone + Eq + Hash> MatchSet<X> {
    fn new() -> Self {
        Self {
            seen: HashSet::new(),
            matches: Vec::new(),
        }
    }

    fn add(&mut self, x: X) {
        if self.seen.insert(x.clone()) {
            self.matches.push(x);
        }
    }

    fn into_vec(self) -> Vec<X> {
        self.matches
    }
}
