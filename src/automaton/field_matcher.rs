//! Field and value matchers.
//!
//! A `FieldMatcher` anchors matching at one point of a pattern's field
//! chain: for each field path it holds a `ValueMatcher`, whose automaton
//! leads to the next `FieldMatcher`. Pattern ids are recorded on the
//! matcher reached after a pattern's last field.
//!
//! All matchers are immutable once built. Adding a pattern builds a new
//! chain for it alone and merges it with the existing root, sharing every
//! sub-structure the merge doesn't touch.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::fa_builders::{merge_fas_with, MergeMemo};
use super::nfa::traverse_dfa;
use super::small_table::{FaState, SmallTable, NUMBER_MARKER};
use crate::extension::Predicate;
use crate::numbers;

/// Matches field paths and dispatches to value matchers.
pub struct FieldMatcher<X> {
    /// Map from field paths to value matchers
    pub transitions: HashMap<String, Arc<ValueMatcher<X>>>,
    /// Pattern identifiers completed on arriving here
    pub matches: Vec<X>,
}

impl<X> Default for FieldMatcher<X> {
    fn default() -> Self {
        Self::new()
    }
}

impl<X: fmt::Debug> fmt::Debug for FieldMatcher<X> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut paths: Vec<&String> = self.transitions.keys().collect();
        paths.sort();
        f.debug_struct("FieldMatcher")
            .field("paths", &paths)
            .field("matches", &self.matches)
            .finish()
    }
}

impl<X> FieldMatcher<X> {
    pub fn new() -> Self {
        Self {
            transitions: HashMap::new(),
            matches: Vec::new(),
        }
    }

    /// A matcher that completes the given pattern id.
    pub fn with_match(x: X) -> Self {
        Self {
            transitions: HashMap::new(),
            matches: vec![x],
        }
    }

    /// A matcher with a single field path.
    pub fn with_transition(path: String, vm: ValueMatcher<X>) -> Self {
        let mut transitions = HashMap::with_capacity(1);
        transitions.insert(path, Arc::new(vm));
        Self {
            transitions,
            matches: Vec::new(),
        }
    }

    /// Transition on a field, appending the next field matchers to `out`.
    pub fn transition_on(&self, path: &str, value: &[u8], out: &mut Vec<Arc<FieldMatcher<X>>>) {
        if let Some(vm) = self.transitions.get(path) {
            vm.transition_on(value, out);
        }
    }
}

/// An extension terminal: values accepted by `predicate` move on to `next`.
pub struct PredicateTransition<X> {
    pub predicate: Predicate,
    pub next: Arc<FieldMatcher<X>>,
}

/// Matches one field's values using a byte automaton plus any predicates.
pub struct ValueMatcher<X> {
    /// The automaton start table
    pub start_table: SmallTable<FaState<X>>,
    /// Extension terminals, evaluated against every value of the field
    pub predicates: Vec<Arc<PredicateTransition<X>>>,
    /// Whether the automaton holds canonicalized numbers
    pub has_numbers: bool,
}

impl<X> Default for ValueMatcher<X> {
    fn default() -> Self {
        Self::new()
    }
}

impl<X> ValueMatcher<X> {
    pub fn new() -> Self {
        Self {
            start_table: SmallTable::new(),
            predicates: Vec::new(),
            has_numbers: false,
        }
    }

    pub fn from_table(start_table: SmallTable<FaState<X>>, has_numbers: bool) -> Self {
        Self {
            start_table,
            predicates: Vec::new(),
            has_numbers,
        }
    }

    pub fn from_predicate(predicate: Predicate, next: Arc<FieldMatcher<X>>) -> Self {
        Self {
            start_table: SmallTable::new(),
            predicates: vec![Arc::new(PredicateTransition { predicate, next })],
            has_numbers: false,
        }
    }

    /// Transition on a value, appending the next field matchers to `out`.
    ///
    /// Numbers are run through the automaton in canonical form when it holds
    /// any; a number that can't be canonicalized is matched by its
    /// [`numbers::numeral_text`] spelling.
    pub fn transition_on(&self, value: &[u8], out: &mut Vec<Arc<FieldMatcher<X>>>) {
        if !numbers::is_number(value) {
            traverse_dfa(&self.start_table, value, out);
        } else {
            let canonical = if self.has_numbers {
                numbers::canonicalize(value).ok()
            } else {
                None
            };
            match canonical {
                Some(canonical) => {
                    let mut marked = Vec::with_capacity(canonical.len() + 1);
                    marked.push(NUMBER_MARKER);
                    marked.extend_from_slice(canonical.as_bytes());
                    traverse_dfa(&self.start_table, &marked, out);
                }
                None => traverse_dfa(&self.start_table, &numbers::numeral_text(value), out),
            }
        }

        for pt in &self.predicates {
            if (pt.predicate)(value) {
                out.push(pt.next.clone());
            }
        }
    }
}

/// Union of two value matchers.
pub fn merge_value_matchers<X>(a: &ValueMatcher<X>, b: &ValueMatcher<X>, memo: &mut MergeMemo<X>) -> ValueMatcher<X> {
    let start_table = merge_fas_with(&a.start_table, &b.start_table, memo);
    let mut predicates = a.predicates.clone();
    for pt in &b.predicates {
        if !predicates.iter().any(|have| Arc::ptr_eq(have, pt)) {
            predicates.push(pt.clone());
        }
    }
    ValueMatcher {
        start_table,
        predicates,
        has_numbers: a.has_numbers || b.has_numbers,
    }
}

/// Union of two field matchers.
///
/// Paths present on one side only are shared; paths present on both have
/// their value matchers merged. Completed ids are unioned.
pub fn merge_field_matchers<X: Clone + PartialEq>(
    a: &Arc<FieldMatcher<X>>,
    b: &Arc<FieldMatcher<X>>,
    memo: &mut MergeMemo<X>,
) -> Arc<FieldMatcher<X>> {
    if Arc::ptr_eq(a, b) {
        return a.clone();
    }

    let mut transitions = a.transitions.clone();
    for (path, vb) in &b.transitions {
        let merged = match transitions.get(path) {
            Some(va) if Arc::ptr_eq(va, vb) => continue,
            Some(va) => Arc::new(merge_value_matchers(va, vb, memo)),
            None => vb.clone(),
        };
        transitions.insert(path.clone(), merged);
    }

    let mut matches = a.matches.clone();
    for x in &b.matches {
        if !matches.contains(x) {
            matches.push(x.clone());
        }
    }

    Arc::new(FieldMatcher {
        transitions,
        matches,
    })
}
