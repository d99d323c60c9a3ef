//! Automaton-based pattern matching engine
//!
//! Patterns compile into a chain of field matchers, each holding a
//! byte-level automaton per field path. The key components are:
//!
//! - `SmallTable`: A compact, run-length encoded byte transition table
//! - `FaState`: A state in the finite automaton
//! - `FieldMatcher`: Matches field names and dispatches to value matchers
//! - `ValueMatcher`: Matches field values using the automaton
//!
//! # Module Organization
//!
//! - `small_table`: Core data structures (SmallTable, FaState)
//! - `fa_builders`: FA construction functions (make_*_fa, merge_fas)
//! - `nfa`: traversal over a value
//! - `field_matcher`: FieldMatcher, ValueMatcher and their merge

mod fa_builders;
mod field_matcher;
mod nfa;
mod small_table;

pub use small_table::{FaState, SmallTable, UnpackedTable, BYTE_CEILING, NUMBER_MARKER, VALUE_TERMINATOR};

pub use nfa::traverse_dfa;

pub use fa_builders::{
    make_number_fa, make_numeric_range_fa, make_string_fa, merge_fas, merge_fas_with, MergeMemo,
};

pub use field_matcher::{
    merge_field_matchers, merge_value_matchers, FieldMatcher, PredicateTransition, ValueMatcher,
};

#[cfg(test)]
mod tests;
