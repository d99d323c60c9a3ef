//! Automaton traversal over one value.

use std::sync::Arc;

use super::field_matcher::FieldMatcher;
use super::small_table::{FaState, SmallTable, VALUE_TERMINATOR};

/// Run `val` followed by `VALUE_TERMINATOR` through the automaton starting
/// at `table`, appending the field transitions of every state visited.
///
/// Merged automata stay deterministic on bytes; only terminals fan out into
/// several field matchers.
pub fn traverse_dfa<X>(table: &SmallTable<FaState<X>>, val: &[u8], transitions: &mut Vec<Arc<FieldMatcher<X>>>) {
    let mut table = table;
    for &byte in val.iter().chain(std::iter::once(&VALUE_TERMINATOR)) {
        let Some(state) = table.step(byte) else {
            return;
        };
        transitions.extend(state.field_transitions.iter().cloned());
        table = &state.table;
    }
}
