//! FA (Finite Automaton) construction functions.
//!
//! - `make_string_fa`: exact match of a byte sequence
//! - `make_number_fa`: exact match of a canonicalized number
//! - `make_numeric_range_fa`: canonicalized numbers inside a set of key intervals
//! - `merge_fas`: union of two automata

use std::sync::Arc;

use rustc_hash::FxHashMap;

use super::field_matcher::FieldMatcher;
use super::small_table::{FaState, RunBuilder, SmallTable, NUMBER_MARKER, VALUE_TERMINATOR};
use crate::numbers::CANONICAL_WIDTH;
use crate::numeric::KeyInterval;

/// Memo for one merge pass, keyed by the addresses of the two input states.
///
/// Inputs are pinned for the memo's lifetime so an address cannot be
/// reused by a later allocation while its key is live.
pub struct MergeMemo<X> {
    merged: FxHashMap<(usize, usize), Arc<FaState<X>>>,
    pinned: Vec<Arc<FaState<X>>>,
}

impl<X> Default for MergeMemo<X> {
    fn default() -> Self {
        Self {
            merged: FxHashMap::default(),
            pinned: Vec::new(),
        }
    }
}

impl<X> MergeMemo<X> {
    /// Number of distinct state pairs merged so far.
    pub fn len(&self) -> usize {
        self.merged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.merged.is_empty()
    }
}

/// Build a string-matching FA from a byte sequence.
///
/// Creates a chain of states where each byte transitions to the next, with a
/// final transition on `VALUE_TERMINATOR` to a terminal state.
pub fn make_string_fa<X>(val: &[u8], next_field: Arc<FieldMatcher<X>>) -> SmallTable<FaState<X>> {
    let terminal = Arc::new(FaState::terminal(next_field));
    let mut table = SmallTable::new();
    table.add_byte_step(VALUE_TERMINATOR, terminal);

    for &byte in val.iter().rev() {
        let next = Arc::new(FaState::with_table(table));
        table = SmallTable::new();
        table.add_byte_step(byte, next);
    }
    table
}

/// Build an FA matching exactly one canonical number.
pub fn make_number_fa<X>(canonical: &str, next_field: Arc<FieldMatcher<X>>) -> SmallTable<FaState<X>> {
    let mut val = Vec::with_capacity(canonical.len() + 1);
    val.push(NUMBER_MARKER);
    val.extend_from_slice(canonical.as_bytes());
    make_string_fa(&val, next_field)
}

/// Build an FA accepting every canonical number whose key lies in one of
/// `intervals`. An empty interval list yields an FA that matches nothing.
pub fn make_numeric_range_fa<X>(
    intervals: &[KeyInterval],
    next_field: Arc<FieldMatcher<X>>,
) -> SmallTable<FaState<X>> {
    let terminal = Arc::new(FaState::terminal(next_field));
    let mut end_table = SmallTable::new();
    end_table.add_byte_step(VALUE_TERMINATOR, terminal);
    let free = free_digit_states(Arc::new(FaState::with_table(end_table)));

    let mut memo = MergeMemo::default();
    let mut digits = SmallTable::new();
    for interval in intervals {
        let one = make_interval_table(interval, &free);
        digits = merge_fas_with(&digits, &one, &mut memo);
    }
    if digits.is_empty() {
        return SmallTable::new();
    }

    let mut table = SmallTable::new();
    table.add_byte_step(NUMBER_MARKER, Arc::new(FaState::with_table(digits)));
    table
}

/// `free[p]` accepts any digits from position `p` to the end of a canonical
/// number, then the terminator.
fn free_digit_states<X>(end: Arc<FaState<X>>) -> Vec<Arc<FaState<X>>> {
    let mut free = vec![end];
    for _ in 0..CANONICAL_WIDTH {
        let next = free[free.len() - 1].clone();
        let mut table = SmallTable::new();
        table.add_range_steps(b'0' as usize, b'9' as usize + 1, next);
        free.push(Arc::new(FaState::with_table(table)));
    }
    free.reverse();
    free
}

/// Digit automaton for the inclusive range `[lo, hi]` over fixed-width keys.
///
/// At each position the walk is either still equal to the lower bound's
/// prefix, the upper bound's prefix, both, or strictly between; the last
/// case continues into the shared `free` chain.
fn make_interval_table<X>(interval: &KeyInterval, free: &[Arc<FaState<X>>]) -> SmallTable<FaState<X>> {
    let lo = interval.lo_digits();
    let hi = interval.hi_digits();
    let end = free[CANONICAL_WIDTH].clone();
    // Past the first position where the bounds differ, no walk can still
    // equal both prefixes.
    let split = lo
        .iter()
        .zip(hi.iter())
        .position(|(l, h)| l != h)
        .unwrap_or(CANONICAL_WIDTH);

    let mut lo_state = end.clone();
    let mut hi_state = end.clone();
    let mut both_state = end;

    for p in (0..CANONICAL_WIDTH).rev() {
        let (l, h) = (lo[p], hi[p]);
        let inner = &free[p + 1];

        let mut lo_table = SmallTable::new();
        lo_table.add_byte_step(l, lo_state.clone());
        if l < b'9' {
            lo_table.add_range_steps(l as usize + 1, b'9' as usize + 1, inner.clone());
        }

        let mut hi_table = SmallTable::new();
        if h > b'0' {
            hi_table.add_range_steps(b'0' as usize, h as usize, inner.clone());
        }
        hi_table.add_byte_step(h, hi_state.clone());

        if p <= split {
            let mut both_table = SmallTable::new();
            if p < split {
                both_table.add_byte_step(l, both_state.clone());
            } else {
                both_table.add_byte_step(l, lo_state.clone());
                if h > l + 1 {
                    both_table.add_range_steps(l as usize + 1, h as usize, inner.clone());
                }
                both_table.add_byte_step(h, hi_state.clone());
            }
            both_state = Arc::new(FaState::with_table(both_table));
        }

        lo_state = Arc::new(FaState::with_table(lo_table));
        hi_state = Arc::new(FaState::with_table(hi_table));
    }

    both_state.table.clone()
}

/// Merge two automata into one that answers the union of both.
pub fn merge_fas<X>(table1: &SmallTable<FaState<X>>, table2: &SmallTable<FaState<X>>) -> SmallTable<FaState<X>> {
    let mut memo = MergeMemo::default();
    merge_fas_with(table1, table2, &mut memo)
}

/// Merge two automata, reusing `memo` for state pairs already merged in
/// this pass.
///
/// Both tables are walked in lock-step; every ceiling from either input
/// becomes a ceiling of the output. Where only one side has a target it is
/// shared as-is, where both do the pair is merged recursively.
pub fn merge_fas_with<X>(
    table1: &SmallTable<FaState<X>>,
    table2: &SmallTable<FaState<X>>,
    memo: &mut MergeMemo<X>,
) -> SmallTable<FaState<X>> {
    let mut runs = RunBuilder::with_capacity(table1.run_count() + table2.run_count());
    let (mut i, mut j) = (0, 0);
    loop {
        let (c1, c2) = (table1.ceilings[i], table2.ceilings[j]);
        let ceiling = c1.min(c2);
        let step = match (&table1.steps[i], &table2.steps[j]) {
            (None, None) => None,
            (Some(s), None) | (None, Some(s)) => Some(s.clone()),
            (Some(s1), Some(s2)) => Some(merge_states(s1, s2, memo)),
        };
        runs.push(ceiling, &step);

        if c1 == ceiling {
            i += 1;
        }
        if c2 == ceiling {
            j += 1;
        }
        if i == table1.ceilings.len() || j == table2.ceilings.len() {
            break;
        }
    }
    runs.finish()
}

fn merge_states<X>(state1: &Arc<FaState<X>>, state2: &Arc<FaState<X>>, memo: &mut MergeMemo<X>) -> Arc<FaState<X>> {
    if Arc::ptr_eq(state1, state2) {
        return state1.clone();
    }
    let key = (Arc::as_ptr(state1) as usize, Arc::as_ptr(state2) as usize);
    if let Some(merged) = memo.merged.get(&key) {
        return merged.clone();
    }

    let table = merge_fas_with(&state1.table, &state2.table, memo);
    let mut field_transitions = state1.field_transitions.clone();
    for fm in &state2.field_transitions {
        if !field_transitions.iter().any(|have| Arc::ptr_eq(have, fm)) {
            field_transitions.push(fm.clone());
        }
    }

    let merged = Arc::new(FaState {
        table,
        field_transitions,
    });
    memo.merged.insert(key, merged.clone());
    memo.pinned.push(state1.clone());
    memo.pinned.push(state2.clone());
    merged
}
