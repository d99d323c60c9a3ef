//! Core data structures for the byte-level automaton.
//!
//! - `SmallTable`: a run-length encoded byte → target transition table
//! - `FaState`: a state in the automaton, optionally a terminal into
//!   the next field matcher

use std::fmt;
use std::sync::Arc;

use super::field_matcher::FieldMatcher;

/// Number of distinct byte values; the final ceiling of every table.
pub const BYTE_CEILING: usize = 256;

/// Marks the end of a value being matched. Bytes 0xF5-0xFF never appear in
/// valid UTF-8, so this cannot collide with value bytes.
pub const VALUE_TERMINATOR: u8 = 0xF5;

/// Leads every canonicalized number in the automaton, keeping numeric
/// paths disjoint from raw literal text.
pub const NUMBER_MARKER: u8 = 0xF6;

/// The dense view of a table: one optional target per byte value.
pub type UnpackedTable<T> = [Option<Arc<T>>; BYTE_CEILING];

/// A compact lookup table encoding byte value ranges to targets.
///
/// Each ceiling marks the exclusive upper bound of a byte range that maps to
/// the step at the same index. Ceilings are strictly increasing and the last
/// one is always `BYTE_CEILING`, so the runs cover 0-255 with no gaps.
///
/// Example: to map bytes 3-4 to S1 and byte 0x34 to S2:
/// ```text
/// ceilings: [3,    5,        0x34, 0x35,     256]
/// steps:    [None, Some(S1), None, Some(S2), None]
/// ```
///
/// Adjacent runs never share a target (compared by pointer), which keeps the
/// run count minimal.
pub struct SmallTable<T> {
    /// Upper bounds (exclusive) for each byte range
    pub(crate) ceilings: Vec<u16>,
    /// Targets for each byte range
    pub(crate) steps: Vec<Option<Arc<T>>>,
}

impl<T> Clone for SmallTable<T> {
    fn clone(&self) -> Self {
        Self {
            ceilings: self.ceilings.clone(),
            steps: self.steps.clone(),
        }
    }
}

impl<T> Default for SmallTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for SmallTable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();
        let mut floor = 0u16;
        for (ceiling, step) in self.ceilings.iter().zip(&self.steps) {
            if let Some(step) = step {
                list.entry(&format_args!(
                    "{:#04x}..{:#04x} -> {:p}",
                    floor,
                    ceiling,
                    Arc::as_ptr(step)
                ));
            }
            floor = *ceiling;
        }
        list.finish()
    }
}

impl<T> SmallTable<T> {
    /// Create a table with no transitions.
    pub fn new() -> Self {
        Self {
            ceilings: vec![BYTE_CEILING as u16],
            steps: vec![None],
        }
    }

    /// Create a table where every byte transitions to `step`.
    pub fn with_default_step(step: Arc<T>) -> Self {
        Self {
            ceilings: vec![BYTE_CEILING as u16],
            steps: vec![Some(step)],
        }
    }

    /// Take a step on the given byte. Binary search over the ceilings.
    #[inline]
    pub fn step(&self, byte: u8) -> Option<&Arc<T>> {
        let index = self.ceilings.partition_point(|&c| c <= byte as u16);
        self.steps[index].as_ref()
    }

    /// True if no byte has a transition.
    pub fn is_empty(&self) -> bool {
        self.steps.iter().all(Option::is_none)
    }

    /// Number of runs in the encoded form.
    pub fn run_count(&self) -> usize {
        self.ceilings.len()
    }

    /// Iterate over `(floor, ceiling, target)` for every run.
    pub fn runs(&self) -> impl Iterator<Item = (u16, u16, Option<&Arc<T>>)> + '_ {
        let floors = std::iter::once(0).chain(self.ceilings.iter().copied());
        floors
            .zip(self.ceilings.iter().copied())
            .zip(self.steps.iter())
            .map(|((floor, ceiling), step)| (floor, ceiling, step.as_ref()))
    }

    /// Point a single byte at `step`, splitting the run that contains it.
    pub fn add_byte_step(&mut self, byte: u8, step: Arc<T>) {
        self.add_range_steps(byte as usize, byte as usize + 1, step);
    }

    /// Point every byte in `[floor, ceiling)` at `step`.
    ///
    /// Existing runs are split at `floor` and `ceiling` as needed and
    /// neighbours that end up with the same target are coalesced.
    pub fn add_range_steps(&mut self, floor: usize, ceiling: usize, step: Arc<T>) {
        debug_assert!(floor < ceiling && ceiling <= BYTE_CEILING);
        let (floor, ceiling) = (floor as u16, ceiling as u16);
        let new_step = Some(step);

        let mut runs = RunBuilder::with_capacity(self.ceilings.len() + 2);
        let mut run_floor = 0u16;
        for (&run_ceiling, run_step) in self.ceilings.iter().zip(&self.steps) {
            if run_ceiling <= floor || run_floor >= ceiling {
                runs.push(run_ceiling, run_step);
            } else {
                if run_floor < floor {
                    runs.push(floor, run_step);
                }
                runs.push(run_ceiling.min(ceiling), &new_step);
                if run_ceiling > ceiling {
                    runs.push(run_ceiling, run_step);
                }
            }
            run_floor = run_ceiling;
        }
        runs.finish_into(self);
    }

    /// Expand into the dense 256-slot view.
    pub fn unpack(&self) -> UnpackedTable<T> {
        let mut unpacked: UnpackedTable<T> = std::array::from_fn(|_| None);
        let mut index = 0usize;
        for (&ceiling, step) in self.ceilings.iter().zip(&self.steps) {
            while index < ceiling as usize {
                unpacked[index] = step.clone();
                index += 1;
            }
        }
        unpacked
    }

    /// Replace this table's contents with the run encoding of `unpacked`.
    pub fn pack(&mut self, unpacked: &UnpackedTable<T>) {
        let mut runs = RunBuilder::with_capacity(16);
        for (i, step) in unpacked.iter().enumerate() {
            runs.push(i as u16 + 1, step);
        }
        runs.finish_into(self);
    }
}

/// Accumulates runs left to right, merging a run into its predecessor when
/// both point at the same target.
pub(crate) struct RunBuilder<T> {
    ceilings: Vec<u16>,
    steps: Vec<Option<Arc<T>>>,
}

impl<T> RunBuilder<T> {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            ceilings: Vec::with_capacity(capacity),
            steps: Vec::with_capacity(capacity),
        }
    }

    /// Extend coverage up to `ceiling` with `step`.
    pub(crate) fn push(&mut self, ceiling: u16, step: &Option<Arc<T>>) {
        if let Some(last) = self.steps.last() {
            if arc_option_eq(last, step) {
                if let Some(c) = self.ceilings.last_mut() {
                    *c = ceiling;
                }
                return;
            }
        }
        self.ceilings.push(ceiling);
        self.steps.push(step.clone());
    }

    pub(crate) fn finish(self) -> SmallTable<T> {
        debug_assert_eq!(self.ceilings.last().copied(), Some(BYTE_CEILING as u16));
        debug_assert!(self.ceilings.windows(2).all(|w| w[0] < w[1]));
        SmallTable {
            ceilings: self.ceilings,
            steps: self.steps,
        }
    }

    fn finish_into(self, table: &mut SmallTable<T>) {
        *table = self.finish();
    }
}

/// Compare two `Option<Arc<T>>` for pointer equality.
pub(crate) fn arc_option_eq<T>(a: &Option<Arc<T>>, b: &Option<Arc<T>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        _ => false,
    }
}

/// A state in the automaton.
///
/// A state with field transitions is a terminal: reaching it completes a
/// value and hands matching off to the next field matchers.
pub struct FaState<X> {
    /// Transitions out of this state
    pub table: SmallTable<FaState<X>>,
    /// Field matchers reached when a value ends in this state
    pub field_transitions: Vec<Arc<FieldMatcher<X>>>,
}

impl<X> Default for FaState<X> {
    fn default() -> Self {
        Self::new()
    }
}

impl<X> FaState<X> {
    pub fn new() -> Self {
        Self {
            table: SmallTable::new(),
            field_transitions: Vec::new(),
        }
    }

    pub fn with_table(table: SmallTable<FaState<X>>) -> Self {
        Self {
            table,
            field_transitions: Vec::new(),
        }
    }

    /// A terminal state completing into `next_field`.
    pub fn terminal(next_field: Arc<FieldMatcher<X>>) -> Self {
        Self {
            table: SmallTable::new(),
            field_transitions: vec![next_field],
        }
    }

    pub fn is_terminal(&self) -> bool {
        !self.field_transitions.is_empty()
    }
}
