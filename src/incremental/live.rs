//! The live pattern set and the mutations folded into it.

use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;

use crate::{Quamina, QuaminaError};

/// A change to the live pattern set, queued until the next rebuild.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Mutation<X> {
    /// Add one pattern text under `id`
    Add { id: X, pattern: String },
    /// Remove every pattern text under `id`
    Delete { id: X },
}

impl<X> Mutation<X> {
    pub fn id(&self) -> &X {
        match self {
            Mutation::Add { id, .. } | Mutation::Delete { id } => id,
        }
    }

    pub fn is_deletion(&self) -> bool {
        matches!(self, Mutation::Delete { .. })
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Mutation::Add { .. } => "add",
            Mutation::Delete { .. } => "delete",
        }
    }
}

/// Map from pattern id to its pattern texts. Owned by the coordinator's
/// loop, or by the rebuild in flight.
pub(crate) struct LivePatterns<X> {
    patterns: HashMap<X, BTreeSet<String>>,
}

impl<X> Default for LivePatterns<X> {
    fn default() -> Self {
        Self {
            patterns: HashMap::new(),
        }
    }
}

impl<X: Clone + Eq + Hash> LivePatterns<X> {
    pub(crate) fn apply(&mut self, mutation: Mutation<X>) {
        match mutation {
            Mutation::Add { id, pattern } => {
                self.patterns.entry(id).or_default().insert(pattern);
            }
            Mutation::Delete { id } => {
                self.patterns.remove(&id);
            }
        }
    }

    /// Apply a batch in submission order.
    pub(crate) fn fold(&mut self, batch: Vec<Mutation<X>>) {
        for mutation in batch {
            self.apply(mutation);
        }
    }

    /// Number of pattern texts across all ids.
    pub(crate) fn size(&self) -> usize {
        self.patterns.values().map(BTreeSet::len).sum()
    }

    /// Compile every live pattern into a fresh matcher configured like
    /// `template`.
    pub(crate) fn compile(&self, template: &Quamina<X>) -> Result<Quamina<X>, QuaminaError> {
        let mut q = template.empty_like();
        for (id, texts) in &self.patterns {
            for text in texts {
                q.add_pattern(id.clone(), text)?;
            }
        }
        Ok(q)
    }
}
