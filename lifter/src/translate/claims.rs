//! Constant substitutions established by the `claim_eq` user-op.
//!
//! An architecture specification may emit `claim_eq(constant, value)` to
//! assert that a constant appearing in the following operation really equals
//! some other computed value. Recording the substitution here lets branch
//! targets be reconstructed precisely without post-hoc pattern matching.

use std::collections::{HashMap, HashSet};

use super::loc::ValueLocation;

pub(crate) struct ClaimContext {
    replacements: HashMap<u64, ValueLocation>,
    used: HashSet<u64>,
}

impl ClaimContext {
    pub fn new() -> Self {
        Self { replacements: HashMap::new(), used: HashSet::new() }
    }

    /// Records a substitution for a constant offset.
    pub fn record(&mut self, offset: u64, location: ValueLocation) {
        self.replacements.insert(offset, location);
    }

    /// Discards all pending substitutions. Invoked after every lowered op
    /// that is not itself a claim.
    pub fn clear(&mut self) {
        self.replacements.clear();
        self.used.clear();
    }

    /// Looks up the substitution for `offset` and marks it consumed.
    /// Consuming the same offset twice is ambiguous and logged, not failed.
    pub fn lookup(&mut self, offset: u64) -> Option<ValueLocation> {
        let location = self.replacements.get(&offset).copied()?;
        if !self.used.insert(offset) {
            tracing::warn!("ambiguous value substitution via claim_eq: {offset:#x}");
        }
        Some(location)
    }

    pub fn is_empty(&self) -> bool {
        self.replacements.is_empty()
    }
}
