//! # Registry Differ
//!
//! Membership diff between two registry snapshots. Only ids are compared:
//! a backend present in both snapshots produces no event even if its
//! descriptor changed.

use std::collections::BTreeSet;

use super::registry::RegistrySnapshot;

/// Ids that left and ids that arrived between two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryDiff {
    /// `ids(previous) − ids(next)`
    pub removed: BTreeSet<String>,
    /// `ids(next) − ids(previous)`
    pub added: BTreeSet<String>,
}

impl RegistryDiff {
    /// `true` when membership did not change.
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty()
    }
}

/// Computes the membership diff from `previous` to `next`.
pub fn diff(previous: &RegistrySnapshot, next: &RegistrySnapshot) -> RegistryDiff {
    let removed = previous
        .ids()
        .filter(|id| !next.contains(id))
        .map(str::to_owned)
        .collect();
    let added = next
        .ids()
        .filter(|id| !previous.contains(id))
        .map(str::to_owned)
        .collect();

    RegistryDiff { removed, added }
}
