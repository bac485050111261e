use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::AlertId;

/// Ad-hoc multi-select of alert ids for bulk actions.
///
/// The store owns the only mutable instance, so membership always stays a
/// subset of the visible alerts.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct SelectionSet {
    ids: BTreeSet<AlertId>,
}

impl SelectionSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip membership of `id`. Returns whether it is selected afterwards.
    pub fn toggle(&mut self, id: AlertId) -> bool {
        if self.ids.remove(&id) {
            false
        } else {
            self.ids.insert(id);
            true
        }
    }

    /// Replace the selection with exactly `visible`.
    pub fn select_all<I>(&mut self, visible: I)
    where
        I: IntoIterator<Item = AlertId>,
    {
        self.ids = visible.into_iter().collect();
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    /// Keep only ids for which `keep` holds. Returns how many were dropped.
    pub fn retain<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&AlertId) -> bool,
    {
        let before = self.ids.len();
        self.ids.retain(|id| keep(id));
        before - self.ids.len()
    }

    #[must_use]
    pub fn contains(&self, id: &AlertId) -> bool {
        self.ids.contains(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AlertId> {
        self.ids.iter()
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<AlertId> {
        self.ids.iter().copied().collect()
    }
}
