//! Per-link change sets.

use crate::entity::TransientEntity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Classification of a link change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkChangeType {
    /// Targets were only added.
    Add,
    /// Targets were only removed.
    Remove,
    /// Targets were both added and removed.
    AddAndRemove,
}

/// Added, removed and deleted targets of one link of one entity.
///
/// Adding a target that was removed earlier cancels both changes, and so
/// does removing a target that was added earlier. Targets that were
/// deleted as entities stay in `deleted` and can never be added back,
/// even when the deletion left no net change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkChange {
    added: BTreeSet<TransientEntity>,
    removed: BTreeSet<TransientEntity>,
    deleted: BTreeSet<TransientEntity>,
}

impl LinkChange {
    /// Creates an empty change set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an added target. Returns false if the target was deleted.
    pub fn add(&mut self, target: TransientEntity) -> bool {
        if self.deleted.contains(&target) {
            return false;
        }
        if !self.removed.remove(&target) {
            self.added.insert(target);
        }
        true
    }

    /// Records a removed target.
    pub fn remove(&mut self, target: TransientEntity) {
        if !self.added.remove(&target) {
            self.removed.insert(target);
        }
    }

    /// Records that a target entity was deleted.
    ///
    /// A link added in this change set disappears; a link that existed
    /// before is recorded as removed. Either way the target is remembered
    /// as deleted.
    pub fn delete(&mut self, target: TransientEntity) {
        if !self.added.remove(&target) {
            self.removed.insert(target);
        }
        self.deleted.insert(target);
    }

    /// Returns true if nothing is recorded, deleted targets included.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.deleted.is_empty()
    }

    /// Returns true if targets were added or removed.
    #[must_use]
    pub fn has_net_change(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }

    /// Returns true if targets were added and nothing was removed.
    #[must_use]
    pub fn is_pure_add(&self) -> bool {
        !self.added.is_empty() && self.removed.is_empty()
    }

    /// Classifies the change, or `None` if nothing changed.
    #[must_use]
    pub fn change_type(&self) -> Option<LinkChangeType> {
        match (self.added.is_empty(), self.removed.is_empty()) {
            (true, true) => None,
            (false, true) => Some(LinkChangeType::Add),
            (true, false) => Some(LinkChangeType::Remove),
            (false, false) => Some(LinkChangeType::AddAndRemove),
        }
    }

    /// Targets added.
    #[must_use]
    pub fn added(&self) -> &BTreeSet<TransientEntity> {
        &self.added
    }

    /// Targets removed, including deleted ones.
    #[must_use]
    pub fn removed(&self) -> &BTreeSet<TransientEntity> {
        &self.removed
    }

    /// Targets that were deleted as entities.
    #[must_use]
    pub fn deleted(&self) -> &BTreeSet<TransientEntity> {
        &self.deleted
    }
}
