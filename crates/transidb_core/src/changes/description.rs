//! Change descriptions handed to listeners.

use crate::changes::LinkChange;
use crate::entity::TransientEntity;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// How an entity changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeType {
    /// The entity was created.
    Add,
    /// The entity was modified.
    Update,
    /// The entity was removed.
    Remove,
}

/// Net change of one entity since the last flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityChange {
    /// The changed entity.
    pub entity: TransientEntity,
    /// Its type name.
    pub entity_type: String,
    /// How it changed.
    pub change_type: ChangeType,
    /// Changed properties and blobs, if any.
    pub changed_properties: Option<BTreeSet<String>>,
    /// Changed links, if any.
    pub changed_links: Option<BTreeMap<String, LinkChange>>,
}

impl EntityChange {
    /// Returns true if the named property or blob changed.
    #[must_use]
    pub fn property_changed(&self, name: &str) -> bool {
        self.changed_properties
            .as_ref()
            .is_some_and(|names| names.contains(name))
    }

    /// Returns the change of the named link.
    #[must_use]
    pub fn link_change(&self, name: &str) -> Option<&LinkChange> {
        self.changed_links.as_ref().and_then(|links| links.get(name))
    }
}
