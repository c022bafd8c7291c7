//! Per-type metadata.

use crate::metadata::{AssociationEnd, AssociationEndType, PropertyMetadata, UniqueIndex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Metadata of one entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMetadata {
    /// Type name.
    pub entity_type: String,
    /// Declared properties and blobs.
    #[serde(default)]
    pub properties: Vec<PropertyMetadata>,
    /// Outgoing association ends.
    #[serde(default)]
    pub association_ends: Vec<AssociationEnd>,
    /// Unique indexes.
    #[serde(default)]
    pub unique_indexes: Vec<UniqueIndex>,
    /// Save a history snapshot before each change.
    #[serde(default)]
    pub has_history: bool,
    /// Fields whose changes alone do not produce a history snapshot.
    #[serde(default)]
    pub history_ignored: BTreeSet<String>,
    /// Skip version checks for this type.
    #[serde(default)]
    pub version_mismatch_ignored: bool,
    /// Delete children that lost their parent instead of failing.
    #[serde(default)]
    pub remove_orphan: bool,
}

impl EntityMetadata {
    /// Creates metadata for a type with no fields.
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            properties: Vec::new(),
            association_ends: Vec::new(),
            unique_indexes: Vec::new(),
            has_history: false,
            history_ignored: BTreeSet::new(),
            version_mismatch_ignored: false,
            remove_orphan: false,
        }
    }

    /// Adds a property.
    #[must_use]
    pub fn property(mut self, property: PropertyMetadata) -> Self {
        self.properties.push(property);
        self
    }

    /// Adds an association end.
    #[must_use]
    pub fn end(mut self, end: AssociationEnd) -> Self {
        self.association_ends.push(end);
        self
    }

    /// Adds a unique index.
    #[must_use]
    pub fn unique(mut self, index: UniqueIndex) -> Self {
        self.unique_indexes.push(index);
        self
    }

    /// Enables history, ignoring the given fields.
    #[must_use]
    pub fn history<I, S>(mut self, ignored: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.has_history = true;
        self.history_ignored = ignored.into_iter().map(Into::into).collect();
        self
    }

    /// Disables version checks for the type.
    #[must_use]
    pub const fn ignore_version_mismatch(mut self) -> Self {
        self.version_mismatch_ignored = true;
        self
    }

    /// Lets orphaned children be deleted automatically.
    #[must_use]
    pub const fn remove_orphan(mut self) -> Self {
        self.remove_orphan = true;
        self
    }

    /// Looks up a property or blob.
    #[must_use]
    pub fn get_property(&self, name: &str) -> Option<&PropertyMetadata> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Looks up an association end.
    #[must_use]
    pub fn association_end(&self, name: &str) -> Option<&AssociationEnd> {
        self.association_ends.iter().find(|end| end.name == name)
    }

    /// Required properties.
    pub fn required_properties(&self) -> impl Iterator<Item = &PropertyMetadata> {
        self.properties.iter().filter(|p| p.required)
    }

    /// Ends pointing at an aggregation parent.
    pub fn parent_ends(&self) -> impl Iterator<Item = &AssociationEnd> {
        self.association_ends
            .iter()
            .filter(|end| end.end_type == AssociationEndType::Child)
    }

    /// Returns true if the type can be an aggregation child.
    #[must_use]
    pub fn is_aggregation_child(&self) -> bool {
        self.parent_ends().next().is_some()
    }
}
