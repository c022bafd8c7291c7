//! The model registry.

use crate::metadata::{AssociationEnd, EntityMetadata};
use std::collections::{BTreeMap, HashMap};

/// An association end as seen from its target type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingAssociation {
    /// Type owning the end.
    pub source_type: String,
    /// The end itself.
    pub end: AssociationEnd,
}

/// Read-only registry of all entity types.
///
/// Besides the per-type metadata, the model keeps a reverse index from
/// each type to the association ends pointing at it.
#[derive(Debug, Clone, Default)]
pub struct ModelMetadata {
    entities: BTreeMap<String, EntityMetadata>,
    incoming: HashMap<String, Vec<IncomingAssociation>>,
}

impl ModelMetadata {
    /// Creates an empty model.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a model from type descriptors.
    #[must_use]
    pub fn from_entities(entities: impl IntoIterator<Item = EntityMetadata>) -> Self {
        let mut model = Self::new();
        for entity in entities {
            model.entities.insert(entity.entity_type.clone(), entity);
        }
        model.rebuild_incoming();
        model
    }

    /// Adds a type to the model.
    #[must_use]
    pub fn with_entity(mut self, entity: EntityMetadata) -> Self {
        self.entities.insert(entity.entity_type.clone(), entity);
        self.rebuild_incoming();
        self
    }

    fn rebuild_incoming(&mut self) {
        self.incoming.clear();
        for entity in self.entities.values() {
            for end in &entity.association_ends {
                self.incoming
                    .entry(end.target_type.clone())
                    .or_default()
                    .push(IncomingAssociation {
                        source_type: entity.entity_type.clone(),
                        end: end.clone(),
                    });
            }
        }
    }

    /// Looks up a type.
    #[must_use]
    pub fn entity(&self, entity_type: &str) -> Option<&EntityMetadata> {
        self.entities.get(entity_type)
    }

    /// All types, by name.
    pub fn entities(&self) -> impl Iterator<Item = &EntityMetadata> {
        self.entities.values()
    }

    /// Looks up an association end of a type.
    #[must_use]
    pub fn association_end(&self, entity_type: &str, name: &str) -> Option<&AssociationEnd> {
        self.entity(entity_type)
            .and_then(|entity| entity.association_end(name))
    }

    /// Ends of other types (or the same type) that point at `entity_type`.
    #[must_use]
    pub fn incoming(&self, entity_type: &str) -> &[IncomingAssociation] {
        self.incoming
            .get(entity_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Resolves the opposite end of a bidirectional association end.
    #[must_use]
    pub fn opposite_end(&self, end: &AssociationEnd) -> Option<&AssociationEnd> {
        let opposite = end.opposite_end.as_deref()?;
        self.association_end(&end.target_type, opposite)
    }

    /// Returns every end belonging to the named association.
    #[must_use]
    pub fn association(&self, name: &str) -> Vec<(&str, &AssociationEnd)> {
        self.entities
            .values()
            .flat_map(|entity| {
                entity
                    .association_ends
                    .iter()
                    .filter(move |end| end.association == name)
                    .map(move |end| (entity.entity_type.as_str(), end))
            })
            .collect()
    }
}
