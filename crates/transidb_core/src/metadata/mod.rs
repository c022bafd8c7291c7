//! Metadata contract.
//!
//! The session consumes metadata read-only: entity types, association
//! ends with their cardinalities and delete policies, required
//! properties, unique indexes and history settings. How metadata is
//! loaded is up to the embedder; all descriptors derive serde.

mod entity;
mod model;
mod types;

pub use entity::EntityMetadata;
pub use model::{IncomingAssociation, ModelMetadata};
pub use types::{
    AssociationEnd, AssociationEndType, Cardinality, IndexField, PropertyKind, PropertyMetadata,
    UniqueIndex,
};
