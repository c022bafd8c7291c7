//! Metadata descriptor types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared multiplicity of an association end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Cardinality {
    /// `0..1`
    #[serde(rename = "0..1")]
    ZeroOrOne,
    /// `1`
    #[serde(rename = "1")]
    One,
    /// `0..n`
    #[serde(rename = "0..n")]
    ZeroOrMore,
    /// `1..n`
    #[serde(rename = "1..n")]
    OneOrMore,
}

impl Cardinality {
    /// Returns true if the end may hold more than one target.
    #[must_use]
    pub const fn is_multiple(self) -> bool {
        matches!(self, Self::ZeroOrMore | Self::OneOrMore)
    }

    /// Returns true if the end must hold at least one target.
    #[must_use]
    pub const fn is_required(self) -> bool {
        matches!(self, Self::One | Self::OneOrMore)
    }

    /// Checks a target count against the cardinality.
    ///
    /// Counts stop at a bound of 2, so any count of 2 or more is
    /// treated as "many".
    #[must_use]
    pub const fn satisfied_by(self, count: usize) -> bool {
        match self {
            Self::ZeroOrOne => count <= 1,
            Self::One => count == 1,
            Self::ZeroOrMore => true,
            Self::OneOrMore => count >= 1,
        }
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::ZeroOrOne => "0..1",
            Self::One => "1",
            Self::ZeroOrMore => "0..n",
            Self::OneOrMore => "1..n",
        };
        f.write_str(text)
    }
}

/// Semantics of an association end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AssociationEndType {
    /// One-directional link.
    #[default]
    Directed,
    /// One side of a bidirectional association.
    Undirected,
    /// Aggregation parent side, pointing at children.
    Parent,
    /// Aggregation child side, pointing at the parent.
    Child,
}

/// Descriptor of one end of an association, owned by the source type.
///
/// The owning association is referenced by name and resolved through
/// [`ModelMetadata`](crate::metadata::ModelMetadata).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociationEnd {
    /// Link name on the source entity.
    pub name: String,
    /// Name of the owning association.
    #[serde(default)]
    pub association: String,
    /// Type of the linked entities.
    pub target_type: String,
    /// Declared multiplicity.
    pub cardinality: Cardinality,
    /// End semantics.
    #[serde(default)]
    pub end_type: AssociationEndType,
    /// Link name of the opposite end on the target type.
    #[serde(default)]
    pub opposite_end: Option<String>,
    /// Delete targets when the source is deleted.
    #[serde(default)]
    pub cascade_delete: bool,
    /// Unlink targets when the source is deleted.
    #[serde(default)]
    pub clear_on_delete: bool,
    /// Delete the source when a target is deleted.
    #[serde(default)]
    pub target_cascade_delete: bool,
    /// Unlink the source when a target is deleted.
    #[serde(default)]
    pub target_clear_on_delete: bool,
}

impl AssociationEnd {
    /// Creates a directed end.
    pub fn new(name: impl Into<String>, target_type: impl Into<String>, cardinality: Cardinality) -> Self {
        let name = name.into();
        Self {
            association: name.clone(),
            name,
            target_type: target_type.into(),
            cardinality,
            end_type: AssociationEndType::Directed,
            opposite_end: None,
            cascade_delete: false,
            clear_on_delete: false,
            target_cascade_delete: false,
            target_clear_on_delete: false,
        }
    }

    /// Creates the parent side of an aggregation.
    ///
    /// Children are deleted with the parent, and deleting a child unlinks
    /// it from the parent.
    pub fn parent(
        name: impl Into<String>,
        child_type: impl Into<String>,
        child_end: impl Into<String>,
    ) -> Self {
        let mut end = Self::new(name, child_type, Cardinality::ZeroOrMore);
        end.end_type = AssociationEndType::Parent;
        end.opposite_end = Some(child_end.into());
        end.cascade_delete = true;
        end.target_clear_on_delete = true;
        end
    }

    /// Creates the child side of an aggregation.
    pub fn child(
        name: impl Into<String>,
        parent_type: impl Into<String>,
        parent_end: impl Into<String>,
    ) -> Self {
        let mut end = Self::new(name, parent_type, Cardinality::ZeroOrOne);
        end.end_type = AssociationEndType::Child;
        end.opposite_end = Some(parent_end.into());
        end.target_clear_on_delete = true;
        end
    }

    /// Sets the association name.
    #[must_use]
    pub fn association(mut self, name: impl Into<String>) -> Self {
        self.association = name.into();
        self
    }

    /// Sets the cardinality.
    #[must_use]
    pub const fn cardinality(mut self, cardinality: Cardinality) -> Self {
        self.cardinality = cardinality;
        self
    }

    /// Makes the end one side of a bidirectional association.
    #[must_use]
    pub fn opposite(mut self, opposite_end: impl Into<String>) -> Self {
        self.opposite_end = Some(opposite_end.into());
        if self.end_type == AssociationEndType::Directed {
            self.end_type = AssociationEndType::Undirected;
        }
        self
    }

    /// Sets cascade delete.
    #[must_use]
    pub const fn cascade_delete(mut self, value: bool) -> Self {
        self.cascade_delete = value;
        self
    }

    /// Sets clear on delete.
    #[must_use]
    pub const fn clear_on_delete(mut self, value: bool) -> Self {
        self.clear_on_delete = value;
        self
    }

    /// Sets target cascade delete.
    #[must_use]
    pub const fn target_cascade_delete(mut self, value: bool) -> Self {
        self.target_cascade_delete = value;
        self
    }

    /// Sets target clear on delete.
    #[must_use]
    pub const fn target_clear_on_delete(mut self, value: bool) -> Self {
        self.target_clear_on_delete = value;
        self
    }
}

/// Storage kind of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKind {
    /// A primitive value.
    #[default]
    Primitive,
    /// A binary blob.
    Blob,
    /// A UTF-8 text blob.
    TextBlob,
}

/// Descriptor of a property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyMetadata {
    /// Property name.
    pub name: String,
    /// Storage kind.
    #[serde(default)]
    pub kind: PropertyKind,
    /// Must be set to a non-empty value.
    #[serde(default)]
    pub required: bool,
    /// Changes to this property alone do not cause version conflicts.
    #[serde(default)]
    pub version_mismatch_ignored: bool,
}

impl PropertyMetadata {
    /// Creates a primitive property.
    pub fn primitive(name: impl Into<String>) -> Self {
        Self::with_kind(name, PropertyKind::Primitive)
    }

    /// Creates a blob property.
    pub fn blob(name: impl Into<String>) -> Self {
        Self::with_kind(name, PropertyKind::Blob)
    }

    /// Creates a text blob property.
    pub fn text_blob(name: impl Into<String>) -> Self {
        Self::with_kind(name, PropertyKind::TextBlob)
    }

    fn with_kind(name: impl Into<String>, kind: PropertyKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            version_mismatch_ignored: false,
        }
    }

    /// Marks the property required.
    #[must_use]
    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Excludes the property from version conflicts.
    #[must_use]
    pub const fn version_mismatch_ignored(mut self) -> Self {
        self.version_mismatch_ignored = true;
        self
    }
}

/// One field of a unique index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexField {
    /// A property.
    Property(String),
    /// A single-valued link.
    Link(String),
}

impl IndexField {
    /// Returns the field name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Property(name) | Self::Link(name) => name,
        }
    }
}

/// A unique index over an ordered list of fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniqueIndex {
    /// Index name, unique across the model.
    pub name: String,
    /// Indexed fields, in key order.
    pub fields: Vec<IndexField>,
}

impl UniqueIndex {
    /// Creates an index.
    pub fn new(name: impl Into<String>, fields: Vec<IndexField>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    /// Returns true if the index covers the named property or link.
    #[must_use]
    pub fn covers(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f.name() == field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cardinality_bounds() {
        assert!(Cardinality::ZeroOrOne.satisfied_by(0));
        assert!(!Cardinality::ZeroOrOne.satisfied_by(2));
        assert!(!Cardinality::One.satisfied_by(0));
        assert!(Cardinality::One.satisfied_by(1));
        assert!(!Cardinality::One.satisfied_by(2));
        assert!(Cardinality::ZeroOrMore.satisfied_by(0));
        assert!(!Cardinality::OneOrMore.satisfied_by(0));
        assert!(Cardinality::OneOrMore.satisfied_by(2));
    }

    #[test]
    fn cardinality_serde_uses_range_notation() {
        let json = serde_json::to_string(&Cardinality::ZeroOrMore).unwrap();
        assert_eq!(json, "\"0..n\"");
        let back: Cardinality = serde_json::from_str("\"1\"").unwrap();
        assert_eq!(back, Cardinality::One);
    }

    #[test]
    fn aggregation_defaults() {
        let parent = AssociationEnd::parent("files", "File", "folder");
        assert_eq!(parent.end_type, AssociationEndType::Parent);
        assert!(parent.cascade_delete);
        assert!(parent.cardinality.is_multiple());

        let child = AssociationEnd::child("folder", "Folder", "files");
        assert_eq!(child.end_type, AssociationEndType::Child);
        assert_eq!(child.opposite_end.as_deref(), Some("files"));
        assert!(!child.cascade_delete);
    }

    #[test]
    fn opposite_makes_end_undirected() {
        let end = AssociationEnd::new("posts", "Post", Cardinality::ZeroOrMore).opposite("author");
        assert_eq!(end.end_type, AssociationEndType::Undirected);
    }

    #[test]
    fn index_covers_fields() {
        let index = UniqueIndex::new(
            "Post.slug",
            vec![IndexField::Link("author".into()), IndexField::Property("slug".into())],
        );
        assert!(index.covers("slug"));
        assert!(index.covers("author"));
        assert!(!index.covers("title"));
    }
}
