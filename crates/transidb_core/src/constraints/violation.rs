//! Constraint violation diagnostics.

use crate::entity::{EntityId, TransientEntity};
use crate::metadata::{Cardinality, PropertyKind};
use std::fmt;
use transidb_store::PropertyValue;

/// Entities holding links to an entity that is being removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingReferrers {
    /// Type owning the link.
    pub source_type: String,
    /// Link name.
    pub link: String,
    /// Referrers, up to the configured bound.
    pub referrers: Vec<EntityId>,
    /// True if more referrers exist than are listed.
    pub has_more: bool,
}

/// Value of one unique-key component, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyFieldValue {
    /// A property value.
    Property(PropertyValue),
    /// A linked entity.
    Entity(EntityId),
}

impl fmt::Display for KeyFieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Property(value) => write!(f, "{value}"),
            Self::Entity(id) => write!(f, "#{id}"),
        }
    }
}

/// What was violated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViolationKind {
    /// An association end holds the wrong number of targets.
    Cardinality {
        /// Link name.
        link: String,
        /// Declared cardinality.
        cardinality: Cardinality,
        /// Target count, bounded at 2.
        count: usize,
    },
    /// A required property is empty.
    RequiredProperty {
        /// Property name.
        property: String,
        /// Property kind.
        kind: PropertyKind,
    },
    /// A unique key has an empty component.
    NullIndexField {
        /// Index name.
        index: String,
        /// Empty field.
        field: String,
    },
    /// A unique key is already taken.
    UniqueIndex {
        /// Index name.
        index: String,
        /// Field names and values of the key.
        fields: Vec<(String, KeyFieldValue)>,
        /// Current holder of the key.
        holder: EntityId,
    },
    /// A removed entity is still referenced.
    IncomingLinks {
        /// Referrers, grouped by link.
        referrers: Vec<IncomingReferrers>,
    },
    /// An aggregation child lost its parent.
    OrphanChild {
        /// Parent ends that are all empty.
        parent_ends: Vec<String>,
    },
}

/// One constraint violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstraintViolation {
    /// Handle of the offending entity.
    pub entity: TransientEntity,
    /// Id of the offending entity.
    pub entity_id: EntityId,
    /// Type of the offending entity.
    pub entity_type: String,
    /// What was violated.
    pub kind: ViolationKind,
}

impl ConstraintViolation {
    /// Returns the offending entity.
    #[must_use]
    pub const fn entity(&self) -> TransientEntity {
        self.entity
    }

    /// Returns the property, link or index the violation is about.
    #[must_use]
    pub fn field(&self) -> Option<&str> {
        match &self.kind {
            ViolationKind::Cardinality { link, .. } => Some(link),
            ViolationKind::RequiredProperty { property, .. } => Some(property),
            ViolationKind::NullIndexField { field, .. } => Some(field),
            ViolationKind::UniqueIndex { index, .. } => Some(index),
            ViolationKind::IncomingLinks { .. } => None,
            ViolationKind::OrphanChild { parent_ends } => parent_ends.first().map(String::as_str),
        }
    }

    /// Returns a message suitable for showing to a user.
    #[must_use]
    pub fn display_message(&self) -> String {
        match &self.kind {
            ViolationKind::Cardinality {
                link, cardinality, ..
            } => format!(
                "{} {}: association {link} must have cardinality {cardinality}",
                self.entity_type, self.entity_id
            ),
            ViolationKind::RequiredProperty { property, .. } => {
                format!("{} {}: {property} is required", self.entity_type, self.entity_id)
            }
            ViolationKind::NullIndexField { index, field } => format!(
                "{} {}: {field} must be set, it is part of unique index {index}",
                self.entity_type, self.entity_id
            ),
            ViolationKind::UniqueIndex {
                index,
                fields,
                holder,
            } => {
                let key = fields
                    .iter()
                    .map(|(name, value)| format!("{name}={value}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(
                    "{} {}: [{key}] is not unique in {index}, already used by {holder}",
                    self.entity_type, self.entity_id
                )
            }
            ViolationKind::IncomingLinks { referrers } => {
                let groups = referrers
                    .iter()
                    .map(|group| {
                        let ids = group
                            .referrers
                            .iter()
                            .map(ToString::to_string)
                            .collect::<Vec<_>>()
                            .join(", ");
                        let more = if group.has_more { ", ...and more" } else { "" };
                        format!("{}.{} from [{ids}{more}]", group.source_type, group.link)
                    })
                    .collect::<Vec<_>>()
                    .join("; ");
                format!(
                    "can't remove {} {}: it is still referenced by {groups}",
                    self.entity_type, self.entity_id
                )
            }
            ViolationKind::OrphanChild { parent_ends } => format!(
                "{} {}: child has no parent in {}",
                self.entity_type,
                self.entity_id,
                parent_ends.join(", ")
            ),
        }
    }
}

impl fmt::Display for ConstraintViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_message())
    }
}

/// All violations found by one validation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConstraintViolations(Vec<ConstraintViolation>);

impl ConstraintViolations {
    /// Creates an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a violation.
    pub fn push(&mut self, violation: ConstraintViolation) {
        self.0.push(violation);
    }

    /// Returns true if nothing was violated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of violations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterates over the violations.
    pub fn iter(&self) -> std::slice::Iter<'_, ConstraintViolation> {
        self.0.iter()
    }

    /// Violations of the given entity.
    pub fn for_entity(&self, entity: TransientEntity) -> impl Iterator<Item = &ConstraintViolation> {
        self.0.iter().filter(move |v| v.entity == entity)
    }
}

impl Extend<ConstraintViolation> for ConstraintViolations {
    fn extend<T: IntoIterator<Item = ConstraintViolation>>(&mut self, iter: T) {
        self.0.extend(iter);
    }
}

impl IntoIterator for ConstraintViolations {
    type Item = ConstraintViolation;
    type IntoIter = std::vec::IntoIter<ConstraintViolation>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a ConstraintViolations {
    type Item = &'a ConstraintViolation;
    type IntoIter = std::slice::Iter<'a, ConstraintViolation>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for ConstraintViolations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, violation) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{violation}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{SessionId, TransientId};
    use transidb_store::PersistentEntityId;

    fn violation(kind: ViolationKind) -> ConstraintViolation {
        ConstraintViolation {
            entity: TransientEntity::new(SessionId::new(), 0),
            entity_id: EntityId::Transient(TransientId::new(0)),
            entity_type: "User".into(),
            kind,
        }
    }

    #[test]
    fn required_property_message_and_field() {
        let v = violation(ViolationKind::RequiredProperty {
            property: "login".into(),
            kind: PropertyKind::Primitive,
        });
        assert_eq!(v.field(), Some("login"));
        assert_eq!(v.display_message(), "User ~0: login is required");
    }

    #[test]
    fn incoming_links_message_marks_truncation() {
        let v = violation(ViolationKind::IncomingLinks {
            referrers: vec![IncomingReferrers {
                source_type: "Post".into(),
                link: "author".into(),
                referrers: vec![EntityId::Persisted(PersistentEntityId::new(2, 0))],
                has_more: true,
            }],
        });
        let message = v.display_message();
        assert!(message.contains("Post.author from [2-0, ...and more]"), "{message}");
        assert_eq!(v.field(), None);
    }

    #[test]
    fn collection_display_joins() {
        let mut all = ConstraintViolations::new();
        assert!(all.is_empty());
        all.push(violation(ViolationKind::OrphanChild {
            parent_ends: vec!["folder".into()],
        }));
        all.push(violation(ViolationKind::Cardinality {
            link: "author".into(),
            cardinality: Cardinality::One,
            count: 0,
        }));
        assert_eq!(all.len(), 2);
        let text = all.to_string();
        assert!(text.contains("; "));
        assert!(text.contains("cardinality 1"));
    }
}
