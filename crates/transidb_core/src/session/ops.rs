//! Deferred store operations.

use crate::entity::TransientEntity;
use crate::session::BlobRef;
use std::collections::HashSet;
use transidb_store::PropertyValue;

/// One component of a unique key whose entity parts may not have a
/// persistent id yet.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum KeyPart {
    Property(PropertyValue),
    Entity(TransientEntity),
}

/// A mutation queued for the persistent transaction.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ApplyOp {
    CreateEntity {
        entity: TransientEntity,
    },
    SetProperty {
        entity: TransientEntity,
        name: String,
        value: PropertyValue,
    },
    DeleteProperty {
        entity: TransientEntity,
        name: String,
    },
    SetBlob {
        entity: TransientEntity,
        name: String,
        blob: BlobRef,
    },
    DeleteBlob {
        entity: TransientEntity,
        name: String,
    },
    AddLink {
        entity: TransientEntity,
        name: String,
        target: TransientEntity,
    },
    SetLink {
        entity: TransientEntity,
        name: String,
        target: Option<TransientEntity>,
    },
    DeleteLink {
        entity: TransientEntity,
        name: String,
        target: TransientEntity,
    },
    DeleteLinks {
        entity: TransientEntity,
        name: String,
    },
    DeleteEntityLinks {
        entity: TransientEntity,
    },
    DeleteEntity {
        entity: TransientEntity,
    },
    UpsertUniqueKey {
        index: String,
        entity: TransientEntity,
        key: Vec<KeyPart>,
    },
    DeleteUniqueKey {
        index: String,
        key: Vec<KeyPart>,
    },
}

impl ApplyOp {
    /// The entity the operation writes to, if any.
    pub(crate) const fn entity(&self) -> Option<TransientEntity> {
        match self {
            Self::CreateEntity { entity }
            | Self::SetProperty { entity, .. }
            | Self::DeleteProperty { entity, .. }
            | Self::SetBlob { entity, .. }
            | Self::DeleteBlob { entity, .. }
            | Self::AddLink { entity, .. }
            | Self::SetLink { entity, .. }
            | Self::DeleteLink { entity, .. }
            | Self::DeleteLinks { entity, .. }
            | Self::DeleteEntityLinks { entity }
            | Self::DeleteEntity { entity }
            | Self::UpsertUniqueKey { entity, .. } => Some(*entity),
            Self::DeleteUniqueKey { .. } => None,
        }
    }

    const fn target(&self) -> Option<TransientEntity> {
        match self {
            Self::AddLink { target, .. } | Self::DeleteLink { target, .. } => Some(*target),
            Self::SetLink { target, .. } => *target,
            _ => None,
        }
    }

    /// Returns true for property or blob writes of the named field.
    pub(crate) fn writes_property(&self, of: TransientEntity, field: &str) -> bool {
        match self {
            Self::SetProperty { entity, name, .. }
            | Self::DeleteProperty { entity, name }
            | Self::SetBlob { entity, name, .. }
            | Self::DeleteBlob { entity, name } => *entity == of && name == field,
            _ => false,
        }
    }

    pub(crate) const fn is_unique_key_op(&self) -> bool {
        matches!(self, Self::UpsertUniqueKey { .. } | Self::DeleteUniqueKey { .. })
    }
}

/// Undo step for in-memory state changed while applying operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RollbackOp {
    /// Drop the persistent id assigned to a new entity.
    ForgetPersistentId { entity: TransientEntity },
}

/// Queued operations partitioned into application order.
#[derive(Debug, Default)]
pub(crate) struct FlushPlan {
    pub(crate) link_deletions: Vec<ApplyOp>,
    pub(crate) entity_deletions: Vec<ApplyOp>,
    pub(crate) mutations: Vec<ApplyOp>,
    pub(crate) unique_keys: Vec<ApplyOp>,
}

impl FlushPlan {
    /// Partitions queued operations.
    ///
    /// - `removed`: entities removed in this round
    /// - `unpersisted`: removed entities that never got a row; every
    ///   operation touching them is dropped
    ///
    /// Link deletions touching removed entities come first, then entity
    /// deletions, then all other operations in queue order, then unique
    /// key maintenance with deletions before insertions.
    pub(crate) fn partition(
        ops: Vec<ApplyOp>,
        unique_ops: Vec<ApplyOp>,
        removed: &HashSet<TransientEntity>,
        unpersisted: &HashSet<TransientEntity>,
    ) -> Self {
        let mut plan = Self::default();
        for op in ops {
            let source = op.entity();
            let target = op.target();
            let touches_unpersisted = source.is_some_and(|e| unpersisted.contains(&e))
                || target.is_some_and(|e| unpersisted.contains(&e));
            if touches_unpersisted {
                continue;
            }
            let source_removed = source.is_some_and(|e| removed.contains(&e));
            let target_removed = target.is_some_and(|e| removed.contains(&e));
            match op {
                ApplyOp::DeleteEntityLinks { .. } => plan.link_deletions.push(op),
                ApplyOp::DeleteEntity { .. } => plan.entity_deletions.push(op),
                ApplyOp::DeleteLink { .. } if source_removed || target_removed => {
                    plan.link_deletions.push(op);
                }
                _ if source_removed => {}
                ApplyOp::SetLink { entity, name, .. } if target_removed => {
                    plan.mutations.push(ApplyOp::DeleteLinks { entity, name });
                }
                _ if target_removed => {}
                _ => plan.mutations.push(op),
            }
        }
        let (deletes, upserts): (Vec<_>, Vec<_>) = unique_ops
            .into_iter()
            .partition(|op| matches!(op, ApplyOp::DeleteUniqueKey { .. }));
        plan.unique_keys.extend(deletes);
        plan.unique_keys.extend(upserts);
        plan
    }

    pub(crate) fn len(&self) -> usize {
        self.link_deletions.len()
            + self.entity_deletions.len()
            + self.mutations.len()
            + self.unique_keys.len()
    }

    /// Operations in application order.
    pub(crate) fn into_ordered(self) -> impl Iterator<Item = ApplyOp> {
        self.link_deletions
            .into_iter()
            .chain(self.entity_deletions)
            .chain(self.mutations)
            .chain(self.unique_keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::SessionId;

    fn entities(n: u32) -> Vec<TransientEntity> {
        let session = SessionId::new();
        (0..n).map(|slot| TransientEntity::new(session, slot)).collect()
    }

    fn set(entities: &[TransientEntity]) -> HashSet<TransientEntity> {
        entities.iter().copied().collect()
    }

    #[test]
    fn link_deletions_precede_entity_deletions() {
        let e = entities(3);
        let ops = vec![
            ApplyOp::SetProperty {
                entity: e[2],
                name: "title".into(),
                value: "x".into(),
            },
            ApplyOp::DeleteEntityLinks { entity: e[0] },
            ApplyOp::DeleteEntity { entity: e[0] },
            ApplyOp::DeleteLink {
                entity: e[1],
                name: "files".into(),
                target: e[0],
            },
            ApplyOp::DeleteEntityLinks { entity: e[1] },
            ApplyOp::DeleteEntity { entity: e[1] },
        ];
        let plan = FlushPlan::partition(ops, Vec::new(), &set(&e[..2]), &HashSet::new());
        let ordered: Vec<_> = plan.into_ordered().collect();

        let last_link_deletion = ordered
            .iter()
            .rposition(|op| matches!(op, ApplyOp::DeleteEntityLinks { .. } | ApplyOp::DeleteLink { .. }))
            .unwrap();
        let first_entity_deletion = ordered
            .iter()
            .position(|op| matches!(op, ApplyOp::DeleteEntity { .. }))
            .unwrap();
        assert!(last_link_deletion < first_entity_deletion);
        assert!(matches!(ordered.last(), Some(ApplyOp::SetProperty { .. })));
    }

    #[test]
    fn writes_to_removed_entities_are_dropped() {
        let e = entities(2);
        let ops = vec![
            ApplyOp::SetProperty {
                entity: e[0],
                name: "name".into(),
                value: "x".into(),
            },
            ApplyOp::AddLink {
                entity: e[1],
                name: "tags".into(),
                target: e[0],
            },
            ApplyOp::DeleteEntity { entity: e[0] },
        ];
        let plan = FlushPlan::partition(ops, Vec::new(), &set(&e[..1]), &HashSet::new());
        assert!(plan.mutations.is_empty());
        assert_eq!(plan.entity_deletions.len(), 1);
    }

    #[test]
    fn unpersisted_removed_entities_vanish() {
        let e = entities(2);
        let ops = vec![
            ApplyOp::CreateEntity { entity: e[0] },
            ApplyOp::AddLink {
                entity: e[1],
                name: "tags".into(),
                target: e[0],
            },
            ApplyOp::DeleteEntityLinks { entity: e[0] },
            ApplyOp::DeleteEntity { entity: e[0] },
        ];
        let plan = FlushPlan::partition(ops, Vec::new(), &set(&e[..1]), &set(&e[..1]));
        assert_eq!(plan.len(), 0);
    }

    #[test]
    fn set_link_to_removed_target_clears_link() {
        let e = entities(2);
        let ops = vec![ApplyOp::SetLink {
            entity: e[1],
            name: "author".into(),
            target: Some(e[0]),
        }];
        let plan = FlushPlan::partition(ops, Vec::new(), &set(&e[..1]), &HashSet::new());
        assert_eq!(
            plan.mutations,
            vec![ApplyOp::DeleteLinks {
                entity: e[1],
                name: "author".into()
            }]
        );
    }

    #[test]
    fn unique_key_deletes_run_before_upserts_and_last() {
        let e = entities(1);
        let ops = vec![ApplyOp::CreateEntity { entity: e[0] }];
        let unique = vec![
            ApplyOp::UpsertUniqueKey {
                index: "User.login".into(),
                entity: e[0],
                key: vec![KeyPart::Property("b".into())],
            },
            ApplyOp::DeleteUniqueKey {
                index: "User.login".into(),
                key: vec![KeyPart::Property("a".into())],
            },
        ];
        let plan = FlushPlan::partition(ops, unique, &HashSet::new(), &HashSet::new());
        let ordered: Vec<_> = plan.into_ordered().collect();
        assert!(matches!(ordered[0], ApplyOp::CreateEntity { .. }));
        assert!(matches!(ordered[1], ApplyOp::DeleteUniqueKey { .. }));
        assert!(matches!(ordered[2], ApplyOp::UpsertUniqueKey { .. }));
        assert!(ordered[2].is_unique_key_op());
    }

    #[test]
    fn property_write_matching() {
        let e = entities(2);
        let op = ApplyOp::DeleteBlob {
            entity: e[0],
            name: "avatar".into(),
        };
        assert!(op.writes_property(e[0], "avatar"));
        assert!(!op.writes_property(e[1], "avatar"));
        assert!(!op.writes_property(e[0], "name"));
    }
}
