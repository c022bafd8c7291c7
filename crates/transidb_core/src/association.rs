//! Helpers keeping both ends of a bidirectional association in sync.
//!
//! Each helper updates the named end of `source` and, if the end
//! declares an opposite end, the matching end of the target. Single- and
//! multi-valued ends are handled according to their declared cardinality.

use crate::entity::TransientEntity;
use crate::error::{TransientError, TransientResult};
use crate::session::TransientSession;

fn opposite_end(session: &TransientSession, entity: TransientEntity, end: &str) -> TransientResult<Option<String>> {
    let entity_type = session.entity_type(entity)?;
    let metadata = session.metadata();
    let declared = metadata.association_end(&entity_type, end).ok_or_else(|| {
        TransientError::invalid_operation(format!("{entity_type} has no association end {end}"))
    })?;
    Ok(declared.opposite_end.clone())
}

/// Points `end` of `entity` at `target`, replacing the current target of
/// a single-valued end.
fn attach(
    session: &mut TransientSession,
    entity: TransientEntity,
    end: &str,
    target: TransientEntity,
) -> TransientResult<bool> {
    match session.link_cardinality(entity, end) {
        Some(cardinality) if !cardinality.is_multiple() => {
            if let Some(previous) = session.get_link(entity, end)? {
                if previous != target {
                    detach_opposite(session, entity, end, previous)?;
                }
            }
            session.set_link(entity, end, Some(target))
        }
        _ => session.add_link(entity, end, target),
    }
}

/// Removes `entity` from the opposite end of `previous`.
fn detach_opposite(
    session: &mut TransientSession,
    entity: TransientEntity,
    end: &str,
    previous: TransientEntity,
) -> TransientResult<()> {
    if let Some(opposite) = opposite_end(session, entity, end)? {
        session.delete_link(previous, &opposite, entity)?;
    }
    Ok(())
}

/// Links `source` to `target` through `end`, and `target` back to
/// `source` through the opposite end.
///
/// Returns false if `source` was already linked to `target`.
pub fn link(
    session: &mut TransientSession,
    source: TransientEntity,
    end: &str,
    target: TransientEntity,
) -> TransientResult<bool> {
    let opposite = opposite_end(session, source, end)?;
    let changed = attach(session, source, end, target)?;
    if let Some(opposite) = opposite {
        attach(session, target, &opposite, source)?;
    }
    Ok(changed)
}

/// Removes the link between `source` and `target` on both ends.
pub fn unlink(
    session: &mut TransientSession,
    source: TransientEntity,
    end: &str,
    target: TransientEntity,
) -> TransientResult<bool> {
    let opposite = opposite_end(session, source, end)?;
    let changed = session.delete_link(source, end, target)?;
    if let Some(opposite) = opposite {
        session.delete_link(target, &opposite, source)?;
    }
    Ok(changed)
}

/// Sets or clears a single-valued end, keeping the opposite end of the
/// old and new targets in sync.
pub fn set_one(
    session: &mut TransientSession,
    source: TransientEntity,
    end: &str,
    target: Option<TransientEntity>,
) -> TransientResult<bool> {
    let current = session.get_link(source, end)?;
    if current == target {
        return Ok(false);
    }
    match target {
        Some(target) => link(session, source, end, target),
        None => match current {
            Some(current) => unlink(session, source, end, current),
            None => Ok(false),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{AssociationEnd, Cardinality, EntityMetadata, ModelMetadata};
    use crate::store::TransientStore;
    use std::sync::Arc;
    use transidb_store::InMemoryStore;

    fn store() -> TransientStore {
        let model = ModelMetadata::from_entities([
            EntityMetadata::new("Person")
                .end(AssociationEnd::new("spouse", "Person", Cardinality::ZeroOrOne).opposite("spouse"))
                .end(AssociationEnd::new("groups", "Group", Cardinality::ZeroOrMore).opposite("members")),
            EntityMetadata::new("Group")
                .end(AssociationEnd::new("members", "Person", Cardinality::ZeroOrMore).opposite("groups")),
        ]);
        TransientStore::new(Arc::new(InMemoryStore::new()), model)
    }

    #[test]
    fn link_updates_both_ends() {
        let store = store();
        let mut session = store.begin_session().unwrap();
        let alice = session.new_entity("Person").unwrap();
        let admins = session.new_entity("Group").unwrap();

        assert!(link(&mut session, alice, "groups", admins).unwrap());
        assert_eq!(session.get_links(alice, "groups").unwrap(), vec![admins]);
        assert_eq!(session.get_links(admins, "members").unwrap(), vec![alice]);

        assert!(unlink(&mut session, admins, "members", alice).unwrap());
        assert!(session.get_links(alice, "groups").unwrap().is_empty());
    }

    #[test]
    fn set_one_moves_opposite_end() {
        let store = store();
        let mut session = store.begin_session().unwrap();
        let a = session.new_entity("Person").unwrap();
        let b = session.new_entity("Person").unwrap();
        let c = session.new_entity("Person").unwrap();

        set_one(&mut session, a, "spouse", Some(b)).unwrap();
        assert_eq!(session.get_link(b, "spouse").unwrap(), Some(a));

        set_one(&mut session, a, "spouse", Some(c)).unwrap();
        assert_eq!(session.get_link(b, "spouse").unwrap(), None);
        assert_eq!(session.get_link(c, "spouse").unwrap(), Some(a));

        assert!(!set_one(&mut session, a, "spouse", Some(c)).unwrap());
        set_one(&mut session, a, "spouse", None).unwrap();
        assert_eq!(session.get_link(c, "spouse").unwrap(), None);
    }
}
