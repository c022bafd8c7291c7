//! Session-owned entity table.

use crate::entity::{EntityId, SessionId, TransientEntity, TransientId};
use crate::session::BlobRef;
use std::collections::HashMap;
use transidb_store::{PersistentEntityId, PropertyValue};

/// Local modifications layered over the persistent row.
///
/// `None` values record a deletion. Links are materialized into the
/// overlay on their first mutation and are authoritative from then on.
#[derive(Debug, Default, Clone)]
pub(crate) struct Overlay {
    pub(crate) properties: HashMap<String, Option<PropertyValue>>,
    pub(crate) blobs: HashMap<String, Option<BlobRef>>,
    pub(crate) links: HashMap<String, Vec<TransientEntity>>,
}

impl Overlay {
    pub(crate) fn clear(&mut self) {
        self.properties.clear();
        self.blobs.clear();
        self.links.clear();
    }
}

#[derive(Debug)]
pub(crate) struct EntityRecord {
    pub(crate) entity_type: String,
    pub(crate) transient_id: TransientId,
    pub(crate) persistent_id: Option<PersistentEntityId>,
    /// Version of the persistent row as last read or written by the session.
    pub(crate) version: Option<u64>,
    pub(crate) was_new: bool,
    pub(crate) temporary: bool,
    /// Deleted from the store by a flush of this session.
    pub(crate) deleted: bool,
    pub(crate) overlay: Overlay,
}

impl EntityRecord {
    fn new(entity_type: &str, transient_id: TransientId) -> Self {
        Self {
            entity_type: entity_type.to_string(),
            transient_id,
            persistent_id: None,
            version: None,
            was_new: false,
            temporary: false,
            deleted: false,
            overlay: Overlay::default(),
        }
    }

    pub(crate) fn id(&self) -> EntityId {
        match self.persistent_id {
            Some(id) => EntityId::Persisted(id),
            None => EntityId::Transient(self.transient_id),
        }
    }
}

/// Entity table with identity maps.
///
/// Handles index into `records`; slots are never reused. Every record gets
/// a transient id, but only entities created in the session are
/// resolvable by it. Both identity maps only grow: a transient id stays
/// resolvable after the entity has been persisted.
#[derive(Debug)]
pub(crate) struct EntityArena {
    session: SessionId,
    records: Vec<EntityRecord>,
    by_persistent: HashMap<PersistentEntityId, u32>,
    by_transient: HashMap<TransientId, u32>,
    next_transient: u64,
}

impl EntityArena {
    pub(crate) fn new(session: SessionId) -> Self {
        Self {
            session,
            records: Vec::new(),
            by_persistent: HashMap::new(),
            by_transient: HashMap::new(),
            next_transient: 0,
        }
    }

    fn allocate_transient(&mut self) -> TransientId {
        let id = TransientId::new(self.next_transient);
        self.next_transient += 1;
        id
    }

    fn push(&mut self, record: EntityRecord) -> TransientEntity {
        let slot = u32::try_from(self.records.len()).unwrap_or(u32::MAX);
        self.records.push(record);
        TransientEntity::new(self.session, slot)
    }

    pub(crate) fn contains(&self, entity: TransientEntity) -> bool {
        entity.session == self.session && (entity.slot as usize) < self.records.len()
    }

    /// Creates a record for a new entity with a fresh transient id.
    pub(crate) fn create(&mut self, entity_type: &str) -> TransientEntity {
        let transient_id = self.allocate_transient();
        let entity = self.push(EntityRecord::new(entity_type, transient_id));
        self.by_transient.insert(transient_id, entity.slot);
        entity
    }

    /// Creates a record that is never persisted.
    pub(crate) fn create_temporary(&mut self, entity_type: &str, overlay: Overlay) -> TransientEntity {
        let transient_id = self.allocate_transient();
        let mut record = EntityRecord::new(entity_type, transient_id);
        record.temporary = true;
        record.overlay = overlay;
        self.push(record)
    }

    /// Returns the handle for a persisted row, creating it on first sight.
    pub(crate) fn wrap(
        &mut self,
        id: PersistentEntityId,
        entity_type: &str,
        version: Option<u64>,
    ) -> TransientEntity {
        if let Some(entity) = self.lookup_persistent(id) {
            return entity;
        }
        let transient_id = self.allocate_transient();
        let mut record = EntityRecord::new(entity_type, transient_id);
        record.persistent_id = Some(id);
        record.version = version;
        let entity = self.push(record);
        self.by_persistent.insert(id, entity.slot);
        entity
    }

    pub(crate) fn lookup_persistent(&self, id: PersistentEntityId) -> Option<TransientEntity> {
        self.by_persistent
            .get(&id)
            .map(|slot| TransientEntity::new(self.session, *slot))
    }

    pub(crate) fn lookup_transient(&self, id: TransientId) -> Option<TransientEntity> {
        self.by_transient
            .get(&id)
            .map(|slot| TransientEntity::new(self.session, *slot))
    }

    pub(crate) fn resolve(&self, id: EntityId) -> Option<TransientEntity> {
        match id {
            EntityId::Persisted(id) => self.lookup_persistent(id),
            EntityId::Transient(id) => self.lookup_transient(id),
        }
    }

    /// Records the row created for a new entity by a flush.
    pub(crate) fn assign_persistent(&mut self, entity: TransientEntity, id: PersistentEntityId) {
        self.record_mut(entity).persistent_id = Some(id);
        self.by_persistent.insert(id, entity.slot);
    }

    /// Undoes [`assign_persistent`](Self::assign_persistent) after a failed flush.
    pub(crate) fn forget_persistent(&mut self, entity: TransientEntity) {
        let record = self.record_mut(entity);
        if let Some(id) = record.persistent_id.take() {
            record.version = None;
            self.by_persistent.remove(&id);
        }
    }

    /// Returns the record of a handle checked with [`contains`](Self::contains).
    pub(crate) fn record(&self, entity: TransientEntity) -> &EntityRecord {
        &self.records[entity.slot as usize]
    }

    pub(crate) fn record_mut(&mut self, entity: TransientEntity) -> &mut EntityRecord {
        &mut self.records[entity.slot as usize]
    }

    pub(crate) fn entities(&self) -> impl Iterator<Item = (TransientEntity, &EntityRecord)> + '_ {
        let session = self.session;
        self.records
            .iter()
            .enumerate()
            .map(move |(slot, record)| (TransientEntity::new(session, slot as u32), record))
    }

    pub(crate) fn entities_mut(&mut self) -> impl Iterator<Item = (TransientEntity, &mut EntityRecord)> + '_ {
        let session = self.session;
        self.records
            .iter_mut()
            .enumerate()
            .map(move |(slot, record)| (TransientEntity::new(session, slot as u32), record))
    }

    pub(crate) fn records_mut(&mut self) -> impl Iterator<Item = &mut EntityRecord> + '_ {
        self.records.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_is_identity_mapped() {
        let mut arena = EntityArena::new(SessionId::new());
        let id = PersistentEntityId::new(1, 5);
        let a = arena.wrap(id, "User", Some(0));
        let b = arena.wrap(id, "User", Some(3));
        assert_eq!(a, b);
        assert_eq!(arena.record(a).version, Some(0));
    }

    #[test]
    fn transient_id_survives_persisting() {
        let mut arena = EntityArena::new(SessionId::new());
        let entity = arena.create("User");
        let transient = arena.record(entity).transient_id;

        let id = PersistentEntityId::new(1, 0);
        arena.assign_persistent(entity, id);

        assert_eq!(arena.resolve(EntityId::Transient(transient)), Some(entity));
        assert_eq!(arena.resolve(EntityId::Persisted(id)), Some(entity));
        assert_eq!(arena.record(entity).id(), EntityId::Persisted(id));
    }

    #[test]
    fn forget_persistent_restores_transient_identity() {
        let mut arena = EntityArena::new(SessionId::new());
        let entity = arena.create("User");
        let id = PersistentEntityId::new(1, 0);
        arena.assign_persistent(entity, id);
        arena.forget_persistent(entity);

        assert!(arena.lookup_persistent(id).is_none());
        assert!(matches!(arena.record(entity).id(), EntityId::Transient(_)));
    }

    #[test]
    fn foreign_handles_are_not_contained() {
        let mut arena = EntityArena::new(SessionId::new());
        let entity = arena.create("User");
        let other = TransientEntity::new(SessionId::new(), entity.slot);
        assert!(arena.contains(entity));
        assert!(!arena.contains(other));
    }

    #[test]
    fn temporary_records_have_no_identity_entries() {
        let mut arena = EntityArena::new(SessionId::new());
        let entity = arena.create_temporary("User", Overlay::default());
        let record = arena.record(entity);
        assert!(record.temporary);
        assert!(arena.lookup_transient(record.transient_id).is_none());
    }
}
