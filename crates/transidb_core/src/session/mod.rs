//! Transient sessions.
//!
//! A [`TransientSession`] overlays local, tracked changes on a snapshot
//! of the persistent store. Reads see the snapshot plus the session's own
//! pending changes; writes are recorded in the session's
//! [`ChangesTracker`] and queued as store operations that run at flush.
//!
//! A session is bound to the thread that opened or resumed it. Handles
//! ([`TransientEntity`]) are indexes into the session's entity table and
//! are only valid with the session that produced them.

mod blob;
mod flush;
mod inspect;
mod ops;
mod query;
mod remove;
mod state;

pub(crate) use blob::{BlobRef, PendingBlobs};
pub(crate) use ops::{ApplyOp, KeyPart};
pub use query::EntityIter;
pub(crate) use state::{check_access, Access, StateError};
pub use state::SessionState;

use crate::changes::ChangesTracker;
use crate::entity::{EntityArena, EntityId, EntityState, Overlay, SessionId, TransientEntity};
use crate::error::{TransientError, TransientResult};
use crate::metadata::{Cardinality, ModelMetadata};
use crate::store::TransientStore;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::fmt;
use std::io::Read;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tracing::{debug, trace, warn};
use transidb_store::{PersistentEntityId, PropertyValue, StoreError, StoreResult, StoreTransaction};

/// Treats reads of rows deleted behind the session's back as empty.
fn tolerate_missing<T: Default>(result: StoreResult<T>) -> TransientResult<T> {
    match result {
        Err(StoreError::EntityNotFound { .. }) => Ok(T::default()),
        other => Ok(other?),
    }
}

/// A unit of work over a [`TransientStore`].
pub struct TransientSession {
    id: SessionId,
    state: SessionState,
    owner: Option<ThreadId>,
    store: TransientStore,
    snapshot: Option<Box<dyn StoreTransaction>>,
    arena: RwLock<EntityArena>,
    tracker: ChangesTracker,
    ops: Vec<ApplyOp>,
    blobs: PendingBlobs,
    check_versions: bool,
    postpone_unique_keys: bool,
}

impl TransientSession {
    pub(crate) fn open(store: TransientStore, id: SessionId) -> TransientResult<Self> {
        let persistent = store.persistent();
        let snapshot = persistent.begin_read()?;
        let tracker = ChangesTracker::new(Some(persistent.begin_read()?));
        let config = store.config();
        let session = Self {
            id,
            state: SessionState::Open,
            owner: Some(thread::current().id()),
            snapshot: Some(snapshot),
            arena: RwLock::new(EntityArena::new(id)),
            tracker,
            ops: Vec::new(),
            blobs: PendingBlobs::new(config.blob_spool_dir.clone()),
            check_versions: config.check_versions,
            postpone_unique_keys: false,
            store,
        };
        debug!(session = %id, "session opened");
        Ok(session)
    }

    /// Returns the session id.
    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// Returns the session state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Returns true if the session is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }

    /// Returns the store the session belongs to.
    #[must_use]
    pub const fn store(&self) -> &TransientStore {
        &self.store
    }

    /// Returns the model metadata.
    #[must_use]
    pub fn metadata(&self) -> &Arc<ModelMetadata> {
        self.store.metadata()
    }

    /// Returns the tracker holding the changes since the last flush.
    #[must_use]
    pub const fn tracker(&self) -> &ChangesTracker {
        &self.tracker
    }

    /// Returns true if entity versions are checked at flush.
    #[must_use]
    pub const fn check_versions(&self) -> bool {
        self.check_versions
    }

    /// Enables or disables version checks at flush.
    pub fn set_check_versions(&mut self, value: bool) {
        self.check_versions = value;
    }

    /// Returns true if unique key maintenance is postponed.
    #[must_use]
    pub const fn unique_keys_postponed(&self) -> bool {
        self.postpone_unique_keys
    }

    /// Postpones unique key maintenance.
    ///
    /// While postponed, flushes still validate unique keys but do not
    /// write them to the store; the caller takes over their maintenance.
    pub fn postpone_unique_keys(&mut self, value: bool) {
        self.postpone_unique_keys = value;
    }

    fn check_thread(&self) -> TransientResult<()> {
        if self.state == SessionState::Open && self.owner != Some(thread::current().id()) {
            return Err(TransientError::CrossThreadAccess { session: self.id });
        }
        Ok(())
    }

    /// Fails unless the session is open on the current thread.
    pub(crate) fn ensure_open(&self) -> TransientResult<()> {
        if self.state != SessionState::Open {
            return Err(TransientError::SessionNotOpen {
                session: self.id,
                state: self.state,
            });
        }
        self.check_thread()
    }

    fn ensure_own(&self, entity: TransientEntity) -> TransientResult<()> {
        if self.arena.read().contains(entity) {
            Ok(())
        } else {
            Err(TransientError::ForeignEntity {
                owner: entity.session,
                session: self.id,
            })
        }
    }

    /// Checks thread, session state and ownership, but not entity state.
    pub(crate) fn check_session(&self, entity: TransientEntity) -> TransientResult<()> {
        self.ensure_open()?;
        self.ensure_own(entity)
    }

    pub(crate) fn access(&self, entity: TransientEntity, access: Access) -> TransientResult<()> {
        self.check_thread()?;
        self.ensure_own(entity)?;
        check_access(self.state_of(entity), self.state, access).map_err(|err| match err {
            StateError::EntityRemoved => TransientError::EntityRemoved {
                entity: self.id_of(entity),
            },
            StateError::ReadonlyEntity => TransientError::ReadonlyEntity {
                entity: self.id_of(entity),
            },
            StateError::SessionNotOpen(state) => TransientError::SessionNotOpen {
                session: self.id,
                state,
            },
        })
    }

    fn check_target(&self, target: TransientEntity) -> TransientResult<()> {
        self.ensure_own(target)?;
        match self.state_of(target) {
            EntityState::Removed => Err(TransientError::EntityRemoved {
                entity: self.id_of(target),
            }),
            EntityState::Temporary => Err(TransientError::ReadonlyEntity {
                entity: self.id_of(target),
            }),
            _ => Ok(()),
        }
    }

    pub(crate) fn view(&self) -> TransientResult<&dyn StoreTransaction> {
        self.snapshot
            .as_deref()
            .ok_or(TransientError::SessionNotOpen {
                session: self.id,
                state: self.state,
            })
    }

    /// Snapshot holding pre-change values of the current round.
    fn original_view(&self) -> TransientResult<&dyn StoreTransaction> {
        match self.tracker.snapshot() {
            Some(snapshot) => Ok(snapshot),
            None => self.view(),
        }
    }

    pub(crate) fn state_of(&self, entity: TransientEntity) -> EntityState {
        let arena = self.arena.read();
        let record = arena.record(entity);
        if record.temporary {
            EntityState::Temporary
        } else if record.deleted || self.tracker.is_removed(entity) {
            EntityState::Removed
        } else if self.tracker.is_new(entity) {
            EntityState::New
        } else if record.was_new {
            EntityState::SavedNew
        } else {
            EntityState::Saved
        }
    }

    pub(crate) fn is_removed_raw(&self, entity: TransientEntity) -> bool {
        self.tracker.is_removed(entity) || self.arena.read().record(entity).deleted
    }

    pub(crate) fn is_temporary_raw(&self, entity: TransientEntity) -> bool {
        self.arena.read().record(entity).temporary
    }

    pub(crate) fn id_of(&self, entity: TransientEntity) -> EntityId {
        self.arena.read().record(entity).id()
    }

    pub(crate) fn type_of(&self, entity: TransientEntity) -> String {
        self.arena.read().record(entity).entity_type.clone()
    }

    pub(crate) fn persistent_id_of(&self, entity: TransientEntity) -> Option<PersistentEntityId> {
        self.arena.read().record(entity).persistent_id
    }

    pub(crate) fn remembered_version(&self, entity: TransientEntity) -> Option<u64> {
        self.arena.read().record(entity).version
    }

    /// Returns the handle for a persisted row.
    pub(crate) fn wrap(&self, id: PersistentEntityId) -> TransientResult<TransientEntity> {
        let existing = self.arena.read().lookup_persistent(id);
        if let Some(entity) = existing {
            return Ok(entity);
        }
        let entity_type = self
            .store
            .persistent()
            .entity_type_name(id.type_id)
            .ok_or_else(|| {
                TransientError::invalid_operation(format!("unknown entity type id {}", id.type_id))
            })?;
        let version = self.view()?.get_version(id)?;
        Ok(self.arena.write().wrap(id, &entity_type, version))
    }

    /// Resolves a persistent id if the row is known or visible.
    pub(crate) fn load(&self, id: PersistentEntityId) -> TransientResult<Option<TransientEntity>> {
        let existing = self.arena.read().lookup_persistent(id);
        if existing.is_some() {
            return Ok(existing);
        }
        if self.view()?.exists(id)? {
            self.wrap(id).map(Some)
        } else {
            Ok(None)
        }
    }

    pub(crate) fn raw_property(
        &self,
        entity: TransientEntity,
        name: &str,
    ) -> TransientResult<Option<PropertyValue>> {
        let persistent = {
            let arena = self.arena.read();
            let record = arena.record(entity);
            if let Some(value) = record.overlay.properties.get(name) {
                return Ok(value.clone());
            }
            record.persistent_id
        };
        match persistent {
            Some(id) => tolerate_missing(self.view()?.get_property(id, name)),
            None => Ok(None),
        }
    }

    pub(crate) fn raw_blob(&self, entity: TransientEntity, name: &str) -> TransientResult<Option<Vec<u8>>> {
        let persistent = {
            let arena = self.arena.read();
            let record = arena.record(entity);
            if let Some(pending) = record.overlay.blobs.get(name) {
                return match pending {
                    Some(blob) => Ok(Some(self.blobs.read(*blob)?)),
                    None => Ok(None),
                };
            }
            record.persistent_id
        };
        match persistent {
            Some(id) => tolerate_missing(self.view()?.get_blob(id, name)),
            None => Ok(None),
        }
    }

    pub(crate) fn raw_has_blob(&self, entity: TransientEntity, name: &str) -> TransientResult<bool> {
        let persistent = {
            let arena = self.arena.read();
            let record = arena.record(entity);
            if let Some(pending) = record.overlay.blobs.get(name) {
                return Ok(pending.is_some());
            }
            record.persistent_id
        };
        match persistent {
            Some(id) => Ok(tolerate_missing(self.view()?.blob_names(id))?
                .iter()
                .any(|blob| blob == name)),
            None => Ok(false),
        }
    }

    /// All link targets, including removed ones.
    pub(crate) fn raw_links(
        &self,
        entity: TransientEntity,
        name: &str,
    ) -> TransientResult<Vec<TransientEntity>> {
        let persistent = {
            let arena = self.arena.read();
            let record = arena.record(entity);
            if let Some(targets) = record.overlay.links.get(name) {
                return Ok(targets.clone());
            }
            record.persistent_id
        };
        match persistent {
            Some(id) => tolerate_missing(self.view()?.get_links(id, name))?
                .into_iter()
                .map(|target| self.wrap(target))
                .collect(),
            None => Ok(Vec::new()),
        }
    }

    /// Link targets that are not removed.
    pub(crate) fn live_links(
        &self,
        entity: TransientEntity,
        name: &str,
    ) -> TransientResult<Vec<TransientEntity>> {
        let mut targets = self.raw_links(entity, name)?;
        targets.retain(|target| !self.is_removed_raw(*target));
        Ok(targets)
    }

    /// Counts live link targets, stopping at `bound`.
    pub(crate) fn count_live_links(
        &self,
        entity: TransientEntity,
        name: &str,
        bound: usize,
    ) -> TransientResult<usize> {
        let (overlay, persistent) = {
            let arena = self.arena.read();
            let record = arena.record(entity);
            (record.overlay.links.get(name).cloned(), record.persistent_id)
        };
        if let Some(targets) = overlay {
            return Ok(targets
                .into_iter()
                .filter(|target| !self.is_removed_raw(*target))
                .take(bound)
                .count());
        }
        match persistent {
            Some(id) if !self.may_link_removed(entity, name) => {
                tolerate_missing(self.view()?.count_links(id, name, bound))
            }
            Some(id) => {
                let ids = tolerate_missing(self.view()?.get_links(id, name))?;
                let mut count = 0;
                for target in ids {
                    if count == bound {
                        break;
                    }
                    let known = self.arena.read().lookup_persistent(target);
                    if !known.is_some_and(|target| self.is_removed_raw(target)) {
                        count += 1;
                    }
                }
                Ok(count)
            }
            None => Ok(0),
        }
    }

    /// Returns true if a stored target of the link may have been removed
    /// in this round.
    fn may_link_removed(&self, entity: TransientEntity, name: &str) -> bool {
        let target_type = self
            .metadata()
            .association_end(&self.type_of(entity), name)
            .map(|end| end.target_type.clone());
        self.tracker.removed_entities().any(|removed| {
            self.persistent_id_of(removed).is_some()
                && target_type
                    .as_deref()
                    .map_or(true, |target_type| self.type_of(removed) == target_type)
        })
    }

    /// Entities of `source_type` linking to `target` through `link`,
    /// as seen by the session.
    pub(crate) fn incoming_links(
        &self,
        target: TransientEntity,
        source_type: &str,
        link: &str,
    ) -> TransientResult<Vec<TransientEntity>> {
        let mut sources = Vec::new();
        if let Some(id) = self.persistent_id_of(target) {
            for source_id in self.view()?.find_links(source_type, id, link)? {
                let source = self.wrap(source_id)?;
                let overridden = self
                    .arena
                    .read()
                    .record(source)
                    .overlay
                    .links
                    .contains_key(link);
                if !overridden {
                    sources.push(source);
                }
            }
        }
        let arena = self.arena.read();
        for (source, record) in arena.entities() {
            if record.temporary || record.entity_type != source_type {
                continue;
            }
            if record
                .overlay
                .links
                .get(link)
                .is_some_and(|targets| targets.contains(&target))
                && !sources.contains(&source)
            {
                sources.push(source);
            }
        }
        Ok(sources)
    }

    /// Pre-change value of a property.
    pub(crate) fn stored_property(
        &self,
        entity: TransientEntity,
        name: &str,
    ) -> TransientResult<Option<PropertyValue>> {
        match self.persistent_id_of(entity) {
            Some(id) if !self.tracker.is_new(entity) => {
                tolerate_missing(self.original_view()?.get_property(id, name))
            }
            _ => Ok(None),
        }
    }

    /// Pre-change value of a blob.
    fn stored_blob(
        &self,
        entity: TransientEntity,
        name: &str,
    ) -> TransientResult<Option<Vec<u8>>> {
        match self.persistent_id_of(entity) {
            Some(id) if !self.tracker.is_new(entity) => {
                tolerate_missing(self.original_view()?.get_blob(id, name))
            }
            _ => Ok(None),
        }
    }

    /// Pre-change targets of a link.
    pub(crate) fn stored_links(
        &self,
        entity: TransientEntity,
        name: &str,
    ) -> TransientResult<Vec<TransientEntity>> {
        match self.persistent_id_of(entity) {
            Some(id) if !self.tracker.is_new(entity) => {
                tolerate_missing(self.original_view()?.get_links(id, name))?
                    .into_iter()
                    .map(|target| self.wrap(target))
                    .collect()
            }
            _ => Ok(Vec::new()),
        }
    }

    /// Creates a new entity of the given type.
    pub fn new_entity(&mut self, entity_type: &str) -> TransientResult<TransientEntity> {
        self.ensure_open()?;
        let entity = self.arena.get_mut().create(entity_type);
        self.tracker.entity_added(entity, entity_type);
        self.ops.push(ApplyOp::CreateEntity { entity });
        trace!(session = %self.id, entity = %self.id_of(entity), entity_type, "entity created");
        Ok(entity)
    }

    /// Creates a read-only copy of an entity's current properties and
    /// links.
    ///
    /// The copy is [`Temporary`](EntityState::Temporary): it can be read
    /// but never written or flushed.
    pub fn snapshot_entity(&mut self, entity: TransientEntity) -> TransientResult<TransientEntity> {
        self.access(entity, Access::Read)?;
        let mut overlay = Overlay::default();
        for name in self.property_names(entity)? {
            let value = self.raw_property(entity, &name)?;
            overlay.properties.insert(name, value);
        }
        for name in self.link_names(entity)? {
            let targets = self.live_links(entity, &name)?;
            overlay.links.insert(name, targets);
        }
        let entity_type = self.type_of(entity);
        Ok(self.arena.get_mut().create_temporary(&entity_type, overlay))
    }

    /// Resolves an id to a handle.
    ///
    /// Transient ids resolve for the whole life of the session, also
    /// after the entity was persisted.
    ///
    /// # Errors
    ///
    /// Returns `EntityRemoved` if the entity was removed in this session.
    pub fn get_entity(&self, id: EntityId) -> TransientResult<Option<TransientEntity>> {
        self.ensure_open()?;
        let entity = match id {
            EntityId::Transient(transient) => self.arena.read().lookup_transient(transient),
            EntityId::Persisted(persistent) => self.load(persistent)?,
        };
        match entity {
            Some(entity) if self.is_removed_raw(entity) => Err(TransientError::EntityRemoved { entity: id }),
            other => Ok(other),
        }
    }

    /// Returns the entity's current id.
    pub fn entity_id(&self, entity: TransientEntity) -> TransientResult<EntityId> {
        self.ensure_own(entity)?;
        Ok(self.id_of(entity))
    }

    /// Returns the entity's type name.
    pub fn entity_type(&self, entity: TransientEntity) -> TransientResult<String> {
        self.ensure_own(entity)?;
        Ok(self.type_of(entity))
    }

    /// Returns the entity's lifecycle state.
    pub fn entity_state(&self, entity: TransientEntity) -> TransientResult<EntityState> {
        self.ensure_own(entity)?;
        Ok(self.state_of(entity))
    }

    /// Returns true if the entity was created since the last flush.
    pub fn is_new(&self, entity: TransientEntity) -> TransientResult<bool> {
        Ok(self.entity_state(entity)? == EntityState::New)
    }

    /// Returns true if the entity has a persistent row and is not removed.
    pub fn is_saved(&self, entity: TransientEntity) -> TransientResult<bool> {
        Ok(self.entity_state(entity)?.is_saved())
    }

    /// Returns true if the entity was removed.
    pub fn is_removed(&self, entity: TransientEntity) -> TransientResult<bool> {
        Ok(self.entity_state(entity)? == EntityState::Removed)
    }

    /// Returns true if the entity was created in this session and has
    /// since been persisted.
    pub fn was_new(&self, entity: TransientEntity) -> TransientResult<bool> {
        self.ensure_own(entity)?;
        Ok(self.arena.read().record(entity).was_new)
    }

    /// Reads a property.
    pub fn get_property(
        &self,
        entity: TransientEntity,
        name: &str,
    ) -> TransientResult<Option<PropertyValue>> {
        self.access(entity, Access::Read)?;
        self.raw_property(entity, name)
    }

    /// Returns the names of all set properties.
    pub fn property_names(&self, entity: TransientEntity) -> TransientResult<Vec<String>> {
        self.access(entity, Access::Read)?;
        let (mut names, overlay) = {
            let arena = self.arena.read();
            let record = arena.record(entity);
            let stored = match record.persistent_id {
                Some(id) => tolerate_missing(self.view()?.property_names(id))?,
                None => Vec::new(),
            };
            (stored, record.overlay.properties.clone())
        };
        for (name, value) in overlay {
            match value {
                Some(_) if !names.contains(&name) => names.push(name),
                None => names.retain(|n| *n != name),
                Some(_) => {}
            }
        }
        names.sort();
        Ok(names)
    }

    /// Sets a property. Returns false if the value was unchanged.
    pub fn set_property(
        &mut self,
        entity: TransientEntity,
        name: &str,
        value: impl Into<PropertyValue>,
    ) -> TransientResult<bool> {
        self.access(entity, Access::Write)?;
        self.change_property(entity, name, Some(value.into()))
    }

    /// Deletes a property. Returns false if it was not set.
    pub fn delete_property(&mut self, entity: TransientEntity, name: &str) -> TransientResult<bool> {
        self.access(entity, Access::Write)?;
        self.change_property(entity, name, None)
    }

    fn change_property(
        &mut self,
        entity: TransientEntity,
        name: &str,
        value: Option<PropertyValue>,
    ) -> TransientResult<bool> {
        if self.raw_property(entity, name)? == value {
            return Ok(false);
        }
        let original = match self.tracker.original_property(entity, name) {
            Some(original) => original.clone(),
            None => {
                let stored = self.stored_property(entity, name)?;
                self.tracker.record_original(entity, name, stored.clone());
                stored
            }
        };
        let entity_type = self.type_of(entity);
        self.ops.retain(|op| !op.writes_property(entity, name));
        let record = self.arena.get_mut().record_mut(entity);
        if original == value {
            record.overlay.properties.remove(name);
            self.tracker.property_unchanged(entity, name);
        } else {
            record.overlay.properties.insert(name.to_string(), value.clone());
            self.tracker.property_changed(entity, &entity_type, name);
            self.ops.push(match value {
                Some(value) => ApplyOp::SetProperty {
                    entity,
                    name: name.to_string(),
                    value,
                },
                None => ApplyOp::DeleteProperty {
                    entity,
                    name: name.to_string(),
                },
            });
        }
        trace!(session = %self.id, entity = %self.id_of(entity), property = name, "property changed");
        Ok(true)
    }

    /// Reads a blob.
    pub fn get_blob(&self, entity: TransientEntity, name: &str) -> TransientResult<Option<Vec<u8>>> {
        self.access(entity, Access::Read)?;
        self.raw_blob(entity, name)
    }

    /// Reads a text blob.
    pub fn get_blob_string(&self, entity: TransientEntity, name: &str) -> TransientResult<Option<String>> {
        self.access(entity, Access::Read)?;
        match self.raw_blob(entity, name)? {
            Some(data) => String::from_utf8(data).map(Some).map_err(|_| {
                TransientError::InvalidBlobEncoding {
                    entity: self.id_of(entity),
                    blob: name.to_string(),
                }
            }),
            None => Ok(None),
        }
    }

    /// Sets a blob.
    pub fn set_blob(&mut self, entity: TransientEntity, name: &str, data: Vec<u8>) -> TransientResult<()> {
        self.access(entity, Access::Write)?;
        let blob = self.blobs.insert_bytes(data);
        self.change_blob(entity, name, Some(blob))
    }

    /// Sets a text blob.
    pub fn set_blob_string(&mut self, entity: TransientEntity, name: &str, text: &str) -> TransientResult<()> {
        self.set_blob(entity, name, text.as_bytes().to_vec())
    }

    /// Sets a blob from a reader, spooling it to a temporary file until
    /// flush.
    pub fn set_blob_from_reader(
        &mut self,
        entity: TransientEntity,
        name: &str,
        reader: &mut dyn Read,
    ) -> TransientResult<()> {
        self.access(entity, Access::Write)?;
        let blob = self.blobs.spool(reader)?;
        self.change_blob(entity, name, Some(blob))
    }

    /// Deletes a blob. Returns false if it was not set.
    pub fn delete_blob(&mut self, entity: TransientEntity, name: &str) -> TransientResult<bool> {
        self.access(entity, Access::Write)?;
        if !self.raw_has_blob(entity, name)? {
            return Ok(false);
        }
        self.change_blob(entity, name, None)?;
        Ok(true)
    }

    fn change_blob(
        &mut self,
        entity: TransientEntity,
        name: &str,
        blob: Option<BlobRef>,
    ) -> TransientResult<()> {
        let value = blob.map(|blob| self.blobs.read(blob)).transpose()?;
        let original = self.stored_blob(entity, name)?;
        let entity_type = self.type_of(entity);
        self.ops.retain(|op| !op.writes_property(entity, name));
        let overlay = &mut self.arena.get_mut().record_mut(entity).overlay;
        let superseded = if original == value {
            let superseded = overlay.blobs.remove(name).flatten();
            self.tracker.property_unchanged(entity, name);
            superseded.into_iter().chain(blob).collect::<Vec<_>>()
        } else {
            let superseded = overlay.blobs.insert(name.to_string(), blob).flatten();
            self.tracker.property_changed(entity, &entity_type, name);
            self.ops.push(match blob {
                Some(blob) => ApplyOp::SetBlob {
                    entity,
                    name: name.to_string(),
                    blob,
                },
                None => ApplyOp::DeleteBlob {
                    entity,
                    name: name.to_string(),
                },
            });
            superseded.into_iter().collect()
        };
        for blob in superseded {
            self.blobs.release(blob);
        }
        trace!(session = %self.id, entity = %self.id_of(entity), blob = name, "blob changed");
        Ok(())
    }

    /// Reads a single-valued link.
    pub fn get_link(&self, entity: TransientEntity, name: &str) -> TransientResult<Option<TransientEntity>> {
        Ok(self.get_links(entity, name)?.into_iter().next())
    }

    /// Reads all live targets of a link.
    pub fn get_links(&self, entity: TransientEntity, name: &str) -> TransientResult<Vec<TransientEntity>> {
        self.access(entity, Access::Read)?;
        self.live_links(entity, name)
    }

    /// Returns the names of all non-empty links.
    pub fn link_names(&self, entity: TransientEntity) -> TransientResult<Vec<String>> {
        self.access(entity, Access::Read)?;
        let (mut names, overlay) = {
            let arena = self.arena.read();
            let record = arena.record(entity);
            let stored = match record.persistent_id {
                Some(id) => tolerate_missing(self.view()?.link_names(id))?,
                None => Vec::new(),
            };
            let overlay: Vec<(String, bool)> = record
                .overlay
                .links
                .iter()
                .map(|(name, targets)| (name.clone(), targets.is_empty()))
                .collect();
            (stored, overlay)
        };
        for (name, empty) in overlay {
            if empty {
                names.retain(|n| *n != name);
            } else if !names.contains(&name) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    fn check_link_usage(&self, entity: TransientEntity, name: &str, multiple: bool) -> TransientResult<()> {
        let entity_type = self.type_of(entity);
        let Some(end) = self.metadata().association_end(&entity_type, name) else {
            return Ok(());
        };
        if end.cardinality.is_multiple() == multiple {
            return Ok(());
        }
        Err(TransientError::InvalidCardinalityUsage {
            entity_type,
            link: name.to_string(),
            cardinality: end.cardinality,
            expected: if end.cardinality.is_multiple() {
                "add_link"
            } else {
                "set_link"
            },
        })
    }

    /// Adds a target to a multi-valued link. Returns false if already
    /// linked.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCardinalityUsage` if the link is declared
    /// single-valued.
    pub fn add_link(
        &mut self,
        entity: TransientEntity,
        name: &str,
        target: TransientEntity,
    ) -> TransientResult<bool> {
        self.access(entity, Access::Write)?;
        self.check_target(target)?;
        self.check_link_usage(entity, name, true)?;
        self.link_add(entity, name, target)
    }

    /// Sets or clears a single-valued link. Returns false if unchanged.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCardinalityUsage` if the link is declared
    /// multi-valued.
    pub fn set_link(
        &mut self,
        entity: TransientEntity,
        name: &str,
        target: Option<TransientEntity>,
    ) -> TransientResult<bool> {
        self.access(entity, Access::Write)?;
        if let Some(target) = target {
            self.check_target(target)?;
        }
        self.check_link_usage(entity, name, false)?;
        self.link_set(entity, name, target)
    }

    /// Removes one target from a link. Returns false if not linked.
    pub fn delete_link(
        &mut self,
        entity: TransientEntity,
        name: &str,
        target: TransientEntity,
    ) -> TransientResult<bool> {
        self.access(entity, Access::Write)?;
        self.ensure_own(target)?;
        self.link_delete(entity, name, target)
    }

    /// Removes all targets of a link.
    pub fn delete_links(&mut self, entity: TransientEntity, name: &str) -> TransientResult<()> {
        self.access(entity, Access::Write)?;
        let targets = self.materialize_links(entity, name)?;
        if targets.is_empty() {
            return Ok(());
        }
        let entity_type = self.type_of(entity);
        self.set_overlay_links(entity, name, Vec::new());
        for target in targets {
            self.tracker
                .link_changed(entity, &entity_type, name, target, None, false);
        }
        self.ops.push(ApplyOp::DeleteLinks {
            entity,
            name: name.to_string(),
        });
        Ok(())
    }

    fn materialize_links(&mut self, entity: TransientEntity, name: &str) -> TransientResult<Vec<TransientEntity>> {
        let current = self.raw_links(entity, name)?;
        self.arena
            .get_mut()
            .record_mut(entity)
            .overlay
            .links
            .entry(name.to_string())
            .or_insert_with(|| current.clone());
        Ok(current)
    }

    fn set_overlay_links(&mut self, entity: TransientEntity, name: &str, targets: Vec<TransientEntity>) {
        self.arena
            .get_mut()
            .record_mut(entity)
            .overlay
            .links
            .insert(name.to_string(), targets);
    }

    pub(crate) fn link_add(
        &mut self,
        entity: TransientEntity,
        name: &str,
        target: TransientEntity,
    ) -> TransientResult<bool> {
        let mut targets = self.materialize_links(entity, name)?;
        if targets.contains(&target) {
            return Ok(false);
        }
        targets.push(target);
        self.set_overlay_links(entity, name, targets);
        let entity_type = self.type_of(entity);
        self.tracker
            .link_changed(entity, &entity_type, name, target, None, true);
        self.ops.push(ApplyOp::AddLink {
            entity,
            name: name.to_string(),
            target,
        });
        trace!(session = %self.id, entity = %self.id_of(entity), link = name, "link added");
        Ok(true)
    }

    pub(crate) fn link_set(
        &mut self,
        entity: TransientEntity,
        name: &str,
        target: Option<TransientEntity>,
    ) -> TransientResult<bool> {
        let current = self.materialize_links(entity, name)?;
        let wanted: Vec<_> = target.into_iter().collect();
        if current == wanted {
            return Ok(false);
        }
        let entity_type = self.type_of(entity);
        self.set_overlay_links(entity, name, wanted);
        match target {
            Some(target) => {
                let mut old = current.into_iter().filter(|old| *old != target);
                let first = old.next();
                self.tracker
                    .link_changed(entity, &entity_type, name, target, first, true);
                for extra in old {
                    self.tracker
                        .link_changed(entity, &entity_type, name, extra, None, false);
                }
            }
            None => {
                for old in current {
                    self.tracker
                        .link_changed(entity, &entity_type, name, old, None, false);
                }
            }
        }
        self.ops.push(ApplyOp::SetLink {
            entity,
            name: name.to_string(),
            target,
        });
        trace!(session = %self.id, entity = %self.id_of(entity), link = name, "link set");
        Ok(true)
    }

    pub(crate) fn link_delete(
        &mut self,
        entity: TransientEntity,
        name: &str,
        target: TransientEntity,
    ) -> TransientResult<bool> {
        let mut targets = self.materialize_links(entity, name)?;
        let before = targets.len();
        targets.retain(|t| *t != target);
        if targets.len() == before {
            return Ok(false);
        }
        self.set_overlay_links(entity, name, targets);
        let entity_type = self.type_of(entity);
        self.tracker
            .link_changed(entity, &entity_type, name, target, None, false);
        self.ops.push(ApplyOp::DeleteLink {
            entity,
            name: name.to_string(),
            target,
        });
        trace!(session = %self.id, entity = %self.id_of(entity), link = name, "link deleted");
        Ok(true)
    }

    /// Returns the declared cardinality of a link, if any.
    pub(crate) fn link_cardinality(&self, entity: TransientEntity, name: &str) -> Option<Cardinality> {
        self.metadata()
            .association_end(&self.type_of(entity), name)
            .map(|end| end.cardinality)
    }

    /// Parks the session in the store registry and releases the thread.
    ///
    /// The tracker and identity maps are kept; the store snapshot is
    /// released and a fresh one is taken on resume.
    pub fn suspend(mut self) -> TransientResult<SessionId> {
        self.ensure_open()?;
        if let Some(snapshot) = self.snapshot.take() {
            snapshot.abort();
        }
        self.state = SessionState::Suspended;
        self.owner = None;
        let id = self.id;
        let store = self.store.clone();
        store.park(self);
        debug!(session = %id, "session suspended");
        Ok(id)
    }

    /// Reopens a suspended session on the calling thread.
    ///
    /// Untouched entities adopt the versions of the fresh snapshot, since
    /// reads now see those versions. Entities with pending changes keep
    /// the versions their changes were based on.
    pub(crate) fn reopen(&mut self) -> TransientResult<()> {
        let snapshot = self.store.persistent().begin_read()?;
        let changed: HashSet<TransientEntity> = self.tracker.changed_entities().collect();
        for (entity, record) in self.arena.get_mut().entities_mut() {
            if record.deleted || record.temporary || changed.contains(&entity) {
                continue;
            }
            if let Some(id) = record.persistent_id {
                record.version = snapshot.get_version(id)?;
            }
        }
        if changed.is_empty() {
            self.tracker = ChangesTracker::new(Some(self.store.persistent().begin_read()?));
        }
        self.snapshot = Some(snapshot);
        self.owner = Some(thread::current().id());
        self.state = SessionState::Open;
        debug!(session = %self.id, "session resumed");
        Ok(())
    }

    /// Aborts the session, discarding all pending changes.
    ///
    /// Abort works from any thread.
    ///
    /// # Errors
    ///
    /// Returns `SessionNotOpen` if the session already ended.
    pub fn abort(&mut self) -> TransientResult<()> {
        if self.state.is_terminal() {
            return Err(TransientError::SessionNotOpen {
                session: self.id,
                state: self.state,
            });
        }
        self.close(SessionState::Aborted);
        debug!(session = %self.id, "session aborted");
        Ok(())
    }

    pub(crate) fn close(&mut self, state: SessionState) {
        self.tracker.dispose();
        if let Some(snapshot) = self.snapshot.take() {
            snapshot.abort();
        }
        self.blobs.discard_all();
        self.ops.clear();
        self.state = state;
        self.owner = None;
        self.store.unregister(self.id);
    }
}

impl Drop for TransientSession {
    fn drop(&mut self) {
        match self.state {
            SessionState::Open => {
                warn!(session = %self.id, "open session dropped; aborting");
                self.close(SessionState::Aborted);
            }
            SessionState::Suspended => self.blobs.discard_all(),
            SessionState::Committed | SessionState::Aborted => {}
        }
    }
}

impl fmt::Debug for TransientSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransientSession")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("pending_ops", &self.ops.len())
            .field("tracker", &self.tracker)
            .finish_non_exhaustive()
    }
}
