//! Change inspection and cross-session reattachment.

use super::TransientSession;
use crate::changes::EntityChange;
use crate::entity::{DetachedEntity, EntityId, EntityState, TransientEntity};
use crate::error::{TransientError, TransientResult};
use std::collections::BTreeSet;
use transidb_store::PropertyValue;

impl TransientSession {
    /// Value of a property before this round's changes.
    ///
    /// Works on removed entities too, reading the row they had.
    pub fn get_old_value(
        &self,
        entity: TransientEntity,
        name: &str,
    ) -> TransientResult<Option<PropertyValue>> {
        self.check_session(entity)?;
        if let Some(original) = self.tracker.original_property(entity, name) {
            return Ok(original.clone());
        }
        self.stored_property(entity, name)
    }

    /// Target of a single-valued link before this round's changes.
    pub fn get_old_link(
        &self,
        entity: TransientEntity,
        name: &str,
    ) -> TransientResult<Option<TransientEntity>> {
        self.check_session(entity)?;
        Ok(self.stored_links(entity, name)?.into_iter().next())
    }

    /// Targets removed from a link this round, including targets that
    /// were removed as entities.
    pub fn get_removed_links(
        &self,
        entity: TransientEntity,
        name: &str,
    ) -> TransientResult<Vec<TransientEntity>> {
        self.check_session(entity)?;
        Ok(self
            .tracker
            .get_link_change(entity, name)
            .map(|change| change.removed().iter().copied().collect())
            .unwrap_or_default())
    }

    /// Targets added to a link this round.
    pub fn get_added_links(
        &self,
        entity: TransientEntity,
        name: &str,
    ) -> TransientResult<Vec<TransientEntity>> {
        self.check_session(entity)?;
        Ok(self
            .tracker
            .get_link_change(entity, name)
            .map(|change| change.added().iter().copied().collect())
            .unwrap_or_default())
    }

    /// Returns true if anything would be written by a flush.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.tracker.has_changes()
    }

    /// Returns true if the entity has a net change.
    pub fn has_entity_changes(&self, entity: TransientEntity) -> TransientResult<bool> {
        self.check_session(entity)?;
        Ok(self.tracker.has_entity_changes(entity))
    }

    /// Returns true if the named property or blob has a net change.
    pub fn has_property_changes(&self, entity: TransientEntity, name: &str) -> TransientResult<bool> {
        self.check_session(entity)?;
        Ok(self.tracker.has_property_changes(entity, name))
    }

    /// Returns true if the named link has a net change.
    pub fn has_link_changes(&self, entity: TransientEntity, name: &str) -> TransientResult<bool> {
        self.check_session(entity)?;
        Ok(self.tracker.has_link_changes(entity, name))
    }

    /// Names of properties and blobs with a net change, `None` if none.
    pub fn get_changed_properties(
        &self,
        entity: TransientEntity,
    ) -> TransientResult<Option<BTreeSet<String>>> {
        self.check_session(entity)?;
        Ok(self.tracker.get_changed_properties(entity).cloned())
    }

    /// Describes the net change of every entity touched this round.
    #[must_use]
    pub fn get_changes_description(&self) -> Vec<EntityChange> {
        self.tracker.get_changes_description()
    }

    /// Takes a reference to an entity that can be handed to another
    /// session.
    pub fn detach(&self, entity: TransientEntity) -> TransientResult<DetachedEntity> {
        self.check_session(entity)?;
        Ok(DetachedEntity {
            origin: self.id(),
            id: self.id_of(entity),
            state: self.state_of(entity),
        })
    }

    /// Resolves a detached reference in this session.
    ///
    /// References taken from this session resolve to the same handle.
    /// Saved entities from other sessions are loaded by id and see this
    /// session's own pending changes.
    ///
    /// # Errors
    ///
    /// - `EntityRemoved` if the entity was removed, here or in the origin
    /// - `EntityRemovedInDatabase` if its row no longer exists
    /// - `ForeignEntity` for an entity that was never saved by another
    ///   session
    pub fn new_local_copy(&self, detached: &DetachedEntity) -> TransientResult<TransientEntity> {
        self.ensure_open()?;
        let removed = || TransientError::EntityRemoved { entity: detached.id };
        if detached.origin == self.id() {
            let resolved = self.arena.read().resolve(detached.id);
            if let Some(entity) = resolved {
                return if self.is_removed_raw(entity) {
                    Err(removed())
                } else {
                    Ok(entity)
                };
            }
        }
        match detached.state {
            EntityState::Removed => return Err(removed()),
            EntityState::Temporary => {
                return Err(TransientError::invalid_operation(
                    "temporary entities cannot be reattached",
                ));
            }
            EntityState::New | EntityState::Saved | EntityState::SavedNew => {}
        }
        match detached.id {
            EntityId::Persisted(id) => match self.load(id)? {
                Some(entity) if self.is_removed_raw(entity) => Err(removed()),
                Some(entity) => Ok(entity),
                None => Err(TransientError::EntityRemovedInDatabase {
                    entity: detached.id,
                    entity_type: self
                        .store()
                        .persistent()
                        .entity_type_name(id.type_id)
                        .unwrap_or_default(),
                }),
            },
            EntityId::Transient(_) => Err(TransientError::ForeignEntity {
                owner: detached.origin,
                session: self.id(),
            }),
        }
    }
}
