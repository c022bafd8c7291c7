//! Entity handles.

use crate::entity::{EntityId, SessionId};
use crate::error::TransientResult;
use crate::session::TransientSession;
use serde::{Deserialize, Serialize};
use std::fmt;
use transidb_store::PropertyValue;

/// Lifecycle state of an entity within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityState {
    /// Created in this session; no persistent row yet.
    New,
    /// Backed by a persistent row.
    Saved,
    /// Created in this session and given a row by an intermediate flush.
    SavedNew,
    /// Marked for deletion.
    Removed,
    /// Read-only copy that is never persisted.
    Temporary,
}

impl EntityState {
    /// Returns true if the entity has a persistent row.
    #[must_use]
    pub const fn is_saved(self) -> bool {
        matches!(self, Self::Saved | Self::SavedNew)
    }
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::New => "new",
            Self::Saved => "saved",
            Self::SavedNew => "saved-new",
            Self::Removed => "removed",
            Self::Temporary => "temporary",
        };
        f.write_str(name)
    }
}

/// Handle to an entity inside one session.
///
/// A handle is a plain index into its session's entity table. It carries
/// no reference to the session, so every accessor takes the session
/// explicitly; using a handle with a session other than its own fails with
/// `ForeignEntity`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransientEntity {
    pub(crate) session: SessionId,
    pub(crate) slot: u32,
}

impl TransientEntity {
    pub(crate) const fn new(session: SessionId, slot: u32) -> Self {
        Self { session, slot }
    }

    /// Returns the id of the session this handle belongs to.
    #[must_use]
    pub const fn session_id(&self) -> SessionId {
        self.session
    }

    /// Returns the entity's current id.
    pub fn id(&self, session: &TransientSession) -> TransientResult<EntityId> {
        session.entity_id(*self)
    }

    /// Returns the entity's type name.
    pub fn entity_type(&self, session: &TransientSession) -> TransientResult<String> {
        session.entity_type(*self)
    }

    /// Returns the entity's lifecycle state.
    pub fn state(&self, session: &TransientSession) -> TransientResult<EntityState> {
        session.entity_state(*self)
    }

    /// Reads a property.
    pub fn get_property(
        &self,
        session: &TransientSession,
        name: &str,
    ) -> TransientResult<Option<PropertyValue>> {
        session.get_property(*self, name)
    }

    /// Sets a property. Returns false if the value was unchanged.
    pub fn set_property(
        &self,
        session: &mut TransientSession,
        name: &str,
        value: impl Into<PropertyValue>,
    ) -> TransientResult<bool> {
        session.set_property(*self, name, value)
    }

    /// Deletes a property. Returns false if it was not set.
    pub fn delete_property(&self, session: &mut TransientSession, name: &str) -> TransientResult<bool> {
        session.delete_property(*self, name)
    }

    /// Reads a single-valued link.
    pub fn get_link(
        &self,
        session: &TransientSession,
        name: &str,
    ) -> TransientResult<Option<TransientEntity>> {
        session.get_link(*self, name)
    }

    /// Reads all targets of a link.
    pub fn get_links(
        &self,
        session: &TransientSession,
        name: &str,
    ) -> TransientResult<Vec<TransientEntity>> {
        session.get_links(*self, name)
    }

    /// Adds a target to a multi-valued link.
    pub fn add_link(
        &self,
        session: &mut TransientSession,
        name: &str,
        target: TransientEntity,
    ) -> TransientResult<bool> {
        session.add_link(*self, name, target)
    }

    /// Sets or clears a single-valued link.
    pub fn set_link(
        &self,
        session: &mut TransientSession,
        name: &str,
        target: Option<TransientEntity>,
    ) -> TransientResult<bool> {
        session.set_link(*self, name, target)
    }

    /// Removes one target from a link.
    pub fn delete_link(
        &self,
        session: &mut TransientSession,
        name: &str,
        target: TransientEntity,
    ) -> TransientResult<bool> {
        session.delete_link(*self, name, target)
    }

    /// Removes the entity, applying cascades.
    pub fn delete(&self, session: &mut TransientSession) -> TransientResult<()> {
        session.delete_entity(*self)
    }
}

impl fmt::Debug for TransientEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransientEntity(#{})", self.slot)
    }
}

/// A session-independent reference to an entity.
///
/// Produced by [`TransientSession::detach`] and turned back into a handle
/// by [`TransientSession::new_local_copy`], possibly in another session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DetachedEntity {
    /// Session the reference was taken from.
    pub origin: SessionId,
    /// Id of the entity at the time it was detached.
    pub id: EntityId,
    /// State of the entity at the time it was detached.
    pub state: EntityState,
}
