//! Entity and session identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use transidb_store::PersistentEntityId;
use uuid::Uuid;

/// Unique identifier for a session.
///
/// Session ids are random UUIDs so they can be handed to other threads or
/// processes to resume a suspended session.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Creates a new random session id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a session id from a UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the id as a UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for SessionId {
    fn from(uuid: Uuid) -> Self {
        Self::from_uuid(uuid)
    }
}

/// Session-local identifier of an entity created in that session.
///
/// Transient ids are allocated from a per-session counter and stay
/// resolvable for the lifetime of the session, even after the entity has
/// been given a persistent id by a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransientId(pub u64);

impl TransientId {
    /// Creates a transient id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "~{}", self.0)
    }
}

/// Identifier of an entity as seen by a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityId {
    /// Entity with a row in the persistent store.
    Persisted(PersistentEntityId),
    /// Entity that only exists in its session so far.
    Transient(TransientId),
}

impl EntityId {
    /// Returns the persistent id, if the entity has one.
    #[must_use]
    pub const fn persistent(self) -> Option<PersistentEntityId> {
        match self {
            Self::Persisted(id) => Some(id),
            Self::Transient(_) => None,
        }
    }

    /// Returns true if this is a persistent id.
    #[must_use]
    pub const fn is_persisted(self) -> bool {
        matches!(self, Self::Persisted(_))
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Persisted(id) => write!(f, "{id}"),
            Self::Transient(id) => write!(f, "{id}"),
        }
    }
}

impl From<PersistentEntityId> for EntityId {
    fn from(id: PersistentEntityId) -> Self {
        Self::Persisted(id)
    }
}

impl From<TransientId> for EntityId {
    fn from(id: TransientId) -> Self {
        Self::Transient(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_ids_are_unique() {
        assert_ne!(SessionId::new(), SessionId::new());
    }

    #[test]
    fn session_id_uuid_conversion() {
        let uuid = Uuid::new_v4();
        assert_eq!(SessionId::from(uuid).as_uuid(), uuid);
    }

    #[test]
    fn entity_id_display() {
        let persisted = EntityId::from(PersistentEntityId::new(2, 7));
        let transient = EntityId::from(TransientId::new(4));
        assert_eq!(format!("{persisted}"), "2-7");
        assert_eq!(format!("{transient}"), "~4");
    }

    #[test]
    fn persistent_accessor() {
        let id = PersistentEntityId::new(1, 1);
        assert_eq!(EntityId::Persisted(id).persistent(), Some(id));
        assert!(EntityId::Transient(TransientId::new(0)).persistent().is_none());
        assert!(!EntityId::Transient(TransientId::new(0)).is_persisted());
    }
}
