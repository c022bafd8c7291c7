//! Session states and the access matrix.

use crate::entity::EntityState;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// Usable on its owning thread.
    Open,
    /// Parked in the store registry, waiting to be resumed.
    Suspended,
    /// Committed; terminal.
    Committed,
    /// Aborted; terminal.
    Aborted,
}

impl SessionState {
    /// Returns true for `Committed` and `Aborted`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::Aborted)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Open => "open",
            Self::Suspended => "suspended",
            Self::Committed => "committed",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Kind of entity access being checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Access {
    Read,
    Write,
}

/// Why an access was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StateError {
    EntityRemoved,
    ReadonlyEntity,
    SessionNotOpen(SessionState),
}

/// Decides whether an entity in `entity` state may be accessed in a
/// session in `session` state.
pub(crate) const fn check_access(
    entity: EntityState,
    session: SessionState,
    access: Access,
) -> Result<(), StateError> {
    match (session, entity, access) {
        (SessionState::Open, EntityState::New | EntityState::Saved | EntityState::SavedNew, _)
        | (SessionState::Open, EntityState::Temporary, Access::Read) => Ok(()),
        (SessionState::Open, EntityState::Temporary, Access::Write) => Err(StateError::ReadonlyEntity),
        (SessionState::Open, EntityState::Removed, _) => Err(StateError::EntityRemoved),
        (
            SessionState::Suspended | SessionState::Committed | SessionState::Aborted,
            _,
            _,
        ) => Err(StateError::SessionNotOpen(session)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENTITY_STATES: [EntityState; 5] = [
        EntityState::New,
        EntityState::Saved,
        EntityState::SavedNew,
        EntityState::Removed,
        EntityState::Temporary,
    ];

    #[test]
    fn open_session_allows_live_entities() {
        for state in [EntityState::New, EntityState::Saved, EntityState::SavedNew] {
            assert_eq!(check_access(state, SessionState::Open, Access::Read), Ok(()));
            assert_eq!(check_access(state, SessionState::Open, Access::Write), Ok(()));
        }
    }

    #[test]
    fn removed_entities_are_unreadable() {
        for access in [Access::Read, Access::Write] {
            assert_eq!(
                check_access(EntityState::Removed, SessionState::Open, access),
                Err(StateError::EntityRemoved)
            );
        }
    }

    #[test]
    fn temporary_entities_are_read_only() {
        assert_eq!(
            check_access(EntityState::Temporary, SessionState::Open, Access::Read),
            Ok(())
        );
        assert_eq!(
            check_access(EntityState::Temporary, SessionState::Open, Access::Write),
            Err(StateError::ReadonlyEntity)
        );
    }

    #[test]
    fn closed_sessions_refuse_everything() {
        for session in [SessionState::Suspended, SessionState::Committed, SessionState::Aborted] {
            for entity in ENTITY_STATES {
                assert_eq!(
                    check_access(entity, session, Access::Read),
                    Err(StateError::SessionNotOpen(session))
                );
            }
        }
    }

    #[test]
    fn terminal_states() {
        assert!(SessionState::Committed.is_terminal());
        assert!(SessionState::Aborted.is_terminal());
        assert!(!SessionState::Suspended.is_terminal());
    }
}
