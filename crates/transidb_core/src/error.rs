//! Error types for the transient session layer.

use crate::constraints::ConstraintViolations;
use crate::entity::{EntityId, SessionId};
use crate::metadata::Cardinality;
use crate::session::SessionState;
use std::io;
use std::time::Duration;
use thiserror::Error;
use transidb_store::StoreError;

/// Result type for session operations.
pub type TransientResult<T> = Result<T, TransientError>;

/// Errors that can occur in session operations.
#[derive(Debug, Error)]
pub enum TransientError {
    /// Persistent store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// I/O error while spooling or reading a blob.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The entity was removed in this session.
    #[error("entity {entity} was removed")]
    EntityRemoved {
        /// The removed entity.
        entity: EntityId,
    },

    /// The entity was deleted in the store since it was read.
    #[error("entity {entity} of type {entity_type} was removed in the database")]
    EntityRemovedInDatabase {
        /// The deleted entity.
        entity: EntityId,
        /// Its type.
        entity_type: String,
    },

    /// The entity changed in the store since it was read and the local
    /// changes cannot be merged.
    #[error(
        "version mismatch on {entity_type} {entity}: read version {local_version}, \
         current version {current_version}"
    )]
    VersionMismatch {
        /// The conflicting entity.
        entity: EntityId,
        /// Its type.
        entity_type: String,
        /// Version remembered by the session.
        local_version: u64,
        /// Latest committed version.
        current_version: u64,
    },

    /// The session was used from a thread other than the one holding it.
    #[error("session {session} accessed from a thread that does not own it")]
    CrossThreadAccess {
        /// The session.
        session: SessionId,
    },

    /// A single-valued operation was used on a multi-valued end or vice versa.
    #[error("link {entity_type}.{link} has cardinality {cardinality}; use {expected} instead")]
    InvalidCardinalityUsage {
        /// Source entity type.
        entity_type: String,
        /// Link name.
        link: String,
        /// Declared cardinality.
        cardinality: Cardinality,
        /// The operation that fits the cardinality.
        expected: &'static str,
    },

    /// The session is not open.
    #[error("session {session} is {state}")]
    SessionNotOpen {
        /// The session.
        session: SessionId,
        /// Its current state.
        state: SessionState,
    },

    /// An entity handle from another session was passed in.
    #[error("entity belongs to session {owner}, not {session}")]
    ForeignEntity {
        /// Session the handle belongs to.
        owner: SessionId,
        /// Session it was used with.
        session: SessionId,
    },

    /// Attempted to modify a read-only entity.
    #[error("entity {entity} is read-only")]
    ReadonlyEntity {
        /// The read-only entity.
        entity: EntityId,
    },

    /// The persistent store does not accept writes.
    #[error("store is read-only")]
    ReadOnlyStore,

    /// One or more constraints were violated.
    #[error("constraints validation failed: {0}")]
    ConstraintsValidation(ConstraintViolations),

    /// No session is registered under the id.
    #[error("session {session} not found")]
    SessionNotFound {
        /// The session id.
        session: SessionId,
    },

    /// A session with the id is already registered.
    #[error("session {session} already exists")]
    SessionAlreadyExists {
        /// The session id.
        session: SessionId,
    },

    /// Timed out waiting for a session to become available.
    #[error("timed out after {timeout:?} waiting for session {session}")]
    LockTimeout {
        /// The session id.
        session: SessionId,
        /// How long the caller waited.
        timeout: Duration,
    },

    /// Cascade or orphan removal did not settle.
    #[error("removal of {entity} did not settle after {rounds} rounds")]
    CascadeLimitExceeded {
        /// The entity whose removal was being processed.
        entity: EntityId,
        /// Number of rounds attempted.
        rounds: usize,
    },

    /// A text blob did not contain valid UTF-8.
    #[error("blob {blob} of {entity} is not valid UTF-8")]
    InvalidBlobEncoding {
        /// The entity.
        entity: EntityId,
        /// Blob name.
        blob: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },
}

impl TransientError {
    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true for optimistic concurrency conflicts.
    ///
    /// Retrying the whole transaction against fresh data may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::VersionMismatch { .. } | Self::EntityRemovedInDatabase { .. }
        )
    }

    /// Returns the constraint violations carried by a validation failure.
    #[must_use]
    pub fn violations(&self) -> Option<&ConstraintViolations> {
        match self {
            Self::ConstraintsValidation(violations) => Some(violations),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::TransientId;

    #[test]
    fn error_display() {
        let err = TransientError::EntityRemoved {
            entity: EntityId::Transient(TransientId::new(3)),
        };
        assert_eq!(format!("{err}"), "entity ~3 was removed");

        let err = TransientError::invalid_operation("nope");
        assert_eq!(format!("{err}"), "invalid operation: nope");
    }

    #[test]
    fn only_conflicts_are_retryable() {
        let conflict = TransientError::VersionMismatch {
            entity: EntityId::Transient(TransientId::new(1)),
            entity_type: "User".into(),
            local_version: 0,
            current_version: 1,
        };
        assert!(conflict.is_retryable());
        assert!(!TransientError::ReadOnlyStore.is_retryable());
    }

    #[test]
    fn store_errors_convert() {
        let err: TransientError = StoreError::ReadOnlyStore.into();
        assert!(matches!(err, TransientError::Store(StoreError::ReadOnlyStore)));
        assert!(err.violations().is_none());
    }
}
