//! Error types for persistent store operations.

use crate::types::PersistentEntityId;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in persistent store operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// Entity does not exist in the store.
    #[error("entity not found: {id}")]
    EntityNotFound {
        /// The entity that was not found.
        id: PersistentEntityId,
    },

    /// Entity still has outgoing links and cannot be deleted.
    #[error("entity {id} still has links {links:?}")]
    EntityHasLinks {
        /// The entity being deleted.
        id: PersistentEntityId,
        /// Names of the links that are still set.
        links: Vec<String>,
    },

    /// Inserting a unique key collided with an existing key.
    #[error("unique key conflict in index {index}: key already held by {existing}")]
    UniqueKeyConflict {
        /// Name of the unique index.
        index: String,
        /// Entity currently holding the key.
        existing: PersistentEntityId,
    },

    /// Entity type id is not registered.
    #[error("unknown entity type id: {type_id}")]
    UnknownEntityType {
        /// The unregistered type id.
        type_id: u32,
    },

    /// A write was attempted through a read-only snapshot.
    #[error("transaction is read-only")]
    ReadOnlyTransaction,

    /// The store does not accept write transactions.
    #[error("store is read-only")]
    ReadOnlyStore,

    /// The transaction was already committed or aborted.
    #[error("transaction already finished")]
    TransactionFinished,

    /// The commit could not be published.
    #[error("commit failed: {reason}")]
    CommitFailed {
        /// Reason for the failure.
        reason: String,
    },
}

impl StoreError {
    /// Creates a commit failed error.
    pub fn commit_failed(reason: impl Into<String>) -> Self {
        Self::CommitFailed {
            reason: reason.into(),
        }
    }

    /// Returns true if the error is a unique key conflict.
    #[must_use]
    pub fn is_unique_conflict(&self) -> bool {
        matches!(self, Self::UniqueKeyConflict { .. })
    }
}
