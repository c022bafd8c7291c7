//! Persistent store contract.

use crate::error::StoreResult;
use crate::types::{HistoryEntry, IndexValue, PersistentEntityId, PropertyValue, SequenceNumber};

/// A versioned persistent entity store.
///
/// The store hands out two kinds of transactions:
///
/// - **Snapshots** (`begin_read`) see the committed state as of the moment
///   they were opened and reject writes.
/// - **Write transactions** (`begin_write`) are exclusive: only one may be
///   open at a time, and opening one blocks until the previous writer has
///   committed or aborted.
///
/// # Invariants
///
/// - Entity ids are never reused
/// - Every committed write bumps the version of each row it modified exactly once
/// - A snapshot never observes writes committed after it was opened
pub trait PersistentStore: Send + Sync {
    /// Opens a read-only snapshot of the latest committed state.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is closed.
    fn begin_read(&self) -> StoreResult<Box<dyn StoreTransaction>>;

    /// Opens the exclusive write transaction, blocking until it is available.
    ///
    /// # Errors
    ///
    /// Returns `ReadOnlyStore` if the store does not accept writes.
    fn begin_write(&self) -> StoreResult<Box<dyn StoreTransaction>>;

    /// Returns true if the store rejects write transactions.
    fn is_read_only(&self) -> bool;

    /// Returns the type id for an entity type name, registering it if new.
    fn entity_type_id(&self, entity_type: &str) -> u32;

    /// Returns the entity type name registered for a type id.
    fn entity_type_name(&self, type_id: u32) -> Option<String>;

    /// Returns the next value of a named monotonic sequence.
    ///
    /// Sequences start at zero and are not rolled back with transactions.
    fn next_sequence_value(&self, name: &str) -> u64;

    /// Returns the sequence number of the latest commit.
    fn committed_seq(&self) -> SequenceNumber;
}

/// A transaction against a [`PersistentStore`].
///
/// All read operations observe the transaction's own view: the snapshot
/// for read transactions, the snapshot plus own writes for write
/// transactions. Write operations fail with `ReadOnlyTransaction` on
/// snapshots.
pub trait StoreTransaction: Send {
    /// Returns true if this transaction accepts writes.
    fn is_writable(&self) -> bool;

    // --- Reads ---

    /// Returns true if the entity exists in this transaction's view.
    fn exists(&self, id: PersistentEntityId) -> StoreResult<bool>;

    /// Returns the version of the entity in this transaction's view.
    fn get_version(&self, id: PersistentEntityId) -> StoreResult<Option<u64>>;

    /// Returns the latest committed version of the entity, ignoring the
    /// snapshot. `None` means the entity no longer exists.
    fn get_up_to_date_version(&self, id: PersistentEntityId) -> StoreResult<Option<u64>>;

    /// Reads a property value.
    fn get_property(&self, id: PersistentEntityId, name: &str)
        -> StoreResult<Option<PropertyValue>>;

    /// Returns the names of all set properties.
    fn property_names(&self, id: PersistentEntityId) -> StoreResult<Vec<String>>;

    /// Reads a blob value.
    fn get_blob(&self, id: PersistentEntityId, name: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Returns the names of all set blobs.
    fn blob_names(&self, id: PersistentEntityId) -> StoreResult<Vec<String>>;

    /// Returns the first target of a link.
    fn get_link(&self, id: PersistentEntityId, name: &str)
        -> StoreResult<Option<PersistentEntityId>>;

    /// Returns all targets of a link, in id order.
    fn get_links(&self, id: PersistentEntityId, name: &str)
        -> StoreResult<Vec<PersistentEntityId>>;

    /// Counts link targets, stopping at `bound`.
    fn count_links(&self, id: PersistentEntityId, name: &str, bound: usize) -> StoreResult<usize>;

    /// Returns the names of all non-empty links.
    fn link_names(&self, id: PersistentEntityId) -> StoreResult<Vec<String>>;

    /// Returns all entities of a type, in id order.
    fn get_all(&self, entity_type: &str) -> StoreResult<Vec<PersistentEntityId>>;

    /// Returns all entities of a type whose property equals `value`.
    fn find(
        &self,
        entity_type: &str,
        property: &str,
        value: &PropertyValue,
    ) -> StoreResult<Vec<PersistentEntityId>>;

    /// Returns all entities of a type sorted by a property.
    ///
    /// Entities without the property sort last.
    fn sort(
        &self,
        entity_type: &str,
        property: &str,
        ascending: bool,
    ) -> StoreResult<Vec<PersistentEntityId>>;

    /// Returns all entities of a type that link to `target` through `link`.
    fn find_links(
        &self,
        entity_type: &str,
        target: PersistentEntityId,
        link: &str,
    ) -> StoreResult<Vec<PersistentEntityId>>;

    /// Looks up the holder of a unique key.
    fn find_unique(&self, index: &str, key: &[IndexValue])
        -> StoreResult<Option<PersistentEntityId>>;

    /// Returns saved history snapshots of an entity, oldest first.
    fn history(&self, id: PersistentEntityId) -> StoreResult<Vec<HistoryEntry>>;

    // --- Writes ---

    /// Creates a new entity of the given type.
    fn new_entity(&mut self, entity_type: &str) -> StoreResult<PersistentEntityId>;

    /// Sets a property. Returns false if the value was unchanged.
    fn set_property(
        &mut self,
        id: PersistentEntityId,
        name: &str,
        value: PropertyValue,
    ) -> StoreResult<bool>;

    /// Deletes a property. Returns false if it was not set.
    fn delete_property(&mut self, id: PersistentEntityId, name: &str) -> StoreResult<bool>;

    /// Sets a blob.
    fn set_blob(&mut self, id: PersistentEntityId, name: &str, data: Vec<u8>) -> StoreResult<()>;

    /// Deletes a blob. Returns false if it was not set.
    fn delete_blob(&mut self, id: PersistentEntityId, name: &str) -> StoreResult<bool>;

    /// Adds a link target. Returns false if it was already linked.
    fn add_link(
        &mut self,
        id: PersistentEntityId,
        name: &str,
        target: PersistentEntityId,
    ) -> StoreResult<bool>;

    /// Replaces all targets of a link with at most one target.
    fn set_link(
        &mut self,
        id: PersistentEntityId,
        name: &str,
        target: Option<PersistentEntityId>,
    ) -> StoreResult<bool>;

    /// Removes one link target. Returns false if it was not linked.
    fn delete_link(
        &mut self,
        id: PersistentEntityId,
        name: &str,
        target: PersistentEntityId,
    ) -> StoreResult<bool>;

    /// Removes all targets of a link.
    fn delete_links(&mut self, id: PersistentEntityId, name: &str) -> StoreResult<()>;

    /// Deletes an entity.
    ///
    /// # Errors
    ///
    /// Returns `EntityHasLinks` while the entity still has outgoing links.
    fn delete_entity(&mut self, id: PersistentEntityId) -> StoreResult<bool>;

    /// Acquires update locks for the given entities.
    fn lock_for_update(&mut self, ids: &[PersistentEntityId]) -> StoreResult<()>;

    /// Saves a history snapshot of the entity's current row.
    fn save_history(&mut self, id: PersistentEntityId) -> StoreResult<()>;

    /// Inserts a unique key for an entity.
    ///
    /// # Errors
    ///
    /// Returns `UniqueKeyConflict` if another entity holds the key.
    fn insert_unique_key(
        &mut self,
        index: &str,
        key: Vec<IndexValue>,
        id: PersistentEntityId,
    ) -> StoreResult<()>;

    /// Deletes a unique key. Returns false if it was not present.
    fn delete_unique_key(&mut self, index: &str, key: &[IndexValue]) -> StoreResult<bool>;

    // --- Control ---

    /// Commits the transaction and returns the commit sequence number.
    ///
    /// Committing a snapshot is a no-op that returns its sequence.
    fn commit(self: Box<Self>) -> StoreResult<SequenceNumber>;

    /// Aborts the transaction, discarding all writes.
    fn abort(self: Box<Self>);
}
