//! In-memory persistent store.

mod state;
mod transaction;

use crate::backend::{PersistentStore, StoreTransaction};
use crate::error::{StoreError, StoreResult};
use crate::types::SequenceNumber;
use parking_lot::{Mutex, RwLock};
use state::StoreState;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use transaction::MemoryTransaction;

/// State shared between the store handle and its transactions.
pub(crate) struct Shared {
    /// Latest published state.
    committed: RwLock<Arc<StoreState>>,
    /// Sequence of the latest commit.
    committed_seq: AtomicU64,
    /// Write lock - only one writer at a time.
    write_lock: Arc<Mutex<()>>,
    /// Registered entity type names, indexed by type id.
    types: RwLock<Vec<String>>,
    /// Named sequences.
    sequences: Mutex<HashMap<String, u64>>,
    read_only: AtomicBool,
    fail_next_commit: AtomicBool,
}

impl Shared {
    fn type_id(&self, entity_type: &str) -> Option<u32> {
        self.types
            .read()
            .iter()
            .position(|name| name == entity_type)
            .map(|pos| pos as u32)
    }

    fn register_type(&self, entity_type: &str) -> u32 {
        if let Some(type_id) = self.type_id(entity_type) {
            return type_id;
        }
        let mut types = self.types.write();
        // Re-check under the write lock.
        if let Some(pos) = types.iter().position(|name| name == entity_type) {
            return pos as u32;
        }
        types.push(entity_type.to_string());
        (types.len() - 1) as u32
    }
}

/// A versioned entity store kept entirely in memory.
///
/// This store is suitable for:
/// - Unit and integration tests of the session layer
/// - Embedders that need an ephemeral graph store
///
/// # Concurrency
///
/// Readers work on copy-on-write snapshots and never block. Writers are
/// serialized by a single write lock, acquired in [`begin_write`] and held
/// until the transaction commits, aborts or is dropped.
///
/// [`begin_write`]: PersistentStore::begin_write
///
/// # Example
///
/// ```rust
/// use transidb_store::{InMemoryStore, PersistentStore, PropertyValue, StoreTransaction};
///
/// let store = InMemoryStore::new();
/// let mut txn = store.begin_write().unwrap();
/// let id = txn.new_entity("User").unwrap();
/// txn.set_property(id, "name", PropertyValue::from("alice")).unwrap();
/// txn.commit().unwrap();
///
/// let snapshot = store.begin_read().unwrap();
/// assert_eq!(
///     snapshot.get_property(id, "name").unwrap(),
///     Some(PropertyValue::from("alice"))
/// );
/// ```
#[derive(Clone)]
pub struct InMemoryStore {
    shared: Arc<Shared>,
}

impl InMemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                committed: RwLock::new(Arc::new(StoreState::default())),
                committed_seq: AtomicU64::new(0),
                write_lock: Arc::new(Mutex::new(())),
                types: RwLock::new(Vec::new()),
                sequences: Mutex::new(HashMap::new()),
                read_only: AtomicBool::new(false),
                fail_next_commit: AtomicBool::new(false),
            }),
        }
    }

    /// Switches the store between read-only and writable.
    pub fn set_read_only(&self, read_only: bool) {
        self.shared.read_only.store(read_only, Ordering::SeqCst);
    }

    /// Makes the next write commit fail.
    ///
    /// Useful for testing rollback paths.
    pub fn fail_next_commit(&self) {
        self.shared.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Returns the number of entities in the latest committed state.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.shared.committed.read().rows.len()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PersistentStore for InMemoryStore {
    fn begin_read(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        Ok(Box::new(MemoryTransaction::read(Arc::clone(&self.shared))))
    }

    fn begin_write(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        if self.is_read_only() {
            return Err(StoreError::ReadOnlyStore);
        }
        Ok(Box::new(MemoryTransaction::write(Arc::clone(&self.shared))))
    }

    fn is_read_only(&self) -> bool {
        self.shared.read_only.load(Ordering::SeqCst)
    }

    fn entity_type_id(&self, entity_type: &str) -> u32 {
        self.shared.register_type(entity_type)
    }

    fn entity_type_name(&self, type_id: u32) -> Option<String> {
        self.shared.types.read().get(type_id as usize).cloned()
    }

    fn next_sequence_value(&self, name: &str) -> u64 {
        let mut sequences = self.shared.sequences.lock();
        let next = sequences.entry(name.to_string()).or_insert(0);
        let value = *next;
        *next += 1;
        value
    }

    fn committed_seq(&self) -> SequenceNumber {
        SequenceNumber::new(self.shared.committed_seq.load(Ordering::SeqCst))
    }
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("committed_seq", &self.committed_seq())
            .field("entity_count", &self.entity_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{IndexValue, PersistentEntityId, PropertyValue};

    fn create_with_user(store: &InMemoryStore, name: &str) -> PersistentEntityId {
        let mut txn = store.begin_write().unwrap();
        let id = txn.new_entity("User").unwrap();
        txn.set_property(id, "name", PropertyValue::from(name)).unwrap();
        txn.commit().unwrap();
        id
    }

    #[test]
    fn committed_data_visible_to_new_snapshot() {
        let store = InMemoryStore::new();
        let id = create_with_user(&store, "alice");

        let snapshot = store.begin_read().unwrap();
        assert!(snapshot.exists(id).unwrap());
        assert_eq!(
            snapshot.get_property(id, "name").unwrap(),
            Some(PropertyValue::from("alice"))
        );
    }

    #[test]
    fn aborted_data_not_visible() {
        let store = InMemoryStore::new();
        let mut txn = store.begin_write().unwrap();
        let id = txn.new_entity("User").unwrap();
        txn.abort();

        let snapshot = store.begin_read().unwrap();
        assert!(!snapshot.exists(id).unwrap());
    }

    #[test]
    fn snapshot_isolation_reader_sees_old_value() {
        let store = InMemoryStore::new();
        let id = create_with_user(&store, "alice");

        let reader = store.begin_read().unwrap();

        let mut txn = store.begin_write().unwrap();
        txn.set_property(id, "name", PropertyValue::from("bob")).unwrap();
        txn.commit().unwrap();

        assert_eq!(
            reader.get_property(id, "name").unwrap(),
            Some(PropertyValue::from("alice"))
        );
        assert_eq!(reader.get_version(id).unwrap(), Some(0));
        assert_eq!(reader.get_up_to_date_version(id).unwrap(), Some(1));
    }

    #[test]
    fn snapshot_rejects_writes() {
        let store = InMemoryStore::new();
        let mut snapshot = store.begin_read().unwrap();
        assert!(!snapshot.is_writable());
        assert_eq!(
            snapshot.new_entity("User").unwrap_err(),
            StoreError::ReadOnlyTransaction
        );
    }

    #[test]
    fn version_bumps_once_per_commit() {
        let store = InMemoryStore::new();
        let id = create_with_user(&store, "alice");

        let mut txn = store.begin_write().unwrap();
        txn.set_property(id, "name", PropertyValue::from("bob")).unwrap();
        txn.set_property(id, "age", PropertyValue::Int(3)).unwrap();
        txn.commit().unwrap();

        let snapshot = store.begin_read().unwrap();
        assert_eq!(snapshot.get_version(id).unwrap(), Some(1));
    }

    #[test]
    fn unchanged_property_does_not_bump_version() {
        let store = InMemoryStore::new();
        let id = create_with_user(&store, "alice");

        let mut txn = store.begin_write().unwrap();
        assert!(!txn.set_property(id, "name", PropertyValue::from("alice")).unwrap());
        txn.commit().unwrap();

        let snapshot = store.begin_read().unwrap();
        assert_eq!(snapshot.get_version(id).unwrap(), Some(0));
    }

    #[test]
    fn delete_entity_requires_links_removed() {
        let store = InMemoryStore::new();
        let mut txn = store.begin_write().unwrap();
        let parent = txn.new_entity("Folder").unwrap();
        let child = txn.new_entity("File").unwrap();
        txn.add_link(parent, "files", child).unwrap();

        let err = txn.delete_entity(parent).unwrap_err();
        assert!(matches!(err, StoreError::EntityHasLinks { .. }));

        txn.delete_links(parent, "files").unwrap();
        assert!(txn.delete_entity(parent).unwrap());
        txn.commit().unwrap();
    }

    #[test]
    fn find_links_returns_referrers() {
        let store = InMemoryStore::new();
        let mut txn = store.begin_write().unwrap();
        let folder = txn.new_entity("Folder").unwrap();
        let a = txn.new_entity("File").unwrap();
        let b = txn.new_entity("File").unwrap();
        txn.add_link(a, "folder", folder).unwrap();
        txn.add_link(b, "folder", folder).unwrap();
        txn.commit().unwrap();

        let snapshot = store.begin_read().unwrap();
        let referrers = snapshot.find_links("File", folder, "folder").unwrap();
        assert_eq!(referrers, vec![a, b]);
        assert_eq!(snapshot.count_links(a, "folder", 2).unwrap(), 1);
    }

    #[test]
    fn unique_key_conflict() {
        let store = InMemoryStore::new();
        let mut txn = store.begin_write().unwrap();
        let a = txn.new_entity("User").unwrap();
        let b = txn.new_entity("User").unwrap();
        let key = vec![IndexValue::Property(PropertyValue::from("alice"))];

        txn.insert_unique_key("User.login", key.clone(), a).unwrap();
        // Re-inserting for the same holder is fine.
        txn.insert_unique_key("User.login", key.clone(), a).unwrap();
        let err = txn.insert_unique_key("User.login", key.clone(), b).unwrap_err();
        assert!(err.is_unique_conflict());

        assert!(txn.delete_unique_key("User.login", &key).unwrap());
        txn.insert_unique_key("User.login", key, b).unwrap();
    }

    #[test]
    fn sort_orders_missing_last() {
        let store = InMemoryStore::new();
        let mut txn = store.begin_write().unwrap();
        let a = txn.new_entity("User").unwrap();
        let b = txn.new_entity("User").unwrap();
        let c = txn.new_entity("User").unwrap();
        txn.set_property(a, "age", PropertyValue::Int(30)).unwrap();
        txn.set_property(c, "age", PropertyValue::Int(10)).unwrap();
        txn.commit().unwrap();

        let snapshot = store.begin_read().unwrap();
        assert_eq!(snapshot.sort("User", "age", true).unwrap(), vec![c, a, b]);
        assert_eq!(snapshot.sort("User", "age", false).unwrap(), vec![a, c, b]);
    }

    #[test]
    fn history_saves_previous_row() {
        let store = InMemoryStore::new();
        let id = create_with_user(&store, "alice");

        let mut txn = store.begin_write().unwrap();
        txn.save_history(id).unwrap();
        txn.set_property(id, "name", PropertyValue::from("bob")).unwrap();
        txn.commit().unwrap();

        let snapshot = store.begin_read().unwrap();
        let history = snapshot.history(id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].version, 0);
        assert_eq!(
            history[0].properties.get("name"),
            Some(&PropertyValue::from("alice"))
        );
    }

    #[test]
    fn read_only_store_rejects_writers() {
        let store = InMemoryStore::new();
        store.set_read_only(true);
        assert!(matches!(store.begin_write(), Err(StoreError::ReadOnlyStore)));
        assert!(store.begin_read().is_ok());
    }

    #[test]
    fn injected_commit_failure_discards_writes() {
        let store = InMemoryStore::new();
        store.fail_next_commit();

        let mut txn = store.begin_write().unwrap();
        let id = txn.new_entity("User").unwrap();
        assert!(txn.commit().is_err());

        assert!(!store.begin_read().unwrap().exists(id).unwrap());
        // The write lock is released after the failed commit.
        let txn = store.begin_write().unwrap();
        assert!(txn.commit().is_ok());
    }

    #[test]
    fn sequences_are_monotonic() {
        let store = InMemoryStore::new();
        assert_eq!(store.next_sequence_value("ticket"), 0);
        assert_eq!(store.next_sequence_value("ticket"), 1);
        assert_eq!(store.next_sequence_value("other"), 0);
    }

    #[test]
    fn type_registry_is_stable() {
        let store = InMemoryStore::new();
        let user = store.entity_type_id("User");
        let post = store.entity_type_id("Post");
        assert_ne!(user, post);
        assert_eq!(store.entity_type_id("User"), user);
        assert_eq!(store.entity_type_name(post).as_deref(), Some("Post"));
    }

    #[test]
    fn committed_seq_updates() {
        let store = InMemoryStore::new();
        assert_eq!(store.committed_seq().as_u64(), 0);
        create_with_user(&store, "alice");
        assert_eq!(store.committed_seq().as_u64(), 1);
    }
}
