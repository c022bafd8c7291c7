//! # transidb Store
//!
//! Persistent entity store contract and reference implementation.
//!
//! The transient session layer in `transidb_core` never talks to storage
//! directly; it consumes the [`PersistentStore`] / [`StoreTransaction`]
//! contract defined here:
//!
//! - Entity CRUD with per-row versions
//! - Properties, blobs and named links
//! - Snapshot transactions for reads, one exclusive writer at a time
//! - Named sequences, unique keys and history snapshots
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - copy-on-write MVCC store for tests and embedding
//!
//! ## Example
//!
//! ```rust
//! use transidb_store::{InMemoryStore, PersistentStore, StoreTransaction};
//!
//! let store = InMemoryStore::new();
//! let mut txn = store.begin_write().unwrap();
//! let folder = txn.new_entity("Folder").unwrap();
//! let file = txn.new_entity("File").unwrap();
//! txn.add_link(folder, "files", file).unwrap();
//! txn.commit().unwrap();
//!
//! let snapshot = store.begin_read().unwrap();
//! assert_eq!(snapshot.get_links(folder, "files").unwrap(), vec![file]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod memory;
mod types;

pub use backend::{PersistentStore, StoreTransaction};
pub use error::{StoreError, StoreResult};
pub use memory::InMemoryStore;
pub use types::{HistoryEntry, IndexValue, PersistentEntityId, PropertyValue, SequenceNumber};
