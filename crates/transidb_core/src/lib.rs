//! # transidb Core
//!
//! Transactional session layer over a versioned persistent entity store.
//!
//! This crate provides:
//! - Transient sessions buffering reads and writes over a store snapshot
//! - Change tracking with delta compression
//! - Flush-time constraint validation (cardinality, required properties,
//!   unique keys, incoming links, aggregation orphans)
//! - Two-phase removal cascades with pre-delete hooks
//! - Optimistic concurrency with per-entity version checks
//! - A session registry with suspend and resume across threads
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use transidb_core::metadata::{EntityMetadata, ModelMetadata, PropertyMetadata};
//! use transidb_core::TransientStore;
//! use transidb_store::InMemoryStore;
//!
//! let model = ModelMetadata::from_entities([
//!     EntityMetadata::new("User").property(PropertyMetadata::primitive("login").required()),
//! ]);
//! let store = TransientStore::new(Arc::new(InMemoryStore::new()), model);
//!
//! let mut session = store.begin_session().unwrap();
//! let user = session.new_entity("User").unwrap();
//! session.set_property(user, "login", "alice").unwrap();
//! let changes = session.commit().unwrap();
//! assert_eq!(changes.len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod association;
mod cascade;
pub mod changes;
mod config;
pub mod constraints;
pub mod entity;
mod error;
pub mod listener;
pub mod metadata;
mod session;
mod store;

pub use changes::{ChangeType, ChangesTracker, EntityChange, LinkChange, LinkChangeType};
pub use config::TransientStoreConfig;
pub use constraints::{ConstraintViolation, ConstraintViolations, ViolationKind};
pub use entity::{DetachedEntity, EntityId, EntityState, SessionId, TransientEntity, TransientId};
pub use error::{TransientError, TransientResult};
pub use listener::{EntityHooks, TransientStoreListener};
pub use session::{EntityIter, SessionState, TransientSession};
pub use store::TransientStore;
pub use transidb_store::{PersistentEntityId, PropertyValue};
