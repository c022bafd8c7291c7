//! # transidb Testkit
//!
//! Test utilities for transidb.
//!
//! This crate provides:
//! - Ready-made metadata models and store fixtures
//! - Property-based test generators using proptest
//! - Recording listeners for flush notifications
//! - The cross-crate integration suites under `tests/`
//!
//! ## Usage
//!
//! ```rust
//! use transidb_testkit::prelude::*;
//!
//! let store = TestStore::new(blog_model());
//! let mut session = store.session();
//! let user = session.new_entity("User").unwrap();
//! session.set_property(user, "login", "alice").unwrap();
//! session.commit().unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod listeners;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::listeners::*;
}

pub use fixtures::*;
pub use generators::*;
pub use listeners::*;
