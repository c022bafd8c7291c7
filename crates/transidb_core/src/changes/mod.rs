//! Change tracking.
//!
//! A [`ChangesTracker`] accumulates the net diff of a session between two
//! flushes: created and removed entities, changed properties and
//! per-link [`LinkChange`] sets.

mod description;
mod link_change;
mod tracker;

pub use description::{ChangeType, EntityChange};
pub use link_change::{LinkChange, LinkChangeType};
pub use tracker::ChangesTracker;
