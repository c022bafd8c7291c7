//! Constraint checking.
//!
//! Validation runs at flush over the entities touched since the last
//! flush: association cardinalities, required properties, unique keys,
//! references to removed entities and aggregation orphans.

mod engine;
mod violation;

pub(crate) use engine::{key_conflict, removable_orphans, resolve_key, validate, Validation};
pub use violation::{
    ConstraintViolation, ConstraintViolations, IncomingReferrers, KeyFieldValue, ViolationKind,
};
