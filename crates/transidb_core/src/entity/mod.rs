//! Entity identities and handles.

mod arena;
mod handle;
mod id;

pub(crate) use arena::{EntityArena, Overlay};
pub use handle::{DetachedEntity, EntityState, TransientEntity};
pub use id::{EntityId, SessionId, TransientId};
