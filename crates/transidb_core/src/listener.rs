//! Listener and hook contracts.

use crate::changes::EntityChange;
use crate::constraints::ConstraintViolations;
use crate::entity::TransientEntity;
use crate::error::TransientResult;
use crate::session::TransientSession;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Receives flush notifications.
///
/// Callbacks run synchronously on the committing thread, in registration
/// order. All methods default to doing nothing.
pub trait TransientStoreListener: Send + Sync {
    /// Called before changes are written.
    ///
    /// The listener may make further changes through the session; they
    /// are validated once more before the flush proceeds. An error aborts
    /// the flush and leaves the session open.
    fn before_flush(
        &self,
        _session: &mut TransientSession,
        _changes: &[EntityChange],
    ) -> TransientResult<()> {
        Ok(())
    }

    /// Called after changes were committed to the store.
    fn flushed(&self, _session: &TransientSession, _changes: &[EntityChange]) {}

    /// Called when a flush was rejected by constraint validation.
    fn after_constraints_fail(&self, _session: &TransientSession, _violations: &ConstraintViolations) {}
}

/// Hook run before an entity is removed.
pub type Destructor =
    Arc<dyn Fn(&mut TransientSession, TransientEntity) -> TransientResult<()> + Send + Sync>;

/// Predicate deciding whether a property is required for an entity.
pub type RequiredIf =
    Arc<dyn Fn(&TransientSession, TransientEntity) -> TransientResult<bool> + Send + Sync>;

/// Per-type entity hooks.
#[derive(Default, Clone)]
pub struct EntityHooks {
    destructors: HashMap<String, Destructor>,
    required_if: HashMap<String, Vec<(String, RequiredIf)>>,
}

impl EntityHooks {
    /// Creates an empty hook registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the destructor of a type, replacing any previous one.
    pub fn set_destructor(&mut self, entity_type: impl Into<String>, destructor: Destructor) {
        self.destructors.insert(entity_type.into(), destructor);
    }

    /// Registers a conditionally required property.
    pub fn add_required_if(
        &mut self,
        entity_type: impl Into<String>,
        property: impl Into<String>,
        predicate: RequiredIf,
    ) {
        self.required_if
            .entry(entity_type.into())
            .or_default()
            .push((property.into(), predicate));
    }

    /// Returns the destructor of a type.
    #[must_use]
    pub fn destructor(&self, entity_type: &str) -> Option<Destructor> {
        self.destructors.get(entity_type).cloned()
    }

    /// Returns the conditionally required properties of a type.
    #[must_use]
    pub fn required_if(&self, entity_type: &str) -> Vec<(String, RequiredIf)> {
        self.required_if.get(entity_type).cloned().unwrap_or_default()
    }
}

impl fmt::Debug for EntityHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityHooks")
            .field("destructors", &self.destructors.keys().collect::<Vec<_>>())
            .field("required_if", &self.required_if.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_lookup() {
        let mut hooks = EntityHooks::new();
        hooks.set_destructor("User", Arc::new(|_, _| Ok(())));
        hooks.add_required_if("User", "email", Arc::new(|_, _| Ok(true)));
        hooks.add_required_if("User", "phone", Arc::new(|_, _| Ok(false)));

        assert!(hooks.destructor("User").is_some());
        assert!(hooks.destructor("Post").is_none());
        let names: Vec<_> = hooks.required_if("User").into_iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["email", "phone"]);
        assert!(hooks.required_if("Post").is_empty());
    }
}
