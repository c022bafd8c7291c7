//! Entity removal.

use super::{Access, ApplyOp, TransientSession};
use crate::cascade::{self, CascadeAction};
use crate::constraints;
use crate::entity::TransientEntity;
use crate::error::{TransientError, TransientResult};
use std::collections::HashSet;
use tracing::{debug, trace};

impl TransientSession {
    /// Removes an entity together with everything its removal cascades
    /// to.
    ///
    /// Registered destructors run first, for every entity the removal
    /// reaches. Links marked clear-on-delete are then severed and
    /// cascade-delete targets removed.
    ///
    /// # Errors
    ///
    /// Returns `EntityRemoved` if the entity is already removed, and
    /// `CascadeLimitExceeded` if destructors keep extending the cascade.
    pub fn delete_entity(&mut self, entity: TransientEntity) -> TransientResult<()> {
        self.access(entity, Access::Write)?;
        self.remove_with_cascade(entity)
    }

    pub(crate) fn remove_with_cascade(&mut self, entity: TransientEntity) -> TransientResult<()> {
        let mut destructed = HashSet::new();
        self.run_destructors(entity, &mut destructed)?;

        let max_rounds = self.store().config().max_cascade_rounds;
        for _ in 0..max_rounds {
            if self.is_removed_raw(entity) {
                return Ok(());
            }
            let plan = cascade::structural_plan(self, entity, &mut HashSet::new())?;
            let discovered: Vec<TransientEntity> = cascade::removals(&plan)
                .filter(|e| !destructed.contains(e))
                .collect();
            if discovered.is_empty() {
                return self.apply_cascade(plan);
            }
            for found in discovered {
                self.run_destructors(found, &mut destructed)?;
            }
        }
        Err(TransientError::CascadeLimitExceeded {
            entity: self.id_of(entity),
            rounds: max_rounds,
        })
    }

    /// Runs destructors over `entity` and its cascade, parents first.
    fn run_destructors(
        &mut self,
        entity: TransientEntity,
        destructed: &mut HashSet<TransientEntity>,
    ) -> TransientResult<()> {
        let mut pending = vec![entity];
        while let Some(next) = pending.pop() {
            if self.is_removed_raw(next) || !destructed.insert(next) {
                continue;
            }
            if let Some(destructor) = self.store().destructor(&self.type_of(next)) {
                trace!(session = %self.id(), entity = %self.id_of(next), "running destructor");
                destructor(&mut *self, next)?;
            }
            pending.extend(cascade::cascade_targets(self, next)?);
        }
        Ok(())
    }

    fn apply_cascade(&mut self, plan: Vec<CascadeAction>) -> TransientResult<()> {
        for action in plan {
            match action {
                CascadeAction::Unlink {
                    source,
                    link,
                    target,
                } => {
                    if !self.is_removed_raw(source) {
                        self.unlink_removed(source, &link, target)?;
                    }
                }
                CascadeAction::Remove(entity) => {
                    if !self.is_removed_raw(entity) {
                        self.mark_removed(entity);
                    }
                }
            }
        }
        Ok(())
    }

    /// Severs a link to an entity that is being removed.
    fn unlink_removed(
        &mut self,
        source: TransientEntity,
        link: &str,
        target: TransientEntity,
    ) -> TransientResult<()> {
        let mut targets = self.raw_links(source, link)?;
        targets.retain(|t| *t != target);
        self.arena
            .get_mut()
            .record_mut(source)
            .overlay
            .links
            .insert(link.to_string(), targets);
        let source_type = self.type_of(source);
        self.tracker.link_deleted(source, &source_type, link, target);
        self.ops.push(ApplyOp::DeleteLink {
            entity: source,
            name: link.to_string(),
            target,
        });
        Ok(())
    }

    fn mark_removed(&mut self, entity: TransientEntity) {
        let entity_type = self.type_of(entity);
        self.tracker.entity_removed(entity, &entity_type);
        if self.persistent_id_of(entity).is_some() {
            self.ops.push(ApplyOp::DeleteEntityLinks { entity });
            self.ops.push(ApplyOp::DeleteEntity { entity });
        }
        debug!(session = %self.id(), entity = %self.id_of(entity), entity_type, "entity removed");
    }

    /// Removes orphans whose type allows it, until none are left.
    pub(crate) fn remove_orphans(&mut self) -> TransientResult<()> {
        let max_rounds = self.store().config().max_cascade_rounds;
        for _ in 0..max_rounds {
            let orphans = constraints::removable_orphans(self)?;
            if orphans.is_empty() {
                return Ok(());
            }
            for orphan in orphans {
                if !self.is_removed_raw(orphan) {
                    debug!(session = %self.id(), entity = %self.id_of(orphan), "removing orphan");
                    self.remove_with_cascade(orphan)?;
                }
            }
        }
        Err(TransientError::invalid_operation(format!(
            "orphan removal did not settle after {max_rounds} rounds"
        )))
    }
}
