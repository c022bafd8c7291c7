//! Flush and commit.

use super::ops::{FlushPlan, RollbackOp};
use super::{ApplyOp, KeyPart, SessionState, TransientSession};
use crate::changes::{ChangesTracker, EntityChange};
use crate::constraints::{self, ConstraintViolations, Validation};
use crate::entity::TransientEntity;
use crate::error::{TransientError, TransientResult};
use std::collections::HashSet;
use tracing::{debug, trace, warn};
use transidb_store::{PersistentEntityId, StoreError, StoreTransaction};

impl TransientSession {
    /// Writes all pending changes to the store and keeps the session open.
    ///
    /// Returns the description of the changes that were written. A
    /// session without pending changes returns an empty list without
    /// opening a store transaction.
    ///
    /// # Errors
    ///
    /// - `ConstraintsValidation` with every violation found; nothing was
    ///   written and the session is unchanged
    /// - `VersionMismatch` or `EntityRemovedInDatabase` on a conflict with
    ///   another session
    /// - store errors; the session stays open with its changes, unless
    ///   the store failed to commit, which aborts the session
    pub fn intermediate_commit(&mut self) -> TransientResult<Vec<EntityChange>> {
        self.ensure_open()?;
        self.flush()
    }

    /// Flushes pending changes and ends the session.
    ///
    /// On error the session stays open, except when the store failed to
    /// commit (see [`intermediate_commit`](Self::intermediate_commit)).
    pub fn commit(&mut self) -> TransientResult<Vec<EntityChange>> {
        self.ensure_open()?;
        let changes = self.flush()?;
        self.close(SessionState::Committed);
        debug!(session = %self.id(), "session committed");
        Ok(changes)
    }

    fn flush(&mut self) -> TransientResult<Vec<EntityChange>> {
        if !self.tracker.has_changes() {
            return Ok(Vec::new());
        }
        if self.store().persistent().is_read_only() {
            return Err(TransientError::ReadOnlyStore);
        }

        self.remove_orphans()?;
        let mut validation = self.validate_changes()?;
        let mut changes = self.tracker.get_changes_description();

        let counter = self.tracker.change_counter();
        for listener in self.store().listeners() {
            listener.before_flush(self, &changes)?;
        }
        if self.tracker.change_counter() != counter {
            self.remove_orphans()?;
            validation = self.validate_changes()?;
            changes = self.tracker.get_changes_description();
        }
        if !self.tracker.has_changes() {
            return Ok(Vec::new());
        }

        self.write_changes(validation.unique_ops)?;
        self.after_flush()?;

        for listener in self.store().listeners() {
            listener.flushed(self, &changes);
        }
        Ok(changes)
    }

    fn validate_changes(&self) -> TransientResult<Validation> {
        let validation = constraints::validate(self)?;
        if validation.violations.is_empty() {
            return Ok(validation);
        }
        warn!(
            session = %self.id(),
            violations = validation.violations.len(),
            "flush rejected by constraints"
        );
        for listener in self.store().listeners() {
            listener.after_constraints_fail(self, &validation.violations);
        }
        Err(TransientError::ConstraintsValidation(validation.violations))
    }

    /// Applies queued operations in one store transaction.
    fn write_changes(&mut self, unique_ops: Vec<ApplyOp>) -> TransientResult<()> {
        let removed: HashSet<TransientEntity> = self.tracker.removed_entities().collect();
        let unpersisted: HashSet<TransientEntity> = removed
            .iter()
            .copied()
            .filter(|entity| self.persistent_id_of(*entity).is_none())
            .collect();
        let unique_ops = if self.postpone_unique_keys {
            Vec::new()
        } else {
            unique_ops
        };
        let plan = FlushPlan::partition(self.ops.clone(), unique_ops, &removed, &unpersisted);
        let op_count = plan.len();

        let mut txn = self.store().persistent().begin_write()?;
        let mut rollback = Vec::new();
        let mut failed_key = None;
        if let Err(err) = self.apply_plan(txn.as_mut(), plan, &mut rollback, &mut failed_key) {
            txn.abort();
            self.rollback(rollback);
            warn!(session = %self.id(), error = %err, "flush failed; changes kept");
            return Err(match (err, failed_key) {
                (
                    TransientError::Store(StoreError::UniqueKeyConflict { existing, .. }),
                    Some(ApplyOp::UpsertUniqueKey { index, entity, key }),
                ) => self.unique_key_taken(&index, entity, &key, existing),
                (err, _) => err,
            });
        }
        match txn.commit() {
            Ok(seq) => {
                debug!(session = %self.id(), ops = op_count, seq = %seq, "flushed");
                Ok(())
            }
            Err(err) => {
                self.rollback(rollback);
                warn!(session = %self.id(), error = %err, "store commit failed; aborting session");
                self.close(SessionState::Aborted);
                Err(err.into())
            }
        }
    }

    fn apply_plan(
        &mut self,
        txn: &mut dyn StoreTransaction,
        plan: FlushPlan,
        rollback: &mut Vec<RollbackOp>,
        failed_key: &mut Option<ApplyOp>,
    ) -> TransientResult<()> {
        let locked: Vec<PersistentEntityId> = self
            .tracker
            .changed_entities()
            .filter(|entity| !self.tracker.is_new(*entity))
            .filter_map(|entity| self.persistent_id_of(entity))
            .collect();
        txn.lock_for_update(&locked)?;
        if self.check_versions {
            self.check_entity_versions(txn)?;
        }
        self.save_history(txn)?;
        for op in plan.into_ordered() {
            let key_op = op.is_unique_key_op().then(|| op.clone());
            if let Err(err) = self.apply_op(txn, op, rollback) {
                *failed_key = key_op;
                return Err(err);
            }
        }
        Ok(())
    }

    /// Reports a unique key that another session committed after this
    /// session's snapshot, the same way validation reports a taken key.
    fn unique_key_taken(
        &self,
        index: &str,
        entity: TransientEntity,
        key: &[KeyPart],
        holder: PersistentEntityId,
    ) -> TransientError {
        let mut violations = ConstraintViolations::new();
        violations.push(constraints::key_conflict(self, entity, index, key, holder.into()));
        for listener in self.store().listeners() {
            listener.after_constraints_fail(self, &violations);
        }
        TransientError::ConstraintsValidation(violations)
    }

    fn check_entity_versions(&self, txn: &dyn StoreTransaction) -> TransientResult<()> {
        for entity in self.tracker.changed_entities() {
            if self.tracker.is_new(entity) {
                continue;
            }
            let Some(id) = self.persistent_id_of(entity) else {
                continue;
            };
            let local = self.remembered_version(entity);
            match txn.get_up_to_date_version(id)? {
                None => {
                    return Err(TransientError::EntityRemovedInDatabase {
                        entity: self.id_of(entity),
                        entity_type: self.type_of(entity),
                    });
                }
                Some(current) if Some(current) != local => {
                    if !self.compatible_changes(entity) {
                        return Err(TransientError::VersionMismatch {
                            entity: self.id_of(entity),
                            entity_type: self.type_of(entity),
                            local_version: local.unwrap_or_default(),
                            current_version: current,
                        });
                    }
                    trace!(session = %self.id(), entity = %id, "stale version accepted");
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Returns true if the entity's changes may be applied over a newer
    /// version: only additions to multi-valued links and properties that
    /// ignore version mismatches.
    fn compatible_changes(&self, entity: TransientEntity) -> bool {
        if self.tracker.is_removed(entity) {
            return false;
        }
        let entity_type = self.type_of(entity);
        let meta = self.metadata().entity(&entity_type);
        if meta.is_some_and(|meta| meta.version_mismatch_ignored) {
            return true;
        }
        let links_ok = self
            .tracker
            .get_changed_links_detailed(entity)
            .map_or(true, |links| {
                links.iter().all(|(name, change)| {
                    !change.has_net_change()
                        || (change.is_pure_add()
                            && self
                                .link_cardinality(entity, name)
                                .is_some_and(|cardinality| cardinality.is_multiple()))
                })
            });
        let properties_ok = self
            .tracker
            .get_changed_properties(entity)
            .map_or(true, |names| {
                names.iter().all(|name| {
                    meta.and_then(|meta| meta.get_property(name))
                        .is_some_and(|property| property.version_mismatch_ignored)
                })
            });
        links_ok && properties_ok
    }

    fn save_history(&self, txn: &mut dyn StoreTransaction) -> TransientResult<()> {
        for entity in self.tracker.changed_entities() {
            if self.tracker.is_new(entity) || self.tracker.is_removed(entity) {
                continue;
            }
            let Some(id) = self.persistent_id_of(entity) else {
                continue;
            };
            let entity_type = self.type_of(entity);
            let Some(meta) = self.metadata().entity(&entity_type) else {
                continue;
            };
            if !meta.has_history {
                continue;
            }
            let tracked = |name: &String| !meta.history_ignored.contains(name);
            let properties = self
                .tracker
                .get_changed_properties(entity)
                .is_some_and(|names| names.iter().any(tracked));
            let links = self
                .tracker
                .get_changed_links_detailed(entity)
                .is_some_and(|links| {
                    links
                        .iter()
                        .any(|(name, change)| change.has_net_change() && tracked(name))
                });
            if properties || links {
                trace!(session = %self.id(), entity = %id, "saving history");
                txn.save_history(id)?;
            }
        }
        Ok(())
    }

    fn require_persistent(&self, entity: TransientEntity) -> TransientResult<PersistentEntityId> {
        self.persistent_id_of(entity).ok_or_else(|| {
            TransientError::invalid_operation(format!(
                "entity {} has no persistent row",
                self.id_of(entity)
            ))
        })
    }

    fn apply_op(
        &mut self,
        txn: &mut dyn StoreTransaction,
        op: ApplyOp,
        rollback: &mut Vec<RollbackOp>,
    ) -> TransientResult<()> {
        trace!(session = %self.id(), op = ?op, "applying");
        match op {
            ApplyOp::CreateEntity { entity } => {
                let id = txn.new_entity(&self.type_of(entity))?;
                self.arena.get_mut().assign_persistent(entity, id);
                rollback.push(RollbackOp::ForgetPersistentId { entity });
            }
            ApplyOp::SetProperty {
                entity,
                name,
                value,
            } => {
                txn.set_property(self.require_persistent(entity)?, &name, value)?;
            }
            ApplyOp::DeleteProperty { entity, name } => {
                txn.delete_property(self.require_persistent(entity)?, &name)?;
            }
            ApplyOp::SetBlob { entity, name, blob } => {
                let data = self.blobs.read(blob)?;
                txn.set_blob(self.require_persistent(entity)?, &name, data)?;
            }
            ApplyOp::DeleteBlob { entity, name } => {
                txn.delete_blob(self.require_persistent(entity)?, &name)?;
            }
            ApplyOp::AddLink {
                entity,
                name,
                target,
            } => {
                let target = self.require_persistent(target)?;
                txn.add_link(self.require_persistent(entity)?, &name, target)?;
            }
            ApplyOp::SetLink {
                entity,
                name,
                target,
            } => {
                let target = target.map(|t| self.require_persistent(t)).transpose()?;
                txn.set_link(self.require_persistent(entity)?, &name, target)?;
            }
            ApplyOp::DeleteLink {
                entity,
                name,
                target,
            } => {
                // Links to entities created this round were never stored.
                if let (Some(id), Some(target)) =
                    (self.persistent_id_of(entity), self.persistent_id_of(target))
                {
                    txn.delete_link(id, &name, target)?;
                }
            }
            ApplyOp::DeleteLinks { entity, name } => {
                txn.delete_links(self.require_persistent(entity)?, &name)?;
            }
            ApplyOp::DeleteEntityLinks { entity } => {
                let id = self.require_persistent(entity)?;
                for name in txn.link_names(id)? {
                    txn.delete_links(id, &name)?;
                }
            }
            ApplyOp::DeleteEntity { entity } => {
                txn.delete_entity(self.require_persistent(entity)?)?;
            }
            ApplyOp::UpsertUniqueKey { index, entity, key } => {
                let id = self.require_persistent(entity)?;
                let key = constraints::resolve_key(self, &key).ok_or_else(|| {
                    TransientError::invalid_operation(format!("unique key of {index} is unresolved"))
                })?;
                txn.insert_unique_key(&index, key, id)?;
            }
            ApplyOp::DeleteUniqueKey { index, key } => {
                if let Some(key) = constraints::resolve_key(self, &key) {
                    txn.delete_unique_key(&index, &key)?;
                }
            }
        }
        Ok(())
    }

    /// Undoes in-memory changes made while applying a failed flush.
    fn rollback(&mut self, rollback: Vec<RollbackOp>) {
        let arena = self.arena.get_mut();
        for op in rollback.into_iter().rev() {
            match op {
                RollbackOp::ForgetPersistentId { entity } => arena.forget_persistent(entity),
            }
        }
    }

    /// Resets per-round state after a successful commit.
    fn after_flush(&mut self) -> TransientResult<()> {
        let removed: Vec<TransientEntity> = self.tracker.removed_entities().collect();
        let added: Vec<TransientEntity> = self.tracker.added_entities().collect();
        {
            let arena = self.arena.get_mut();
            for entity in &removed {
                arena.record_mut(*entity).deleted = true;
            }
            for entity in added {
                if !removed.contains(&entity) {
                    arena.record_mut(entity).was_new = true;
                }
            }
            for record in arena.records_mut() {
                if !record.temporary {
                    record.overlay.clear();
                }
            }
        }
        self.ops.clear();
        self.blobs.discard_all();

        let persistent = self.store().persistent().clone();
        let snapshot = persistent.begin_read()?;
        for record in self.arena.get_mut().records_mut() {
            if record.deleted {
                continue;
            }
            if let Some(id) = record.persistent_id {
                record.version = snapshot.get_version(id)?;
            }
        }
        if let Some(old) = self.snapshot.replace(snapshot) {
            old.abort();
        }
        self.tracker = ChangesTracker::new(Some(persistent.begin_read()?));
        Ok(())
    }
}
