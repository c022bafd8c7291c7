//! Transactions of the in-memory store.

use super::state::{Row, StoreState};
use super::Shared;
use crate::backend::StoreTransaction;
use crate::error::{StoreError, StoreResult};
use crate::types::{HistoryEntry, IndexValue, PersistentEntityId, PropertyValue, SequenceNumber};
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::RawMutex;
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// A snapshot or write transaction over an [`super::InMemoryStore`].
///
/// Snapshots read the state published at the moment they were opened.
/// Write transactions hold the store's write lock for their whole
/// lifetime and work on a private copy of the latest committed state.
pub(crate) struct MemoryTransaction {
    shared: Arc<Shared>,
    /// State this transaction was opened on.
    snapshot: Arc<StoreState>,
    /// Private copy for writers, `None` for snapshots.
    working: Option<StoreState>,
    snapshot_seq: SequenceNumber,
    modified: HashSet<PersistentEntityId>,
    created: HashSet<PersistentEntityId>,
    locked: HashSet<PersistentEntityId>,
    _guard: Option<ArcMutexGuard<RawMutex, ()>>,
}

impl MemoryTransaction {
    pub(crate) fn read(shared: Arc<Shared>) -> Self {
        let snapshot = Arc::clone(&shared.committed.read());
        let snapshot_seq = SequenceNumber::new(shared.committed_seq.load(Ordering::SeqCst));
        Self {
            shared,
            snapshot,
            working: None,
            snapshot_seq,
            modified: HashSet::new(),
            created: HashSet::new(),
            locked: HashSet::new(),
            _guard: None,
        }
    }

    pub(crate) fn write(shared: Arc<Shared>) -> Self {
        // Blocks until the previous writer has finished.
        let guard = shared.write_lock.lock_arc();
        let mut txn = Self::read(shared);
        txn.working = Some((*txn.snapshot).clone());
        txn._guard = Some(guard);
        txn
    }

    fn view(&self) -> &StoreState {
        match &self.working {
            Some(working) => working,
            None => &self.snapshot,
        }
    }

    fn row(&self, id: PersistentEntityId) -> StoreResult<&Row> {
        self.view()
            .row(id)
            .ok_or(StoreError::EntityNotFound { id })
    }

    fn state_mut(&mut self) -> StoreResult<&mut StoreState> {
        self.working.as_mut().ok_or(StoreError::ReadOnlyTransaction)
    }

    fn row_mut(&mut self, id: PersistentEntityId) -> StoreResult<&mut Row> {
        let state = self.working.as_mut().ok_or(StoreError::ReadOnlyTransaction)?;
        let row = state
            .rows
            .get_mut(&id)
            .ok_or(StoreError::EntityNotFound { id })?;
        self.modified.insert(id);
        Ok(row)
    }

    fn type_rows(&self, entity_type: &str) -> Vec<(PersistentEntityId, &Row)> {
        match self.shared.type_id(entity_type) {
            Some(type_id) => self
                .view()
                .rows_of_type(type_id)
                .map(|(id, row)| (*id, row))
                .collect(),
            None => Vec::new(),
        }
    }
}

impl StoreTransaction for MemoryTransaction {
    fn is_writable(&self) -> bool {
        self.working.is_some()
    }

    fn exists(&self, id: PersistentEntityId) -> StoreResult<bool> {
        Ok(self.view().row(id).is_some())
    }

    fn get_version(&self, id: PersistentEntityId) -> StoreResult<Option<u64>> {
        Ok(self.view().row(id).map(|row| row.version))
    }

    fn get_up_to_date_version(&self, id: PersistentEntityId) -> StoreResult<Option<u64>> {
        let committed = self.shared.committed.read();
        Ok(committed.row(id).map(|row| row.version))
    }

    fn get_property(
        &self,
        id: PersistentEntityId,
        name: &str,
    ) -> StoreResult<Option<PropertyValue>> {
        Ok(self.row(id)?.properties.get(name).cloned())
    }

    fn property_names(&self, id: PersistentEntityId) -> StoreResult<Vec<String>> {
        Ok(self.row(id)?.properties.keys().cloned().collect())
    }

    fn get_blob(&self, id: PersistentEntityId, name: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.row(id)?.blobs.get(name).cloned())
    }

    fn blob_names(&self, id: PersistentEntityId) -> StoreResult<Vec<String>> {
        Ok(self.row(id)?.blobs.keys().cloned().collect())
    }

    fn get_link(
        &self,
        id: PersistentEntityId,
        name: &str,
    ) -> StoreResult<Option<PersistentEntityId>> {
        Ok(self
            .row(id)?
            .links
            .get(name)
            .and_then(|targets| targets.iter().next().copied()))
    }

    fn get_links(
        &self,
        id: PersistentEntityId,
        name: &str,
    ) -> StoreResult<Vec<PersistentEntityId>> {
        Ok(self
            .row(id)?
            .links
            .get(name)
            .map(|targets| targets.iter().copied().collect())
            .unwrap_or_default())
    }

    fn count_links(&self, id: PersistentEntityId, name: &str, bound: usize) -> StoreResult<usize> {
        Ok(self
            .row(id)?
            .links
            .get(name)
            .map_or(0, |targets| targets.iter().take(bound).count()))
    }

    fn link_names(&self, id: PersistentEntityId) -> StoreResult<Vec<String>> {
        Ok(self
            .row(id)?
            .links
            .iter()
            .filter(|(_, targets)| !targets.is_empty())
            .map(|(name, _)| name.clone())
            .collect())
    }

    fn get_all(&self, entity_type: &str) -> StoreResult<Vec<PersistentEntityId>> {
        Ok(self.type_rows(entity_type).into_iter().map(|(id, _)| id).collect())
    }

    fn find(
        &self,
        entity_type: &str,
        property: &str,
        value: &PropertyValue,
    ) -> StoreResult<Vec<PersistentEntityId>> {
        Ok(self
            .type_rows(entity_type)
            .into_iter()
            .filter(|(_, row)| row.properties.get(property) == Some(value))
            .map(|(id, _)| id)
            .collect())
    }

    fn sort(
        &self,
        entity_type: &str,
        property: &str,
        ascending: bool,
    ) -> StoreResult<Vec<PersistentEntityId>> {
        let rows = self.type_rows(entity_type);
        let (mut with, without): (Vec<_>, Vec<_>) = rows
            .into_iter()
            .partition(|(_, row)| row.properties.contains_key(property));
        with.sort_by(|(a_id, a), (b_id, b)| {
            let ordering = a.properties.get(property).cmp(&b.properties.get(property));
            let ordering = if ascending { ordering } else { ordering.reverse() };
            ordering.then(a_id.cmp(b_id))
        });
        Ok(with
            .into_iter()
            .chain(without)
            .map(|(id, _)| id)
            .collect())
    }

    fn find_links(
        &self,
        entity_type: &str,
        target: PersistentEntityId,
        link: &str,
    ) -> StoreResult<Vec<PersistentEntityId>> {
        Ok(self
            .type_rows(entity_type)
            .into_iter()
            .filter(|(_, row)| {
                row.links
                    .get(link)
                    .is_some_and(|targets| targets.contains(&target))
            })
            .map(|(id, _)| id)
            .collect())
    }

    fn find_unique(
        &self,
        index: &str,
        key: &[IndexValue],
    ) -> StoreResult<Option<PersistentEntityId>> {
        Ok(self
            .view()
            .unique_keys
            .get(index)
            .and_then(|keys| keys.get(key))
            .copied())
    }

    fn history(&self, id: PersistentEntityId) -> StoreResult<Vec<HistoryEntry>> {
        Ok(self.view().history.get(&id).cloned().unwrap_or_default())
    }

    fn new_entity(&mut self, entity_type: &str) -> StoreResult<PersistentEntityId> {
        let type_id = self.shared.register_type(entity_type);
        let id = self.state_mut()?.allocate(type_id);
        self.created.insert(id);
        self.modified.insert(id);
        tracing::trace!(entity = %id, entity_type, "created entity");
        Ok(id)
    }

    fn set_property(
        &mut self,
        id: PersistentEntityId,
        name: &str,
        value: PropertyValue,
    ) -> StoreResult<bool> {
        if self.working.is_none() {
            return Err(StoreError::ReadOnlyTransaction);
        }
        if self.row(id)?.properties.get(name) == Some(&value) {
            return Ok(false);
        }
        self.row_mut(id)?.properties.insert(name.to_string(), value);
        Ok(true)
    }

    fn delete_property(&mut self, id: PersistentEntityId, name: &str) -> StoreResult<bool> {
        Ok(self.row_mut(id)?.properties.remove(name).is_some())
    }

    fn set_blob(&mut self, id: PersistentEntityId, name: &str, data: Vec<u8>) -> StoreResult<()> {
        self.row_mut(id)?.blobs.insert(name.to_string(), data);
        Ok(())
    }

    fn delete_blob(&mut self, id: PersistentEntityId, name: &str) -> StoreResult<bool> {
        Ok(self.row_mut(id)?.blobs.remove(name).is_some())
    }

    fn add_link(
        &mut self,
        id: PersistentEntityId,
        name: &str,
        target: PersistentEntityId,
    ) -> StoreResult<bool> {
        Ok(self
            .row_mut(id)?
            .links
            .entry(name.to_string())
            .or_default()
            .insert(target))
    }

    fn set_link(
        &mut self,
        id: PersistentEntityId,
        name: &str,
        target: Option<PersistentEntityId>,
    ) -> StoreResult<bool> {
        if self.working.is_none() {
            return Err(StoreError::ReadOnlyTransaction);
        }
        let current = self.row(id)?.links.get(name);
        let unchanged = match (target, current) {
            (Some(target), Some(targets)) => targets.len() == 1 && targets.contains(&target),
            (Some(_), None) => false,
            (None, current) => current.map_or(true, |targets| targets.is_empty()),
        };
        if unchanged {
            return Ok(false);
        }
        let targets = self
            .row_mut(id)?
            .links
            .entry(name.to_string())
            .or_default();
        targets.clear();
        if let Some(target) = target {
            targets.insert(target);
        }
        Ok(true)
    }

    fn delete_link(
        &mut self,
        id: PersistentEntityId,
        name: &str,
        target: PersistentEntityId,
    ) -> StoreResult<bool> {
        Ok(self
            .row_mut(id)?
            .links
            .get_mut(name)
            .is_some_and(|targets| targets.remove(&target)))
    }

    fn delete_links(&mut self, id: PersistentEntityId, name: &str) -> StoreResult<()> {
        self.row_mut(id)?.links.remove(name);
        Ok(())
    }

    fn delete_entity(&mut self, id: PersistentEntityId) -> StoreResult<bool> {
        let state = self.state_mut()?;
        let Some(row) = state.rows.get(&id) else {
            return Ok(false);
        };
        let links: Vec<String> = row
            .links
            .iter()
            .filter(|(_, targets)| !targets.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        if !links.is_empty() {
            return Err(StoreError::EntityHasLinks { id, links });
        }
        state.rows.remove(&id);
        self.modified.remove(&id);
        tracing::trace!(entity = %id, "deleted entity");
        Ok(true)
    }

    fn lock_for_update(&mut self, ids: &[PersistentEntityId]) -> StoreResult<()> {
        if self.working.is_none() {
            return Err(StoreError::ReadOnlyTransaction);
        }
        // The write lock already serializes writers; record the set for
        // diagnostics.
        self.locked.extend(ids.iter().copied());
        Ok(())
    }

    fn save_history(&mut self, id: PersistentEntityId) -> StoreResult<()> {
        let state = self.state_mut()?;
        let entry = state
            .row(id)
            .ok_or(StoreError::EntityNotFound { id })?
            .history_entry();
        state.history.entry(id).or_default().push(entry);
        Ok(())
    }

    fn insert_unique_key(
        &mut self,
        index: &str,
        key: Vec<IndexValue>,
        id: PersistentEntityId,
    ) -> StoreResult<()> {
        let keys = self
            .state_mut()?
            .unique_keys
            .entry(index.to_string())
            .or_default();
        match keys.get(&key) {
            Some(existing) if *existing != id => Err(StoreError::UniqueKeyConflict {
                index: index.to_string(),
                existing: *existing,
            }),
            _ => {
                keys.insert(key, id);
                Ok(())
            }
        }
    }

    fn delete_unique_key(&mut self, index: &str, key: &[IndexValue]) -> StoreResult<bool> {
        Ok(self
            .state_mut()?
            .unique_keys
            .get_mut(index)
            .is_some_and(|keys| keys.remove(key).is_some()))
    }

    fn commit(mut self: Box<Self>) -> StoreResult<SequenceNumber> {
        let Some(mut working) = self.working.take() else {
            return Ok(self.snapshot_seq);
        };
        if self.shared.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(StoreError::commit_failed("injected commit failure"));
        }
        for id in &self.modified {
            if self.created.contains(id) {
                continue;
            }
            if let Some(row) = working.rows.get_mut(id) {
                row.version += 1;
            }
        }
        let mut committed = self.shared.committed.write();
        *committed = Arc::new(working);
        let seq = self.shared.committed_seq.fetch_add(1, Ordering::SeqCst) + 1;
        drop(committed);
        tracing::trace!(
            seq,
            modified = self.modified.len(),
            locked = self.locked.len(),
            "committed write transaction"
        );
        Ok(SequenceNumber::new(seq))
    }

    fn abort(self: Box<Self>) {
        if self.working.is_some() {
            tracing::trace!(modified = self.modified.len(), "aborted write transaction");
        }
    }
}
