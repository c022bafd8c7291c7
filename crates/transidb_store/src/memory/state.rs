//! Committed state of the in-memory store.

use crate::types::{HistoryEntry, IndexValue, PersistentEntityId, PropertyValue};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// One entity row.
#[derive(Debug, Clone, Default)]
pub(crate) struct Row {
    pub(crate) version: u64,
    pub(crate) properties: BTreeMap<String, PropertyValue>,
    pub(crate) blobs: BTreeMap<String, Vec<u8>>,
    pub(crate) links: BTreeMap<String, BTreeSet<PersistentEntityId>>,
}

impl Row {
    pub(crate) fn history_entry(&self) -> HistoryEntry {
        HistoryEntry {
            version: self.version,
            properties: self.properties.clone(),
            links: self
                .links
                .iter()
                .map(|(name, targets)| (name.clone(), targets.iter().copied().collect()))
                .collect(),
        }
    }
}

/// An immutable-once-published image of the whole store.
///
/// Snapshots share a published state through an `Arc`; the writer works
/// on a private clone and publishes it at commit.
#[derive(Debug, Clone, Default)]
pub(crate) struct StoreState {
    pub(crate) rows: BTreeMap<PersistentEntityId, Row>,
    pub(crate) next_local_ids: HashMap<u32, u64>,
    pub(crate) unique_keys: HashMap<String, HashMap<Vec<IndexValue>, PersistentEntityId>>,
    pub(crate) history: HashMap<PersistentEntityId, Vec<HistoryEntry>>,
}

impl StoreState {
    pub(crate) fn row(&self, id: PersistentEntityId) -> Option<&Row> {
        self.rows.get(&id)
    }

    pub(crate) fn rows_of_type(&self, type_id: u32) -> impl Iterator<Item = (&PersistentEntityId, &Row)> {
        self.rows
            .range(PersistentEntityId::new(type_id, 0)..=PersistentEntityId::new(type_id, u64::MAX))
    }

    pub(crate) fn allocate(&mut self, type_id: u32) -> PersistentEntityId {
        let next = self.next_local_ids.entry(type_id).or_insert(0);
        let id = PersistentEntityId::new(type_id, *next);
        *next += 1;
        self.rows.insert(id, Row::default());
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_never_reuses_ids() {
        let mut state = StoreState::default();
        let a = state.allocate(1);
        state.rows.remove(&a);
        let b = state.allocate(1);
        assert_ne!(a, b);
        assert_eq!(b.local_id, 1);
    }

    #[test]
    fn rows_of_type_only_returns_that_type() {
        let mut state = StoreState::default();
        state.allocate(1);
        state.allocate(2);
        state.allocate(1);
        let ids: Vec<_> = state.rows_of_type(1).map(|(id, _)| *id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.iter().all(|id| id.type_id == 1));
    }
}
