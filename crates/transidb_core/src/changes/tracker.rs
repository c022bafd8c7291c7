//! The per-session diff.

use crate::changes::{ChangeType, EntityChange, LinkChange};
use crate::entity::TransientEntity;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use transidb_store::{PropertyValue, StoreTransaction};

/// Tracks everything mutated in a session since its last flush.
///
/// Property and link change maps are cleaned eagerly: an entry that
/// becomes empty is removed, so "absent" is the only way a tracker says
/// "unchanged".
///
/// The tracker owns a store snapshot taken when it was created. The
/// snapshot is the source of pre-change values for entities touched in
/// this round and is released by [`dispose`](Self::dispose).
pub struct ChangesTracker {
    snapshot: Option<Box<dyn StoreTransaction>>,
    entity_types: HashMap<TransientEntity, String>,
    changed_entities: BTreeSet<TransientEntity>,
    added_entities: BTreeSet<TransientEntity>,
    removed_entities: BTreeSet<TransientEntity>,
    changed_properties: HashMap<TransientEntity, BTreeSet<String>>,
    original_properties: HashMap<TransientEntity, HashMap<String, Option<PropertyValue>>>,
    changed_links: HashMap<TransientEntity, BTreeMap<String, LinkChange>>,
    affected_entity_types: BTreeSet<String>,
    change_counter: u64,
}

impl ChangesTracker {
    /// Creates an empty tracker that owns the given snapshot.
    #[must_use]
    pub fn new(snapshot: Option<Box<dyn StoreTransaction>>) -> Self {
        Self {
            snapshot,
            entity_types: HashMap::new(),
            changed_entities: BTreeSet::new(),
            added_entities: BTreeSet::new(),
            removed_entities: BTreeSet::new(),
            changed_properties: HashMap::new(),
            original_properties: HashMap::new(),
            changed_links: HashMap::new(),
            affected_entity_types: BTreeSet::new(),
            change_counter: 0,
        }
    }

    fn touch(&mut self, entity: TransientEntity, entity_type: &str) {
        self.changed_entities.insert(entity);
        if !self.entity_types.contains_key(&entity) {
            self.entity_types.insert(entity, entity_type.to_string());
        }
        if !self.affected_entity_types.contains(entity_type) {
            self.affected_entity_types.insert(entity_type.to_string());
        }
        self.change_counter += 1;
    }

    /// Registers a created entity.
    pub fn entity_added(&mut self, entity: TransientEntity, entity_type: &str) {
        self.touch(entity, entity_type);
        self.added_entities.insert(entity);
    }

    /// Registers a removed entity.
    pub fn entity_removed(&mut self, entity: TransientEntity, entity_type: &str) {
        self.touch(entity, entity_type);
        self.removed_entities.insert(entity);
    }

    /// Records that a property or blob differs from its pre-change value.
    pub fn property_changed(&mut self, entity: TransientEntity, entity_type: &str, name: &str) {
        self.touch(entity, entity_type);
        self.changed_properties
            .entry(entity)
            .or_default()
            .insert(name.to_string());
    }

    /// Records that a property is back at its pre-change value.
    pub fn property_unchanged(&mut self, entity: TransientEntity, name: &str) {
        if let Some(names) = self.changed_properties.get_mut(&entity) {
            if names.remove(name) {
                self.change_counter += 1;
            }
            if names.is_empty() {
                self.changed_properties.remove(&entity);
            }
        }
    }

    /// Remembers the pre-change value of a property, unless one is known.
    pub fn record_original(
        &mut self,
        entity: TransientEntity,
        name: &str,
        value: Option<PropertyValue>,
    ) {
        self.original_properties
            .entry(entity)
            .or_default()
            .entry(name.to_string())
            .or_insert(value);
    }

    /// Returns the remembered pre-change value of a property.
    ///
    /// `None` means no value was remembered; `Some(None)` means the
    /// property was unset before.
    #[must_use]
    pub fn original_property(
        &self,
        entity: TransientEntity,
        name: &str,
    ) -> Option<&Option<PropertyValue>> {
        self.original_properties
            .get(&entity)
            .and_then(|values| values.get(name))
    }

    /// Records a link mutation.
    ///
    /// An add with an `old_target` is a single-valued overwrite and is
    /// recorded as removal of the old target plus addition of the new one.
    pub fn link_changed(
        &mut self,
        source: TransientEntity,
        entity_type: &str,
        link_name: &str,
        target: TransientEntity,
        old_target: Option<TransientEntity>,
        is_add: bool,
    ) {
        self.touch(source, entity_type);
        let change = self
            .changed_links
            .entry(source)
            .or_default()
            .entry(link_name.to_string())
            .or_default();
        if is_add {
            if let Some(old) = old_target {
                change.remove(old);
            }
            change.add(target);
        } else {
            change.remove(target);
        }
        self.cleanup_link(source, link_name);
    }

    /// Records that a link target was deleted as an entity.
    pub fn link_deleted(
        &mut self,
        source: TransientEntity,
        entity_type: &str,
        link_name: &str,
        target: TransientEntity,
    ) {
        self.touch(source, entity_type);
        self.changed_links
            .entry(source)
            .or_default()
            .entry(link_name.to_string())
            .or_default()
            .delete(target);
        self.cleanup_link(source, link_name);
    }

    fn cleanup_link(&mut self, source: TransientEntity, link_name: &str) {
        if let Some(links) = self.changed_links.get_mut(&source) {
            if links.get(link_name).is_some_and(LinkChange::is_empty) {
                links.remove(link_name);
            }
            if links.is_empty() {
                self.changed_links.remove(&source);
            }
        }
    }

    /// Returns the changed property and blob names of an entity.
    #[must_use]
    pub fn get_changed_properties(&self, entity: TransientEntity) -> Option<&BTreeSet<String>> {
        self.changed_properties.get(&entity)
    }

    /// Returns the changed links of an entity.
    ///
    /// Links whose only record is a deleted target are included; filter
    /// with [`LinkChange::has_net_change`].
    #[must_use]
    pub fn get_changed_links_detailed(
        &self,
        entity: TransientEntity,
    ) -> Option<&BTreeMap<String, LinkChange>> {
        self.changed_links.get(&entity)
    }

    /// Returns the change of one link of an entity.
    #[must_use]
    pub fn get_link_change(&self, entity: TransientEntity, link_name: &str) -> Option<&LinkChange> {
        self.changed_links
            .get(&entity)
            .and_then(|links| links.get(link_name))
    }

    /// Returns true if the entity was created since the last flush.
    #[must_use]
    pub fn is_new(&self, entity: TransientEntity) -> bool {
        self.added_entities.contains(&entity)
    }

    /// Returns true if the entity was removed since the last flush.
    #[must_use]
    pub fn is_removed(&self, entity: TransientEntity) -> bool {
        self.removed_entities.contains(&entity)
    }

    /// Returns true if the entity was both created and removed.
    #[must_use]
    pub fn is_created_and_removed(&self, entity: TransientEntity) -> bool {
        self.is_new(entity) && self.is_removed(entity)
    }

    /// Returns true if the named property or blob has a net change.
    #[must_use]
    pub fn has_property_changes(&self, entity: TransientEntity, name: &str) -> bool {
        self.changed_properties
            .get(&entity)
            .is_some_and(|names| names.contains(name))
    }

    /// Returns true if the named link has a net change.
    #[must_use]
    pub fn has_link_changes(&self, entity: TransientEntity, link_name: &str) -> bool {
        self.get_link_change(entity, link_name)
            .is_some_and(LinkChange::has_net_change)
    }

    /// Returns true if the entity has a durable net change.
    #[must_use]
    pub fn has_entity_changes(&self, entity: TransientEntity) -> bool {
        match (self.is_new(entity), self.is_removed(entity)) {
            (true, true) => false,
            (true, false) | (false, true) => true,
            (false, false) => {
                self.changed_properties.contains_key(&entity)
                    || self
                        .changed_links
                        .get(&entity)
                        .is_some_and(|links| links.values().any(LinkChange::has_net_change))
            }
        }
    }

    /// Returns true if anything would be written by a flush.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.changed_entities
            .iter()
            .any(|entity| self.has_entity_changes(*entity))
    }

    /// All entities touched since the last flush.
    pub fn changed_entities(&self) -> impl Iterator<Item = TransientEntity> + '_ {
        self.changed_entities.iter().copied()
    }

    /// Entities created since the last flush.
    pub fn added_entities(&self) -> impl Iterator<Item = TransientEntity> + '_ {
        self.added_entities.iter().copied()
    }

    /// Entities removed since the last flush.
    pub fn removed_entities(&self) -> impl Iterator<Item = TransientEntity> + '_ {
        self.removed_entities.iter().copied()
    }

    /// Types of all touched entities.
    #[must_use]
    pub fn affected_entity_types(&self) -> &BTreeSet<String> {
        &self.affected_entity_types
    }

    /// Returns the type recorded for a touched entity.
    #[must_use]
    pub fn entity_type(&self, entity: TransientEntity) -> Option<&str> {
        self.entity_types.get(&entity).map(String::as_str)
    }

    /// Monotonic counter bumped by every recorded change.
    #[must_use]
    pub const fn change_counter(&self) -> u64 {
        self.change_counter
    }

    /// Describes the net change of every entity.
    ///
    /// Entities created and removed in the same round, and entities whose
    /// changes all cancelled out, are left out.
    #[must_use]
    pub fn get_changes_description(&self) -> Vec<EntityChange> {
        self.changed_entities
            .iter()
            .filter(|entity| self.has_entity_changes(**entity))
            .map(|entity| {
                let change_type = if self.is_new(*entity) {
                    ChangeType::Add
                } else if self.is_removed(*entity) {
                    ChangeType::Remove
                } else {
                    ChangeType::Update
                };
                EntityChange {
                    entity: *entity,
                    entity_type: self.entity_types.get(entity).cloned().unwrap_or_default(),
                    change_type,
                    changed_properties: self.changed_properties.get(entity).cloned(),
                    changed_links: self.net_link_changes(*entity),
                }
            })
            .collect()
    }

    fn net_link_changes(&self, entity: TransientEntity) -> Option<BTreeMap<String, LinkChange>> {
        let links: BTreeMap<_, _> = self
            .changed_links
            .get(&entity)?
            .iter()
            .filter(|(_, change)| change.has_net_change())
            .map(|(name, change)| (name.clone(), change.clone()))
            .collect();
        (!links.is_empty()).then_some(links)
    }

    /// Returns the snapshot the tracker was created with.
    #[must_use]
    pub fn snapshot(&self) -> Option<&dyn StoreTransaction> {
        self.snapshot.as_deref()
    }

    /// Releases the snapshot. Calling it again does nothing.
    pub fn dispose(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            snapshot.abort();
        }
    }
}

impl Drop for ChangesTracker {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for ChangesTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangesTracker")
            .field("changed_entities", &self.changed_entities.len())
            .field("added", &self.added_entities.len())
            .field("removed", &self.removed_entities.len())
            .field("change_counter", &self.change_counter)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::SessionId;
    use transidb_store::{InMemoryStore, PersistentStore};

    fn entities(n: u32) -> Vec<TransientEntity> {
        let session = SessionId::new();
        (0..n).map(|slot| TransientEntity::new(session, slot)).collect()
    }

    #[test]
    fn empty_tracker_has_no_changes() {
        let tracker = ChangesTracker::new(None);
        assert!(!tracker.has_changes());
        assert!(tracker.get_changes_description().is_empty());
    }

    #[test]
    fn property_toggle_cleans_up() {
        let e = entities(1);
        let mut tracker = ChangesTracker::new(None);
        tracker.property_changed(e[0], "User", "name");
        assert!(tracker.has_property_changes(e[0], "name"));

        tracker.property_unchanged(e[0], "name");
        assert!(tracker.get_changed_properties(e[0]).is_none());
        assert!(!tracker.has_entity_changes(e[0]));
        assert!(!tracker.has_changes());
    }

    #[test]
    fn created_and_removed_is_not_described() {
        let e = entities(2);
        let mut tracker = ChangesTracker::new(None);
        tracker.entity_added(e[0], "User");
        tracker.property_changed(e[0], "User", "name");
        tracker.entity_removed(e[0], "User");
        tracker.entity_added(e[1], "Post");

        let description = tracker.get_changes_description();
        assert_eq!(description.len(), 1);
        assert_eq!(description[0].entity, e[1]);
        assert_eq!(description[0].change_type, ChangeType::Add);
        assert!(tracker.is_created_and_removed(e[0]));
    }

    #[test]
    fn classification() {
        let e = entities(3);
        let mut tracker = ChangesTracker::new(None);
        tracker.entity_added(e[0], "User");
        tracker.entity_removed(e[1], "User");
        tracker.property_changed(e[2], "Post", "title");

        let types: Vec<_> = tracker
            .get_changes_description()
            .into_iter()
            .map(|change| change.change_type)
            .collect();
        assert_eq!(types, vec![ChangeType::Add, ChangeType::Remove, ChangeType::Update]);
        assert_eq!(tracker.affected_entity_types().len(), 2);
    }

    #[test]
    fn link_add_remove_annihilates() {
        let e = entities(2);
        let mut tracker = ChangesTracker::new(None);
        tracker.link_changed(e[0], "User", "tags", e[1], None, true);
        assert!(tracker.has_link_changes(e[0], "tags"));

        tracker.link_changed(e[0], "User", "tags", e[1], None, false);
        assert!(tracker.get_changed_links_detailed(e[0]).is_none());
        assert!(!tracker.has_changes());
    }

    #[test]
    fn single_valued_overwrite_records_both_sides() {
        let e = entities(3);
        let mut tracker = ChangesTracker::new(None);
        tracker.link_changed(e[0], "Post", "author", e[2], Some(e[1]), true);

        let change = tracker.get_link_change(e[0], "author").unwrap();
        assert!(change.added().contains(&e[2]));
        assert!(change.removed().contains(&e[1]));
    }

    #[test]
    fn deleted_target_is_tracked() {
        let e = entities(2);
        let mut tracker = ChangesTracker::new(None);
        tracker.link_deleted(e[0], "User", "tags", e[1]);
        tracker.link_changed(e[0], "User", "tags", e[1], None, true);

        let change = tracker.get_link_change(e[0], "tags").unwrap();
        assert!(change.added().is_empty());
        assert!(change.deleted().contains(&e[1]));
    }

    #[test]
    fn deleting_a_freshly_linked_target_is_not_a_change() {
        let e = entities(2);
        let mut tracker = ChangesTracker::new(None);
        tracker.link_changed(e[0], "Post", "tags", e[1], None, true);
        tracker.link_deleted(e[0], "Post", "tags", e[1]);

        assert!(!tracker.has_link_changes(e[0], "tags"));
        assert!(!tracker.has_changes());
        assert!(tracker.get_changes_description().is_empty());
        tracker.link_changed(e[0], "Post", "tags", e[1], None, true);
        let change = tracker.get_link_change(e[0], "tags").unwrap();
        assert!(change.added().is_empty());
        assert!(change.deleted().contains(&e[1]));
    }

    #[test]
    fn original_value_is_kept_from_first_change() {
        let e = entities(1);
        let mut tracker = ChangesTracker::new(None);
        tracker.record_original(e[0], "name", Some(PropertyValue::from("a")));
        tracker.record_original(e[0], "name", Some(PropertyValue::from("b")));
        assert_eq!(
            tracker.original_property(e[0], "name"),
            Some(&Some(PropertyValue::from("a")))
        );
        assert!(tracker.original_property(e[0], "other").is_none());
    }

    #[test]
    fn change_counter_advances() {
        let e = entities(1);
        let mut tracker = ChangesTracker::new(None);
        let before = tracker.change_counter();
        tracker.property_changed(e[0], "User", "name");
        assert!(tracker.change_counter() > before);
    }

    #[test]
    fn dispose_is_idempotent() {
        let store = InMemoryStore::new();
        let mut tracker = ChangesTracker::new(Some(store.begin_read().unwrap()));
        assert!(tracker.snapshot().is_some());
        tracker.dispose();
        tracker.dispose();
        assert!(tracker.snapshot().is_none());
    }
}
