//! Queries over the session's view.
//!
//! Query results come from the session's store snapshot. Entities removed
//! in the session are skipped and `find` re-checks each candidate against
//! the session's pending values. Entities created since the last flush
//! are not returned.

use super::TransientSession;
use crate::entity::TransientEntity;
use crate::error::TransientResult;
use std::fmt;
use std::vec;
use transidb_store::{HistoryEntry, PersistentEntityId, PropertyValue};

/// Lazily wraps store query results into session handles.
pub struct EntityIter<'s> {
    session: &'s TransientSession,
    ids: vec::IntoIter<PersistentEntityId>,
    filter: Option<(String, PropertyValue)>,
}

impl<'s> EntityIter<'s> {
    fn new(session: &'s TransientSession, ids: Vec<PersistentEntityId>) -> Self {
        Self {
            session,
            ids: ids.into_iter(),
            filter: None,
        }
    }
}

fn matches(
    session: &TransientSession,
    filter: Option<&(String, PropertyValue)>,
    entity: TransientEntity,
) -> TransientResult<bool> {
    match filter {
        Some((name, value)) => Ok(session.raw_property(entity, name)?.as_ref() == Some(value)),
        None => Ok(true),
    }
}

impl Iterator for EntityIter<'_> {
    type Item = TransientResult<TransientEntity>;

    fn next(&mut self) -> Option<Self::Item> {
        let session = self.session;
        for id in self.ids.by_ref() {
            let entity = match session.wrap(id) {
                Ok(entity) => entity,
                Err(err) => return Some(Err(err)),
            };
            if session.is_removed_raw(entity) {
                continue;
            }
            match matches(session, self.filter.as_ref(), entity) {
                Ok(true) => return Some(Ok(entity)),
                Ok(false) => {}
                Err(err) => return Some(Err(err)),
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.ids.len()))
    }
}

impl fmt::Debug for EntityIter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityIter")
            .field("remaining", &self.ids.len())
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}

impl TransientSession {
    /// All saved entities of a type, in id order.
    pub fn get_all(&self, entity_type: &str) -> TransientResult<EntityIter<'_>> {
        self.ensure_open()?;
        let ids = self.view()?.get_all(entity_type)?;
        Ok(EntityIter::new(self, ids))
    }

    /// Saved entities of a type whose property equals `value`.
    pub fn find(
        &self,
        entity_type: &str,
        property: &str,
        value: impl Into<PropertyValue>,
    ) -> TransientResult<EntityIter<'_>> {
        self.ensure_open()?;
        let value = value.into();
        let ids = self.view()?.find(entity_type, property, &value)?;
        let mut iter = EntityIter::new(self, ids);
        iter.filter = Some((property.to_string(), value));
        Ok(iter)
    }

    /// Saved entities of a type sorted by a stored property value.
    pub fn sort(
        &self,
        entity_type: &str,
        property: &str,
        ascending: bool,
    ) -> TransientResult<EntityIter<'_>> {
        self.ensure_open()?;
        let ids = self.view()?.sort(entity_type, property, ascending)?;
        Ok(EntityIter::new(self, ids))
    }

    /// Entities of `entity_type` linking to `target` through `link`,
    /// including links pending in this session.
    pub fn find_links(
        &self,
        entity_type: &str,
        target: TransientEntity,
        link: &str,
    ) -> TransientResult<Vec<TransientEntity>> {
        self.check_session(target)?;
        let mut sources = self.incoming_links(target, entity_type, link)?;
        sources.retain(|source| !self.is_removed_raw(*source));
        let mut linked = Vec::with_capacity(sources.len());
        for source in sources {
            if self.raw_links(source, link)?.contains(&target) {
                linked.push(source);
            }
        }
        Ok(linked)
    }

    /// Returns the next value of a named store sequence.
    pub fn next_sequence_value(&self, name: &str) -> TransientResult<u64> {
        self.ensure_open()?;
        Ok(self.store().persistent().next_sequence_value(name))
    }

    /// Saved history snapshots of an entity, oldest first.
    pub fn history(&self, entity: TransientEntity) -> TransientResult<Vec<HistoryEntry>> {
        self.check_session(entity)?;
        match self.persistent_id_of(entity) {
            Some(id) => super::tolerate_missing(self.view()?.history(id)),
            None => Ok(Vec::new()),
        }
    }
}
