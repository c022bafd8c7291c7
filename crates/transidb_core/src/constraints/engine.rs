//! Flush-time constraint checks.
//!
//! Every check reads the session's current view and its tracker; none
//! of them mutates anything. All violations of one flush attempt are
//! collected and reported together.

use crate::constraints::{
    ConstraintViolation, ConstraintViolations, IncomingReferrers, KeyFieldValue, ViolationKind,
};
use crate::entity::{EntityId, TransientEntity};
use crate::error::TransientResult;
use crate::metadata::{EntityMetadata, IndexField, PropertyKind, PropertyMetadata, UniqueIndex};
use crate::session::{ApplyOp, KeyPart, TransientSession};
use std::collections::{HashMap, HashSet};
use transidb_store::IndexValue;

/// Result of validating a session's pending changes.
#[derive(Debug, Default)]
pub(crate) struct Validation {
    pub(crate) violations: ConstraintViolations,
    /// Unique key maintenance to run after all other operations.
    pub(crate) unique_ops: Vec<ApplyOp>,
}

/// Runs every check over the session's pending changes.
pub(crate) fn validate(session: &TransientSession) -> TransientResult<Validation> {
    let mut validation = Validation::default();
    let changed: Vec<TransientEntity> = session.tracker().changed_entities().collect();
    for entity in &changed {
        let entity = *entity;
        if session.is_removed_raw(entity) {
            continue;
        }
        let Some(meta) = session.metadata().entity(&session.type_of(entity)) else {
            continue;
        };
        check_cardinality(session, entity, meta, &mut validation.violations)?;
        check_required(session, entity, meta, &mut validation.violations)?;
        if let Some(orphan) = orphan_violation(session, entity, meta)? {
            validation.violations.push(orphan);
        }
    }
    check_unique(session, &changed, &mut validation)?;
    check_incoming_links(session, &mut validation.violations)?;
    Ok(validation)
}

fn violation(session: &TransientSession, entity: TransientEntity, kind: ViolationKind) -> ConstraintViolation {
    ConstraintViolation {
        entity,
        entity_id: session.id_of(entity),
        entity_type: session.type_of(entity),
        kind,
    }
}

/// New entities are checked on all ends, updated ones on changed ends.
fn check_cardinality(
    session: &TransientSession,
    entity: TransientEntity,
    meta: &EntityMetadata,
    violations: &mut ConstraintViolations,
) -> TransientResult<()> {
    let tracker = session.tracker();
    let is_new = tracker.is_new(entity);
    for end in &meta.association_ends {
        if !is_new && !tracker.has_link_changes(entity, &end.name) {
            continue;
        }
        let count = session.count_live_links(entity, &end.name, 2)?;
        if !end.cardinality.satisfied_by(count) {
            violations.push(violation(
                session,
                entity,
                ViolationKind::Cardinality {
                    link: end.name.clone(),
                    cardinality: end.cardinality,
                    count,
                },
            ));
        }
    }
    Ok(())
}

fn is_property_empty(
    session: &TransientSession,
    entity: TransientEntity,
    property: &PropertyMetadata,
) -> TransientResult<bool> {
    Ok(match property.kind {
        PropertyKind::Primitive => session
            .raw_property(entity, &property.name)?
            .map_or(true, |value| value.is_empty()),
        PropertyKind::Blob => !session.raw_has_blob(entity, &property.name)?,
        PropertyKind::TextBlob => session
            .raw_blob(entity, &property.name)?
            .map_or(true, |data| data.is_empty()),
    })
}

fn check_required(
    session: &TransientSession,
    entity: TransientEntity,
    meta: &EntityMetadata,
    violations: &mut ConstraintViolations,
) -> TransientResult<()> {
    let tracker = session.tracker();
    let is_new = tracker.is_new(entity);
    let relevant = |name: &str| is_new || tracker.has_property_changes(entity, name);

    let mut conditional_props = Vec::new();
    for (name, predicate) in session.store().required_if(&meta.entity_type) {
        let declared_required = meta.get_property(&name).is_some_and(|p| p.required);
        if !relevant(&name) || declared_required {
            continue;
        }
        if predicate(session, entity)? {
            conditional_props.push(
                meta.get_property(&name)
                    .cloned()
                    .unwrap_or_else(|| PropertyMetadata::primitive(name.as_str())),
            );
        }
    }
    let required = meta
        .required_properties()
        .filter(|property| relevant(&property.name))
        .chain(conditional_props.iter());

    for property in required {
        if is_property_empty(session, entity, property)? {
            violations.push(violation(
                session,
                entity,
                ViolationKind::RequiredProperty {
                    property: property.name.clone(),
                    kind: property.kind,
                },
            ));
        }
    }
    Ok(())
}

/// Returns the violation for an aggregation child without a parent.
///
/// New children are always checked; saved children only when one of
/// their parent ends changed.
fn orphan_violation(
    session: &TransientSession,
    entity: TransientEntity,
    meta: &EntityMetadata,
) -> TransientResult<Option<ConstraintViolation>> {
    if !is_orphan(session, entity, meta)? {
        return Ok(None);
    }
    if meta.remove_orphan {
        return Ok(None);
    }
    let parent_ends = meta.parent_ends().map(|end| end.name.clone()).collect();
    Ok(Some(violation(
        session,
        entity,
        ViolationKind::OrphanChild { parent_ends },
    )))
}

fn is_orphan(
    session: &TransientSession,
    entity: TransientEntity,
    meta: &EntityMetadata,
) -> TransientResult<bool> {
    if !meta.is_aggregation_child() {
        return Ok(false);
    }
    let tracker = session.tracker();
    if !tracker.is_new(entity)
        && !meta
            .parent_ends()
            .any(|end| tracker.has_link_changes(entity, &end.name))
    {
        return Ok(false);
    }
    for end in meta.parent_ends() {
        if session.count_live_links(entity, &end.name, 1)? > 0 {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Changed orphans whose type allows removing them automatically.
pub(crate) fn removable_orphans(session: &TransientSession) -> TransientResult<Vec<TransientEntity>> {
    let mut orphans = Vec::new();
    for entity in session.tracker().changed_entities() {
        if session.is_removed_raw(entity) {
            continue;
        }
        let Some(meta) = session.metadata().entity(&session.type_of(entity)) else {
            continue;
        };
        if meta.remove_orphan && is_orphan(session, entity, meta)? {
            orphans.push(entity);
        }
    }
    Ok(orphans)
}

/// Key of one entity in one index, before and after this round.
struct KeyChange<'m> {
    entity: TransientEntity,
    index: &'m UniqueIndex,
    old: Option<Vec<KeyPart>>,
    new: Option<Vec<KeyPart>>,
}

fn index_touched(session: &TransientSession, entity: TransientEntity, index: &UniqueIndex) -> bool {
    let tracker = session.tracker();
    tracker.is_new(entity)
        || tracker.is_removed(entity)
        || index.fields.iter().any(|field| match field {
            IndexField::Property(name) => tracker.has_property_changes(entity, name),
            IndexField::Link(name) => tracker.has_link_changes(entity, name),
        })
}

fn stored_key(
    session: &TransientSession,
    entity: TransientEntity,
    index: &UniqueIndex,
) -> TransientResult<Option<Vec<KeyPart>>> {
    if session.tracker().is_new(entity) || session.persistent_id_of(entity).is_none() {
        return Ok(None);
    }
    let mut key = Vec::with_capacity(index.fields.len());
    for field in &index.fields {
        let part = match field {
            IndexField::Property(name) => session
                .stored_property(entity, name)?
                .filter(|value| !value.is_empty())
                .map(KeyPart::Property),
            IndexField::Link(name) => session
                .stored_links(entity, name)?
                .into_iter()
                .next()
                .map(KeyPart::Entity),
        };
        match part {
            Some(part) => key.push(part),
            None => return Ok(None),
        }
    }
    Ok(Some(key))
}

/// Current key, or the name of the first empty field.
fn current_key(
    session: &TransientSession,
    entity: TransientEntity,
    index: &UniqueIndex,
) -> TransientResult<Result<Vec<KeyPart>, String>> {
    let mut key = Vec::with_capacity(index.fields.len());
    for field in &index.fields {
        let part = match field {
            IndexField::Property(name) => session
                .raw_property(entity, name)?
                .filter(|value| !value.is_empty())
                .map(KeyPart::Property),
            IndexField::Link(name) => session
                .live_links(entity, name)?
                .into_iter()
                .next()
                .map(KeyPart::Entity),
        };
        match part {
            Some(part) => key.push(part),
            None => return Ok(Err(field.name().to_string())),
        }
    }
    Ok(Ok(key))
}

/// Converts a key for a store lookup, if all linked entities are persisted.
pub(crate) fn resolve_key(session: &TransientSession, key: &[KeyPart]) -> Option<Vec<IndexValue>> {
    key.iter()
        .map(|part| match part {
            KeyPart::Property(value) => Some(IndexValue::Property(value.clone())),
            KeyPart::Entity(entity) => session.persistent_id_of(*entity).map(IndexValue::Entity),
        })
        .collect()
}

fn describe_key(
    session: &TransientSession,
    index: &UniqueIndex,
    key: &[KeyPart],
) -> Vec<(String, KeyFieldValue)> {
    index
        .fields
        .iter()
        .zip(key)
        .map(|(field, part)| {
            let value = match part {
                KeyPart::Property(value) => KeyFieldValue::Property(value.clone()),
                KeyPart::Entity(entity) => KeyFieldValue::Entity(session.id_of(*entity)),
            };
            (field.name().to_string(), value)
        })
        .collect()
}

/// Describes a key the store refused because another entity committed
/// it after this session's snapshot was taken.
pub(crate) fn key_conflict(
    session: &TransientSession,
    entity: TransientEntity,
    index_name: &str,
    key: &[KeyPart],
    holder: EntityId,
) -> ConstraintViolation {
    let fields = session
        .metadata()
        .entity(&session.type_of(entity))
        .and_then(|meta| meta.unique_indexes.iter().find(|index| index.name == index_name))
        .map(|index| describe_key(session, index, key))
        .unwrap_or_default();
    violation(
        session,
        entity,
        ViolationKind::UniqueIndex {
            index: index_name.to_string(),
            fields,
            holder,
        },
    )
}

fn check_unique(
    session: &TransientSession,
    changed: &[TransientEntity],
    validation: &mut Validation,
) -> TransientResult<()> {
    let mut changes = Vec::new();
    for entity in changed {
        let entity = *entity;
        if session.is_temporary_raw(entity) || session.tracker().is_created_and_removed(entity) {
            continue;
        }
        let Some(meta) = session.metadata().entity(&session.type_of(entity)) else {
            continue;
        };
        let removed = session.is_removed_raw(entity);
        for index in &meta.unique_indexes {
            if !index_touched(session, entity, index) {
                continue;
            }
            let old = stored_key(session, entity, index)?;
            let new = if removed {
                None
            } else {
                match current_key(session, entity, index)? {
                    Ok(key) => Some(key),
                    Err(field) => {
                        validation.violations.push(violation(
                            session,
                            entity,
                            ViolationKind::NullIndexField {
                                index: index.name.clone(),
                                field,
                            },
                        ));
                        None
                    }
                }
            };
            if old.is_some() && old == new {
                continue;
            }
            changes.push(KeyChange {
                entity,
                index,
                old,
                new,
            });
        }
    }

    let released: HashSet<(&str, &[KeyPart])> = changes
        .iter()
        .filter_map(|change| {
            change
                .old
                .as_deref()
                .map(|key| (change.index.name.as_str(), key))
        })
        .collect();
    let mut claimed: HashMap<(&str, &[KeyPart]), TransientEntity> = HashMap::new();
    let view = session.view()?;

    for change in &changes {
        let Some(key) = change.new.as_deref() else {
            continue;
        };
        let index_name = change.index.name.as_str();
        let holder = match claimed.get(&(index_name, key)) {
            Some(first) => Some(session.id_of(*first)),
            None => {
                claimed.insert((index_name, key), change.entity);
                let stored_holder = match resolve_key(session, key) {
                    Some(values) => view.find_unique(index_name, &values)?,
                    None => None,
                };
                stored_holder
                    .filter(|holder| Some(*holder) != session.persistent_id_of(change.entity))
                    .filter(|_| !released.contains(&(index_name, key)))
                    .map(Into::into)
            }
        };
        if let Some(holder) = holder {
            validation.violations.push(violation(
                session,
                change.entity,
                ViolationKind::UniqueIndex {
                    index: index_name.to_string(),
                    fields: describe_key(session, change.index, key),
                    holder,
                },
            ));
        }
    }

    for change in changes {
        if let Some(old) = change.old {
            validation.unique_ops.push(ApplyOp::DeleteUniqueKey {
                index: change.index.name.clone(),
                key: old,
            });
        }
        if let Some(new) = change.new {
            validation.unique_ops.push(ApplyOp::UpsertUniqueKey {
                index: change.index.name.clone(),
                entity: change.entity,
                key: new,
            });
        }
    }
    Ok(())
}

/// Rejects removal of entities still referenced by live entities.
fn check_incoming_links(
    session: &TransientSession,
    violations: &mut ConstraintViolations,
) -> TransientResult<()> {
    let bound = session.store().config().max_referrers_in_error;
    let removed: Vec<TransientEntity> = session.tracker().removed_entities().collect();
    for entity in removed {
        let entity_type = session.type_of(entity);
        let mut groups = Vec::new();
        for incoming in session.metadata().incoming(&entity_type) {
            let mut referrers = Vec::new();
            let mut has_more = false;
            for source in session.incoming_links(entity, &incoming.source_type, &incoming.end.name)? {
                if session.is_removed_raw(source)
                    || !session.raw_links(source, &incoming.end.name)?.contains(&entity)
                {
                    continue;
                }
                if referrers.len() == bound {
                    has_more = true;
                    break;
                }
                referrers.push(session.id_of(source));
            }
            if !referrers.is_empty() {
                groups.push(IncomingReferrers {
                    source_type: incoming.source_type.clone(),
                    link: incoming.end.name.clone(),
                    referrers,
                    has_more,
                });
            }
        }
        if !groups.is_empty() {
            violations.push(violation(
                session,
                entity,
                ViolationKind::IncomingLinks { referrers: groups },
            ));
        }
    }
    Ok(())
}
