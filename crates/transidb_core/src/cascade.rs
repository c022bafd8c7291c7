//! Removal cascades.
//!
//! Removing an entity runs in two phases. The destructor phase visits
//! the entity and everything its removal cascades to, running the
//! registered pre-delete hook of each before anything is changed. The
//! structural phase then computes the links to sever and the entities to
//! remove, children before parents.

use crate::entity::TransientEntity;
use crate::error::TransientResult;
use crate::session::TransientSession;
use std::collections::HashSet;

/// One structural step of a removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CascadeAction {
    /// Remove the entity.
    Remove(TransientEntity),
    /// Sever `source.link -> target` because `target` is being removed.
    Unlink {
        source: TransientEntity,
        link: String,
        target: TransientEntity,
    },
}

/// Entities whose removal follows from removing `entity`.
pub(crate) fn cascade_targets(
    session: &TransientSession,
    entity: TransientEntity,
) -> TransientResult<Vec<TransientEntity>> {
    let entity_type = session.type_of(entity);
    let metadata = session.metadata();
    let mut targets = Vec::new();
    if let Some(meta) = metadata.entity(&entity_type) {
        for end in meta.association_ends.iter().filter(|end| end.cascade_delete) {
            targets.extend(session.live_links(entity, &end.name)?);
        }
    }
    for incoming in metadata.incoming(&entity_type) {
        if incoming.end.target_cascade_delete {
            for source in live_referrers(session, entity, &incoming.source_type, &incoming.end.name)? {
                targets.push(source);
            }
        }
    }
    targets.retain(|target| !session.is_removed_raw(*target));
    Ok(targets)
}

fn live_referrers(
    session: &TransientSession,
    entity: TransientEntity,
    source_type: &str,
    link: &str,
) -> TransientResult<Vec<TransientEntity>> {
    let mut sources = session.incoming_links(entity, source_type, link)?;
    sources.retain(|source| !session.is_removed_raw(*source));
    Ok(sources)
}

/// Computes the structural removal of `root`.
///
/// Entities in `processed` are skipped, so one set can be shared by
/// several plans of the same flush. Entities already removed are skipped
/// silently.
pub(crate) fn structural_plan(
    session: &TransientSession,
    root: TransientEntity,
    processed: &mut HashSet<TransientEntity>,
) -> TransientResult<Vec<CascadeAction>> {
    let mut plan = Vec::new();
    visit(session, root, processed, &mut plan)?;
    Ok(plan)
}

fn visit(
    session: &TransientSession,
    entity: TransientEntity,
    processed: &mut HashSet<TransientEntity>,
    plan: &mut Vec<CascadeAction>,
) -> TransientResult<()> {
    if session.is_removed_raw(entity) || !processed.insert(entity) {
        return Ok(());
    }
    let entity_type = session.type_of(entity);
    let metadata = session.metadata();

    if let Some(meta) = metadata.entity(&entity_type) {
        for end in &meta.association_ends {
            if !end.cascade_delete && !end.clear_on_delete {
                continue;
            }
            for target in session.live_links(entity, &end.name)? {
                if end.cascade_delete {
                    visit(session, target, processed, plan)?;
                } else if let Some(opposite) = &end.opposite_end {
                    if !processed.contains(&target) {
                        plan.push(CascadeAction::Unlink {
                            source: target,
                            link: opposite.clone(),
                            target: entity,
                        });
                    }
                }
            }
        }
    }

    for incoming in metadata.incoming(&entity_type) {
        let end = &incoming.end;
        if !end.target_cascade_delete && !end.target_clear_on_delete {
            continue;
        }
        for source in live_referrers(session, entity, &incoming.source_type, &end.name)? {
            if end.target_cascade_delete {
                visit(session, source, processed, plan)?;
            } else if !processed.contains(&source) {
                plan.push(CascadeAction::Unlink {
                    source,
                    link: end.name.clone(),
                    target: entity,
                });
            }
        }
    }

    plan.push(CascadeAction::Remove(entity));
    Ok(())
}

/// Entities removed by a plan.
pub(crate) fn removals(plan: &[CascadeAction]) -> impl Iterator<Item = TransientEntity> + '_ {
    plan.iter().filter_map(|action| match action {
        CascadeAction::Remove(entity) => Some(*entity),
        CascadeAction::Unlink { .. } => None,
    })
}
