//! Moving entity references between sessions.

use transidb_core::{EntityState, PropertyValue, TransientError};
use transidb_testkit::prelude::*;

#[test]
fn saved_entity_reattaches_in_another_session() {
    let store = TestStore::new(blog_model());
    let mut first = store.session();
    let user = create_user(&mut first, "alice");
    first.intermediate_commit().unwrap();
    let detached = first.detach(user).unwrap();
    assert_eq!(detached.state, EntityState::SavedNew);
    assert!(detached.id.is_persisted());

    let mut second = store.session();
    let local = second.new_local_copy(&detached).unwrap();
    assert_eq!(local.session_id(), second.id());
    assert_eq!(
        second.get_property(local, "login").unwrap(),
        Some(PropertyValue::from("alice"))
    );
    second.set_property(local, "email", "a@example.com").unwrap();
    second.commit().unwrap();

    let id = detached.id.persistent().unwrap();
    assert_eq!(
        store.committed_property(id, "email"),
        Some(PropertyValue::from("a@example.com"))
    );
}

#[test]
fn reattaching_in_the_origin_session_returns_the_same_handle() {
    let store = TestStore::new(blog_model());
    let mut session = store.session();
    let user = create_user(&mut session, "alice");
    let detached = session.detach(user).unwrap();
    session.intermediate_commit().unwrap();
    assert_eq!(session.new_local_copy(&detached).unwrap(), user);
}

#[test]
fn reattached_copy_sees_local_pending_changes() {
    let store = TestStore::new(blog_model());
    let mut first = store.session();
    let user = create_user(&mut first, "alice");
    first.intermediate_commit().unwrap();
    let detached = first.detach(user).unwrap();

    let mut second = store.session();
    let loaded = second
        .find("User", "login", "alice")
        .unwrap()
        .next()
        .unwrap()
        .unwrap();
    second.set_property(loaded, "email", "pending@example.com").unwrap();
    let local = second.new_local_copy(&detached).unwrap();
    assert_eq!(local, loaded);
    assert_eq!(
        second.get_property(local, "email").unwrap(),
        Some(PropertyValue::from("pending@example.com"))
    );
}

#[test]
fn unsaved_entity_cannot_leave_its_session() {
    let store = TestStore::new(blog_model());
    let mut first = store.session();
    let user = create_user(&mut first, "alice");
    let detached = first.detach(user).unwrap();
    assert_eq!(detached.state, EntityState::New);

    let second = store.session();
    assert!(matches!(
        second.new_local_copy(&detached),
        Err(TransientError::ForeignEntity { .. })
    ));
}

#[test]
fn removed_entity_cannot_be_reattached() {
    let store = TestStore::new(blog_model());
    let mut first = store.session();
    let tag = first.new_entity("Tag").unwrap();
    first.intermediate_commit().unwrap();
    first.delete_entity(tag).unwrap();
    let detached = first.detach(tag).unwrap();
    assert_eq!(detached.state, EntityState::Removed);

    let second = store.session();
    assert!(matches!(
        second.new_local_copy(&detached),
        Err(TransientError::EntityRemoved { .. })
    ));
    assert!(matches!(
        first.new_local_copy(&detached),
        Err(TransientError::EntityRemoved { .. })
    ));
}

#[test]
fn entity_deleted_in_the_store_cannot_be_reattached() {
    let store = TestStore::new(blog_model());
    let mut first = store.session();
    let tag = first.new_entity("Tag").unwrap();
    first.intermediate_commit().unwrap();
    let detached = first.detach(tag).unwrap();
    first.delete_entity(tag).unwrap();
    first.commit().unwrap();

    let second = store.session();
    let err = second.new_local_copy(&detached).unwrap_err();
    assert!(matches!(
        &err,
        TransientError::EntityRemovedInDatabase { entity_type, .. } if entity_type == "Tag"
    ));
}

#[test]
fn detached_references_serialize() {
    let store = TestStore::new(blog_model());
    let mut session = store.session();
    let user = create_user(&mut session, "alice");
    session.intermediate_commit().unwrap();
    let detached = session.detach(user).unwrap();

    let json = serde_json::to_string(&detached).unwrap();
    let back: transidb_core::DetachedEntity = serde_json::from_str(&json).unwrap();
    assert_eq!(back, detached);
    assert_eq!(session.new_local_copy(&back).unwrap(), user);
}
