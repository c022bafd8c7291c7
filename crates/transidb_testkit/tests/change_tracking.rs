//! Net-change tracking across property, link and entity edits.

use proptest::prelude::*;
use std::sync::Arc;
use transidb_core::{ChangeType, EntityId, EntityState, PropertyValue, TransientError};
use transidb_testkit::prelude::*;

#[test]
fn writing_the_current_value_records_nothing() {
    let store = TestStore::new(blog_model());
    let mut session = store.session();
    create_user(&mut session, "alice");
    session.commit().unwrap();
    let id = store.committed_ids("User")[0];

    let mut session = store.session();
    let loaded = session.get_entity(EntityId::Persisted(id)).unwrap().unwrap();
    assert!(!session.set_property(loaded, "login", "alice").unwrap());
    assert!(!session.has_changes());
    assert!(!session.has_entity_changes(loaded).unwrap());
    assert!(session.commit().unwrap().is_empty());
}

#[test]
fn reverting_a_property_cancels_the_change() {
    let store = TestStore::new(blog_model());
    let mut session = store.session();
    create_user(&mut session, "alice");
    session.commit().unwrap();

    let mut session = store.session();
    let user = session.find("User", "login", "alice").unwrap().next().unwrap().unwrap();
    session.set_property(user, "login", "bob").unwrap();
    assert!(session.has_property_changes(user, "login").unwrap());
    assert_eq!(
        session.get_old_value(user, "login").unwrap(),
        Some(PropertyValue::from("alice"))
    );

    session.set_property(user, "login", "alice").unwrap();
    assert!(!session.has_property_changes(user, "login").unwrap());
    assert!(session.get_changed_properties(user).unwrap().is_none());
    assert!(!session.has_changes());
}

#[test]
fn deleting_and_restoring_a_property_cancels_the_change() {
    let store = TestStore::new(blog_model());
    let mut session = store.session();
    let user = create_user(&mut session, "alice");
    session.set_property(user, "email", "a@example.com").unwrap();
    session.intermediate_commit().unwrap();

    assert!(session.delete_property(user, "email").unwrap());
    assert!(!session.delete_property(user, "email").unwrap());
    assert_eq!(session.get_property(user, "email").unwrap(), None);
    assert!(session.has_property_changes(user, "email").unwrap());

    session.set_property(user, "email", "a@example.com").unwrap();
    assert!(!session.has_changes());
}

#[test]
fn created_then_removed_entity_is_not_described() {
    let store = TestStore::new(blog_model());
    let listener = Arc::new(RecordingListener::new());
    store.add_listener(listener.clone());

    let mut session = store.session();
    let user = create_user(&mut session, "alice");
    let scratch = session.new_entity("Tag").unwrap();
    session.set_property(scratch, "name", "draft").unwrap();
    session.delete_entity(scratch).unwrap();
    assert!(session.is_removed(scratch).unwrap());
    assert!(!session.has_entity_changes(scratch).unwrap());

    let changes = session.commit().unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].entity, user);
    assert_eq!(changes[0].change_type, ChangeType::Add);

    let flushed = listener.flushed_calls();
    assert_eq!(flushed.len(), 1);
    assert!(flushed[0].iter().all(|change| change.entity != scratch));
    assert!(store.committed_ids("Tag").is_empty());
}

#[test]
fn session_with_only_cancelled_work_flushes_nothing() {
    let store = TestStore::new(blog_model());
    let listener = Arc::new(RecordingListener::new());
    store.add_listener(listener.clone());

    let mut session = store.session();
    let tag = session.new_entity("Tag").unwrap();
    session.delete_entity(tag).unwrap();
    assert!(!session.has_changes());
    assert!(session.commit().unwrap().is_empty());
    assert!(listener.before_flush_calls().is_empty());
    assert!(listener.flushed_calls().is_empty());
    assert_eq!(store.memory.entity_count(), 0);
}

#[test]
fn changes_description_lists_updates_and_removals() {
    let store = TestStore::new(blog_model());
    let mut session = store.session();
    let user = create_user(&mut session, "alice");
    let tag = session.new_entity("Tag").unwrap();
    session.intermediate_commit().unwrap();
    assert!(session.was_new(user).unwrap());
    assert_eq!(session.entity_state(user).unwrap(), EntityState::SavedNew);

    session.set_property(user, "email", "a@example.com").unwrap();
    session.delete_entity(tag).unwrap();
    let mut changes = session.get_changes_description();
    changes.sort_by_key(|change| change.entity_type.clone());

    assert_eq!(changes.len(), 2);
    assert_eq!(changes[0].entity_type, "Tag");
    assert_eq!(changes[0].change_type, ChangeType::Remove);
    assert_eq!(changes[1].entity_type, "User");
    assert_eq!(changes[1].change_type, ChangeType::Update);
    assert!(changes[1].property_changed("email"));
    assert!(!changes[1].property_changed("login"));
}

#[test]
fn before_flush_changes_are_validated_and_written() {
    let store = TestStore::new(blog_model());
    store.add_listener(Arc::new(BeforeFlush::new(|session, changes| {
        for change in changes {
            if change.entity_type == "User" && change.change_type == ChangeType::Add {
                session.set_property(change.entity, "email", "default@example.com")?;
            }
        }
        Ok(())
    })));

    let mut session = store.session();
    create_user(&mut session, "alice");
    session.commit().unwrap();

    let id = store.committed_ids("User")[0];
    assert_eq!(
        store.committed_property(id, "email"),
        Some(PropertyValue::from("default@example.com"))
    );
}

#[test]
fn failing_before_flush_leaves_session_open() {
    let store = TestStore::new(blog_model());
    store.add_listener(Arc::new(BeforeFlush::new(|_, _| {
        Err(TransientError::invalid_operation("rejected by listener"))
    })));

    let mut session = store.session();
    let user = create_user(&mut session, "alice");
    let err = session.commit().unwrap_err();
    assert!(matches!(err, TransientError::InvalidOperation { .. }));
    assert!(session.is_open());
    assert!(session.is_new(user).unwrap());
    assert!(store.committed_ids("User").is_empty());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn property_change_matches_net_effect(ops in property_ops_strategy(12)) {
        let store = TestStore::new(blog_model());
        let mut session = store.session();
        let user = create_user(&mut session, "alice");
        session.set_property(user, "email", 1i64).unwrap();
        session.intermediate_commit().unwrap();

        let initial = Some(PropertyValue::Int(1));
        let mut expected = initial.clone();
        for op in ops {
            match op {
                PropertyOp::Set(value) => {
                    session.set_property(user, "email", value.clone()).unwrap();
                    expected = Some(value);
                }
                PropertyOp::Delete => {
                    session.delete_property(user, "email").unwrap();
                    expected = None;
                }
            }
        }

        prop_assert_eq!(session.get_property(user, "email").unwrap(), expected.clone());
        prop_assert_eq!(session.has_property_changes(user, "email").unwrap(), expected != initial);
        prop_assert_eq!(session.has_changes(), expected != initial);
        prop_assert_eq!(session.get_old_value(user, "email").unwrap(), initial);
    }

    #[test]
    fn link_change_matches_net_effect(ops in link_ops_strategy(3, 16)) {
        let store = TestStore::new(blog_model());
        let mut session = store.session();
        let author = create_user(&mut session, "alice");
        let post = create_post(&mut session, author, "hello");
        let tags: Vec<_> = (0..3).map(|_| session.new_entity("Tag").unwrap()).collect();
        session.add_link(post, "tags", tags[0]).unwrap();
        session.intermediate_commit().unwrap();

        let mut expected = std::collections::BTreeSet::from([0usize]);
        for op in ops {
            match op {
                LinkOp::Add(i) => {
                    session.add_link(post, "tags", tags[i]).unwrap();
                    expected.insert(i);
                }
                LinkOp::Remove(i) => {
                    session.delete_link(post, "tags", tags[i]).unwrap();
                    expected.remove(&i);
                }
            }
        }

        let mut linked = session.get_links(post, "tags").unwrap();
        linked.sort();
        let mut wanted: Vec<_> = expected.iter().map(|i| tags[*i]).collect();
        wanted.sort();
        prop_assert_eq!(linked, wanted);

        let changed = expected != std::collections::BTreeSet::from([0usize]);
        prop_assert_eq!(session.has_link_changes(post, "tags").unwrap(), changed);
        prop_assert_eq!(session.has_changes(), changed);
    }
}
