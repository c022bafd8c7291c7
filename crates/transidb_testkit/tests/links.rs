//! Link edits, cardinality checks and bidirectional helpers.

use transidb_core::association;
use transidb_core::metadata::Cardinality;
use transidb_core::{TransientError, ViolationKind};
use transidb_testkit::prelude::*;

#[test]
fn add_then_remove_annihilates() {
    let store = TestStore::new(blog_model());
    let mut session = store.session();
    let author = create_user(&mut session, "alice");
    let post = create_post(&mut session, author, "hello");
    let kept = session.new_entity("Tag").unwrap();
    let extra = session.new_entity("Tag").unwrap();
    session.add_link(post, "tags", kept).unwrap();
    session.intermediate_commit().unwrap();

    assert!(session.add_link(post, "tags", extra).unwrap());
    assert_eq!(session.get_added_links(post, "tags").unwrap(), vec![extra]);
    assert!(session.delete_link(post, "tags", extra).unwrap());
    assert!(!session.has_link_changes(post, "tags").unwrap());
    assert!(session.get_added_links(post, "tags").unwrap().is_empty());

    assert!(session.delete_link(post, "tags", kept).unwrap());
    assert_eq!(session.get_removed_links(post, "tags").unwrap(), vec![kept]);
    assert!(session.add_link(post, "tags", kept).unwrap());
    assert!(!session.has_link_changes(post, "tags").unwrap());
    assert!(!session.has_changes());
}

#[test]
fn single_valued_overwrite_records_old_and_new_target() {
    let store = TestStore::new(blog_model());
    let mut session = store.session();
    let alice = create_user(&mut session, "alice");
    let bob = create_user(&mut session, "bob");
    let post = create_post(&mut session, alice, "hello");
    session.intermediate_commit().unwrap();

    association::link(&mut session, post, "author", bob).unwrap();
    assert_eq!(session.get_link(post, "author").unwrap(), Some(bob));
    assert_eq!(session.get_old_link(post, "author").unwrap(), Some(alice));
    assert_eq!(session.get_removed_links(post, "author").unwrap(), vec![alice]);
    assert_eq!(session.get_added_links(post, "author").unwrap(), vec![bob]);
    assert!(session.get_links(alice, "posts").unwrap().is_empty());
    assert_eq!(session.get_links(bob, "posts").unwrap(), vec![post]);

    let alice_id = session.entity_id(alice).unwrap().persistent().unwrap();
    session.commit().unwrap();
    assert!(store.committed_links(alice_id, "posts").is_empty());
}

#[test]
fn cardinality_misuse_is_rejected_immediately() {
    let store = TestStore::new(blog_model());
    let mut session = store.session();
    let author = create_user(&mut session, "alice");
    let post = create_post(&mut session, author, "hello");
    let tag = session.new_entity("Tag").unwrap();

    let err = session.add_link(post, "author", author).unwrap_err();
    assert!(matches!(
        err,
        TransientError::InvalidCardinalityUsage {
            cardinality: Cardinality::One,
            expected: "set_link",
            ..
        }
    ));
    let err = session.set_link(post, "tags", Some(tag)).unwrap_err();
    assert!(matches!(
        err,
        TransientError::InvalidCardinalityUsage {
            expected: "add_link",
            ..
        }
    ));
    assert!(!session.has_link_changes(post, "tags").unwrap());
}

#[test]
fn undeclared_links_are_unrestricted() {
    let store = TestStore::new(blog_model());
    let mut session = store.session();
    let a = session.new_entity("Tag").unwrap();
    let b = session.new_entity("Tag").unwrap();
    let c = session.new_entity("Tag").unwrap();
    session.add_link(a, "related", b).unwrap();
    session.add_link(a, "related", c).unwrap();
    session.set_link(b, "parent", Some(a)).unwrap();
    session.commit().unwrap();

    let ids = store.committed_ids("Tag");
    assert_eq!(ids.len(), 3);
    assert!(ids
        .iter()
        .any(|id| store.committed_links(*id, "related").len() == 2));
}

#[test]
fn missing_required_link_fails_flush() {
    let store = TestStore::new(blog_model());
    let mut session = store.session();
    let post = session.new_entity("Post").unwrap();
    session.set_property(post, "title", "orphaned").unwrap();

    let err = session.commit().unwrap_err();
    let violations = err.violations().unwrap();
    assert!(violations.iter().any(|v| matches!(
        &v.kind,
        ViolationKind::Cardinality { link, count: 0, .. } if link == "author"
    )));
    assert!(session.is_open());

    let author = create_user(&mut session, "alice");
    association::link(&mut session, post, "author", author).unwrap();
    session.commit().unwrap();
    assert_eq!(store.committed_ids("Post").len(), 1);
}

#[test]
fn clearing_a_required_link_fails_flush() {
    let store = TestStore::new(blog_model());
    let mut session = store.session();
    let author = create_user(&mut session, "alice");
    let post = create_post(&mut session, author, "hello");
    session.intermediate_commit().unwrap();

    association::unlink(&mut session, post, "author", author).unwrap();
    assert!(session.get_links(author, "posts").unwrap().is_empty());
    let err = session.intermediate_commit().unwrap_err();
    let violation = err.violations().unwrap().iter().next().unwrap().clone();
    assert_eq!(violation.entity, post);
    assert_eq!(violation.field(), Some("author"));
}

#[test]
fn removing_a_referenced_entity_fails_with_referrers() {
    let store = TestStore::with_config(
        blog_model(),
        transidb_core::TransientStoreConfig::default().max_referrers_in_error(2),
    );
    let mut session = store.session();
    let author = create_user(&mut session, "alice");
    for i in 0..3 {
        create_post(&mut session, author, &format!("post {i}"));
    }
    session.intermediate_commit().unwrap();

    session.delete_entity(author).unwrap();
    let err = session.intermediate_commit().unwrap_err();
    let violation = err
        .violations()
        .unwrap()
        .iter()
        .find(|v| matches!(v.kind, ViolationKind::IncomingLinks { .. }))
        .cloned()
        .unwrap();
    let ViolationKind::IncomingLinks { referrers } = &violation.kind else {
        unreachable!()
    };
    assert_eq!(referrers.len(), 1);
    assert_eq!(referrers[0].source_type, "Post");
    assert_eq!(referrers[0].link, "author");
    assert_eq!(referrers[0].referrers.len(), 2);
    assert!(referrers[0].has_more);
    assert!(violation.display_message().contains("author"));
}

#[test]
fn removing_a_tag_clears_it_from_posts() {
    let store = TestStore::new(blog_model());
    let mut session = store.session();
    let author = create_user(&mut session, "alice");
    let post = create_post(&mut session, author, "hello");
    let tag = session.new_entity("Tag").unwrap();
    session.add_link(post, "tags", tag).unwrap();
    session.intermediate_commit().unwrap();

    session.delete_entity(tag).unwrap();
    assert!(session.get_links(post, "tags").unwrap().is_empty());
    assert_eq!(session.get_removed_links(post, "tags").unwrap(), vec![tag]);
    session.commit().unwrap();

    assert!(store.committed_ids("Tag").is_empty());
    let post_id = store.committed_ids("Post")[0];
    assert!(store.committed_links(post_id, "tags").is_empty());
}

#[test]
fn find_links_sees_pending_links() {
    let store = TestStore::new(blog_model());
    let mut session = store.session();
    let author = create_user(&mut session, "alice");
    let saved = create_post(&mut session, author, "saved");
    session.intermediate_commit().unwrap();

    let pending = create_post(&mut session, author, "pending");
    let mut found = session.find_links("Post", author, "author").unwrap();
    found.sort();
    let mut expected = vec![saved, pending];
    expected.sort();
    assert_eq!(found, expected);

    session.delete_entity(pending).unwrap();
    assert_eq!(session.find_links("Post", author, "author").unwrap(), vec![saved]);
    assert_eq!(session.get_links(author, "posts").unwrap(), vec![saved]);
}
