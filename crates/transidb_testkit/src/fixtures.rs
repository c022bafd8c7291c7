//! Test fixtures and store helpers.
//!
//! Provides ready-made metadata models and a [`TestStore`] wrapping an
//! in-memory persistent store.

use std::ops::Deref;
use std::sync::{Arc, Once};
use transidb_core::association;
use transidb_core::metadata::{
    AssociationEnd, Cardinality, EntityMetadata, IndexField, ModelMetadata, PropertyMetadata,
    UniqueIndex,
};
use transidb_core::{TransientEntity, TransientSession, TransientStore, TransientStoreConfig};
use transidb_store::{InMemoryStore, PersistentEntityId, PersistentStore, PropertyValue};

/// A transient store over a fresh in-memory store.
///
/// Suspended sessions are aborted when the fixture is dropped.
pub struct TestStore {
    /// The persistent store, for inspecting committed state.
    pub memory: InMemoryStore,
    /// The transient store under test.
    pub store: TransientStore,
}

impl TestStore {
    /// Creates a test store with the default configuration.
    pub fn new(model: ModelMetadata) -> Self {
        Self::with_config(model, TransientStoreConfig::default())
    }

    /// Creates a test store with the given configuration.
    pub fn with_config(model: ModelMetadata, config: TransientStoreConfig) -> Self {
        init_tracing();
        let memory = InMemoryStore::new();
        let store = TransientStore::with_config(Arc::new(memory.clone()), model, config);
        Self { memory, store }
    }

    /// Opens a session on the current thread.
    pub fn session(&self) -> TransientSession {
        self.store.begin_session().expect("Failed to begin session")
    }

    /// Ids of all committed entities of a type.
    pub fn committed_ids(&self, entity_type: &str) -> Vec<PersistentEntityId> {
        let snapshot = self.memory.begin_read().expect("Failed to open snapshot");
        snapshot.get_all(entity_type).expect("Failed to list entities")
    }

    /// A committed property value.
    pub fn committed_property(&self, id: PersistentEntityId, name: &str) -> Option<PropertyValue> {
        let snapshot = self.memory.begin_read().expect("Failed to open snapshot");
        snapshot.get_property(id, name).expect("Failed to read property")
    }

    /// Committed targets of a link.
    pub fn committed_links(&self, id: PersistentEntityId, name: &str) -> Vec<PersistentEntityId> {
        let snapshot = self.memory.begin_read().expect("Failed to open snapshot");
        snapshot.get_links(id, name).expect("Failed to read links")
    }
}

impl Deref for TestStore {
    type Target = TransientStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

impl Drop for TestStore {
    fn drop(&mut self) {
        self.store.close();
    }
}

/// Installs a test subscriber honouring `RUST_LOG`. Safe to call often.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Users writing posts with tags.
///
/// - `User`: required unique `login`, `email` (ignores version
///   mismatches), text blob `bio`, blob `avatar`, `posts` (0..n, cleared
///   when a post is removed)
/// - `Post`: required `title`, `views` (ignores version mismatches),
///   `author` (1, opposite of `posts`), `tags` (0..n, cleared when a tag
///   is removed); history enabled, ignoring `views`
/// - `Tag`: `name`
pub fn blog_model() -> ModelMetadata {
    ModelMetadata::from_entities([
        EntityMetadata::new("User")
            .property(PropertyMetadata::primitive("login").required())
            .property(PropertyMetadata::primitive("email").version_mismatch_ignored())
            .property(PropertyMetadata::text_blob("bio"))
            .property(PropertyMetadata::blob("avatar"))
            .end(
                AssociationEnd::new("posts", "Post", Cardinality::ZeroOrMore)
                    .opposite("author")
                    .target_clear_on_delete(true),
            )
            .unique(UniqueIndex::new(
                "user_login",
                vec![IndexField::Property("login".to_string())],
            )),
        EntityMetadata::new("Post")
            .property(PropertyMetadata::primitive("title").required())
            .property(PropertyMetadata::primitive("views").version_mismatch_ignored())
            .end(AssociationEnd::new("author", "User", Cardinality::One).opposite("posts"))
            .end(
                AssociationEnd::new("tags", "Tag", Cardinality::ZeroOrMore)
                    .target_clear_on_delete(true),
            )
            .history(["views"]),
        EntityMetadata::new("Tag").property(PropertyMetadata::primitive("name")),
    ])
}

/// Folders aggregating files.
///
/// Removing a folder removes its files. With `remove_orphan`, files that
/// lose their folder are removed at flush instead of failing it.
pub fn aggregation_model(remove_orphan: bool) -> ModelMetadata {
    let file = EntityMetadata::new("File")
        .property(PropertyMetadata::primitive("name"))
        .end(AssociationEnd::child("folder", "Folder", "files"));
    let file = if remove_orphan {
        file.remove_orphan()
    } else {
        file
    };
    ModelMetadata::from_entities([
        EntityMetadata::new("Folder")
            .property(PropertyMetadata::primitive("name"))
            .end(AssociationEnd::parent("files", "File", "folder")),
        file,
    ])
}

/// Parses a model from a JSON array of entity descriptors.
pub fn model_from_json(json: &str) -> Result<ModelMetadata, serde_json::Error> {
    let entities: Vec<EntityMetadata> = serde_json::from_str(json)?;
    Ok(ModelMetadata::from_entities(entities))
}

/// Creates a user with the given login.
pub fn create_user(session: &mut TransientSession, login: &str) -> TransientEntity {
    let user = session.new_entity("User").expect("Failed to create user");
    session
        .set_property(user, "login", login)
        .expect("Failed to set login");
    user
}

/// Creates a post by `author`, linking both ends.
pub fn create_post(session: &mut TransientSession, author: TransientEntity, title: &str) -> TransientEntity {
    let post = session.new_entity("Post").expect("Failed to create post");
    session
        .set_property(post, "title", title)
        .expect("Failed to set title");
    association::link(session, post, "author", author).expect("Failed to link author");
    post
}

/// Creates a folder holding `files` new files.
pub fn create_folder(session: &mut TransientSession, files: usize) -> (TransientEntity, Vec<TransientEntity>) {
    let folder = session.new_entity("Folder").expect("Failed to create folder");
    let children = (0..files)
        .map(|i| {
            let file = session.new_entity("File").expect("Failed to create file");
            session
                .set_property(file, "name", format!("file-{i}"))
                .expect("Failed to set name");
            association::link(session, folder, "files", file).expect("Failed to link file");
            file
        })
        .collect();
    (folder, children)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn models_index_incoming_ends() {
        let model = blog_model();
        let incoming: Vec<_> = model
            .incoming("User")
            .iter()
            .map(|i| (i.source_type.as_str(), i.end.name.as_str()))
            .collect();
        assert_eq!(incoming, vec![("Post", "author")]);

        let model = aggregation_model(true);
        assert!(model.entity("File").unwrap().remove_orphan);
        assert!(model.entity("File").unwrap().is_aggregation_child());
    }

    #[test]
    fn model_from_json_reads_descriptors() {
        let model = model_from_json(
            r#"[
                {
                    "entity_type": "Issue",
                    "properties": [{ "name": "summary", "required": true }],
                    "association_ends": [
                        { "name": "assignee", "target_type": "Person", "cardinality": "0..1" }
                    ]
                },
                { "entity_type": "Person" }
            ]"#,
        )
        .unwrap();
        let issue = model.entity("Issue").unwrap();
        assert!(issue.get_property("summary").unwrap().required);
        assert_eq!(
            issue.association_end("assignee").unwrap().cardinality,
            Cardinality::ZeroOrOne
        );
        assert_eq!(model.incoming("Person").len(), 1);
    }

    #[test]
    fn fixtures_create_linked_entities() {
        let store = TestStore::new(blog_model());
        let mut session = store.session();
        let user = create_user(&mut session, "alice");
        let post = create_post(&mut session, user, "hello");
        assert_eq!(session.get_link(post, "author").unwrap(), Some(user));
        assert_eq!(session.get_links(user, "posts").unwrap(), vec![post]);
        session.commit().unwrap();
        assert_eq!(store.committed_ids("Post").len(), 1);
    }
}
