//! The transient store: session registry, listeners and hooks.

use crate::config::TransientStoreConfig;
use crate::entity::SessionId;
use crate::error::{TransientError, TransientResult};
use crate::listener::{Destructor, EntityHooks, RequiredIf, TransientStoreListener};
use crate::metadata::ModelMetadata;
use crate::session::{SessionState, TransientSession};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tracing::debug;
use transidb_store::PersistentStore;

/// Registry entry of a live session.
enum SessionSlot {
    /// Open on a thread; the session value lives with its caller.
    Open { thread: ThreadId },
    /// Parked until resumed.
    Suspended(Box<TransientSession>),
}

struct StoreInner {
    persistent: Arc<dyn PersistentStore>,
    metadata: Arc<ModelMetadata>,
    config: TransientStoreConfig,
    listeners: RwLock<Vec<Arc<dyn TransientStoreListener>>>,
    hooks: RwLock<EntityHooks>,
    sessions: Mutex<HashMap<SessionId, SessionSlot>>,
    /// Signalled whenever a session is parked or unregistered.
    released: Condvar,
}

/// Entry point for transient sessions over a persistent store.
///
/// Cloning is cheap; clones share the registry, listeners and hooks.
///
/// Suspended sessions are kept inside the store. Call
/// [`close`](Self::close) to abort them when the store is no longer
/// needed.
#[derive(Clone)]
pub struct TransientStore {
    inner: Arc<StoreInner>,
}

impl TransientStore {
    /// Creates a store with the default configuration.
    pub fn new(persistent: Arc<dyn PersistentStore>, metadata: ModelMetadata) -> Self {
        Self::with_config(persistent, metadata, TransientStoreConfig::default())
    }

    /// Creates a store with the given configuration.
    pub fn with_config(
        persistent: Arc<dyn PersistentStore>,
        metadata: ModelMetadata,
        config: TransientStoreConfig,
    ) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                persistent,
                metadata: Arc::new(metadata),
                config,
                listeners: RwLock::new(Vec::new()),
                hooks: RwLock::new(EntityHooks::new()),
                sessions: Mutex::new(HashMap::new()),
                released: Condvar::new(),
            }),
        }
    }

    /// Returns the underlying persistent store.
    #[must_use]
    pub fn persistent(&self) -> &Arc<dyn PersistentStore> {
        &self.inner.persistent
    }

    /// Returns the model metadata.
    #[must_use]
    pub fn metadata(&self) -> &Arc<ModelMetadata> {
        &self.inner.metadata
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &TransientStoreConfig {
        &self.inner.config
    }

    /// Registers a listener. Listeners are notified in registration order.
    pub fn add_listener(&self, listener: Arc<dyn TransientStoreListener>) {
        self.inner.listeners.write().push(listener);
    }

    /// Unregisters a listener. Returns false if it was not registered.
    pub fn remove_listener(&self, listener: &Arc<dyn TransientStoreListener>) -> bool {
        let mut listeners = self.inner.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }

    /// Returns the registered listeners.
    #[must_use]
    pub fn listeners(&self) -> Vec<Arc<dyn TransientStoreListener>> {
        self.inner.listeners.read().clone()
    }

    /// Registers the pre-delete hook of an entity type.
    pub fn set_destructor<F>(&self, entity_type: impl Into<String>, destructor: F)
    where
        F: Fn(&mut TransientSession, crate::entity::TransientEntity) -> TransientResult<()>
            + Send
            + Sync
            + 'static,
    {
        self.inner
            .hooks
            .write()
            .set_destructor(entity_type, Arc::new(destructor));
    }

    /// Makes a property required whenever `predicate` holds.
    pub fn add_required_if<F>(
        &self,
        entity_type: impl Into<String>,
        property: impl Into<String>,
        predicate: F,
    ) where
        F: Fn(&TransientSession, crate::entity::TransientEntity) -> TransientResult<bool>
            + Send
            + Sync
            + 'static,
    {
        self.inner
            .hooks
            .write()
            .add_required_if(entity_type, property, Arc::new(predicate));
    }

    /// Returns a copy of the registered hooks.
    #[must_use]
    pub fn hooks(&self) -> EntityHooks {
        self.inner.hooks.read().clone()
    }

    pub(crate) fn destructor(&self, entity_type: &str) -> Option<Destructor> {
        self.inner.hooks.read().destructor(entity_type)
    }

    pub(crate) fn required_if(&self, entity_type: &str) -> Vec<(String, RequiredIf)> {
        self.inner.hooks.read().required_if(entity_type)
    }

    /// Opens a session with a fresh id on the current thread.
    pub fn begin_session(&self) -> TransientResult<TransientSession> {
        self.begin_session_with_id(SessionId::new())
    }

    /// Opens a session with the given id on the current thread.
    ///
    /// # Errors
    ///
    /// Returns `SessionAlreadyExists` if a live session has the id.
    pub fn begin_session_with_id(&self, id: SessionId) -> TransientResult<TransientSession> {
        {
            let mut sessions = self.inner.sessions.lock();
            if sessions.contains_key(&id) {
                return Err(TransientError::SessionAlreadyExists { session: id });
            }
            sessions.insert(
                id,
                SessionSlot::Open {
                    thread: thread::current().id(),
                },
            );
        }
        TransientSession::open(self.clone(), id).map_err(|err| {
            self.unregister(id);
            err
        })
    }

    /// Resumes a suspended session on the current thread, waiting up to
    /// the configured resume timeout while it is open elsewhere.
    pub fn resume(&self, id: SessionId) -> TransientResult<TransientSession> {
        self.resume_with_timeout(id, self.inner.config.resume_timeout)
    }

    /// Resumes a suspended session on the current thread.
    ///
    /// # Errors
    ///
    /// - `SessionNotFound` if no live session has the id
    /// - `LockTimeout` if the session stayed open on another thread for
    ///   longer than `timeout`
    pub fn resume_with_timeout(
        &self,
        id: SessionId,
        timeout: Duration,
    ) -> TransientResult<TransientSession> {
        let deadline = Instant::now() + timeout;
        let mut session = {
            let mut sessions = self.inner.sessions.lock();
            loop {
                match sessions.remove(&id) {
                    None => return Err(TransientError::SessionNotFound { session: id }),
                    Some(SessionSlot::Suspended(session)) => {
                        sessions.insert(
                            id,
                            SessionSlot::Open {
                                thread: thread::current().id(),
                            },
                        );
                        break session;
                    }
                    Some(SessionSlot::Open { thread: owner }) => {
                        sessions.insert(id, SessionSlot::Open { thread: owner });
                        if owner == thread::current().id() {
                            return Err(TransientError::invalid_operation(format!(
                                "session {id} is already open on this thread"
                            )));
                        }
                        if self
                            .inner
                            .released
                            .wait_until(&mut sessions, deadline)
                            .timed_out()
                        {
                            return Err(TransientError::LockTimeout {
                                session: id,
                                timeout,
                            });
                        }
                    }
                }
            }
        };
        if let Err(err) = session.reopen() {
            let _ = session.abort();
            return Err(err);
        }
        Ok(*session)
    }

    /// Aborts a suspended session without resuming it.
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound` if no suspended session has the id.
    pub fn abort_suspended(&self, id: SessionId) -> TransientResult<()> {
        let slot = {
            let mut sessions = self.inner.sessions.lock();
            match sessions.remove(&id) {
                Some(SessionSlot::Suspended(session)) => Some(session),
                Some(open) => {
                    sessions.insert(id, open);
                    None
                }
                None => None,
            }
        };
        match slot {
            Some(mut session) => session.abort(),
            None => Err(TransientError::SessionNotFound { session: id }),
        }
    }

    /// Returns the state of a live session.
    #[must_use]
    pub fn session_state(&self, id: SessionId) -> Option<SessionState> {
        self.inner.sessions.lock().get(&id).map(|slot| match slot {
            SessionSlot::Open { .. } => SessionState::Open,
            SessionSlot::Suspended(_) => SessionState::Suspended,
        })
    }

    /// Returns the number of live sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.inner.sessions.lock().len()
    }

    /// Aborts every suspended session.
    pub fn close(&self) {
        let suspended: Vec<Box<TransientSession>> = {
            let mut sessions = self.inner.sessions.lock();
            let ids: Vec<SessionId> = sessions
                .iter()
                .filter(|(_, slot)| matches!(slot, SessionSlot::Suspended(_)))
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| match sessions.remove(&id) {
                    Some(SessionSlot::Suspended(session)) => Some(session),
                    _ => None,
                })
                .collect()
        };
        for mut session in suspended {
            let _ = session.abort();
        }
        debug!("transient store closed");
    }

    pub(crate) fn park(&self, session: TransientSession) {
        let id = session.id();
        self.inner
            .sessions
            .lock()
            .insert(id, SessionSlot::Suspended(Box::new(session)));
        self.inner.released.notify_all();
    }

    pub(crate) fn unregister(&self, id: SessionId) {
        self.inner.sessions.lock().remove(&id);
        self.inner.released.notify_all();
    }
}

impl fmt::Debug for TransientStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransientStore")
            .field("config", &self.inner.config)
            .field("sessions", &self.session_count())
            .field("listeners", &self.inner.listeners.read().len())
            .finish_non_exhaustive()
    }
}
