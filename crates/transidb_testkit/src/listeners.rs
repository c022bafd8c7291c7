//! Listeners for observing flushes in tests.

use parking_lot::Mutex;
use transidb_core::{
    ConstraintViolations, EntityChange, TransientResult, TransientSession, TransientStoreListener,
};

/// Records every notification it receives.
#[derive(Debug, Default)]
pub struct RecordingListener {
    before: Mutex<Vec<Vec<EntityChange>>>,
    flushed: Mutex<Vec<Vec<EntityChange>>>,
    failures: Mutex<Vec<ConstraintViolations>>,
}

impl RecordingListener {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Change lists passed to `before_flush`, one per flush.
    pub fn before_flush_calls(&self) -> Vec<Vec<EntityChange>> {
        self.before.lock().clone()
    }

    /// Change lists passed to `flushed`, one per flush.
    pub fn flushed_calls(&self) -> Vec<Vec<EntityChange>> {
        self.flushed.lock().clone()
    }

    /// Violations passed to `after_constraints_fail`.
    pub fn failures(&self) -> Vec<ConstraintViolations> {
        self.failures.lock().clone()
    }

    /// Forgets everything recorded so far.
    pub fn clear(&self) {
        self.before.lock().clear();
        self.flushed.lock().clear();
        self.failures.lock().clear();
    }
}

impl TransientStoreListener for RecordingListener {
    fn before_flush(&self, _session: &mut TransientSession, changes: &[EntityChange]) -> TransientResult<()> {
        self.before.lock().push(changes.to_vec());
        Ok(())
    }

    fn flushed(&self, _session: &TransientSession, changes: &[EntityChange]) {
        self.flushed.lock().push(changes.to_vec());
    }

    fn after_constraints_fail(&self, _session: &TransientSession, violations: &ConstraintViolations) {
        self.failures.lock().push(violations.clone());
    }
}

/// Runs a closure in `before_flush`, letting tests change the session
/// while it flushes.
pub struct BeforeFlush<F>(pub F);

impl<F> BeforeFlush<F>
where
    F: Fn(&mut TransientSession, &[EntityChange]) -> TransientResult<()> + Send + Sync,
{
    /// Wraps a closure.
    pub const fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> TransientStoreListener for BeforeFlush<F>
where
    F: Fn(&mut TransientSession, &[EntityChange]) -> TransientResult<()> + Send + Sync,
{
    fn before_flush(&self, session: &mut TransientSession, changes: &[EntityChange]) -> TransientResult<()> {
        (self.0)(session, changes)
    }
}

impl<F> std::fmt::Debug for BeforeFlush<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BeforeFlush")
    }
}
