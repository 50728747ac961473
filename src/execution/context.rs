//! Execution context for a single logical operation tree.
//!
//! One `OperationContext` exists per logical operation: the engine creates
//! it at the root invocation and threads it as an explicit parameter through
//! every call in the tree. Application code only reads the context (and
//! queues success actions); activation and deactivation belong to the
//! engine alone.

use std::error::Error;
use std::fmt;

use chrono::{DateTime, Utc};

use crate::execution::error::{ExecutionError, ExecutionResult};
use crate::storage::Session;

/// Deferred action queued during an attempt, run only after that attempt
/// commits. Failures are logged and swallowed.
pub type SuccessAction = Box<dyn FnOnce() -> Result<(), Box<dyn Error + Send + Sync>> + Send>;

/// Per-operation execution state.
pub struct OperationContext {
    /// active session; None once the operation ended or was cancelled
    session: Option<Box<dyn Session>>,
    transactional: bool,
    restarted: bool,
    last_error: Option<ExecutionError>,
    success_actions: Vec<SuccessAction>,
    started_at: DateTime<Utc>,
}

impl OperationContext {
    pub fn new() -> Self {
        Self {
            session: None,
            transactional: false,
            restarted: false,
            last_error: None,
            success_actions: Vec::new(),
            started_at: Utc::now(),
        }
    }

    /// Check whether a session is currently bound to this context.
    ///
    /// If the context is not active, the values of the remaining properties
    /// are undefined.
    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// Current session bound to the context.
    ///
    /// Fails with an inactive-context error when no operation is running;
    /// the error carries the last recorded failure as its reason.
    pub fn session(&mut self) -> ExecutionResult<&mut dyn Session> {
        match self.session.as_deref_mut() {
            Some(session) => Ok(session),
            None => Err(ExecutionError::InactiveContext {
                reason: self.last_error.as_ref().map(|e| e.to_string()),
            }),
        }
    }

    /// true when the operation runs inside a transaction
    pub fn is_transactional(&self) -> bool {
        self.transactional
    }

    /// True once the current operation has been restarted at least once.
    ///
    /// Application code uses this to skip non-idempotent side effects on
    /// retry, e.g. not re-sending a notification.
    pub fn is_restarted(&self) -> bool {
        self.restarted
    }

    /// Last failure observed during this operation.
    pub fn last_error(&self) -> Option<&ExecutionError> {
        self.last_error.as_ref()
    }

    /// When this context was created.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Queue an action to run after the current attempt commits.
    ///
    /// Actions run in queue order, exactly once, and only for the attempt
    /// that actually commits - a restart discards everything queued by the
    /// failed attempt.
    pub fn add_success_action<F>(&mut self, action: F)
    where
        F: FnOnce() -> Result<(), Box<dyn Error + Send + Sync>> + Send + 'static,
    {
        self.success_actions.push(Box::new(action));
    }

    /// Number of queued success actions.
    pub fn pending_success_actions(&self) -> usize {
        self.success_actions.len()
    }

    /// Bind a session for a new attempt.
    pub(crate) fn activate(&mut self, session: Box<dyn Session>, transactional: bool) {
        self.session = Some(session);
        self.transactional = transactional;
        self.last_error = None;
    }

    /// Unbind the session, handing it back to the engine.
    ///
    /// Clears the restarted flag but keeps the last error and the pending
    /// queue.
    pub(crate) fn deactivate(&mut self) -> Option<Box<dyn Session>> {
        self.restarted = false;
        self.session.take()
    }

    pub(crate) fn set_last_error(&mut self, error: ExecutionError) {
        self.last_error = Some(error);
    }

    /// Mark the operation as restarted and discard actions queued by the
    /// failed attempt.
    pub(crate) fn mark_restarted(&mut self) {
        self.restarted = true;
        self.success_actions.clear();
    }

    pub(crate) fn drain_success_actions(&mut self) -> Vec<SuccessAction> {
        std::mem::take(&mut self.success_actions)
    }
}

impl Default for OperationContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for OperationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationContext")
            .field("active", &self.is_active())
            .field("transactional", &self.transactional)
            .field("restarted", &self.restarted)
            .field("pending_success_actions", &self.success_actions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryBackend, SessionFactory, StorageError};

    #[test]
    fn test_inactive_context_session_fails() {
        let mut cx = OperationContext::new();
        assert!(!cx.is_active());

        let err = cx.session().err().unwrap();
        assert_eq!(err.to_string(), "context is not active");
    }

    #[test]
    fn test_inactive_context_reports_last_error() {
        let mut cx = OperationContext::new();
        cx.set_last_error(ExecutionError::Storage(StorageError::Connection(
            "socket reset".to_string(),
        )));

        let err = cx.session().err().unwrap();
        assert_eq!(
            err.to_string(),
            "context is not active. reason: storage error: connection error: socket reset"
        );
    }

    #[test]
    fn test_activate_and_deactivate() {
        let backend = MemoryBackend::new();
        let mut cx = OperationContext::new();

        cx.activate(backend.open_session().unwrap(), true);
        assert!(cx.is_active());
        assert!(cx.is_transactional());
        assert!(cx.session().is_ok());

        cx.mark_restarted();
        assert!(cx.is_restarted());

        let session = cx.deactivate();
        assert!(session.is_some());
        assert!(!cx.is_active());
        // deactivation clears the restarted flag
        assert!(!cx.is_restarted());
    }

    #[test]
    fn test_restart_discards_queued_actions() {
        let mut cx = OperationContext::new();
        cx.add_success_action(|| Ok(()));
        cx.add_success_action(|| Ok(()));
        assert_eq!(cx.pending_success_actions(), 2);

        cx.mark_restarted();
        assert_eq!(cx.pending_success_actions(), 0);
        assert!(cx.is_restarted());
    }

    #[test]
    fn test_activation_clears_last_error() {
        let backend = MemoryBackend::new();
        let mut cx = OperationContext::new();
        cx.set_last_error(ExecutionError::Storage(StorageError::SessionClosed));
        assert!(cx.last_error().is_some());

        cx.activate(backend.open_session().unwrap(), false);
        assert!(cx.last_error().is_none());
    }
}
