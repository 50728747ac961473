//! Execution engine - the retry orchestrator.
//!
//! `Database` owns the begin/commit/rollback/retry state machine. Exactly
//! one begin/commit pair exists per logical operation tree: the outermost
//! (root) invocation controls the session lifecycle; nested invocations
//! borrow the root's session and defer every retry decision upward.
//!
//! A root attempt moves through
//! `IDLE -> ATTEMPTING -> {COMMITTED | ROLLED_BACK_RETRY | ROLLED_BACK_FATAL}`:
//! commit errors are classified exactly like action errors, rollback is
//! best-effort, and a retryable failure sleeps `attempt * retry_timeout`
//! before the next attempt.

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, warn};

use crate::execution::context::OperationContext;
use crate::execution::error::{AppError, ExecutionError, ExecutionResult, RetrySignal};
use crate::execution::outcome::{assess, classify, conflict_target, AttemptOutcome, Disposition};
use crate::execution::unit::UnitOfWork;
use crate::storage::{EntityCache, SessionFactory};

/// Retry tuning for the engine.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Attempts before a retryable failure becomes terminal.
    pub max_attempts: u32,
    /// Base backoff; attempt `k` sleeps `k * retry_timeout` before retrying.
    pub retry_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_timeout: Duration::from_millis(100),
        }
    }
}

impl DatabaseConfig {
    /// Set max_attempts.
    pub fn max_attempts(mut self, value: u32) -> Self {
        self.max_attempts = value;
        self
    }

    /// Set the backoff base.
    pub fn retry_timeout(mut self, value: Duration) -> Self {
        self.retry_timeout = value;
        self
    }
}

/// Entry point for executing units of work against a storage backend.
pub struct Database {
    factory: Arc<dyn SessionFactory>,
    config: DatabaseConfig,
}

impl Database {
    /// Create an engine with the default retry policy.
    pub fn new(factory: Arc<dyn SessionFactory>) -> Self {
        Self::with_config(factory, DatabaseConfig::default())
    }

    /// Create an engine with a custom retry policy.
    pub fn with_config(factory: Arc<dyn SessionFactory>, config: DatabaseConfig) -> Self {
        Self { factory, config }
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Shared second-level cache of the underlying backend, if any.
    pub fn cache(&self) -> Option<Arc<dyn EntityCache>> {
        self.factory.cache()
    }

    /// Fresh context for driving [`Database::execute_with`] manually.
    pub fn context(&self) -> OperationContext {
        OperationContext::new()
    }

    /// Execute a transactional unit of work with the configured retry
    /// policy.
    pub fn execute<U: UnitOfWork>(&self, unit: &U) -> ExecutionResult<U::Output> {
        let mut cx = OperationContext::new();
        self.execute_with(&mut cx, true, unit, self.config.max_attempts)
    }

    /// Execute without opening a transaction (reads, maintenance work).
    pub fn execute_non_tx<U: UnitOfWork>(&self, unit: &U) -> ExecutionResult<U::Output> {
        let mut cx = OperationContext::new();
        self.execute_with(&mut cx, false, unit, self.config.max_attempts)
    }

    /// Execute a unit of work against an explicit context.
    ///
    /// An active context means a nested invocation: the action runs against
    /// the caller's session, and any failure propagates to the root frame,
    /// which alone rolls back and retries. An inactive context makes this
    /// the root invocation owning the whole retry loop.
    pub fn execute_with<U: UnitOfWork>(
        &self,
        cx: &mut OperationContext,
        transactional: bool,
        unit: &U,
        max_attempts: u32,
    ) -> ExecutionResult<U::Output> {
        if cx.is_active() {
            self.execute_nested(cx, unit)
        } else {
            self.execute_root(cx, transactional, unit, max_attempts)
        }
    }

    fn execute_nested<U: UnitOfWork>(
        &self,
        cx: &mut OperationContext,
        unit: &U,
    ) -> ExecutionResult<U::Output> {
        match unit.action(cx) {
            Ok(value) => {
                unit.on_success(cx);
                Ok(value)
            }
            Err(error) => {
                let signal = match error {
                    // an explicit signal keeps its decision
                    ExecutionError::Signal(signal) => {
                        cx.set_last_error(signal.cause().clone());
                        signal
                    }
                    other => {
                        let can_retry = classify(&other) == Disposition::Retry;
                        cx.set_last_error(other.clone());
                        RetrySignal::new(other, can_retry)
                    }
                };
                unit.on_failure(cx);
                Err(ExecutionError::Signal(signal))
            }
        }
    }

    fn execute_root<U: UnitOfWork>(
        &self,
        cx: &mut OperationContext,
        transactional: bool,
        unit: &U,
        max_attempts: u32,
    ) -> ExecutionResult<U::Output> {
        let mut attempt: u32 = 0;
        loop {
            self.begin(cx, transactional)?;

            let result = unit.action(cx).and_then(|value| {
                self.end(cx)?;
                Ok(value)
            });

            let (disposition, raised) = match assess(result) {
                AttemptOutcome::Success(value) => {
                    unit.on_success(cx);
                    self.run_success_actions(cx);
                    return Ok(value);
                }
                AttemptOutcome::Retryable(error) => (Disposition::Retry, error),
                AttemptOutcome::Fatal(error) => (Disposition::Fatal, error),
            };

            // a signal from a nested frame or the unit itself carries the
            // real cause
            let error = match raised {
                ExecutionError::Signal(signal) => signal.into_cause(),
                other => other,
            };

            if let Some(key) = conflict_target(&error) {
                if let Some(cache) = self.factory.cache() {
                    debug!(entity = %key, "evicting conflicting entity from shared cache");
                    cache.evict_entity(key);
                }
            }

            cx.set_last_error(error.clone());
            unit.on_failure(cx);
            self.cancel(cx);

            attempt += 1;
            if disposition != Disposition::Retry || attempt >= max_attempts {
                return Err(Self::terminal(error));
            }

            cx.mark_restarted();
            let delay = self.backoff_delay(attempt);
            warn!(
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                elapsed_ms = (Utc::now() - cx.started_at()).num_milliseconds(),
                error = %error,
                "attempt failed, backing off before retry"
            );
            thread::sleep(delay);
        }
    }

    /// Open a session for a new attempt and bind it to the context.
    fn begin(&self, cx: &mut OperationContext, transactional: bool) -> ExecutionResult<()> {
        let mut session = self.factory.open_session()?;
        if transactional {
            session.begin()?;
        }
        debug!(session = %session.id(), transactional, "attempt started");
        cx.activate(session, transactional);
        Ok(())
    }

    /// Finish the attempt: commit when transactional, then close.
    ///
    /// A commit failure discards the session; by then the context is
    /// already deactivated, so the failure flows into classification.
    fn end(&self, cx: &mut OperationContext) -> ExecutionResult<()> {
        let transactional = cx.is_transactional();
        let Some(mut session) = cx.deactivate() else {
            return Err(ExecutionError::InactiveContext { reason: None });
        };
        if !session.is_open() {
            return Ok(());
        }
        if transactional {
            session.commit()?;
        }
        session.close()?;
        Ok(())
    }

    /// Abort the attempt: best-effort rollback and close, errors swallowed.
    fn cancel(&self, cx: &mut OperationContext) {
        let transactional = cx.is_transactional();
        let Some(mut session) = cx.deactivate() else {
            return;
        };
        if !session.is_open() {
            return;
        }
        if transactional {
            if let Err(rollback_error) = session.rollback() {
                debug!(error = %rollback_error, "rollback failed, discarding session");
            }
        }
        if let Err(close_error) = session.close() {
            debug!(error = %close_error, "session close failed");
        }
    }

    /// Run the queued success actions in order. A failing action is logged
    /// and never fails - or retries - the committed operation.
    fn run_success_actions(&self, cx: &mut OperationContext) {
        for action in cx.drain_success_actions() {
            if let Err(action_error) = action() {
                error!(error = %action_error, "success action failed");
            }
        }
    }

    /// Sleep duration before the retry following failed attempt `attempt`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.config.retry_timeout * attempt
    }

    /// Shape the terminal failure: a structured application error surfaces
    /// unchanged so callers can branch on its code; anything else is
    /// wrapped under the catch-all code.
    fn terminal(error: ExecutionError) -> ExecutionError {
        match error {
            ExecutionError::App(app) => ExecutionError::App(app),
            other => ExecutionError::App(AppError::general_failure(other)),
        }
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("config", &self.config)
            .finish()
    }
}
