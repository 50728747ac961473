//! Attempt outcome classification.
//!
//! The retry decision is a pure function of the observed failure; the
//! engine never branches on backend internals or dynamic type checks.

use crate::execution::error::{ExecutionError, ExecutionResult};
use crate::storage::{EntityKey, StorageError};

/// What the engine should do with a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// roll back and run the attempt again
    Retry,
    /// surface the failure to the caller
    Fatal,
}

/// Map a failure to its retry disposition.
///
/// Every storage error is retryable: optimistic conflicts and transient
/// engine errors, but also persistence violations - a deterministic
/// constraint violation will fail identically on each attempt and still
/// consume every attempt. A signal carries its own decision; anything
/// else is a programming error and never retried.
pub fn classify(error: &ExecutionError) -> Disposition {
    match error {
        ExecutionError::Storage(_) => Disposition::Retry,
        ExecutionError::Signal(signal) => {
            if signal.can_retry() {
                Disposition::Retry
            } else {
                Disposition::Fatal
            }
        }
        _ => Disposition::Fatal,
    }
}

/// Entity to evict from the shared cache, if the failure is a version
/// conflict. Looks through signal wrappers to the underlying cause.
pub fn conflict_target(error: &ExecutionError) -> Option<&EntityKey> {
    match error {
        ExecutionError::Storage(StorageError::StaleVersion { key, .. }) => Some(key),
        ExecutionError::Signal(signal) => conflict_target(signal.cause()),
        _ => None,
    }
}

/// Result of one attempt, tagged with the retry decision.
#[derive(Debug)]
pub enum AttemptOutcome<T> {
    Success(T),
    Retryable(ExecutionError),
    Fatal(ExecutionError),
}

/// Tag an attempt result with its disposition.
pub fn assess<T>(result: ExecutionResult<T>) -> AttemptOutcome<T> {
    match result {
        Ok(value) => AttemptOutcome::Success(value),
        Err(error) => match classify(&error) {
            Disposition::Retry => AttemptOutcome::Retryable(error),
            Disposition::Fatal => AttemptOutcome::Fatal(error),
        },
    }
}
