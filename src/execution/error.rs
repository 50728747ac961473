//! Execution layer error types.
//!
//! Two structured values cross the engine boundary: `AppError`, a coded
//! application error callers can branch on, and `RetrySignal`, a wrapper
//! that pins the retry decision for its cause. `ExecutionError` is the sum
//! of everything an attempt can fail with; the engine classifies it, so the
//! whole tree must be cheap to clone and carry shared causes.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::storage::StorageError;

/// Result type for execution operations.
pub type ExecutionResult<T> = Result<T, ExecutionError>;

/// Structured application error with a stable machine-readable code.
///
/// Codes are lower-hyphenated strings starting with `#`, e.g.
/// `#player-not-found`. The code - not the instance - is the identity used
/// for classification, so callers match with [`AppError::code_is`].
/// Parameters keep their insertion order and render deterministically.
#[derive(Debug, Clone)]
pub struct AppError {
    code: String,
    params: Vec<(String, Value)>,
    cause: Option<Arc<dyn StdError + Send + Sync>>,
}

impl AppError {
    /// catch-all code for failures with no more specific classification
    pub const GENERAL_FAILURE: &'static str = "#general-failure";

    /// code for failures escalated out of the persistence layer
    pub const PERSISTENCE_ERROR: &'static str = "#persistence-error";

    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            params: Vec::new(),
            cause: None,
        }
    }

    /// Attach the underlying cause.
    pub fn with_cause(mut self, cause: impl StdError + Send + Sync + 'static) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    /// Append a named parameter, builder-style.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    /// Wrap a terminal failure under the catch-all code, recording the
    /// cause's message as the `reason` parameter.
    pub fn general_failure(cause: ExecutionError) -> Self {
        Self::new(Self::GENERAL_FAILURE)
            .param("reason", cause.to_string())
            .with_cause(cause)
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    /// Check whether this error carries the given code.
    pub fn code_is(&self, code: &str) -> bool {
        self.code == code
    }

    pub fn params(&self) -> &[(String, Value)] {
        &self.params
    }

    /// look up a parameter by name
    pub fn param_value(&self, name: &str) -> Option<&Value> {
        self.params
            .iter()
            .find(|(param, _)| param == name)
            .map(|(_, value)| value)
    }

    pub fn cause(&self) -> Option<&(dyn StdError + 'static)> {
        match &self.cause {
            Some(cause) => Some(&**cause),
            None => None,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] ({} parameters)", self.code, self.params.len())?;
        if !self.params.is_empty() {
            write!(f, "{{ ")?;
            for (i, (name, value)) in self.params.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                match value {
                    Value::String(s) => write!(f, "\"{}\": \"{}\"", name, s)?,
                    other => write!(f, "\"{}\": \"{}\"", name, other)?,
                }
            }
            write!(f, " }}")?;
        }
        Ok(())
    }
}

impl StdError for AppError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause()
    }
}

/// Wrapper pinning an explicit retry decision to a failure.
///
/// A unit of work raises this to override the default classification, e.g.
/// to force no-retry on a condition the engine would otherwise treat as a
/// transient storage error. Nested invocations also use it to carry their
/// failures - and the retry decision - up to the root frame.
#[derive(Debug, Clone)]
pub struct RetrySignal {
    cause: Box<ExecutionError>,
    can_retry: bool,
}

impl RetrySignal {
    pub fn new(cause: ExecutionError, can_retry: bool) -> Self {
        Self {
            cause: Box::new(cause),
            can_retry,
        }
    }

    /// Signal that the operation should be restarted.
    pub fn retryable(cause: ExecutionError) -> Self {
        Self::new(cause, true)
    }

    /// Signal that the operation must not be restarted.
    pub fn fatal(cause: ExecutionError) -> Self {
        Self::new(cause, false)
    }

    pub fn can_retry(&self) -> bool {
        self.can_retry
    }

    pub fn cause(&self) -> &ExecutionError {
        &self.cause
    }

    pub fn into_cause(self) -> ExecutionError {
        *self.cause
    }
}

impl fmt::Display for RetrySignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let decision = if self.can_retry {
            "retryable"
        } else {
            "non-retryable"
        };
        write!(f, "{} operation failure: {}", decision, self.cause)
    }
}

impl StdError for RetrySignal {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&*self.cause)
    }
}

/// The failure sum crossing the engine boundary.
#[derive(Debug, Clone, Error)]
pub enum ExecutionError {
    /// error raised by the storage collaborator
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// structured application error
    #[error(transparent)]
    App(#[from] AppError),

    /// failure with an explicit retry decision attached
    #[error("{0}")]
    Signal(#[from] RetrySignal),

    /// the context was used outside a running operation
    #[error("context is not active{}", reason_suffix(.reason))]
    InactiveContext { reason: Option<String> },

    /// anything else - treated as a programming error, never retried
    #[error("{0}")]
    Other(Arc<dyn StdError + Send + Sync>),
}

impl ExecutionError {
    /// Wrap an arbitrary error.
    pub fn other(error: impl StdError + Send + Sync + 'static) -> Self {
        Self::Other(Arc::new(error))
    }

    /// the structured application error, if this is one
    pub fn as_app(&self) -> Option<&AppError> {
        match self {
            Self::App(app) => Some(app),
            _ => None,
        }
    }
}

fn reason_suffix(reason: &Option<String>) -> String {
    match reason {
        Some(reason) => format!(". reason: {}", reason),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_error_message_format() {
        let err = AppError::new("#quota-exceeded")
            .param("account", "a-17")
            .param("limit", 10);
        assert_eq!(
            err.to_string(),
            "[#quota-exceeded] (2 parameters){ \"account\": \"a-17\", \"limit\": \"10\" }"
        );

        let bare = AppError::new("#general-failure");
        assert_eq!(bare.to_string(), "[#general-failure] (0 parameters)");
    }

    #[test]
    fn test_app_error_params_keep_insertion_order() {
        let err = AppError::new("#x")
            .param("z", 1)
            .param("a", 2)
            .param("m", 3);
        let names: Vec<&str> = err.params().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["z", "a", "m"]);
        assert_eq!(err.param_value("a"), Some(&Value::from(2)));
    }

    #[test]
    fn test_app_error_code_matching() {
        let err = AppError::new("#player-not-found");
        assert!(err.code_is("#player-not-found"));
        assert!(!err.code_is("#general-failure"));
        assert!(err.code_is(err.code()));
    }

    #[test]
    fn test_general_failure_wraps_cause() {
        let cause = ExecutionError::Storage(StorageError::Connection("down".to_string()));
        let err = AppError::general_failure(cause);

        assert!(err.code_is(AppError::GENERAL_FAILURE));
        assert_eq!(
            err.param_value("reason"),
            Some(&Value::from("storage error: connection error: down"))
        );
        assert!(err.cause().is_some());
    }

    #[test]
    fn test_retry_signal_flags() {
        let cause = ExecutionError::Storage(StorageError::SessionClosed);
        assert!(RetrySignal::retryable(cause.clone()).can_retry());
        assert!(!RetrySignal::fatal(cause).can_retry());
    }

    #[test]
    fn test_inactive_context_display() {
        let plain = ExecutionError::InactiveContext { reason: None };
        assert_eq!(plain.to_string(), "context is not active");

        let with_reason = ExecutionError::InactiveContext {
            reason: Some("boom".to_string()),
        };
        assert_eq!(with_reason.to_string(), "context is not active. reason: boom");
    }
}
