//! Storage layer error types
//!
//! Everything a storage backend can raise is defined here. The execution
//! engine never inspects backend internals - it classifies these variants
//! to decide whether a failed attempt is retried.
//! We use `thiserror` for ergonomic error definition and better error messages.

use thiserror::Error;

use crate::storage::types::{EntityKey, InvalidNameError};

/// the main error type for storage operations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StorageError {
    /// a versioned update lost the race against a concurrent writer
    #[error("stale version for {key}: expected {expected}, found {actual}")]
    StaleVersion {
        key: EntityKey,
        expected: u64,
        actual: u64,
    },

    /// the backend connection dropped or could not be established
    #[error("connection error: {0}")]
    Connection(String),

    /// the backend aborted the transaction to break a deadlock
    #[error("deadlock detected: {detail}")]
    Deadlock { detail: String },

    /// generic storage-engine failure
    #[error("backend error: {0}")]
    Backend(String),

    /// the session was closed before the operation ran
    #[error("session is closed")]
    SessionClosed,

    /// a declared constraint rejected the write
    #[error("constraint violation ({constraint}): {detail}")]
    ConstraintViolation { constraint: String, detail: String },

    /// record data could not be mapped to or from its typed form
    #[error("mapping error: {0}")]
    Mapping(String),

    /// the requested record was not found
    #[error("record not found: {key}")]
    NotFound { key: EntityKey },

    /// invalid entity name or identifier
    #[error("invalid name: {0}")]
    InvalidName(#[from] InvalidNameError),

    /// a transactional operation ran on a session with no open transaction
    #[error("no transaction is active on this session")]
    NoTransaction,

    /// internal error that shouldn't happen
    #[error("internal storage error: {0}")]
    Internal(String),
}

impl StorageError {
    /// check if this error is an optimistic-lock conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::StaleVersion { .. })
    }

    /// check if this error is a transient storage-engine failure
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StorageError::Connection(_)
                | StorageError::Deadlock { .. }
                | StorageError::Backend(_)
                | StorageError::SessionClosed
        )
    }

    /// check if this error is a persistence-layer violation
    pub fn is_violation(&self) -> bool {
        matches!(
            self,
            StorageError::ConstraintViolation { .. }
                | StorageError::Mapping(_)
                | StorageError::NotFound { .. }
                | StorageError::InvalidName(_)
        )
    }
}

/// result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::{EntityId, EntityName};

    fn key() -> EntityKey {
        EntityKey::new(
            EntityName::new("players").unwrap(),
            EntityId::new("42").unwrap(),
        )
    }

    #[test]
    fn test_error_classification() {
        let conflict = StorageError::StaleVersion {
            key: key(),
            expected: 3,
            actual: 4,
        };
        assert!(conflict.is_conflict());
        assert!(!conflict.is_transient());
        assert!(!conflict.is_violation());

        let transient = StorageError::Connection("socket reset".to_string());
        assert!(transient.is_transient());
        assert!(!transient.is_conflict());

        let violation = StorageError::ConstraintViolation {
            constraint: "players_name_unique".to_string(),
            detail: "duplicate name".to_string(),
        };
        assert!(violation.is_violation());
        assert!(!violation.is_transient());
    }

    #[test]
    fn test_stale_version_message() {
        let err = StorageError::StaleVersion {
            key: key(),
            expected: 3,
            actual: 4,
        };
        assert_eq!(
            err.to_string(),
            "stale version for players/42: expected 3, found 4"
        );
    }
}
