//! Session and factory contracts for storage backends.
//!
//! The execution engine drives backends exclusively through these traits:
//! it opens sessions, brackets them with begin/commit/rollback, and treats
//! every data operation as opaque - only the errors they raise matter to
//! the retry policy.

use std::sync::Arc;

use crate::storage::errors::StorageResult;
use crate::storage::types::{EntityId, EntityKey, EntityName, Record};

/// One open conversation with the storage backend.
///
/// A session is exclusively owned by the root execution context for the
/// duration of one attempt. Nested invocations borrow it for reads and
/// writes but never commit, roll back, or close it.
pub trait Session: Send {
    /// stable identifier for logging and diagnostics
    fn id(&self) -> &str;

    /// true until `close` is called
    fn is_open(&self) -> bool;

    /// Begin a transaction on this session.
    fn begin(&mut self) -> StorageResult<()>;

    /// Commit the open transaction.
    ///
    /// Version conflicts detected at commit time surface here as
    /// `StorageError::StaleVersion`.
    fn commit(&mut self) -> StorageResult<()>;

    /// Roll back the open transaction, discarding staged writes.
    fn rollback(&mut self) -> StorageResult<()>;

    /// Close the session. Idempotent.
    fn close(&mut self) -> StorageResult<()>;

    // ==================== Data Operations ====================

    /// Read a record by identifier.
    fn get(&mut self, entity: &EntityName, id: &EntityId) -> StorageResult<Option<Record>>;

    /// Insert or update a record, enforcing its version token.
    ///
    /// Returns the record with the bumped version the write will commit at.
    fn save_or_update(&mut self, entity: &EntityName, record: Record) -> StorageResult<Record>;

    /// Merge a detached record into the session's view.
    fn merge(&mut self, entity: &EntityName, record: Record) -> StorageResult<Record>;

    /// Re-read a record from storage, discarding staged changes to it.
    fn refresh(&mut self, entity: &EntityName, id: &EntityId) -> StorageResult<Record>;

    /// Delete a record by identifier.
    fn delete(&mut self, entity: &EntityName, id: &EntityId) -> StorageResult<()>;

    /// Load every record of an entity, ordered by identifier.
    fn find_all(&mut self, entity: &EntityName) -> StorageResult<Vec<Record>>;

    /// Count the records of an entity.
    fn count(&mut self, entity: &EntityName) -> StorageResult<u64>;

    /// Ad-hoc query: every record of an entity matching the predicate.
    fn select(
        &mut self,
        entity: &EntityName,
        predicate: &dyn Fn(&Record) -> bool,
    ) -> StorageResult<Vec<Record>>;
}

/// Source of sessions, shared across threads.
pub trait SessionFactory: Send + Sync {
    /// Open a fresh session.
    fn open_session(&self) -> StorageResult<Box<dyn Session>>;

    /// Shared second-level cache attached to this backend, if any.
    fn cache(&self) -> Option<Arc<dyn EntityCache>> {
        None
    }
}

/// Shared second-level entity cache.
///
/// The execution layer only ever evicts - it never populates - so eviction
/// must be idempotent and safe to repeat.
pub trait EntityCache: Send + Sync {
    fn evict_entity(&self, key: &EntityKey);
}
