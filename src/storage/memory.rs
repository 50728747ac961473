//! In-memory versioned storage backend.
//!
//! The reference `Session` implementation: records are versioned, writes on
//! a transactional session are staged locally, and versions are checked both
//! when a write is staged and again when the session commits. A write whose
//! base version no longer matches the shared store fails with
//! `StorageError::StaleVersion` - the signal the execution engine retries on.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;
use ulid::Ulid;

use crate::storage::errors::{StorageError, StorageResult};
use crate::storage::session::{EntityCache, Session, SessionFactory};
use crate::storage::types::{EntityId, EntityKey, EntityName, Record};

/// Backend counters exposed for diagnostics.
#[derive(Debug, Default)]
pub struct BackendStats {
    sessions_opened: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
    conflicts: AtomicU64,
}

impl BackendStats {
    pub fn sessions_opened(&self) -> u64 {
        self.sessions_opened.load(Ordering::Relaxed)
    }

    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }

    pub fn rollbacks(&self) -> u64 {
        self.rollbacks.load(Ordering::Relaxed)
    }

    /// stale-version rejections observed, at staging or commit time
    pub fn conflicts(&self) -> u64 {
        self.conflicts.load(Ordering::Relaxed)
    }
}

/// In-memory storage backend.
///
/// Thread-safe: can be shared across threads via Clone (uses Arc internally).
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    tables: RwLock<HashMap<EntityName, BTreeMap<EntityId, Record>>>,
    cache: Option<Arc<dyn EntityCache>>,
    stats: BackendStats,
}

impl MemoryBackend {
    /// Create an empty backend with no attached cache.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Create an empty backend with a shared second-level cache attached.
    pub fn with_cache(cache: Arc<dyn EntityCache>) -> Self {
        Self::build(Some(cache))
    }

    fn build(cache: Option<Arc<dyn EntityCache>>) -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                tables: RwLock::new(HashMap::new()),
                cache,
                stats: BackendStats::default(),
            }),
        }
    }

    pub fn stats(&self) -> &BackendStats {
        &self.inner.stats
    }

    /// Read a committed record directly, outside any session.
    pub fn peek(&self, entity: &EntityName, id: &EntityId) -> Option<Record> {
        let tables = self.inner.tables.read();
        tables.get(entity).and_then(|rows| rows.get(id)).cloned()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionFactory for MemoryBackend {
    fn open_session(&self) -> StorageResult<Box<dyn Session>> {
        self.inner.stats.sessions_opened.fetch_add(1, Ordering::Relaxed);
        let id = Ulid::new().to_string().to_lowercase();
        debug!(session = %id, "memory session opened");
        Ok(Box::new(MemorySession {
            inner: self.inner.clone(),
            id,
            open: true,
            in_tx: false,
            staged: BTreeMap::new(),
        }))
    }

    fn cache(&self) -> Option<Arc<dyn EntityCache>> {
        self.inner.cache.clone()
    }
}

enum StagedWrite {
    Put(Record),
    Delete,
}

struct StagedEntry {
    /// store version this session first saw for the key; 0 if absent
    base_version: u64,
    write: StagedWrite,
}

/// One session against a `MemoryBackend`.
pub struct MemorySession {
    inner: Arc<MemoryInner>,
    id: String,
    open: bool,
    in_tx: bool,
    staged: BTreeMap<EntityKey, StagedEntry>,
}

impl MemorySession {
    fn ensure_open(&self) -> StorageResult<()> {
        if self.open {
            Ok(())
        } else {
            Err(StorageError::SessionClosed)
        }
    }

    fn stored_version(
        tables: &HashMap<EntityName, BTreeMap<EntityId, Record>>,
        key: &EntityKey,
    ) -> u64 {
        tables
            .get(&key.entity)
            .and_then(|rows| rows.get(&key.id))
            .map(|record| record.version())
            .unwrap_or(0)
    }

    /// version the session currently sees for a key: staged overlay first,
    /// then the shared store; None if the key is absent or staged-deleted
    fn visible_version(
        &self,
        tables: &HashMap<EntityName, BTreeMap<EntityId, Record>>,
        key: &EntityKey,
    ) -> Option<u64> {
        if let Some(entry) = self.staged.get(key) {
            return match &entry.write {
                StagedWrite::Put(record) => Some(record.version()),
                StagedWrite::Delete => None,
            };
        }
        tables
            .get(&key.entity)
            .and_then(|rows| rows.get(&key.id))
            .map(|record| record.version())
    }

    fn base_version(
        &self,
        tables: &HashMap<EntityName, BTreeMap<EntityId, Record>>,
        key: &EntityKey,
    ) -> u64 {
        match self.staged.get(key) {
            Some(entry) => entry.base_version,
            None => Self::stored_version(tables, key),
        }
    }

    fn conflict(&self, key: EntityKey, expected: u64, actual: u64) -> StorageError {
        self.inner.stats.conflicts.fetch_add(1, Ordering::Relaxed);
        StorageError::StaleVersion {
            key,
            expected,
            actual,
        }
    }
}

impl Session for MemorySession {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn begin(&mut self) -> StorageResult<()> {
        self.ensure_open()?;
        if self.in_tx {
            return Err(StorageError::Internal(
                "transaction already active".to_string(),
            ));
        }
        self.in_tx = true;
        Ok(())
    }

    fn commit(&mut self) -> StorageResult<()> {
        self.ensure_open()?;
        if !self.in_tx {
            return Err(StorageError::NoTransaction);
        }
        self.in_tx = false;
        let staged = std::mem::take(&mut self.staged);

        let mut tables = self.inner.tables.write();
        for (key, entry) in &staged {
            let current = Self::stored_version(&tables, key);
            if current != entry.base_version {
                return Err(self.conflict(key.clone(), entry.base_version, current));
            }
        }
        for (key, entry) in staged {
            match entry.write {
                StagedWrite::Put(record) => {
                    tables
                        .entry(key.entity)
                        .or_default()
                        .insert(key.id, record);
                }
                StagedWrite::Delete => {
                    if let Some(rows) = tables.get_mut(&key.entity) {
                        rows.remove(&key.id);
                    }
                }
            }
        }
        self.inner.stats.commits.fetch_add(1, Ordering::Relaxed);
        debug!(session = %self.id, "memory session committed");
        Ok(())
    }

    fn rollback(&mut self) -> StorageResult<()> {
        self.ensure_open()?;
        if !self.in_tx {
            return Err(StorageError::NoTransaction);
        }
        self.in_tx = false;
        self.staged.clear();
        self.inner.stats.rollbacks.fetch_add(1, Ordering::Relaxed);
        debug!(session = %self.id, "memory session rolled back");
        Ok(())
    }

    fn close(&mut self) -> StorageResult<()> {
        if self.open {
            self.open = false;
            self.in_tx = false;
            self.staged.clear();
        }
        Ok(())
    }

    fn get(&mut self, entity: &EntityName, id: &EntityId) -> StorageResult<Option<Record>> {
        self.ensure_open()?;
        let key = EntityKey::new(entity.clone(), id.clone());
        if let Some(entry) = self.staged.get(&key) {
            return Ok(match &entry.write {
                StagedWrite::Put(record) => Some(record.clone()),
                StagedWrite::Delete => None,
            });
        }
        let tables = self.inner.tables.read();
        Ok(tables.get(entity).and_then(|rows| rows.get(id)).cloned())
    }

    fn save_or_update(&mut self, entity: &EntityName, record: Record) -> StorageResult<Record> {
        self.ensure_open()?;
        let key = EntityKey::new(entity.clone(), record.id().clone());

        if self.in_tx {
            let tables = self.inner.tables.read();
            let base = self.base_version(&tables, &key);
            let current = self.visible_version(&tables, &key).unwrap_or(0);
            drop(tables);

            if record.version() != current {
                return Err(self.conflict(key, record.version(), current));
            }
            let updated = record.with_version(current + 1);
            self.staged.insert(
                key,
                StagedEntry {
                    base_version: base,
                    write: StagedWrite::Put(updated.clone()),
                },
            );
            Ok(updated)
        } else {
            let mut tables = self.inner.tables.write();
            let current = Self::stored_version(&tables, &key);
            if record.version() != current {
                return Err(self.conflict(key, record.version(), current));
            }
            let updated = record.with_version(current + 1);
            tables
                .entry(key.entity)
                .or_default()
                .insert(key.id, updated.clone());
            Ok(updated)
        }
    }

    fn merge(&mut self, entity: &EntityName, record: Record) -> StorageResult<Record> {
        // detached records carry their version token, so the semantics
        // coincide with save_or_update in this backend
        self.save_or_update(entity, record)
    }

    fn refresh(&mut self, entity: &EntityName, id: &EntityId) -> StorageResult<Record> {
        self.ensure_open()?;
        let key = EntityKey::new(entity.clone(), id.clone());
        self.staged.remove(&key);
        let tables = self.inner.tables.read();
        tables
            .get(entity)
            .and_then(|rows| rows.get(id))
            .cloned()
            .ok_or(StorageError::NotFound { key })
    }

    fn delete(&mut self, entity: &EntityName, id: &EntityId) -> StorageResult<()> {
        self.ensure_open()?;
        let key = EntityKey::new(entity.clone(), id.clone());

        if self.in_tx {
            let tables = self.inner.tables.read();
            if self.visible_version(&tables, &key).is_none() {
                return Err(StorageError::NotFound { key });
            }
            let base = self.base_version(&tables, &key);
            drop(tables);
            self.staged.insert(
                key,
                StagedEntry {
                    base_version: base,
                    write: StagedWrite::Delete,
                },
            );
            Ok(())
        } else {
            let mut tables = self.inner.tables.write();
            let removed = tables
                .get_mut(entity)
                .and_then(|rows| rows.remove(id))
                .is_some();
            if removed {
                Ok(())
            } else {
                Err(StorageError::NotFound { key })
            }
        }
    }

    fn find_all(&mut self, entity: &EntityName) -> StorageResult<Vec<Record>> {
        self.ensure_open()?;
        let tables = self.inner.tables.read();
        let mut rows: BTreeMap<EntityId, Record> = tables
            .get(entity)
            .map(|rows| {
                rows.iter()
                    .map(|(id, record)| (id.clone(), record.clone()))
                    .collect()
            })
            .unwrap_or_default();
        drop(tables);

        for (key, entry) in &self.staged {
            if key.entity != *entity {
                continue;
            }
            match &entry.write {
                StagedWrite::Put(record) => {
                    rows.insert(key.id.clone(), record.clone());
                }
                StagedWrite::Delete => {
                    rows.remove(&key.id);
                }
            }
        }
        Ok(rows.into_values().collect())
    }

    fn count(&mut self, entity: &EntityName) -> StorageResult<u64> {
        Ok(self.find_all(entity)?.len() as u64)
    }

    fn select(
        &mut self,
        entity: &EntityName,
        predicate: &dyn Fn(&Record) -> bool,
    ) -> StorageResult<Vec<Record>> {
        let rows = self.find_all(entity)?;
        Ok(rows.into_iter().filter(|record| predicate(record)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity() -> EntityName {
        EntityName::new("players").unwrap()
    }

    fn record(id: &str) -> Record {
        Record::new(EntityId::new(id).unwrap()).with_field("name", id)
    }

    #[test]
    fn test_insert_commit_visible() {
        let backend = MemoryBackend::new();
        let mut session = backend.open_session().unwrap();

        session.begin().unwrap();
        let saved = session.save_or_update(&entity(), record("p1")).unwrap();
        assert_eq!(saved.version(), 1);

        // not committed yet - invisible to other sessions
        assert!(backend.peek(&entity(), saved.id()).is_none());

        session.commit().unwrap();
        session.close().unwrap();

        let stored = backend.peek(&entity(), saved.id()).unwrap();
        assert_eq!(stored.version(), 1);
        assert_eq!(backend.stats().commits(), 1);
    }

    #[test]
    fn test_rollback_discards_staged_writes() {
        let backend = MemoryBackend::new();
        let mut session = backend.open_session().unwrap();

        session.begin().unwrap();
        session.save_or_update(&entity(), record("p1")).unwrap();
        session.rollback().unwrap();

        assert!(backend
            .peek(&entity(), &EntityId::new("p1").unwrap())
            .is_none());
        assert_eq!(backend.stats().rollbacks(), 1);
    }

    #[test]
    fn test_stale_save_is_rejected() {
        let backend = MemoryBackend::new();
        let mut session = backend.open_session().unwrap();
        let saved = session.save_or_update(&entity(), record("p1")).unwrap();

        // writing back with the original version 0 token must fail
        let err = session
            .save_or_update(&entity(), record("p1"))
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(backend.stats().conflicts(), 1);

        // the bumped token works
        let updated = session
            .save_or_update(&entity(), saved.with_field("mana", 5))
            .unwrap();
        assert_eq!(updated.version(), 2);
    }

    #[test]
    fn test_commit_conflict_between_sessions() {
        let backend = MemoryBackend::new();

        // seed a committed record at version 1
        let mut seed = backend.open_session().unwrap();
        let stored = seed.save_or_update(&entity(), record("p1")).unwrap();
        seed.close().unwrap();

        let mut first = backend.open_session().unwrap();
        let mut second = backend.open_session().unwrap();
        first.begin().unwrap();
        second.begin().unwrap();

        first
            .save_or_update(&entity(), stored.clone().with_field("mana", 1))
            .unwrap();
        second
            .save_or_update(&entity(), stored.with_field("mana", 2))
            .unwrap();

        first.commit().unwrap();
        let err = second.commit().unwrap_err();
        assert!(err.is_conflict());

        let winner = backend
            .peek(&entity(), &EntityId::new("p1").unwrap())
            .unwrap();
        assert_eq!(winner.get("mana"), Some(&serde_json::Value::from(1)));
    }

    #[test]
    fn test_session_sees_own_staged_writes() {
        let backend = MemoryBackend::new();
        let mut session = backend.open_session().unwrap();

        session.begin().unwrap();
        session.save_or_update(&entity(), record("p1")).unwrap();

        let seen = session
            .get(&entity(), &EntityId::new("p1").unwrap())
            .unwrap();
        assert!(seen.is_some());

        session
            .delete(&entity(), &EntityId::new("p1").unwrap())
            .unwrap();
        let seen = session
            .get(&entity(), &EntityId::new("p1").unwrap())
            .unwrap();
        assert!(seen.is_none());
    }

    #[test]
    fn test_refresh_discards_staged_changes() {
        let backend = MemoryBackend::new();
        let mut seed = backend.open_session().unwrap();
        let stored = seed.save_or_update(&entity(), record("p1")).unwrap();
        seed.close().unwrap();

        let mut session = backend.open_session().unwrap();
        session.begin().unwrap();
        session
            .save_or_update(&entity(), stored.with_field("mana", 99))
            .unwrap();

        let fresh = session.refresh(&entity(), &EntityId::new("p1").unwrap()).unwrap();
        assert_eq!(fresh.get("mana"), None);
        assert_eq!(fresh.version(), 1);
    }

    #[test]
    fn test_find_all_merges_staged_overlay() {
        let backend = MemoryBackend::new();
        let mut seed = backend.open_session().unwrap();
        seed.save_or_update(&entity(), record("p1")).unwrap();
        let p2 = seed.save_or_update(&entity(), record("p2")).unwrap();
        seed.close().unwrap();

        let mut session = backend.open_session().unwrap();
        session.begin().unwrap();
        session.save_or_update(&entity(), record("p3")).unwrap();
        session.delete(&entity(), p2.id()).unwrap();

        let all = session.find_all(&entity()).unwrap();
        let ids: Vec<&str> = all.iter().map(|r| r.id().as_str()).collect();
        assert_eq!(ids, vec!["p1", "p3"]);
        assert_eq!(session.count(&entity()).unwrap(), 2);
    }

    #[test]
    fn test_select_filters_records() {
        let backend = MemoryBackend::new();
        let mut session = backend.open_session().unwrap();
        session
            .save_or_update(&entity(), record("p1").with_field("mana", 10))
            .unwrap();
        session
            .save_or_update(&entity(), record("p2").with_field("mana", 50))
            .unwrap();

        let strong = session
            .select(&entity(), &|r| {
                r.get("mana").and_then(|v| v.as_u64()).unwrap_or(0) > 20
            })
            .unwrap();
        assert_eq!(strong.len(), 1);
        assert_eq!(strong[0].id().as_str(), "p2");
    }

    #[test]
    fn test_delete_missing_record() {
        let backend = MemoryBackend::new();
        let mut session = backend.open_session().unwrap();
        let err = session
            .delete(&entity(), &EntityId::new("ghost").unwrap())
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[test]
    fn test_closed_session_rejects_operations() {
        let backend = MemoryBackend::new();
        let mut session = backend.open_session().unwrap();
        session.close().unwrap();

        assert!(!session.is_open());
        let err = session
            .get(&entity(), &EntityId::new("p1").unwrap())
            .unwrap_err();
        assert_eq!(err, StorageError::SessionClosed);
        // close is idempotent
        session.close().unwrap();
    }

    #[test]
    fn test_commit_without_begin() {
        let backend = MemoryBackend::new();
        let mut session = backend.open_session().unwrap();
        assert_eq!(session.commit().unwrap_err(), StorageError::NoTransaction);
    }

    #[test]
    fn test_non_transactional_writes_apply_immediately() {
        let backend = MemoryBackend::new();
        let mut session = backend.open_session().unwrap();
        let saved = session.save_or_update(&entity(), record("p1")).unwrap();

        assert!(backend.peek(&entity(), saved.id()).is_some());
        assert_eq!(backend.stats().commits(), 0);
    }
}
