//! optx - An Optimistic Transactional Execution Layer
//!
//! This crate runs units of work against a relational storage backend with
//! automatic retry on optimistic-locking conflicts and transient storage
//! errors. A unit of work is one logical, atomic operation: the engine opens
//! a session, begins a transaction, runs your action, and commits - and when
//! a versioned update loses a race, it rolls back, backs off, and runs the
//! whole action again on a fresh session.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use optx::execution::{Database, ExecutionResult, OperationContext};
//! use optx::storage::{EntityId, EntityName, MemoryBackend, Record};
//!
//! let db = Database::new(Arc::new(MemoryBackend::new()));
//! let players = EntityName::new("players").unwrap();
//!
//! db.execute(&|cx: &mut OperationContext| -> ExecutionResult<()> {
//!     let record = Record::new(EntityId::new("p1").unwrap())
//!         .with_field("name", "Alice")
//!         .with_field("mana", 100);
//!     cx.session()?.save_or_update(&players, record)?;
//!     Ok(())
//! })
//! .unwrap();
//! ```

pub mod execution;
pub mod repository;
pub mod storage;
