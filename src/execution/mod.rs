//! Transactional execution engine.
//!
//! This module implements the unit-of-work retry machinery: a caller hands
//! the engine an operation, and the engine owns the session lifecycle,
//! classifies failures, and restarts the operation on optimistic-locking
//! conflicts and transient storage errors.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Database                            │
//! │   (retry loop, begin/commit/rollback, failure dispatch)     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!        ┌─────────────────────┼─────────────────────┐
//!        │                     │                     │
//!        ▼                     ▼                     ▼
//!  ┌─────────────┐       ┌─────────────┐       ┌─────────────┐
//!  │ Operation   │       │ UnitOfWork  │       │  Outcome    │
//!  │  Context    │       │ (contract)  │       │ (classify)  │
//!  └─────────────┘       └─────────────┘       └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use optx::execution::{Database, OperationContext};
//!
//! let db = Database::new(factory);
//!
//! db.execute(&|cx: &mut OperationContext| {
//!     let record = cx.session()?.get(&players, &id)?;
//!     // mutate and write back; a lost version race retries the
//!     // whole closure on a fresh session
//!     Ok(())
//! })?;
//! ```

mod context;
mod engine;
mod error;
mod outcome;
mod unit;

pub use context::{OperationContext, SuccessAction};
pub use engine::{Database, DatabaseConfig};
pub use error::{AppError, ExecutionError, ExecutionResult, RetrySignal};
pub use outcome::{assess, classify, conflict_target, AttemptOutcome, Disposition};
pub use unit::UnitOfWork;
