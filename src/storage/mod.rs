//! Storage collaborator layer.
//!
//! The execution engine sits above an opaque relational backend. This
//! module defines the contracts the backend must satisfy (`Session`,
//! `SessionFactory`, `EntityCache`), the versioned record model crossing
//! that boundary, the error surface the engine classifies, and an
//! in-memory reference backend.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     execution engine                        │
//! │        (owns sessions, classifies storage errors)           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!        ┌─────────────────────┼─────────────────────┐
//!        │                     │                     │
//!        ▼                     ▼                     ▼
//!  ┌─────────────┐       ┌─────────────┐       ┌─────────────┐
//!  │   session   │       │    types    │       │   errors    │
//!  │ (contracts) │       │  (records)  │       │ (classify)  │
//!  └─────────────┘       └─────────────┘       └─────────────┘
//!         │
//!         ▼
//!  ┌─────────────┐
//!  │   memory    │
//!  │  (backend)  │
//!  └─────────────┘
//! ```

mod errors;
mod memory;
mod session;
mod types;

// Re-export public API
pub use errors::{StorageError, StorageResult};
pub use memory::{BackendStats, MemoryBackend, MemorySession};
pub use session::{EntityCache, Session, SessionFactory};
pub use types::{EntityId, EntityKey, EntityName, InvalidNameError, Record};
