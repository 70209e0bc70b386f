//! # Commitflow Testing
//!
//! Fast, deterministic in-memory collaborators for testing projections and the
//! commit serializer without a database:
//!
//! - [`InMemoryEventStore`]: Live-tailing commit log implementing `EventStore`
//! - [`InMemoryCheckpointStore`]: `CheckpointStore` with write/read failure injection
//! - [`RecordingProjector`]: Projector that records every commit it applies
//!
//! ## Example
//!
//! ```ignore
//! use commitflow_testing::*;
//!
//! let events = InMemoryEventStore::new();
//! let checkpoints = InMemoryCheckpointStore::new();
//! let log = ProjectionLog::new();
//!
//! events.append("account-1", vec![]);
//! checkpoints.fail_writes_for(ProjectorId::new(3), CheckpointToken::new(54));
//! ```

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap on poisoned locks
#![allow(clippy::missing_panics_doc)] // Panics only on poisoned locks

/// In-memory checkpoint store
pub mod checkpoint;

/// In-memory event store
pub mod event_store;

/// Recording projectors
pub mod projectors;

pub use checkpoint::InMemoryCheckpointStore;
pub use event_store::InMemoryEventStore;
pub use projectors::{ProjectionLog, RecordingProjector};
