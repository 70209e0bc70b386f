//! # Commitflow Core
//!
//! Core traits and types for projecting an ordered commit log into
//! independently checkpointed read models.
//!
//! ## Core Concepts
//!
//! - **Commit**: An immutable, totally ordered unit read from the event store
//! - **Checkpoint token**: The position of a commit in the global order
//! - **Projector**: A consumer that applies commits to derived state
//! - **Checkpoint record**: Persisted per-projector progress, one row per projector id
//!
//! ## Data Flow
//!
//! ```text
//! ┌─────────────┐    ┌──────────────────┐    ┌───────────┐    ┌──────────────────┐
//! │ Event Store │ →  │ Commit Serializer│ →  │ Projector │ →  │ Checkpoint Store │
//! └─────────────┘    └──────────────────┘    └───────────┘    └──────────────────┘
//!        ▲                                                             │
//!        └──────────────── resume from last checkpoint ────────────────┘
//! ```
//!
//! The serializer itself lives in `commitflow-projections`; storage backends live in
//! `commitflow-postgres` and `commitflow-testing`.

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

/// Checkpoint tokens, checkpoint records and the checkpoint store abstraction
pub mod checkpoint;

/// Commits delivered by the event store
pub mod commit;

/// Error taxonomy shared by every component
pub mod error;

/// Event store abstraction (ordered, resumable commit source)
pub mod event_store;

/// Projector trait, identities and identity resolution
pub mod projector;

pub use checkpoint::{CheckpointRecord, CheckpointStore, CheckpointToken};
pub use commit::{Commit, CommittedEvent};
pub use error::{ProjectionError, Result};
pub use event_store::{CommitStream, EventStore, EventStoreError};
pub use projector::{
    CheckpointScope, IdentityTable, Projector, ProjectorFactory, ProjectorId, ProjectorIdentity,
    ProjectorType,
};
