//! Checkpoint-consistent projection runtime for commitflow.
//!
//! # Overview
//!
//! This crate assembles the moving parts defined in `commitflow-core`:
//! - **[`ProjectorRegistry`]**: validated `projector_id -> instance` mapping built once at startup
//! - **[`CommitSerializer`]**: single ordered dispatcher from the event store to every projector,
//!   persisting each projector's checkpoint after it applies a commit
//! - **[`AddressRegistry`]**: write-once, lookup-only directory of worker addresses
//!
//! # Wiring
//!
//! ```text
//! IdentityTable ─┐
//!                ├─► ProjectorRegistry ─┐
//! FactoryTable ──┘                      │
//!                                       ├─► CommitSerializer::start ─► SerializerHandle
//! EventStore ───────────────────────────┤                                   │ address()
//! CheckpointStore ──────────────────────┘                                   ▼
//!                                                                     AddressRegistry
//! ```
//!
//! # Example
//!
//! ```ignore
//! use commitflow_projections::*;
//!
//! let registry = ProjectorRegistry::builder(identities, Arc::new(factory))
//!     .register_all(projector_types)?
//!     .build()?;
//!
//! let handle = CommitSerializer::new(Arc::new(registry), event_store, checkpoint_store)
//!     .start()
//!     .await?;
//!
//! let addresses = AddressRegistry::builder()
//!     .register_address(COMMIT_SERIALIZER, handle.address())?
//!     .build();
//! ```

pub mod address;
pub mod registry;
pub mod serializer;

pub use address::{AddressRegistry, AddressRegistryBuilder, COMMIT_SERIALIZER};
pub use registry::{FactoryTable, ProjectorRegistry, ProjectorRegistryBuilder, RegisteredProjector};
pub use serializer::{
    CommitSerializer, SerializerAddress, SerializerHandle, SerializerState, SerializerStatus,
};
