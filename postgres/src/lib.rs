//! `PostgreSQL` checkpoint storage for commitflow.
//!
//! This crate provides the durable side of checkpoint-consistent projection:
//!
//! - [`ensure_schema`]: idempotent, race-free creation of the `projector_status` table
//! - [`upsert_checkpoint`] / [`read_checkpoint`]: single-statement upsert and lookup,
//!   usable on a pool or inside a projector's own transaction
//! - [`PostgresCheckpointStore`]: the `CheckpointStore` the commit serializer writes through
//! - [`PostgresConfig`]: pool settings from the environment
//!
//! # Example
//!
//! ```ignore
//! use commitflow_postgres::{PostgresCheckpointStore, PostgresConfig};
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresCheckpointStore::connect(&PostgresConfig::from_env()).await?;
//!     store.ensure_schema().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod checkpoint;
pub mod config;
pub mod schema;

pub use checkpoint::{PostgresCheckpointStore, load_record, read_checkpoint, upsert_checkpoint};
pub use config::PostgresConfig;
pub use schema::{CHECKPOINT_TABLE, ensure_schema};
