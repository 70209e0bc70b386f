//! PostgreSQL-backed Checkpoint Store.
//!
//! # Scopes
//!
//! The free functions take any [`PgExecutor`], so the same upsert serves both
//! checkpoint scopes:
//!
//! ```ignore
//! // Standalone: its own pooled connection, no atomicity with business writes.
//! upsert_checkpoint(&pool, &record).await?;
//!
//! // Ambient transaction: committed (or rolled back) with the projector's writes.
//! let mut tx = pool.begin().await?;
//! sqlx::query("UPDATE balances SET ...").execute(&mut *tx).await?;
//! upsert_checkpoint(&mut *tx, &record).await?;
//! tx.commit().await?;
//! ```
//!
//! The token crosses the boundary in its nullable string form and is cast to
//! `BIGINT` by the database.

use commitflow_core::checkpoint::{
    CheckpointRecord, CheckpointStore, CheckpointToken, checkpoint_from_storage,
};
use commitflow_core::error::{ProjectionError, Result};
use commitflow_core::projector::ProjectorId;
use crate::config::PostgresConfig;
use crate::schema;
use sqlx::PgExecutor;
use sqlx::postgres::PgPool;
use std::future::Future;
use std::pin::Pin;

/// Write or update the single record for `record.projector_id`.
///
/// An existing record only has its token replaced; the stored name is kept.
///
/// # Errors
///
/// Returns [`ProjectionError::TokenOutOfRange`] if the token does not fit the
/// `BIGINT` column (nothing is sent to the database), or
/// [`ProjectionError::Storage`] if the statement fails.
pub async fn upsert_checkpoint<'e, E>(executor: E, record: &CheckpointRecord) -> Result<()>
where
    E: PgExecutor<'e>,
{
    record.validate()?;

    sqlx::query(
        "INSERT INTO projector_status (projector_id, projector_name, last_checkpoint_token)
         VALUES ($1, $2, $3::BIGINT)
         ON CONFLICT (projector_id) DO UPDATE
         SET last_checkpoint_token = EXCLUDED.last_checkpoint_token",
    )
    .bind(record.projector_id.as_i32())
    .bind(&record.projector_name)
    .bind(record.storage_token())
    .execute(executor)
    .await
    .map_err(|e| {
        ProjectionError::Storage(format!(
            "Failed to save checkpoint for projector {}: {e}",
            record.projector_id
        ))
    })?;

    Ok(())
}

/// Read the stored token for a projector; `None` if no record or no token.
///
/// # Errors
///
/// Returns [`ProjectionError::Storage`] if the query fails or the stored value
/// is not a valid token.
pub async fn read_checkpoint<'e, E>(
    executor: E,
    projector_id: ProjectorId,
) -> Result<Option<CheckpointToken>>
where
    E: PgExecutor<'e>,
{
    Ok(load_record(executor, projector_id)
        .await?
        .and_then(|record| record.last_checkpoint))
}

/// Load the full record for a projector.
///
/// # Errors
///
/// Returns [`ProjectionError::Storage`] if the query fails or the stored value
/// is not a valid token.
pub async fn load_record<'e, E>(
    executor: E,
    projector_id: ProjectorId,
) -> Result<Option<CheckpointRecord>>
where
    E: PgExecutor<'e>,
{
    let row: Option<(String, Option<String>)> = sqlx::query_as(
        "SELECT projector_name, last_checkpoint_token::TEXT
         FROM projector_status
         WHERE projector_id = $1",
    )
    .bind(projector_id.as_i32())
    .fetch_optional(executor)
    .await
    .map_err(|e| {
        ProjectionError::Storage(format!(
            "Failed to load checkpoint for projector {projector_id}: {e}"
        ))
    })?;

    row.map(|(projector_name, token)| {
        let last_checkpoint = checkpoint_from_storage(token.as_deref())
            .map_err(|e| ProjectionError::Storage(e.to_string()))?;
        Ok(CheckpointRecord {
            projector_id,
            projector_name,
            last_checkpoint,
        })
    })
    .transpose()
}

/// [`CheckpointStore`] writing through a connection pool (standalone scope).
///
/// # Example
///
/// ```ignore
/// let store = PostgresCheckpointStore::connect(&PostgresConfig::from_env()).await?;
/// store.ensure_schema().await?;
/// ```
#[derive(Clone, Debug)]
pub struct PostgresCheckpointStore {
    pool: PgPool,
}

impl PostgresCheckpointStore {
    /// Create a store over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a store with its own pool.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the connection fails.
    pub async fn connect(config: &PostgresConfig) -> Result<Self> {
        Ok(Self::new(config.connect().await?))
    }

    /// Get the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl CheckpointStore for PostgresCheckpointStore {
    fn ensure_schema(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            schema::ensure_schema(&self.pool).await?;
            Ok(())
        })
    }

    fn upsert_checkpoint<'a>(
        &'a self,
        record: &'a CheckpointRecord,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(upsert_checkpoint(&self.pool, record))
    }

    fn read_checkpoint(
        &self,
        projector_id: ProjectorId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<CheckpointToken>>> + Send + '_>> {
        Box::pin(read_checkpoint(&self.pool, projector_id))
    }
}
