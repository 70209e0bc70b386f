//! Schema Initializer for the checkpoint table.
//!
//! ```sql
//! CREATE TABLE projector_status (
//!     projector_id          INTEGER      NOT NULL PRIMARY KEY,
//!     projector_name        VARCHAR(800) NOT NULL,
//!     last_checkpoint_token BIGINT       NULL
//! );
//! ```
//!
//! The existence check and the `CREATE TABLE` run in one transaction holding a
//! transaction-scoped advisory lock, so processes starting concurrently against
//! an empty database serialize here: the first creates the table and the rest
//! find it in the catalog.

use commitflow_core::error::{ProjectionError, Result};
use sqlx::postgres::PgPool;

/// Name of the checkpoint table.
pub const CHECKPOINT_TABLE: &str = "projector_status";

/// Advisory lock key guarding schema creation ("commitfl" in ASCII).
const SCHEMA_LOCK_KEY: i64 = 0x636f_6d6d_6974_666c;

const CREATE_CHECKPOINT_TABLE: &str = "CREATE TABLE projector_status (
    projector_id INTEGER NOT NULL PRIMARY KEY,
    projector_name VARCHAR(800) NOT NULL,
    last_checkpoint_token BIGINT NULL
)";

fn storage(context: &'static str) -> impl Fn(sqlx::Error) -> ProjectionError {
    move |e| ProjectionError::Storage(format!("{context}: {e}"))
}

/// Ensure the checkpoint table exists, creating it only if absent.
///
/// Returns `true` if this call created the table.
///
/// # Errors
///
/// Returns [`ProjectionError::Storage`] if the catalog cannot be queried or the
/// table cannot be created.
pub async fn ensure_schema(pool: &PgPool) -> Result<bool> {
    let mut tx = pool
        .begin()
        .await
        .map_err(storage("Failed to begin schema transaction"))?;

    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(SCHEMA_LOCK_KEY)
        .execute(&mut *tx)
        .await
        .map_err(storage("Failed to acquire schema lock"))?;

    let (exists,): (bool,) = sqlx::query_as(
        "SELECT EXISTS (
             SELECT 1 FROM information_schema.tables
             WHERE table_schema = current_schema() AND table_name = $1
         )",
    )
    .bind(CHECKPOINT_TABLE)
    .fetch_one(&mut *tx)
    .await
    .map_err(storage("Failed to check for checkpoint table"))?;

    if !exists {
        sqlx::query(CREATE_CHECKPOINT_TABLE)
            .execute(&mut *tx)
            .await
            .map_err(storage("Failed to create checkpoint table"))?;
    }

    tx.commit()
        .await
        .map_err(storage("Failed to commit schema transaction"))?;

    if exists {
        tracing::debug!(table = CHECKPOINT_TABLE, "Checkpoint table already present");
    } else {
        tracing::info!(table = CHECKPOINT_TABLE, "Created checkpoint table");
    }
    Ok(!exists)
}
