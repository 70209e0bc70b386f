//! Account projectors.
//!
//! - [`AccountBalances`] keeps one balance row per account. The balance update and
//!   the checkpoint are written in the same transaction, so a crash can never apply
//!   a commit twice.
//! - [`AuditTrail`] appends one row per commit on its own connection and leaves the
//!   checkpoint to the serializer. Re-delivered commits hit the primary key and are
//!   ignored.

use commitflow_core::checkpoint::CheckpointRecord;
use commitflow_core::commit::{Commit, CommittedEvent};
use commitflow_core::error::{ProjectionError, Result};
use commitflow_core::projector::{CheckpointScope, Projector, ProjectorIdentity};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::future::Future;
use std::pin::Pin;

/// Stream id prefix of account streams.
pub const ACCOUNT_STREAM_PREFIX: &str = "account-";

/// Events written to account streams.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AccountEvent {
    /// Money paid in
    Deposited {
        /// Amount in cents
        amount_cents: i64,
    },
    /// Money paid out
    Withdrawn {
        /// Amount in cents
        amount_cents: i64,
    },
}

impl AccountEvent {
    /// Event type name used in commits.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::Deposited { .. } => "Deposited",
            Self::Withdrawn { .. } => "Withdrawn",
        }
    }

    /// Signed change to the balance.
    #[must_use]
    pub const fn delta_cents(&self) -> i64 {
        match self {
            Self::Deposited { amount_cents } => *amount_cents,
            Self::Withdrawn { amount_cents } => -*amount_cents,
        }
    }

    /// Encode as a committed event.
    #[must_use]
    pub fn to_committed(&self) -> CommittedEvent {
        CommittedEvent::new(
            self.event_type(),
            serde_json::to_value(self).unwrap_or(serde_json::Value::Null),
        )
    }

    /// Decode a committed event.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the body is not an account event.
    pub fn from_committed(event: &CommittedEvent) -> Result<Self> {
        serde_json::from_value(event.body.clone()).map_err(|e| {
            ProjectionError::Storage(format!(
                "Failed to decode {} event: {e}",
                event.event_type
            ))
        })
    }
}

/// Net balance change carried by a commit.
///
/// # Errors
///
/// Returns [`ProjectionError::Storage`] if any event cannot be decoded.
pub fn commit_delta(commit: &Commit) -> Result<i64> {
    commit.events.iter().try_fold(0_i64, |total, event| {
        Ok(total + AccountEvent::from_committed(event)?.delta_cents())
    })
}

/// Create the demo's read-model tables if they do not exist.
///
/// # Errors
///
/// Returns [`ProjectionError::Storage`] if a statement fails.
pub async fn ensure_tables(pool: &PgPool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS account_balances (
            account_id TEXT PRIMARY KEY,
            balance_cents BIGINT NOT NULL,
            commits_applied BIGINT NOT NULL
        )",
    )
    .execute(pool)
    .await
    .map_err(|e| ProjectionError::Storage(format!("Failed to create account_balances: {e}")))?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS audit_trail (
            checkpoint BIGINT PRIMARY KEY,
            stream_id TEXT NOT NULL,
            event_count INTEGER NOT NULL,
            committed_at TIMESTAMPTZ NOT NULL
        )",
    )
    .execute(pool)
    .await
    .map_err(|e| ProjectionError::Storage(format!("Failed to create audit_trail: {e}")))?;

    Ok(())
}

/// Projector maintaining `account_balances`.
pub struct AccountBalances {
    pool: PgPool,
}

impl AccountBalances {
    /// Create the projector over a projection database pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Query: all balances ordered by account.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the query fails.
    pub async fn balances(pool: &PgPool) -> Result<Vec<(String, i64)>> {
        sqlx::query_as("SELECT account_id, balance_cents FROM account_balances ORDER BY account_id")
            .fetch_all(pool)
            .await
            .map_err(|e| ProjectionError::Storage(format!("Failed to query balances: {e}")))
    }
}

impl Projector for AccountBalances {
    fn is_interested(&self, commit: &Commit) -> bool {
        commit.stream_id.starts_with(ACCOUNT_STREAM_PREFIX)
    }

    fn apply<'a>(
        &'a self,
        identity: &'a ProjectorIdentity,
        commit: &'a Commit,
    ) -> Pin<Box<dyn Future<Output = Result<CheckpointScope>> + Send + 'a>> {
        Box::pin(async move {
            let delta = commit_delta(commit)?;
            let storage = |e: sqlx::Error| {
                ProjectionError::Storage(format!(
                    "Failed to apply commit {} to account_balances: {e}",
                    commit.checkpoint
                ))
            };

            let mut tx = self.pool.begin().await.map_err(storage)?;

            sqlx::query(
                "INSERT INTO account_balances (account_id, balance_cents, commits_applied)
                 VALUES ($1, $2, 1)
                 ON CONFLICT (account_id) DO UPDATE
                 SET balance_cents = account_balances.balance_cents + EXCLUDED.balance_cents,
                     commits_applied = account_balances.commits_applied + 1",
            )
            .bind(&commit.stream_id)
            .bind(delta)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;

            let record = CheckpointRecord::new(identity, Some(commit.checkpoint));
            commitflow_postgres::upsert_checkpoint(&mut *tx, &record).await?;

            tx.commit().await.map_err(storage)?;

            tracing::debug!(
                account = %commit.stream_id,
                delta_cents = delta,
                checkpoint = %commit.checkpoint,
                "Balance updated"
            );
            Ok(CheckpointScope::Transaction)
        })
    }
}

/// Projector appending every commit to `audit_trail`.
pub struct AuditTrail {
    pool: PgPool,
}

impl AuditTrail {
    /// Create the projector over a projection database pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Query: number of audited commits.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the query fails.
    pub async fn count(pool: &PgPool) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM audit_trail")
            .fetch_one(pool)
            .await
            .map_err(|e| ProjectionError::Storage(format!("Failed to count audit rows: {e}")))?;
        Ok(count)
    }
}

impl Projector for AuditTrail {
    fn apply<'a>(
        &'a self,
        _identity: &'a ProjectorIdentity,
        commit: &'a Commit,
    ) -> Pin<Box<dyn Future<Output = Result<CheckpointScope>> + Send + 'a>> {
        Box::pin(async move {
            let checkpoint = i64::try_from(commit.checkpoint.value()).map_err(|_| {
                ProjectionError::Storage(format!("Checkpoint {} exceeds BIGINT", commit.checkpoint))
            })?;
            let event_count = i32::try_from(commit.events.len()).unwrap_or(i32::MAX);

            sqlx::query(
                "INSERT INTO audit_trail (checkpoint, stream_id, event_count, committed_at)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (checkpoint) DO NOTHING",
            )
            .bind(checkpoint)
            .bind(&commit.stream_id)
            .bind(event_count)
            .bind(commit.committed_at)
            .execute(&self.pool)
            .await
            .map_err(|e| ProjectionError::Storage(format!("Failed to audit commit: {e}")))?;

            Ok(CheckpointScope::Standalone)
        })
    }
}
