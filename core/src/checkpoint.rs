//! Checkpoint tokens and durable per-projector progress.
//!
//! # Token Representation
//!
//! In memory a projector's progress is an `Option<CheckpointToken>`. At the storage
//! boundary it is translated to a nullable string:
//!
//! | In memory | Storage |
//! |---|---|
//! | `None` | `NULL` |
//! | `Some(CheckpointToken(42))` | `"42"` |
//!
//! The translation is explicit in both directions ([`checkpoint_to_storage`] and
//! [`checkpoint_from_storage`]); `NULL` is never read back as zero.
//!
//! # Persisted Structure
//!
//! | Field | Type | Constraint |
//! |---|---|---|
//! | `projector_id` | integer | primary key |
//! | `projector_name` | string (≤800 chars) | not null |
//! | `last_checkpoint_token` | 64-bit integer | nullable |
//!
//! The column is a signed 64-bit integer, so only tokens up to
//! [`CheckpointToken::MAX_STORABLE`] can be persisted. Stores reject larger tokens
//! with [`ProjectionError::TokenOutOfRange`] before touching storage.

use crate::error::{ProjectionError, Result};
use crate::projector::{ProjectorId, ProjectorIdentity};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use thiserror::Error;

/// Maximum length of a projector name accepted by the checkpoint table.
pub const MAX_PROJECTOR_NAME_LEN: usize = 800;

/// Error returned when a stored token is not a valid checkpoint.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid checkpoint token: {0:?}")]
pub struct ParseCheckpointTokenError(String);

/// Position of a commit in the event store's global order.
///
/// Tokens are totally ordered and strictly increase along the commit stream.
///
/// # Examples
///
/// ```
/// use commitflow_core::checkpoint::CheckpointToken;
///
/// let token: CheckpointToken = "42".parse().unwrap();
/// assert_eq!(token, CheckpointToken::new(42));
/// assert!(token < CheckpointToken::new(43));
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CheckpointToken(u64);

impl CheckpointToken {
    /// Largest token a 64-bit signed storage column can hold.
    pub const MAX_STORABLE: Self = Self(i64::MAX.unsigned_abs());

    /// Create a token from its numeric position.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Numeric position of this token.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// The token immediately following this one, saturating at `u64::MAX`.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Whether the token fits the checkpoint column.
    #[must_use]
    pub const fn is_storable(self) -> bool {
        self.0 <= Self::MAX_STORABLE.0
    }
}

impl fmt::Display for CheckpointToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CheckpointToken {
    type Err = ParseCheckpointTokenError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map(Self)
            .map_err(|_| ParseCheckpointTokenError(s.to_string()))
    }
}

impl From<u64> for CheckpointToken {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Translate an in-memory checkpoint to its nullable storage form.
///
/// ```
/// use commitflow_core::checkpoint::{checkpoint_to_storage, CheckpointToken};
///
/// assert_eq!(checkpoint_to_storage(None), None);
/// assert_eq!(checkpoint_to_storage(Some(CheckpointToken::new(42))).as_deref(), Some("42"));
/// ```
#[must_use]
pub fn checkpoint_to_storage(checkpoint: Option<CheckpointToken>) -> Option<String> {
    checkpoint.map(|token| token.to_string())
}

/// Translate a nullable stored token back to an in-memory checkpoint.
///
/// # Errors
///
/// Returns [`ParseCheckpointTokenError`] if the stored value is not a decimal token
/// in the storable range.
pub fn checkpoint_from_storage(
    stored: Option<&str>,
) -> std::result::Result<Option<CheckpointToken>, ParseCheckpointTokenError> {
    stored
        .map(|value| {
            value
                .parse::<CheckpointToken>()
                .ok()
                .filter(|token| token.is_storable())
                .ok_or_else(|| ParseCheckpointTokenError(value.to_string()))
        })
        .transpose()
}

/// Persisted progress of one projector.
///
/// At most one record exists per `projector_id`. `last_checkpoint` is `None` until
/// the projector has processed at least one commit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// Upsert key
    pub projector_id: ProjectorId,
    /// Display name, written on insert only
    pub projector_name: String,
    /// Last commit fully applied by the projector
    pub last_checkpoint: Option<CheckpointToken>,
}

impl CheckpointRecord {
    /// Create a record for the given projector identity.
    #[must_use]
    pub fn new(identity: &ProjectorIdentity, last_checkpoint: Option<CheckpointToken>) -> Self {
        Self {
            projector_id: identity.id,
            projector_name: identity.name.clone(),
            last_checkpoint,
        }
    }

    /// The checkpoint in its nullable storage form.
    #[must_use]
    pub fn storage_token(&self) -> Option<String> {
        checkpoint_to_storage(self.last_checkpoint)
    }

    /// Check the record can be written to the checkpoint column.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::TokenOutOfRange`] if the token exceeds
    /// [`CheckpointToken::MAX_STORABLE`].
    pub fn validate(&self) -> Result<()> {
        match self.last_checkpoint {
            Some(token) if !token.is_storable() => Err(ProjectionError::TokenOutOfRange(token)),
            _ => Ok(()),
        }
    }
}

/// Durable, idempotent persistence of projector progress.
///
/// # Contract
///
/// - [`upsert_checkpoint`](Self::upsert_checkpoint) is a single atomic
///   "update if present, else insert" keyed by `projector_id`. On update only the
///   token changes. Repeating a call leaves storage unchanged.
/// - Exactly one writer owns a given `projector_id` at a time. Concurrent writers
///   for the same id are a deployment error this store does not resolve.
/// - [`ensure_schema`](Self::ensure_schema) is safe to call redundantly.
///
/// # Dyn Compatibility
///
/// Methods return `Pin<Box<dyn Future>>` so the store can be shared as
/// `Arc<dyn CheckpointStore>` by the commit serializer.
pub trait CheckpointStore: Send + Sync {
    /// Ensure the checkpoint structure exists, creating it only if absent.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`](crate::ProjectionError::Storage) if the
    /// structure cannot be inspected or created.
    fn ensure_schema(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Write or update the single record for `record.projector_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::TokenOutOfRange`] if the token cannot be stored,
    /// or [`ProjectionError::Storage`] if the write fails.
    fn upsert_checkpoint<'a>(
        &'a self,
        record: &'a CheckpointRecord,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    /// Read the last persisted checkpoint for a projector.
    ///
    /// `None` means "start from the beginning of the commit stream".
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`](crate::ProjectionError::Storage) if the read
    /// fails or the stored token is malformed.
    fn read_checkpoint(
        &self,
        projector_id: ProjectorId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<CheckpointToken>>> + Send + '_>>;
}
