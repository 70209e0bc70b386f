//! Error taxonomy for projection operations.
//!
//! | Variant | Meaning | Policy |
//! |---|---|---|
//! | [`ProjectionError::Configuration`] | Missing or duplicate projector identity, bad wiring | Fatal at startup |
//! | [`ProjectionError::Storage`] | Schema setup or checkpoint read/write failed | Fatal at startup, halts the serializer in steady state |
//! | [`ProjectionError::TokenOutOfRange`] | Checkpoint token does not fit the 64-bit signed column | Never retried, halts the serializer |
//! | [`ProjectionError::NotFound`] | Lookup of an unregistered projector id | Caller bug, never retried |
//! | [`ProjectionError::EventStore`] | The commit source failed | Halts the serializer |
//! | [`ProjectionError::Apply`] | A projector's business mutation failed | Halts the serializer |
//! | [`ProjectionError::Halted`] | The serializer reached its terminal state | Restart required |

use crate::checkpoint::CheckpointToken;
use crate::event_store::EventStoreError;
use crate::projector::ProjectorId;

/// Error type for projection operations.
#[derive(Debug, thiserror::Error)]
pub enum ProjectionError {
    /// Missing/duplicate projector identity or other wiring mistake
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Checkpoint storage or schema error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Checkpoint token above the storable range
    #[error(
        "Checkpoint {0} exceeds the storable range (max {max})",
        max = CheckpointToken::MAX_STORABLE
    )]
    TokenOutOfRange(CheckpointToken),

    /// No projector registered under this id
    #[error("Projector {0} is not registered")]
    NotFound(ProjectorId),

    /// The event store failed to deliver commits
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    /// A projector failed to apply a commit
    #[error("Projector {projector} failed to apply commit {checkpoint}: {reason}")]
    Apply {
        /// Projector that failed
        projector: ProjectorId,
        /// Token of the commit being applied
        checkpoint: CheckpointToken,
        /// Failure reported by the projector
        reason: String,
    },

    /// The commit serializer stopped and will not make further progress
    #[error("Commit serializer halted: {0}")]
    Halted(String),
}

impl ProjectionError {
    /// Whether the error is worth retrying in place.
    ///
    /// Only storage failures are transient; configuration and lookup errors
    /// are programming mistakes and apply failures are resolved by restart.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_error_display_names_projector_and_token() {
        let error = ProjectionError::Apply {
            projector: ProjectorId::new(3),
            checkpoint: CheckpointToken::new(54),
            reason: "constraint violated".to_string(),
        };

        let display = error.to_string();
        assert!(display.contains("Projector 3"));
        assert!(display.contains("commit 54"));
        assert!(display.contains("constraint violated"));
    }

    #[test]
    fn only_storage_errors_are_transient() {
        assert!(ProjectionError::Storage("timeout".into()).is_transient());
        assert!(!ProjectionError::Configuration("dup".into()).is_transient());
        assert!(!ProjectionError::NotFound(ProjectorId::new(1)).is_transient());
        assert!(!ProjectionError::Halted("stop".into()).is_transient());
        assert!(!ProjectionError::TokenOutOfRange(CheckpointToken::new(u64::MAX)).is_transient());
    }
}
