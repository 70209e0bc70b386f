//! Event store abstraction consumed by the commit serializer.
//!
//! The event store is an external collaborator: this crate does not implement
//! durability or transport. It only assumes the store delivers commits in a fixed
//! global order, each carrying a strictly increasing [`CheckpointToken`].
//!
//! # Implementations
//!
//! - `InMemoryEventStore` (in `commitflow-testing`): live-tailing commit log for tests and demos

use crate::checkpoint::CheckpointToken;
use crate::commit::Commit;
use futures::Stream;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur while reading commits.
#[derive(Error, Debug, Clone)]
pub enum EventStoreError {
    /// Connection to the store failed or was lost
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A stored commit could not be decoded
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    /// The store delivered commits out of order
    #[error("Commit {received} delivered after commit {previous}")]
    OutOfOrder {
        /// Token of the previously delivered commit
        previous: CheckpointToken,
        /// Token that violated the order
        received: CheckpointToken,
    },
}

/// Ordered stream of commits.
pub type CommitStream = Pin<Box<dyn Stream<Item = Result<Commit, EventStoreError>> + Send>>;

/// Ordered, resumable source of commits.
///
/// # Contract
///
/// - Commits are yielded in strictly increasing checkpoint order.
/// - `read_commits_from(Some(t))` yields only commits whose token is greater than `t`;
///   `read_commits_from(None)` starts at the beginning of the log.
/// - The stream does not end when it catches up: it waits for new commits.
///   Implementations may end it when the store is closed.
pub trait EventStore: Send + Sync {
    /// Open a commit stream starting strictly after `after`.
    fn read_commits_from(&self, after: Option<CheckpointToken>) -> CommitStream;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_order_error_display() {
        let error = EventStoreError::OutOfOrder {
            previous: CheckpointToken::new(10),
            received: CheckpointToken::new(9),
        };

        assert_eq!(error.to_string(), "Commit 9 delivered after commit 10");
    }
}
