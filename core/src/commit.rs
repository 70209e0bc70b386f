//! Commits read from the event store.
//!
//! A commit groups the events written by one transaction against one stream and
//! carries the [`CheckpointToken`] marking its place in the store's global order.
//! Commits are immutable; projectors receive them by reference.

use crate::checkpoint::CheckpointToken;
use crate::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single event inside a commit.
///
/// The body is opaque to this crate; projectors interpret it by `event_type`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommittedEvent {
    /// Event type name (e.g. `"AccountCredited"`)
    pub event_type: String,
    /// Event body as written by the producer
    pub body: serde_json::Value,
}

impl CommittedEvent {
    /// Create a new committed event.
    #[must_use]
    pub fn new(event_type: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            body,
        }
    }
}

/// An ordered, immutable unit delivered by the event store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    /// Global position of this commit
    pub checkpoint: CheckpointToken,
    /// Stream (aggregate instance) the commit was written to
    pub stream_id: String,
    /// Time the commit became durable
    pub committed_at: DateTime<Utc>,
    /// Events in write order
    pub events: Vec<CommittedEvent>,
}

impl Commit {
    /// Create a commit stamped with the current time.
    #[must_use]
    pub fn new(
        checkpoint: CheckpointToken,
        stream_id: impl Into<String>,
        events: Vec<CommittedEvent>,
    ) -> Self {
        Self {
            checkpoint,
            stream_id: stream_id.into(),
            committed_at: Utc::now(),
            events,
        }
    }

    /// Whether any event in the commit has the given type.
    #[must_use]
    pub fn contains_event(&self, event_type: &str) -> bool {
        self.events.iter().any(|event| event.event_type == event_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn contains_event_matches_by_type() {
        let commit = Commit::new(
            CheckpointToken::new(1),
            "account-1",
            vec![CommittedEvent::new("AccountOpened", json!({ "owner": "alice" }))],
        );

        assert!(commit.contains_event("AccountOpened"));
        assert!(!commit.contains_event("AccountClosed"));
    }
}
