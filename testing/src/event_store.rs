use commitflow_core::checkpoint::CheckpointToken;
use commitflow_core::commit::{Commit, CommittedEvent};
use commitflow_core::event_store::{CommitStream, EventStore, EventStoreError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::Notify;

/// In-memory commit log for fast, deterministic testing.
///
/// Streams opened with [`EventStore::read_commits_from`] replay the existing log and
/// then wait for new commits, like a real store's live subscription. [`close`](Self::close)
/// ends every open stream once it has drained.
///
/// # Example
///
/// ```
/// use commitflow_core::checkpoint::CheckpointToken;
/// use commitflow_core::event_store::EventStore;
/// use commitflow_testing::InMemoryEventStore;
/// use futures::StreamExt;
///
/// # async fn example() {
/// let store = InMemoryEventStore::new();
/// store.append("account-1", vec![]);
/// store.append("account-2", vec![]);
///
/// let mut commits = store.read_commits_from(Some(CheckpointToken::new(1)));
/// let next = commits.next().await.unwrap().unwrap();
/// assert_eq!(next.checkpoint, CheckpointToken::new(2));
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryEventStore {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    commits: RwLock<Vec<Commit>>,
    appended: Notify,
    closed: AtomicBool,
}

impl InMemoryEventStore {
    /// Create an empty commit log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a commit with the next token (the first commit gets token 1).
    pub fn append(&self, stream_id: impl Into<String>, events: Vec<CommittedEvent>) -> Commit {
        let commit = {
            let mut commits = self.inner.commits.write().unwrap();
            let checkpoint = commits
                .last()
                .map_or(CheckpointToken::new(1), |last| last.checkpoint.next());
            let commit = Commit::new(checkpoint, stream_id, events);
            commits.push(commit.clone());
            commit
        };
        self.inner.appended.notify_waiters();
        commit
    }

    /// Append a commit carrying an explicit token.
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError::OutOfOrder`] if the token does not follow the
    /// current head.
    pub fn push(&self, commit: Commit) -> Result<(), EventStoreError> {
        {
            let mut commits = self.inner.commits.write().unwrap();
            if let Some(last) = commits.last() {
                if commit.checkpoint <= last.checkpoint {
                    return Err(EventStoreError::OutOfOrder {
                        previous: last.checkpoint,
                        received: commit.checkpoint,
                    });
                }
            }
            commits.push(commit);
        }
        self.inner.appended.notify_waiters();
        Ok(())
    }

    /// Token of the newest commit, if any.
    #[must_use]
    pub fn head(&self) -> Option<CheckpointToken> {
        self.inner
            .commits
            .read()
            .unwrap()
            .last()
            .map(|commit| commit.checkpoint)
    }

    /// Number of commits in the log.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.commits.read().unwrap().len()
    }

    /// Whether the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.commits.read().unwrap().is_empty()
    }

    /// End all open streams once they have delivered the current log.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.appended.notify_waiters();
    }
}

impl EventStore for InMemoryEventStore {
    fn read_commits_from(&self, after: Option<CheckpointToken>) -> CommitStream {
        let inner = Arc::clone(&self.inner);

        Box::pin(async_stream::stream! {
            let mut next_index = {
                let commits = inner.commits.read().unwrap();
                after.map_or(0, |token| commits.partition_point(|c| c.checkpoint <= token))
            };
            tracing::debug!(?after, next_index, "Opened in-memory commit stream");

            loop {
                // Register for wakeups before looking, so an append in between is not missed.
                let appended = inner.appended.notified();
                let batch = inner.commits.read().unwrap()[next_index..].to_vec();

                if batch.is_empty() {
                    if inner.closed.load(Ordering::SeqCst) {
                        break;
                    }
                    appended.await;
                    continue;
                }

                next_index += batch.len();
                for commit in batch {
                    yield Ok(commit);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;

    #[test]
    fn append_assigns_increasing_tokens() {
        let store = InMemoryEventStore::new();
        let first = store.append("a", vec![]);
        let second = store.append("b", vec![]);

        assert_eq!(first.checkpoint, CheckpointToken::new(1));
        assert_eq!(second.checkpoint, CheckpointToken::new(2));
        assert_eq!(store.head(), Some(CheckpointToken::new(2)));
    }

    #[test]
    fn push_rejects_non_increasing_token() {
        let store = InMemoryEventStore::new();
        store
            .push(Commit::new(CheckpointToken::new(10), "a", vec![]))
            .unwrap();

        let err = store
            .push(Commit::new(CheckpointToken::new(10), "a", vec![]))
            .unwrap_err();
        assert!(matches!(err, EventStoreError::OutOfOrder { .. }));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn stream_starts_strictly_after_token() {
        let store = InMemoryEventStore::new();
        for _ in 0..5 {
            store.append("a", vec![]);
        }
        store.close();

        let tokens: Vec<u64> = store
            .read_commits_from(Some(CheckpointToken::new(3)))
            .map(|commit| commit.unwrap().checkpoint.value())
            .collect()
            .await;

        assert_eq!(tokens, vec![4, 5]);
    }

    #[tokio::test]
    async fn stream_waits_for_new_commits() {
        let store = InMemoryEventStore::new();
        let mut commits = store.read_commits_from(None);

        let writer = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.append("late", vec![]);
        });

        let commit = tokio::time::timeout(Duration::from_secs(5), commits.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(commit.stream_id, "late");
    }
}
