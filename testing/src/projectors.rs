use crate::checkpoint::InMemoryCheckpointStore;
use commitflow_core::checkpoint::{CheckpointRecord, CheckpointStore, CheckpointToken};
use commitflow_core::commit::Commit;
use commitflow_core::error::{ProjectionError, Result};
use commitflow_core::projector::{CheckpointScope, Projector, ProjectorIdentity};
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

/// Shared record of the commits a projector applied, in delivery order.
///
/// Clones share the same log, so a test can keep one handle while the
/// projector owns another.
#[derive(Clone, Debug, Default)]
pub struct ProjectionLog {
    applied: Arc<Mutex<Vec<CheckpointToken>>>,
}

impl ProjectionLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a delivered token.
    pub fn record(&self, token: CheckpointToken) {
        self.applied.lock().unwrap().push(token);
    }

    /// All delivered tokens in order.
    #[must_use]
    pub fn applied(&self) -> Vec<CheckpointToken> {
        self.applied.lock().unwrap().clone()
    }

    /// Delivered token values, convenient for assertions.
    #[must_use]
    pub fn values(&self) -> Vec<u64> {
        self.applied
            .lock()
            .unwrap()
            .iter()
            .map(|token| token.value())
            .collect()
    }

    /// How many times `token` was delivered.
    #[must_use]
    pub fn count_of(&self, token: CheckpointToken) -> usize {
        self.applied
            .lock()
            .unwrap()
            .iter()
            .filter(|applied| **applied == token)
            .count()
    }

    /// Most recently delivered token.
    #[must_use]
    pub fn last(&self) -> Option<CheckpointToken> {
        self.applied.lock().unwrap().last().copied()
    }
}

/// Projector that records every commit it is given.
///
/// `Tag` only distinguishes projector types, so one test can register several
/// recording projectors under different identities:
///
/// ```
/// use commitflow_core::projector::{IdentityTable, ProjectorId};
/// use commitflow_testing::RecordingProjector;
///
/// struct Ledger;
/// struct Audit;
///
/// let identities = IdentityTable::new()
///     .declare::<RecordingProjector<Ledger>>(ProjectorId::new(3))
///     .declare::<RecordingProjector<Audit>>(ProjectorId::new(4));
/// assert_eq!(identities.len(), 2);
/// ```
///
/// By default it returns [`CheckpointScope::Standalone`] and leaves the
/// checkpoint write to the serializer.
pub struct RecordingProjector<Tag> {
    log: ProjectionLog,
    stream_prefix: Option<String>,
    fail_on: Option<CheckpointToken>,
    checkpoint_store: Option<InMemoryCheckpointStore>,
    _tag: PhantomData<fn() -> Tag>,
}

impl<Tag> RecordingProjector<Tag> {
    /// Create a projector writing to `log`.
    #[must_use]
    pub const fn new(log: ProjectionLog) -> Self {
        Self {
            log,
            stream_prefix: None,
            fail_on: None,
            checkpoint_store: None,
            _tag: PhantomData,
        }
    }

    /// Only accept commits whose stream id starts with `prefix`.
    #[must_use]
    pub fn interested_in_stream_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.stream_prefix = Some(prefix.into());
        self
    }

    /// Fail when asked to apply `token`.
    #[must_use]
    pub const fn failing_on(mut self, token: CheckpointToken) -> Self {
        self.fail_on = Some(token);
        self
    }

    /// Upsert the checkpoint into `store` as part of `apply` and report
    /// [`CheckpointScope::Transaction`].
    #[must_use]
    pub fn recording_checkpoints_in(mut self, store: InMemoryCheckpointStore) -> Self {
        self.checkpoint_store = Some(store);
        self
    }
}

impl<Tag> Projector for RecordingProjector<Tag> {
    fn is_interested(&self, commit: &Commit) -> bool {
        self.stream_prefix
            .as_deref()
            .is_none_or(|prefix| commit.stream_id.starts_with(prefix))
    }

    fn apply<'a>(
        &'a self,
        identity: &'a ProjectorIdentity,
        commit: &'a Commit,
    ) -> Pin<Box<dyn Future<Output = Result<CheckpointScope>> + Send + 'a>> {
        Box::pin(async move {
            if self.fail_on == Some(commit.checkpoint) {
                return Err(ProjectionError::Storage(format!(
                    "{} refused commit {}",
                    identity.name, commit.checkpoint
                )));
            }

            self.log.record(commit.checkpoint);
            tracing::debug!(
                projector = %identity,
                checkpoint = %commit.checkpoint,
                "Recorded commit"
            );

            match &self.checkpoint_store {
                Some(store) => {
                    let record = CheckpointRecord::new(identity, Some(commit.checkpoint));
                    store.upsert_checkpoint(&record).await?;
                    Ok(CheckpointScope::Transaction)
                }
                None => Ok(CheckpointScope::Standalone),
            }
        })
    }
}
