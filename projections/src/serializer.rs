//! Commit Serializer: the single ordering authority between the event store and
//! the projectors.
//!
//! # Overview
//!
//! One worker task pulls commits from the [`EventStore`] strictly in the store's
//! order. For every commit it:
//!
//! 1. Checks the token is strictly greater than the previous one (source ordering guard)
//! 2. Skips projectors whose checkpoint is already at or past the token
//! 3. Advances uninterested projectors in memory only (written out on a clean stop)
//! 4. Applies the commit to every interested projector
//! 5. Persists each projector's checkpoint (unless the projector already did so
//!    inside its own transaction)
//!
//! Only then is the next commit fetched, so a slow checkpoint store applies
//! backpressure to the whole pipeline.
//!
//! # State Machine
//!
//! ```text
//!            ┌──────────────────────────────────────────┐
//!            ▼                                          │
//!  start ─► Idle ─► Fetching ─► Dispatching ─► Persisting
//!                     │              │              │
//!                     │ shutdown /   │ apply error  │ write failed after retries
//!                     │ stream end   ▼              ▼
//!                     ▼            Halted ◄─────────┘
//!                  Stopped
//! ```
//!
//! `Halted` and `Stopped` are terminal. A halted serializer records no progress
//! for the failing projector; restarting the process re-delivers the commit.
//!
//! Before entering `Stopped` the worker persists every checkpoint that only moved
//! past commits the projector was not interested in, so a rarely interested
//! projector does not drag the next resume point back. A failed write here is
//! logged and the stop still completes; the commits are filtered again on restart.
//!
//! # Resumption
//!
//! At startup every registered projector reports its persisted checkpoint. The
//! commit stream is opened after the minimum of those checkpoints (from the
//! beginning if any projector has none), and each projector only sees commits
//! beyond its own checkpoint.
//!
//! # Example
//!
//! ```ignore
//! let handle = CommitSerializer::new(registry, event_store, checkpoint_store)
//!     .with_retry_policy(RetryPolicy::builder().max_retries(5).build())
//!     .start()
//!     .await?;
//!
//! let address = handle.address();
//! address.wait_until(|status| status.is_caught_up(head)).await?;
//!
//! handle.shutdown().await?;
//! ```

use crate::address::COMMIT_SERIALIZER;
use crate::registry::{ProjectorRegistry, RegisteredProjector};
use commitflow_core::checkpoint::{CheckpointRecord, CheckpointStore, CheckpointToken};
use commitflow_core::commit::Commit;
use commitflow_core::error::{ProjectionError, Result};
use commitflow_core::event_store::{CommitStream, EventStore, EventStoreError};
use commitflow_core::projector::{CheckpointScope, ProjectorId, ProjectorIdentity};
use commitflow_runtime::metrics::SerializerMetrics;
use commitflow_runtime::retry::{RetryPolicy, retry_with_predicate};
use futures::StreamExt;
use futures::future::join_all;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;

/// Lifecycle state of the commit serializer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SerializerState {
    /// Between commits
    Idle,
    /// Waiting for the next commit from the event store
    Fetching,
    /// Applying a commit to projectors
    Dispatching,
    /// Recording projector checkpoints
    Persisting,
    /// Terminal: a failure stopped all progress
    Halted,
    /// Terminal: shut down on request or the commit stream ended
    Stopped,
}

impl SerializerState {
    /// Whether the worker has exited.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Halted | Self::Stopped)
    }
}

impl fmt::Display for SerializerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Fetching => "fetching",
            Self::Dispatching => "dispatching",
            Self::Persisting => "persisting",
            Self::Halted => "halted",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Snapshot published by the worker after every transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SerializerStatus {
    /// Current state
    pub state: SerializerState,
    /// Token of the last commit fetched from the event store (the resume point
    /// until the first fetch)
    pub last_fetched: Option<CheckpointToken>,
    /// In-memory checkpoint of every registered projector
    pub checkpoints: BTreeMap<ProjectorId, Option<CheckpointToken>>,
    /// Why the serializer halted, once it has
    pub halt_reason: Option<String>,
}

impl SerializerStatus {
    /// Whether every projector has moved past `head`.
    #[must_use]
    pub fn is_caught_up(&self, head: CheckpointToken) -> bool {
        self.checkpoints
            .values()
            .all(|checkpoint| checkpoint.is_some_and(|token| token >= head))
    }
}

/// Lookup-only reference to a running commit serializer.
///
/// Cloning is cheap. An address can observe the serializer's status but cannot
/// stop it or wait on its task; that belongs to the [`SerializerHandle`].
#[derive(Clone, Debug)]
pub struct SerializerAddress {
    name: Arc<str>,
    status: watch::Receiver<SerializerStatus>,
}

impl SerializerAddress {
    pub(crate) const fn new(name: Arc<str>, status: watch::Receiver<SerializerStatus>) -> Self {
        Self { name, status }
    }

    /// Name the serializer was started under.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Latest published status.
    #[must_use]
    pub fn status(&self) -> SerializerStatus {
        SerializerStatus::clone(&self.status.borrow())
    }

    /// Latest published state.
    #[must_use]
    pub fn state(&self) -> SerializerState {
        self.status.borrow().state
    }

    /// In-memory checkpoint of one projector.
    #[must_use]
    pub fn checkpoint(&self, projector_id: ProjectorId) -> Option<CheckpointToken> {
        self.status
            .borrow()
            .checkpoints
            .get(&projector_id)
            .copied()
            .flatten()
    }

    /// Whether the serializer has not halted.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.state() != SerializerState::Halted
    }

    /// Wait until a published status satisfies `predicate`.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Halted`] if the worker exits without ever
    /// publishing a matching status.
    pub async fn wait_until<F>(&self, mut predicate: F) -> Result<SerializerStatus>
    where
        F: FnMut(&SerializerStatus) -> bool,
    {
        let mut status = self.status.clone();
        {
            let current = status.borrow_and_update();
            if predicate(&current) {
                return Ok(SerializerStatus::clone(&current));
            }
        }

        status
            .wait_for(|current| predicate(current))
            .await
            .map(|current| SerializerStatus::clone(&current))
            .map_err(|_| {
                ProjectionError::Halted(format!(
                    "serializer {} exited before reaching the awaited status",
                    self.name
                ))
            })
    }
}

/// Owner of a running commit serializer.
///
/// Dropping the handle is treated as a shutdown request.
#[derive(Debug)]
pub struct SerializerHandle {
    address: SerializerAddress,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<Result<()>>,
}

impl SerializerHandle {
    /// Lookup-only address for registration and health checks.
    #[must_use]
    pub fn address(&self) -> SerializerAddress {
        self.address.clone()
    }

    /// Ask the worker to stop and wait for it.
    ///
    /// The worker notices the request the next time it waits for a commit; a commit
    /// already being dispatched is applied and checkpointed first.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Halted`] if the worker halted before stopping.
    pub async fn shutdown(self) -> Result<()> {
        tracing::info!(serializer = %self.address.name(), "Requesting commit serializer shutdown");
        self.shutdown.send(true).ok();
        self.join().await
    }

    /// Wait for the worker to exit on its own.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Halted`] if the worker halted or panicked.
    pub async fn join(self) -> Result<()> {
        let Self { address, shutdown, task } = self;
        let result = task.await.map_err(|e| {
            ProjectionError::Halted(format!("serializer {} task failed: {e}", address.name()))
        })?;
        drop(shutdown);
        result
    }
}

/// Builder and entry point for the commit serializer.
pub struct CommitSerializer {
    name: String,
    registry: Arc<ProjectorRegistry>,
    event_store: Arc<dyn EventStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    retry_policy: RetryPolicy,
}

impl CommitSerializer {
    /// Create a serializer over the given registry and collaborators.
    #[must_use]
    pub fn new(
        registry: Arc<ProjectorRegistry>,
        event_store: Arc<dyn EventStore>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            name: COMMIT_SERIALIZER.to_string(),
            registry,
            event_store,
            checkpoints,
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Retry policy for standalone checkpoint writes.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Name used in logs and carried by the address.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Prepare storage, load every projector's checkpoint and spawn the worker.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the checkpoint structure cannot be
    /// ensured or a checkpoint cannot be read. Nothing is spawned in that case.
    pub async fn start(self) -> Result<SerializerHandle> {
        tracing::info!(
            serializer = %self.name,
            projectors = self.registry.len(),
            "Starting commit serializer"
        );

        self.checkpoints.ensure_schema().await?;

        let mut positions = BTreeMap::new();
        for projector in self.registry.iter() {
            let identity = &projector.identity;
            let checkpoint = self.checkpoints.read_checkpoint(identity.id).await?;
            tracing::info!(
                projector_id = %identity.id,
                projector_name = %identity.name,
                checkpoint = ?checkpoint.map(CheckpointToken::value),
                "Loaded projector checkpoint"
            );
            positions.insert(identity.id, checkpoint);
        }

        let resume_from = positions.values().copied().min().flatten();
        tracing::info!(
            serializer = %self.name,
            resume_from = ?resume_from.map(CheckpointToken::value),
            "Opening commit stream"
        );
        let commits = self.event_store.read_commits_from(resume_from);

        let name: Arc<str> = Arc::from(self.name.as_str());
        let (status_tx, status_rx) = watch::channel(SerializerStatus {
            state: SerializerState::Idle,
            last_fetched: resume_from,
            checkpoints: positions.clone(),
            halt_reason: None,
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let worker = Worker {
            registry: self.registry,
            checkpoints: self.checkpoints,
            retry_policy: self.retry_policy,
            positions,
            skipped_only: BTreeSet::new(),
            last_fetched: resume_from,
            status: status_tx,
        };
        let span = tracing::info_span!("commit_serializer", serializer = %name);
        let task = tokio::spawn(worker.run(commits, shutdown_rx).instrument(span));

        Ok(SerializerHandle {
            address: SerializerAddress::new(name, status_rx),
            shutdown: shutdown_tx,
            task,
        })
    }
}

struct Worker {
    registry: Arc<ProjectorRegistry>,
    checkpoints: Arc<dyn CheckpointStore>,
    retry_policy: RetryPolicy,
    positions: BTreeMap<ProjectorId, Option<CheckpointToken>>,
    /// Projectors whose in-memory position is ahead of storage because of filtering
    skipped_only: BTreeSet<ProjectorId>,
    last_fetched: Option<CheckpointToken>,
    status: watch::Sender<SerializerStatus>,
}

impl Worker {
    async fn run(
        mut self,
        mut commits: CommitStream,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        loop {
            self.publish(SerializerState::Fetching);

            let fetched = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_ok() && !*shutdown.borrow() {
                        continue;
                    }
                    tracing::info!("Shutdown requested");
                    None
                }
                next = commits.next() => Some(next),
            };

            let Some(next) = fetched else { break };
            let Some(next) = next else {
                tracing::info!("Commit stream ended");
                break;
            };

            let started = Instant::now();
            SerializerMetrics::record_fetch();

            let outcome = match next {
                Ok(commit) => self.process_commit(&commit).await,
                Err(error) => Err(error.into()),
            };

            match outcome {
                Ok(()) => {
                    SerializerMetrics::record_dispatch(started.elapsed());
                    self.publish(SerializerState::Idle);
                }
                Err(error) => return Err(self.halt(&error)),
            }
        }

        self.flush_skipped().await;
        self.publish(SerializerState::Stopped);
        tracing::info!("Commit serializer stopped");
        Ok(())
    }

    async fn process_commit(&mut self, commit: &Commit) -> Result<()> {
        if let Some(previous) = self.last_fetched {
            if commit.checkpoint <= previous {
                return Err(EventStoreError::OutOfOrder {
                    previous,
                    received: commit.checkpoint,
                }
                .into());
            }
        }
        self.last_fetched = Some(commit.checkpoint);
        tracing::debug!(
            checkpoint = %commit.checkpoint,
            stream_id = %commit.stream_id,
            "Fetched commit"
        );

        self.publish(SerializerState::Dispatching);
        let registry = Arc::clone(&self.registry);
        let mut deliveries: Vec<&RegisteredProjector> = Vec::new();

        for projector in registry.iter() {
            let identity = &projector.identity;
            let position = self.positions.get(&identity.id).copied().flatten();

            if position.is_some_and(|token| commit.checkpoint <= token) {
                tracing::trace!(
                    projector_id = %identity.id,
                    checkpoint = %commit.checkpoint,
                    "Already applied"
                );
                SerializerMetrics::record_skipped(&identity.name);
                continue;
            }

            if !projector.instance.is_interested(commit) {
                tracing::trace!(
                    projector_id = %identity.id,
                    checkpoint = %commit.checkpoint,
                    "Not interested"
                );
                SerializerMetrics::record_skipped(&identity.name);
                self.positions.insert(identity.id, Some(commit.checkpoint));
                self.skipped_only.insert(identity.id);
                continue;
            }

            deliveries.push(projector);
        }

        let results = join_all(deliveries.iter().map(|projector| async move {
            let result = projector.instance.apply(&projector.identity, commit).await;
            (*projector, result)
        }))
        .await;

        self.publish(SerializerState::Persisting);
        let mut failure = None;

        for (projector, result) in results {
            let identity = &projector.identity;
            match result {
                Ok(scope) => {
                    SerializerMetrics::record_applied(&identity.name);
                    if scope == CheckpointScope::Standalone {
                        let persisted = self.persist_checkpoint(identity, commit.checkpoint).await;
                        if let Err(error) = persisted {
                            failure.get_or_insert(error);
                            continue;
                        }
                    }
                    self.positions.insert(identity.id, Some(commit.checkpoint));
                    self.skipped_only.remove(&identity.id);
                    SerializerMetrics::record_checkpoint(&identity.name, commit.checkpoint.value());
                }
                Err(error) => {
                    tracing::error!(
                        projector_id = %identity.id,
                        projector_name = %identity.name,
                        checkpoint = %commit.checkpoint,
                        error = %error,
                        "Projector failed to apply commit"
                    );
                    failure.get_or_insert(ProjectionError::Apply {
                        projector: identity.id,
                        checkpoint: commit.checkpoint,
                        reason: error.to_string(),
                    });
                }
            }
        }

        failure.map_or(Ok(()), Err)
    }

    async fn persist_checkpoint(
        &self,
        identity: &ProjectorIdentity,
        checkpoint: CheckpointToken,
    ) -> Result<()> {
        let record = CheckpointRecord::new(identity, Some(checkpoint));
        let record = &record;
        let store = &self.checkpoints;

        retry_with_predicate(
            &self.retry_policy,
            || store.upsert_checkpoint(record),
            ProjectionError::is_transient,
        )
        .await
        .inspect(|_| {
            tracing::debug!(
                projector_id = %identity.id,
                checkpoint = %checkpoint,
                "Checkpoint persisted"
            );
        })
        .map_err(|error| {
            SerializerMetrics::record_checkpoint_failure(&identity.name);
            tracing::error!(
                projector_id = %identity.id,
                projector_name = %identity.name,
                checkpoint = %checkpoint,
                error = %error,
                "Checkpoint write failed; projector is stalled"
            );
            error
        })
    }

    async fn flush_skipped(&mut self) {
        if self.skipped_only.is_empty() {
            return;
        }
        self.publish(SerializerState::Persisting);

        let registry = Arc::clone(&self.registry);
        for projector in registry.iter() {
            let identity = &projector.identity;
            if !self.skipped_only.contains(&identity.id) {
                continue;
            }
            let Some(checkpoint) = self.positions.get(&identity.id).copied().flatten() else {
                continue;
            };

            if self.persist_checkpoint(identity, checkpoint).await.is_ok() {
                self.skipped_only.remove(&identity.id);
                SerializerMetrics::record_checkpoint(&identity.name, checkpoint.value());
            }
        }
    }

    fn halt(&self, cause: &ProjectionError) -> ProjectionError {
        tracing::error!(
            error = %cause,
            last_fetched = ?self.last_fetched.map(CheckpointToken::value),
            "Commit serializer halted"
        );
        SerializerMetrics::record_halt();

        let reason = cause.to_string();
        self.status.send_modify(|status| {
            status.state = SerializerState::Halted;
            status.last_fetched = self.last_fetched;
            status.checkpoints.clone_from(&self.positions);
            status.halt_reason = Some(reason.clone());
        });
        ProjectionError::Halted(reason)
    }

    fn publish(&self, state: SerializerState) {
        self.status.send_modify(|status| {
            status.state = state;
            status.last_fetched = self.last_fetched;
            status.checkpoints.clone_from(&self.positions);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(SerializerState::Halted.is_terminal());
        assert!(SerializerState::Stopped.is_terminal());
        assert!(!SerializerState::Persisting.is_terminal());
        assert_eq!(SerializerState::Dispatching.to_string(), "dispatching");
    }

    #[test]
    fn caught_up_requires_every_projector_past_head() {
        let mut status = SerializerStatus {
            state: SerializerState::Idle,
            last_fetched: Some(CheckpointToken::new(10)),
            checkpoints: BTreeMap::from([
                (ProjectorId::new(1), Some(CheckpointToken::new(10))),
                (ProjectorId::new(2), None),
            ]),
            halt_reason: None,
        };
        assert!(!status.is_caught_up(CheckpointToken::new(10)));

        status
            .checkpoints
            .insert(ProjectorId::new(2), Some(CheckpointToken::new(12)));
        assert!(status.is_caught_up(CheckpointToken::new(10)));
    }

    #[tokio::test]
    async fn address_waits_for_published_status() {
        let (tx, rx) = watch::channel(SerializerStatus {
            state: SerializerState::Idle,
            last_fetched: None,
            checkpoints: BTreeMap::new(),
            halt_reason: None,
        });
        let address = SerializerAddress::new(Arc::from("test"), rx);

        let waiter = {
            let address = address.clone();
            tokio::spawn(async move {
                address
                    .wait_until(|status| status.state == SerializerState::Stopped)
                    .await
            })
        };
        tx.send_modify(|status| status.state = SerializerState::Stopped);

        let status = waiter.await.unwrap().unwrap();
        assert_eq!(status.state, SerializerState::Stopped);
        assert!(address.is_healthy());
    }

    #[tokio::test]
    async fn address_reports_closed_channel() {
        let (tx, rx) = watch::channel(SerializerStatus {
            state: SerializerState::Fetching,
            last_fetched: None,
            checkpoints: BTreeMap::new(),
            halt_reason: None,
        });
        let address = SerializerAddress::new(Arc::from("test"), rx);
        drop(tx);

        let result = address
            .wait_until(|status| status.state == SerializerState::Stopped)
            .await;
        assert!(matches!(result, Err(ProjectionError::Halted(_))));
    }
}
