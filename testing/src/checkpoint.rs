use commitflow_core::checkpoint::{
    CheckpointRecord, CheckpointStore, CheckpointToken, checkpoint_from_storage,
};
use commitflow_core::error::{ProjectionError, Result};
use commitflow_core::projector::ProjectorId;
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

/// In-memory checkpoint store for testing resumption and failure handling.
///
/// Behaves like the relational store: records hold the token in its nullable
/// string form, the structure must exist before use, and upserts only change the
/// token of an existing record. Failures can be injected per `(projector, token)`.
///
/// # Example
///
/// ```
/// use commitflow_core::checkpoint::{CheckpointRecord, CheckpointStore, CheckpointToken};
/// use commitflow_core::projector::{ProjectorId, ProjectorIdentity};
/// use commitflow_testing::InMemoryCheckpointStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryCheckpointStore::new();
/// store.ensure_schema().await?;
///
/// let identity = ProjectorIdentity::new(ProjectorId::new(7), "Balances");
/// store.upsert_checkpoint(&CheckpointRecord::new(&identity, Some(CheckpointToken::new(102)))).await?;
///
/// let loaded = store.read_checkpoint(ProjectorId::new(7)).await?;
/// assert_eq!(loaded, Some(CheckpointToken::new(102)));
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryCheckpointStore {
    state: Arc<RwLock<State>>,
}

#[derive(Debug, Default)]
struct State {
    schema_created: bool,
    schema_creations: usize,
    rows: BTreeMap<ProjectorId, StoredRow>,
    failing_writes: HashSet<(ProjectorId, CheckpointToken)>,
    fail_reads: bool,
    write_attempts: usize,
}

#[derive(Debug, Clone)]
struct StoredRow {
    projector_name: String,
    last_checkpoint_token: Option<String>,
}

impl InMemoryCheckpointStore {
    /// Create a store whose checkpoint structure does not exist yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate a record (creating the structure if needed).
    pub fn seed(&self, record: &CheckpointRecord) {
        let mut state = self.state.write().unwrap();
        state.schema_created = true;
        state.rows.insert(
            record.projector_id,
            StoredRow {
                projector_name: record.projector_name.clone(),
                last_checkpoint_token: record.storage_token(),
            },
        );
    }

    /// Make every write of `token` for `projector_id` fail.
    pub fn fail_writes_for(&self, projector_id: ProjectorId, token: CheckpointToken) {
        self.state
            .write()
            .unwrap()
            .failing_writes
            .insert((projector_id, token));
    }

    /// Make every read fail (or succeed again).
    pub fn fail_reads(&self, fail: bool) {
        self.state.write().unwrap().fail_reads = fail;
    }

    /// Remove all injected failures.
    pub fn clear_failures(&self) {
        let mut state = self.state.write().unwrap();
        state.failing_writes.clear();
        state.fail_reads = false;
    }

    /// Current record for a projector.
    #[must_use]
    pub fn record(&self, projector_id: ProjectorId) -> Option<CheckpointRecord> {
        self.state
            .read()
            .unwrap()
            .rows
            .get(&projector_id)
            .map(|row| to_record(projector_id, row))
    }

    /// All records ordered by projector id.
    #[must_use]
    pub fn records(&self) -> Vec<CheckpointRecord> {
        self.state
            .read()
            .unwrap()
            .rows
            .iter()
            .map(|(id, row)| to_record(*id, row))
            .collect()
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().unwrap().rows.len()
    }

    /// Whether there are no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.read().unwrap().rows.is_empty()
    }

    /// How many times the structure was actually created.
    #[must_use]
    pub fn schema_creations(&self) -> usize {
        self.state.read().unwrap().schema_creations
    }

    /// Number of upsert attempts, successful or not.
    #[must_use]
    pub fn write_attempts(&self) -> usize {
        self.state.read().unwrap().write_attempts
    }
}

fn to_record(projector_id: ProjectorId, row: &StoredRow) -> CheckpointRecord {
    CheckpointRecord {
        projector_id,
        projector_name: row.projector_name.clone(),
        last_checkpoint: checkpoint_from_storage(row.last_checkpoint_token.as_deref()).unwrap(),
    }
}

fn missing_structure() -> ProjectionError {
    ProjectionError::Storage("checkpoint structure does not exist".to_string())
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn ensure_schema(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self.state.write().unwrap();
            if !state.schema_created {
                state.schema_created = true;
                state.schema_creations += 1;
            }
            Ok(())
        })
    }

    fn upsert_checkpoint<'a>(
        &'a self,
        record: &'a CheckpointRecord,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let mut state = self.state.write().unwrap();
            state.write_attempts += 1;

            if !state.schema_created {
                return Err(missing_structure());
            }
            record.validate()?;
            if let Some(token) = record.last_checkpoint {
                if state.failing_writes.contains(&(record.projector_id, token)) {
                    return Err(ProjectionError::Storage(format!(
                        "injected write failure for projector {} at checkpoint {token}",
                        record.projector_id
                    )));
                }
            }

            let token = record.storage_token();
            state
                .rows
                .entry(record.projector_id)
                .and_modify(|row| row.last_checkpoint_token.clone_from(&token))
                .or_insert_with(|| StoredRow {
                    projector_name: record.projector_name.clone(),
                    last_checkpoint_token: token.clone(),
                });
            Ok(())
        })
    }

    fn read_checkpoint(
        &self,
        projector_id: ProjectorId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<CheckpointToken>>> + Send + '_>> {
        Box::pin(async move {
            let state = self.state.read().unwrap();
            if state.fail_reads {
                return Err(ProjectionError::Storage(format!(
                    "injected read failure for projector {projector_id}"
                )));
            }
            if !state.schema_created {
                return Err(missing_structure());
            }

            let stored = state
                .rows
                .get(&projector_id)
                .and_then(|row| row.last_checkpoint_token.as_deref());
            checkpoint_from_storage(stored).map_err(|e| ProjectionError::Storage(e.to_string()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commitflow_core::projector::ProjectorIdentity;

    fn record(id: i32, name: &str, token: Option<u64>) -> CheckpointRecord {
        CheckpointRecord::new(
            &ProjectorIdentity::new(ProjectorId::new(id), name),
            token.map(CheckpointToken::new),
        )
    }

    #[tokio::test]
    async fn repeated_upsert_is_idempotent() {
        let store = InMemoryCheckpointStore::new();
        store.ensure_schema().await.unwrap();

        store.upsert_checkpoint(&record(7, "Balances", Some(102))).await.unwrap();
        store.upsert_checkpoint(&record(7, "Balances", Some(102))).await.unwrap();

        assert_eq!(store.records(), vec![record(7, "Balances", Some(102))]);
    }

    #[tokio::test]
    async fn later_upsert_overwrites_token_only() {
        let store = InMemoryCheckpointStore::new();
        store.ensure_schema().await.unwrap();

        store.upsert_checkpoint(&record(7, "Balances", Some(101))).await.unwrap();
        store.upsert_checkpoint(&record(7, "Renamed", Some(103))).await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.record(ProjectorId::new(7)), Some(record(7, "Balances", Some(103))));
    }

    #[tokio::test]
    async fn null_token_round_trips_as_none() {
        let store = InMemoryCheckpointStore::new();
        store.ensure_schema().await.unwrap();
        store.upsert_checkpoint(&record(1, "Fresh", None)).await.unwrap();

        assert_eq!(store.read_checkpoint(ProjectorId::new(1)).await.unwrap(), None);
        assert_eq!(store.read_checkpoint(ProjectorId::new(2)).await.unwrap(), None);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn ensure_schema_creates_structure_once() {
        let store = InMemoryCheckpointStore::new();

        let (first, second) = tokio::join!(store.ensure_schema(), store.ensure_schema());
        tokio_test::assert_ok!(first);
        tokio_test::assert_ok!(second);
        store.ensure_schema().await.unwrap();

        assert_eq!(store.schema_creations(), 1);
    }

    #[tokio::test]
    async fn writes_before_schema_fail() {
        let store = InMemoryCheckpointStore::new();
        let err = store
            .upsert_checkpoint(&record(1, "Early", Some(1)))
            .await
            .unwrap_err();

        assert!(matches!(err, ProjectionError::Storage(_)));
    }

    #[tokio::test]
    async fn token_beyond_bigint_range_is_rejected() {
        let store = InMemoryCheckpointStore::new();
        store.seed(&record(3, "Ledger", Some(53)));

        let err = store
            .upsert_checkpoint(&record(3, "Ledger", Some(u64::MAX)))
            .await
            .unwrap_err();

        assert!(matches!(err, ProjectionError::TokenOutOfRange(_)));
        assert_eq!(
            store.read_checkpoint(ProjectorId::new(3)).await.unwrap(),
            Some(CheckpointToken::new(53))
        );
    }

    #[tokio::test]
    async fn injected_failure_leaves_previous_token() {
        let store = InMemoryCheckpointStore::new();
        store.seed(&record(3, "Ledger", Some(53)));
        store.fail_writes_for(ProjectorId::new(3), CheckpointToken::new(54));

        let err = store.upsert_checkpoint(&record(3, "Ledger", Some(54))).await;
        tokio_test::assert_err!(err);
        assert_eq!(
            store.read_checkpoint(ProjectorId::new(3)).await.unwrap(),
            Some(CheckpointToken::new(53))
        );

        store.clear_failures();
        store.upsert_checkpoint(&record(3, "Ledger", Some(54))).await.unwrap();
        assert_eq!(store.write_attempts(), 2);
    }
}
