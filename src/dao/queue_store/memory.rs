//! In-memory [`QueueStore`] backend.
//!
//! Backs unit and integration tests and serves as the development fallback.
//! The compare-and-swap contract is enforced under the dashmap entry lock,
//! so concurrent writers for the same player serialize exactly like they
//! would against a real conditional write.

use dashmap::DashMap;
use futures::future::BoxFuture;
use std::sync::Arc;
use uuid::Uuid;

use super::QueueStore;
use crate::dao::models::{MigrationRecordEntity, QueueRecordEntity, SnapshotEntity};
use crate::dao::storage::{StorageError, StorageResult};

/// Non-durable queue store keyed entirely in process memory.
#[derive(Clone, Default)]
pub struct MemoryQueueStore {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    queues: DashMap<String, QueueRecordEntity>,
    snapshots: DashMap<Uuid, SnapshotEntity>,
    migrations: DashMap<String, MigrationRecordEntity>,
}

impl MemoryQueueStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn save_queue_sync(
        &self,
        record: QueueRecordEntity,
        expected_version: Option<u64>,
    ) -> StorageResult<()> {
        use dashmap::mapref::entry::Entry;

        match self.inner.queues.entry(record.player_id.clone()) {
            Entry::Vacant(slot) => {
                if let Some(expected) = expected_version {
                    return Err(StorageError::VersionConflict {
                        player_id: record.player_id,
                        expected,
                        actual: 0,
                    });
                }
                slot.insert(record);
                Ok(())
            }
            Entry::Occupied(mut slot) => {
                let stored_version = slot.get().version;
                match expected_version {
                    Some(expected) if expected == stored_version => {
                        slot.insert(record);
                        Ok(())
                    }
                    Some(expected) => Err(StorageError::VersionConflict {
                        player_id: record.player_id,
                        expected,
                        actual: stored_version,
                    }),
                    None => Err(StorageError::VersionConflict {
                        player_id: record.player_id,
                        expected: 0,
                        actual: stored_version,
                    }),
                }
            }
        }
    }
}

impl QueueStore for MemoryQueueStore {
    fn save_queue(
        &self,
        record: QueueRecordEntity,
        expected_version: Option<u64>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.save_queue_sync(record, expected_version) })
    }

    fn find_queue(
        &self,
        player_id: &str,
    ) -> BoxFuture<'static, StorageResult<Option<QueueRecordEntity>>> {
        let store = self.clone();
        let player_id = player_id.to_owned();
        Box::pin(async move { Ok(store.inner.queues.get(&player_id).map(|r| r.clone())) })
    }

    fn delete_queue(&self, player_id: &str) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        let player_id = player_id.to_owned();
        Box::pin(async move { Ok(store.inner.queues.remove(&player_id).is_some()) })
    }

    fn scan_queues_at_version(
        &self,
        version: u64,
    ) -> BoxFuture<'static, StorageResult<Vec<QueueRecordEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let mut matches: Vec<QueueRecordEntity> = store
                .inner
                .queues
                .iter()
                .filter(|entry| entry.version == version)
                .map(|entry| entry.clone())
                .collect();
            // Deterministic batch order for logs and tests.
            matches.sort_by(|a, b| a.player_id.cmp(&b.player_id));
            Ok(matches)
        })
    }

    fn save_snapshot(&self, snapshot: SnapshotEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.inner.snapshots.insert(snapshot.snapshot_id, snapshot);
            Ok(())
        })
    }

    fn find_snapshot(
        &self,
        snapshot_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<SnapshotEntity>>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.inner.snapshots.get(&snapshot_id).map(|s| s.clone())) })
    }

    fn list_snapshots(
        &self,
        player_id: &str,
    ) -> BoxFuture<'static, StorageResult<Vec<SnapshotEntity>>> {
        let store = self.clone();
        let player_id = player_id.to_owned();
        Box::pin(async move {
            let mut snapshots: Vec<SnapshotEntity> = store
                .inner
                .snapshots
                .iter()
                .filter(|entry| entry.player_id == player_id)
                .map(|entry| entry.clone())
                .collect();
            snapshots.sort_by(|a, b| b.timestamp_ms.cmp(&a.timestamp_ms));
            Ok(snapshots)
        })
    }

    fn delete_snapshot(&self, snapshot_id: Uuid) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.inner.snapshots.remove(&snapshot_id).is_some()) })
    }

    fn save_migration(
        &self,
        record: MigrationRecordEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .inner
                .migrations
                .insert(record.migration_id.clone(), record);
            Ok(())
        })
    }

    fn find_migration(
        &self,
        migration_id: &str,
    ) -> BoxFuture<'static, StorageResult<Option<MigrationRecordEntity>>> {
        let store = self.clone();
        let migration_id = migration_id.to_owned();
        Box::pin(async move { Ok(store.inner.migrations.get(&migration_id).map(|m| m.clone())) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::queue::{QueueConfig, TaskQueue};

    fn record(player: &str, version: u64) -> QueueRecordEntity {
        let mut queue = TaskQueue::new(player, QueueConfig::default(), 1_000);
        queue.version = version;
        QueueRecordEntity::from_queue(queue, None)
    }

    #[tokio::test]
    async fn insert_requires_absence() {
        let store = MemoryQueueStore::new();
        store.save_queue(record("alice", 1), None).await.unwrap();

        let err = store.save_queue(record("alice", 1), None).await.unwrap_err();
        assert!(err.is_version_conflict());
    }

    #[tokio::test]
    async fn cas_succeeds_only_against_the_stored_version() {
        let store = MemoryQueueStore::new();
        store.save_queue(record("alice", 1), None).await.unwrap();
        store
            .save_queue(record("alice", 2), Some(1))
            .await
            .unwrap();

        // A stale writer still expecting version 1 must lose.
        let err = store
            .save_queue(record("alice", 2), Some(1))
            .await
            .unwrap_err();
        match err {
            StorageError::VersionConflict {
                expected, actual, ..
            } => {
                assert_eq!(expected, 1);
                assert_eq!(actual, 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        // Read-after-failed-write returns the last successful write.
        let stored = store.find_queue("alice").await.unwrap().unwrap();
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn writers_for_different_players_are_independent() {
        let store = MemoryQueueStore::new();
        store.save_queue(record("alice", 1), None).await.unwrap();
        store.save_queue(record("bob", 1), None).await.unwrap();

        store.save_queue(record("bob", 2), Some(1)).await.unwrap();
        assert_eq!(store.find_queue("alice").await.unwrap().unwrap().version, 1);
        assert_eq!(store.find_queue("bob").await.unwrap().unwrap().version, 2);
    }

    #[tokio::test]
    async fn scan_filters_by_version() {
        let store = MemoryQueueStore::new();
        store.save_queue(record("alice", 3), None).await.unwrap();
        store.save_queue(record("bob", 3), None).await.unwrap();
        store.save_queue(record("carol", 7), None).await.unwrap();

        let matches = store.scan_queues_at_version(3).await.unwrap();
        let players: Vec<_> = matches.iter().map(|r| r.player_id.as_str()).collect();
        assert_eq!(players, vec!["alice", "bob"]);
    }
}
