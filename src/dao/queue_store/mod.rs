/// In-memory backend used by tests, development, and degraded fallback.
pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use futures::future::BoxFuture;
use uuid::Uuid;

use crate::dao::models::{MigrationRecordEntity, QueueRecordEntity, SnapshotEntity};
use crate::dao::storage::StorageResult;

/// Abstraction over the persistence layer for queue records, snapshots, and
/// migration records.
///
/// The only concurrency primitive a backend must provide is the conditional
/// write in [`QueueStore::save_queue`]: compare-and-swap on the stored
/// version. Everything else in the engine builds on that.
pub trait QueueStore: Send + Sync {
    /// Atomically persist a queue record.
    ///
    /// With `expected_version = Some(v)` the write succeeds only if the
    /// stored record currently has version `v` (returning
    /// [`StorageError::VersionConflict`](crate::dao::storage::StorageError)
    /// otherwise, with the version actually found). With `None` the write
    /// succeeds only if no record exists yet for the player.
    fn save_queue(
        &self,
        record: QueueRecordEntity,
        expected_version: Option<u64>,
    ) -> BoxFuture<'static, StorageResult<()>>;

    /// Strongly consistent read of a player's queue record.
    fn find_queue(
        &self,
        player_id: &str,
    ) -> BoxFuture<'static, StorageResult<Option<QueueRecordEntity>>>;

    /// Delete a player's queue record, returning whether one existed.
    fn delete_queue(&self, player_id: &str) -> BoxFuture<'static, StorageResult<bool>>;

    /// All queue records currently stored at the given version.
    fn scan_queues_at_version(
        &self,
        version: u64,
    ) -> BoxFuture<'static, StorageResult<Vec<QueueRecordEntity>>>;

    /// Persist a snapshot.
    fn save_snapshot(&self, snapshot: SnapshotEntity) -> BoxFuture<'static, StorageResult<()>>;

    /// Fetch one snapshot by id, regardless of owner.
    fn find_snapshot(
        &self,
        snapshot_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<SnapshotEntity>>>;

    /// All snapshots for a player, newest first.
    fn list_snapshots(
        &self,
        player_id: &str,
    ) -> BoxFuture<'static, StorageResult<Vec<SnapshotEntity>>>;

    /// Delete a snapshot, returning whether it existed.
    fn delete_snapshot(&self, snapshot_id: Uuid) -> BoxFuture<'static, StorageResult<bool>>;

    /// Upsert a migration record.
    fn save_migration(
        &self,
        record: MigrationRecordEntity,
    ) -> BoxFuture<'static, StorageResult<()>>;

    /// Fetch a migration record by id.
    fn find_migration(
        &self,
        migration_id: &str,
    ) -> BoxFuture<'static, StorageResult<Option<MigrationRecordEntity>>>;

    /// Cheap connectivity probe.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;

    /// Attempt to re-establish a dropped connection.
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
