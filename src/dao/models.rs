use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::queue::TaskQueue;

/// Persisted queue record, one per player.
///
/// The full queue lives in `queue_data`; a handful of fields are denormalized
/// to the top level so backends can filter and index without deserializing
/// the aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueRecordEntity {
    /// Owning player, primary key.
    pub player_id: String,
    /// The full queue aggregate.
    pub queue_data: TaskQueue,
    /// Denormalized copy of the queue version, used for conditional writes.
    pub version: u64,
    /// Denormalized copy of the queue checksum.
    pub checksum: String,
    /// Last write time, epoch milliseconds.
    pub last_updated_ms: u64,
    /// Last time integrity validation ran against this record.
    pub last_validated_ms: u64,
    /// Denormalized running flag.
    pub is_running: bool,
    /// Denormalized paused flag.
    pub is_paused: bool,
    /// Denormalized id of the current task, if any.
    pub current_task_id: Option<Uuid>,
    /// Denormalized count of queued tasks.
    pub queue_size: usize,
    /// Denormalized lifetime completion counter.
    pub total_tasks_completed: u64,
    /// Last time the pipeline processed this queue, epoch milliseconds.
    pub last_processed_ms: Option<u64>,
}

impl QueueRecordEntity {
    /// Build a record from a queue, denormalizing the indexed fields.
    pub fn from_queue(queue: TaskQueue, last_processed_ms: Option<u64>) -> Self {
        Self {
            player_id: queue.player_id.clone(),
            version: queue.version,
            checksum: queue.checksum.clone(),
            last_updated_ms: queue.last_updated_ms,
            last_validated_ms: queue.last_updated_ms,
            is_running: queue.is_running,
            is_paused: queue.is_paused,
            current_task_id: queue.current_task.as_ref().map(|task| task.id),
            queue_size: queue.queued_tasks.len(),
            total_tasks_completed: queue.total_tasks_completed,
            last_processed_ms,
            queue_data: queue,
        }
    }
}

impl From<QueueRecordEntity> for TaskQueue {
    fn from(record: QueueRecordEntity) -> Self {
        record.queue_data
    }
}

/// Why a snapshot was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotReason {
    /// Taken automatically before a guarded update.
    BeforeUpdate,
    /// Taken by the scheduler on its periodic cadence.
    Periodic,
    /// Requested explicitly by an operator.
    Manual,
    /// Taken before applying a schema migration.
    PreMigration,
}

/// Immutable point-in-time copy of a queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntity {
    /// Primary key.
    pub snapshot_id: Uuid,
    /// Player the snapshot belongs to.
    pub player_id: String,
    /// When the snapshot was taken, epoch milliseconds.
    pub timestamp_ms: u64,
    /// Why the snapshot was taken.
    pub reason: SnapshotReason,
    /// Queue version at the time of the snapshot.
    pub source_version: u64,
    /// Checksum of the snapshotted queue.
    pub checksum: String,
    /// Compressed queue copy (history and reward tails trimmed).
    pub snapshot_data: TaskQueue,
    /// Serialized size before compression, bytes.
    pub original_size_bytes: usize,
    /// Serialized size after compression, bytes.
    pub compressed_size_bytes: usize,
    /// Optional retention TTL, epoch milliseconds after which the record may
    /// be dropped by the backend.
    pub ttl_ms: Option<u64>,
}

impl SnapshotEntity {
    /// Compression ratio achieved (1.0 when nothing was trimmed).
    pub fn compression_ratio(&self) -> f64 {
        if self.original_size_bytes == 0 {
            return 1.0;
        }
        self.compressed_size_bytes as f64 / self.original_size_bytes as f64
    }
}

/// Lifecycle of a migration batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    /// Registered but not yet executed.
    Pending,
    /// Batch currently running.
    InProgress,
    /// Batch finished; per-record failures may still have been skipped.
    Completed,
    /// The batch itself failed before per-record handling.
    Failed,
}

/// Record describing one schema migration run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecordEntity {
    /// Primary key, the registered migration id.
    pub migration_id: String,
    /// Queue schema version the migration reads.
    pub from_version: u64,
    /// Queue schema version the migration writes.
    pub to_version: u64,
    /// When the record was last updated, epoch milliseconds.
    pub timestamp_ms: u64,
    /// Current batch status.
    pub status: MigrationStatus,
    /// Players whose queues were transformed.
    pub affected_players: Vec<String>,
    /// Batch-level error, recorded when `status` is `Failed`.
    pub error: Option<String>,
}
