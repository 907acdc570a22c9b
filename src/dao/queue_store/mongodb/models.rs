use mongodb::bson::DateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Uuid fields are stored as hyphenated strings so document values and query
// filters share one representation regardless of bson feature flags.

use super::error::{MongoDaoError, MongoResult};
use crate::dao::models::{
    MigrationRecordEntity, MigrationStatus, QueueRecordEntity, SnapshotEntity, SnapshotReason,
};
use crate::state::queue::TaskQueue;

/// Queue record document.
///
/// The aggregate is stored as a JSON string: the domain model uses u64
/// millisecond fields that BSON integers cannot represent uniformly, and the
/// engine only ever reads the aggregate whole. Filterable fields are
/// denormalized alongside it as native BSON types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoQueueDocument {
    #[serde(rename = "_id")]
    pub player_id: String,
    pub queue_data: String,
    pub version: i64,
    pub checksum: String,
    pub last_updated: DateTime,
    pub last_validated: DateTime,
    pub is_running: bool,
    pub is_paused: bool,
    pub current_task_id: Option<String>,
    pub queue_size: i64,
    pub total_tasks_completed: i64,
    pub last_processed: Option<DateTime>,
}

impl TryFrom<QueueRecordEntity> for MongoQueueDocument {
    type Error = MongoDaoError;

    fn try_from(record: QueueRecordEntity) -> MongoResult<Self> {
        let queue_data = serde_json::to_string(&record.queue_data).map_err(|source| {
            MongoDaoError::EncodeQueue {
                player_id: record.player_id.clone(),
                source,
            }
        })?;

        Ok(Self {
            player_id: record.player_id,
            queue_data,
            version: record.version as i64,
            checksum: record.checksum,
            last_updated: DateTime::from_millis(record.last_updated_ms as i64),
            last_validated: DateTime::from_millis(record.last_validated_ms as i64),
            is_running: record.is_running,
            is_paused: record.is_paused,
            current_task_id: record.current_task_id.map(|id| id.to_string()),
            queue_size: record.queue_size as i64,
            total_tasks_completed: record.total_tasks_completed as i64,
            last_processed: record
                .last_processed_ms
                .map(|ms| DateTime::from_millis(ms as i64)),
        })
    }
}

impl TryFrom<MongoQueueDocument> for QueueRecordEntity {
    type Error = MongoDaoError;

    fn try_from(document: MongoQueueDocument) -> MongoResult<Self> {
        let queue_data: TaskQueue = serde_json::from_str(&document.queue_data).map_err(|source| {
            MongoDaoError::DecodeQueue {
                player_id: document.player_id.clone(),
                source,
            }
        })?;

        // Re-derive the task id from the aggregate rather than parsing the
        // denormalized copy.
        let current_task_id = queue_data.current_task.as_ref().map(|task| task.id);

        Ok(Self {
            player_id: document.player_id,
            queue_data,
            version: document.version as u64,
            checksum: document.checksum,
            last_updated_ms: document.last_updated.timestamp_millis() as u64,
            last_validated_ms: document.last_validated.timestamp_millis() as u64,
            is_running: document.is_running,
            is_paused: document.is_paused,
            current_task_id,
            queue_size: document.queue_size as usize,
            total_tasks_completed: document.total_tasks_completed as u64,
            last_processed_ms: document
                .last_processed
                .map(|at| at.timestamp_millis() as u64),
        })
    }
}

/// Snapshot document; the compressed queue copy is a JSON string for the
/// same reason as [`MongoQueueDocument::queue_data`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoSnapshotDocument {
    #[serde(rename = "_id")]
    pub snapshot_id: String,
    pub player_id: String,
    pub timestamp: DateTime,
    pub reason: SnapshotReason,
    pub source_version: i64,
    pub checksum: String,
    pub snapshot_data: String,
    pub original_size_bytes: i64,
    pub compressed_size_bytes: i64,
    pub ttl: Option<DateTime>,
}

impl TryFrom<SnapshotEntity> for MongoSnapshotDocument {
    type Error = MongoDaoError;

    fn try_from(snapshot: SnapshotEntity) -> MongoResult<Self> {
        let snapshot_data = serde_json::to_string(&snapshot.snapshot_data).map_err(|source| {
            MongoDaoError::EncodeQueue {
                player_id: snapshot.player_id.clone(),
                source,
            }
        })?;

        Ok(Self {
            snapshot_id: snapshot.snapshot_id.to_string(),
            player_id: snapshot.player_id,
            timestamp: DateTime::from_millis(snapshot.timestamp_ms as i64),
            reason: snapshot.reason,
            source_version: snapshot.source_version as i64,
            checksum: snapshot.checksum,
            snapshot_data,
            original_size_bytes: snapshot.original_size_bytes as i64,
            compressed_size_bytes: snapshot.compressed_size_bytes as i64,
            ttl: snapshot.ttl_ms.map(|ms| DateTime::from_millis(ms as i64)),
        })
    }
}

impl TryFrom<MongoSnapshotDocument> for SnapshotEntity {
    type Error = MongoDaoError;

    fn try_from(document: MongoSnapshotDocument) -> MongoResult<Self> {
        let snapshot_id =
            document
                .snapshot_id
                .parse::<Uuid>()
                .map_err(|source| MongoDaoError::DecodeSnapshotId {
                    value: document.snapshot_id.clone(),
                    source,
                })?;
        let snapshot_data: TaskQueue =
            serde_json::from_str(&document.snapshot_data).map_err(|source| {
                MongoDaoError::DecodeQueue {
                    player_id: document.player_id.clone(),
                    source,
                }
            })?;

        Ok(Self {
            snapshot_id,
            player_id: document.player_id,
            timestamp_ms: document.timestamp.timestamp_millis() as u64,
            reason: document.reason,
            source_version: document.source_version as u64,
            checksum: document.checksum,
            snapshot_data,
            original_size_bytes: document.original_size_bytes as usize,
            compressed_size_bytes: document.compressed_size_bytes as usize,
            ttl_ms: document.ttl.map(|at| at.timestamp_millis() as u64),
        })
    }
}

/// Migration record document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoMigrationDocument {
    #[serde(rename = "_id")]
    pub migration_id: String,
    pub from_version: i64,
    pub to_version: i64,
    pub timestamp: DateTime,
    pub status: MigrationStatus,
    pub affected_players: Vec<String>,
    pub error: Option<String>,
}

impl From<MigrationRecordEntity> for MongoMigrationDocument {
    fn from(record: MigrationRecordEntity) -> Self {
        Self {
            migration_id: record.migration_id,
            from_version: record.from_version as i64,
            to_version: record.to_version as i64,
            timestamp: DateTime::from_millis(record.timestamp_ms as i64),
            status: record.status,
            affected_players: record.affected_players,
            error: record.error,
        }
    }
}

impl From<MongoMigrationDocument> for MigrationRecordEntity {
    fn from(document: MongoMigrationDocument) -> Self {
        Self {
            migration_id: document.migration_id,
            from_version: document.from_version as u64,
            to_version: document.to_version as u64,
            timestamp_ms: document.timestamp.timestamp_millis() as u64,
            status: document.status,
            affected_players: document.affected_players,
            error: document.error,
        }
    }
}
