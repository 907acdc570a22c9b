use mongodb::error::Error as MongoError;
use thiserror::Error;
use uuid::Uuid;

/// Result alias for MongoDB store operations.
pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

/// Errors raised by the MongoDB queue store.
#[derive(Debug, Error)]
pub enum MongoDaoError {
    /// The connection URI could not be parsed.
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        /// The offending URI.
        uri: String,
        /// Driver-side parse failure.
        #[source]
        source: MongoError,
    },
    /// The driver rejected the assembled client options.
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        /// Driver-side construction failure.
        #[source]
        source: MongoError,
    },
    /// The server never answered a ping while establishing the connection.
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        /// Ping attempts made before giving up.
        attempts: u32,
        /// Last ping failure.
        #[source]
        source: MongoError,
    },
    /// A routine health-check ping failed.
    #[error("MongoDB ping health check failed")]
    HealthPing {
        /// Driver-side ping failure.
        #[source]
        source: MongoError,
    },
    /// Index creation failed at startup.
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        /// Collection the index belongs to.
        collection: &'static str,
        /// Name of the index.
        index: &'static str,
        /// Driver-side failure.
        #[source]
        source: MongoError,
    },
    /// Writing a queue record failed.
    #[error("failed to save queue for player `{player_id}`")]
    SaveQueue {
        /// Owner of the record.
        player_id: String,
        /// Driver-side write failure.
        #[source]
        source: MongoError,
    },
    /// Reading a queue record failed.
    #[error("failed to load queue for player `{player_id}`")]
    LoadQueue {
        /// Owner of the record.
        player_id: String,
        /// Driver-side read failure.
        #[source]
        source: MongoError,
    },
    /// A version scan over the queues collection failed.
    #[error("failed to scan queues at version {version}")]
    ScanQueues {
        /// Version the scan filtered on.
        version: u64,
        /// Driver-side read failure.
        #[source]
        source: MongoError,
    },
    /// Writing a snapshot failed.
    #[error("failed to save snapshot `{snapshot_id}`")]
    SaveSnapshot {
        /// Identifier of the snapshot.
        snapshot_id: Uuid,
        /// Driver-side write failure.
        #[source]
        source: MongoError,
    },
    /// Reading a snapshot failed.
    #[error("failed to load snapshot `{snapshot_id}`")]
    LoadSnapshot {
        /// Identifier of the snapshot.
        snapshot_id: Uuid,
        /// Driver-side read failure.
        #[source]
        source: MongoError,
    },
    /// Listing a player's snapshots failed.
    #[error("failed to list snapshots for player `{player_id}`")]
    ListSnapshots {
        /// Owner of the snapshots.
        player_id: String,
        /// Driver-side read failure.
        #[source]
        source: MongoError,
    },
    /// Writing a migration record failed.
    #[error("failed to save migration record `{migration_id}`")]
    SaveMigration {
        /// Identifier of the migration.
        migration_id: String,
        /// Driver-side write failure.
        #[source]
        source: MongoError,
    },
    /// Reading a migration record failed.
    #[error("failed to load migration record `{migration_id}`")]
    LoadMigration {
        /// Identifier of the migration.
        migration_id: String,
        /// Driver-side read failure.
        #[source]
        source: MongoError,
    },
    /// The queue aggregate could not be serialized for storage.
    #[error("failed to encode queue data for player `{player_id}`")]
    EncodeQueue {
        /// Owner of the record.
        player_id: String,
        /// Serialization failure.
        #[source]
        source: serde_json::Error,
    },
    /// A stored queue aggregate could not be deserialized.
    #[error("failed to decode queue data for player `{player_id}`")]
    DecodeQueue {
        /// Owner of the record.
        player_id: String,
        /// Deserialization failure.
        #[source]
        source: serde_json::Error,
    },
    /// A stored snapshot id was not a valid UUID.
    #[error("failed to decode snapshot id `{value}`")]
    DecodeSnapshotId {
        /// The stored value.
        value: String,
        /// Parse failure.
        #[source]
        source: uuid::Error,
    },
    /// A conditional write lost the optimistic concurrency race.
    #[error("version conflict for player `{player_id}`: expected {expected}, found {actual}")]
    VersionConflict {
        /// Player whose record was contended.
        player_id: String,
        /// Version the writer based its update on.
        expected: u64,
        /// Version currently stored.
        actual: u64,
    },
}
