//! MongoDB-backed queue store.

use std::sync::Arc;

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{Collection, Database, IndexModel, bson::doc, options::IndexOptions};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult},
    models::{MongoMigrationDocument, MongoQueueDocument, MongoSnapshotDocument},
};
use crate::dao::{
    models::{MigrationRecordEntity, QueueRecordEntity, SnapshotEntity},
    queue_store::QueueStore,
    storage::StorageResult,
};

const QUEUE_COLLECTION_NAME: &str = "task_queues";
const SNAPSHOT_COLLECTION_NAME: &str = "queue_snapshots";
const MIGRATION_COLLECTION_NAME: &str = "queue_migrations";

/// Queue store persisting to MongoDB collections.
#[derive(Clone)]
pub struct MongoQueueStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let database =
            establish_connection(&self.config.options, &self.config.database_name).await?;
        let mut guard = self.state.write().await;
        guard.database = database;
        Ok(())
    }
}

impl MongoQueueStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let database = establish_connection(&config.options, &config.database_name).await?;

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState { database }),
            config,
        });

        let store = Self { inner };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let database = self.database().await;

        // Migration scans filter on the denormalized version field.
        let queues = database.collection::<MongoQueueDocument>(QUEUE_COLLECTION_NAME);
        let version_index = IndexModel::builder()
            .keys(doc! {"version": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("queue_version_idx".to_owned()))
                    .build(),
            )
            .build();
        queues
            .create_index(version_index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: QUEUE_COLLECTION_NAME,
                index: "version",
                source,
            })?;

        // Snapshot listings are per player, newest first.
        let snapshots = database.collection::<MongoSnapshotDocument>(SNAPSHOT_COLLECTION_NAME);
        let snapshot_index = IndexModel::builder()
            .keys(doc! {"player_id": 1, "timestamp": -1})
            .options(
                IndexOptions::builder()
                    .name(Some("snapshot_player_time_idx".to_owned()))
                    .build(),
            )
            .build();
        snapshots
            .create_index(snapshot_index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: SNAPSHOT_COLLECTION_NAME,
                index: "player_id,timestamp",
                source,
            })?;

        Ok(())
    }

    async fn database(&self) -> Database {
        let guard = self.inner.state.read().await;
        guard.database.clone()
    }

    async fn queue_collection(&self) -> Collection<MongoQueueDocument> {
        let guard = self.inner.state.read().await;
        guard
            .database
            .collection::<MongoQueueDocument>(QUEUE_COLLECTION_NAME)
    }

    async fn snapshot_collection(&self) -> Collection<MongoSnapshotDocument> {
        let guard = self.inner.state.read().await;
        guard
            .database
            .collection::<MongoSnapshotDocument>(SNAPSHOT_COLLECTION_NAME)
    }

    async fn migration_collection(&self) -> Collection<MongoMigrationDocument> {
        let guard = self.inner.state.read().await;
        guard
            .database
            .collection::<MongoMigrationDocument>(MIGRATION_COLLECTION_NAME)
    }

    async fn stored_version(&self, player_id: &str) -> MongoResult<Option<u64>> {
        let collection = self.queue_collection().await;
        let document = collection
            .find_one(doc! {"_id": player_id})
            .await
            .map_err(|source| MongoDaoError::LoadQueue {
                player_id: player_id.to_owned(),
                source,
            })?;
        Ok(document.map(|found| found.version as u64))
    }

    async fn save_queue(
        &self,
        record: QueueRecordEntity,
        expected_version: Option<u64>,
    ) -> MongoResult<()> {
        let player_id = record.player_id.clone();
        let document: MongoQueueDocument = record.try_into()?;
        let collection = self.queue_collection().await;

        match expected_version {
            Some(expected) => {
                // Conditional replace: only the writer that read the stored
                // version may advance it.
                let result = collection
                    .replace_one(
                        doc! {"_id": &player_id, "version": expected as i64},
                        &document,
                    )
                    .await
                    .map_err(|source| MongoDaoError::SaveQueue {
                        player_id: player_id.clone(),
                        source,
                    })?;

                if result.matched_count == 0 {
                    let actual = self.stored_version(&player_id).await?.unwrap_or(0);
                    return Err(MongoDaoError::VersionConflict {
                        player_id,
                        expected,
                        actual,
                    });
                }
                Ok(())
            }
            None => {
                // Fresh record: the unique _id constraint is the guard.
                match collection.insert_one(&document).await {
                    Ok(_) => Ok(()),
                    Err(source) => {
                        if let Some(actual) = self.stored_version(&player_id).await? {
                            return Err(MongoDaoError::VersionConflict {
                                player_id,
                                expected: 0,
                                actual,
                            });
                        }
                        Err(MongoDaoError::SaveQueue { player_id, source })
                    }
                }
            }
        }
    }

    async fn find_queue(&self, player_id: &str) -> MongoResult<Option<QueueRecordEntity>> {
        let collection = self.queue_collection().await;
        let document = collection
            .find_one(doc! {"_id": player_id})
            .await
            .map_err(|source| MongoDaoError::LoadQueue {
                player_id: player_id.to_owned(),
                source,
            })?;

        document.map(TryInto::try_into).transpose()
    }

    async fn delete_queue(&self, player_id: &str) -> MongoResult<bool> {
        let collection = self.queue_collection().await;
        let result = collection
            .delete_one(doc! {"_id": player_id})
            .await
            .map_err(|source| MongoDaoError::SaveQueue {
                player_id: player_id.to_owned(),
                source,
            })?;
        Ok(result.deleted_count > 0)
    }

    async fn scan_queues_at_version(&self, version: u64) -> MongoResult<Vec<QueueRecordEntity>> {
        let collection = self.queue_collection().await;
        let documents: Vec<MongoQueueDocument> = collection
            .find(doc! {"version": version as i64})
            .sort(doc! {"_id": 1})
            .await
            .map_err(|source| MongoDaoError::ScanQueues { version, source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::ScanQueues { version, source })?;

        documents.into_iter().map(TryInto::try_into).collect()
    }

    async fn save_snapshot(&self, snapshot: SnapshotEntity) -> MongoResult<()> {
        let snapshot_id = snapshot.snapshot_id;
        let document: MongoSnapshotDocument = snapshot.try_into()?;
        let collection = self.snapshot_collection().await;

        collection
            .replace_one(doc! {"_id": snapshot_id.to_string()}, &document)
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::SaveSnapshot {
                snapshot_id,
                source,
            })?;
        Ok(())
    }

    async fn find_snapshot(&self, snapshot_id: Uuid) -> MongoResult<Option<SnapshotEntity>> {
        let collection = self.snapshot_collection().await;
        let document = collection
            .find_one(doc! {"_id": snapshot_id.to_string()})
            .await
            .map_err(|source| MongoDaoError::LoadSnapshot {
                snapshot_id,
                source,
            })?;

        document.map(TryInto::try_into).transpose()
    }

    async fn list_snapshots(&self, player_id: &str) -> MongoResult<Vec<SnapshotEntity>> {
        let collection = self.snapshot_collection().await;
        let documents: Vec<MongoSnapshotDocument> = collection
            .find(doc! {"player_id": player_id})
            .sort(doc! {"timestamp": -1})
            .await
            .map_err(|source| MongoDaoError::ListSnapshots {
                player_id: player_id.to_owned(),
                source,
            })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::ListSnapshots {
                player_id: player_id.to_owned(),
                source,
            })?;

        documents.into_iter().map(TryInto::try_into).collect()
    }

    async fn delete_snapshot(&self, snapshot_id: Uuid) -> MongoResult<bool> {
        let collection = self.snapshot_collection().await;
        let result = collection
            .delete_one(doc! {"_id": snapshot_id.to_string()})
            .await
            .map_err(|source| MongoDaoError::SaveSnapshot {
                snapshot_id,
                source,
            })?;
        Ok(result.deleted_count > 0)
    }

    async fn save_migration(&self, record: MigrationRecordEntity) -> MongoResult<()> {
        let migration_id = record.migration_id.clone();
        let document: MongoMigrationDocument = record.into();
        let collection = self.migration_collection().await;

        collection
            .replace_one(doc! {"_id": &migration_id}, &document)
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::SaveMigration {
                migration_id,
                source,
            })?;
        Ok(())
    }

    async fn find_migration(
        &self,
        migration_id: &str,
    ) -> MongoResult<Option<MigrationRecordEntity>> {
        let collection = self.migration_collection().await;
        let document = collection
            .find_one(doc! {"_id": migration_id})
            .await
            .map_err(|source| MongoDaoError::LoadMigration {
                migration_id: migration_id.to_owned(),
                source,
            })?;

        Ok(document.map(Into::into))
    }
}

impl QueueStore for MongoQueueStore {
    fn save_queue(
        &self,
        record: QueueRecordEntity,
        expected_version: Option<u64>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .save_queue(record, expected_version)
                .await
                .map_err(Into::into)
        })
    }

    fn find_queue(
        &self,
        player_id: &str,
    ) -> BoxFuture<'static, StorageResult<Option<QueueRecordEntity>>> {
        let store = self.clone();
        let player_id = player_id.to_owned();
        Box::pin(async move { store.find_queue(&player_id).await.map_err(Into::into) })
    }

    fn delete_queue(&self, player_id: &str) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        let player_id = player_id.to_owned();
        Box::pin(async move { store.delete_queue(&player_id).await.map_err(Into::into) })
    }

    fn scan_queues_at_version(
        &self,
        version: u64,
    ) -> BoxFuture<'static, StorageResult<Vec<QueueRecordEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .scan_queues_at_version(version)
                .await
                .map_err(Into::into)
        })
    }

    fn save_snapshot(&self, snapshot: SnapshotEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.save_snapshot(snapshot).await.map_err(Into::into) })
    }

    fn find_snapshot(
        &self,
        snapshot_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<SnapshotEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_snapshot(snapshot_id).await.map_err(Into::into) })
    }

    fn list_snapshots(
        &self,
        player_id: &str,
    ) -> BoxFuture<'static, StorageResult<Vec<SnapshotEntity>>> {
        let store = self.clone();
        let player_id = player_id.to_owned();
        Box::pin(async move { store.list_snapshots(&player_id).await.map_err(Into::into) })
    }

    fn delete_snapshot(&self, snapshot_id: Uuid) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { store.delete_snapshot(snapshot_id).await.map_err(Into::into) })
    }

    fn save_migration(
        &self,
        record: MigrationRecordEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.save_migration(record).await.map_err(Into::into) })
    }

    fn find_migration(
        &self,
        migration_id: &str,
    ) -> BoxFuture<'static, StorageResult<Option<MigrationRecordEntity>>> {
        let store = self.clone();
        let migration_id = migration_id.to_owned();
        Box::pin(async move { store.find_migration(&migration_id).await.map_err(Into::into) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
