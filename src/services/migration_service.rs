//! Schema migration registry and batch executor.
//!
//! Migrations are compiled transformations registered at startup; nothing
//! executable is ever read from persisted data. A batch scans every queue
//! record stored at the migration's source version, snapshots each one, and
//! applies the transformation record by record, skipping (and logging)
//! per-record failures.

use indexmap::IndexMap;
use tracing::{error, info, warn};

use crate::{
    dao::models::{MigrationRecordEntity, MigrationStatus, SnapshotReason},
    error::ServiceError,
    services::{queue_service, snapshot_service},
    state::{SharedState, queue::TaskQueue},
};

/// Compiled queue transformation.
type TransformFn = Box<dyn Fn(&mut TaskQueue) -> Result<(), String> + Send + Sync>;

/// One registered migration.
pub struct Migration {
    /// Unique id, doubles as the persisted record key.
    pub id: String,
    /// Stored queue version the migration reads.
    pub from_version: u64,
    /// Version recorded as the migration's target.
    pub to_version: u64,
    transform: TransformFn,
}

impl Migration {
    /// Define a migration from a compiled transformation.
    pub fn new(
        id: impl Into<String>,
        from_version: u64,
        to_version: u64,
        transform: impl Fn(&mut TaskQueue) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            from_version,
            to_version,
            transform: Box::new(transform),
        }
    }
}

/// Startup-time registry of migrations, iterated in registration order.
#[derive(Default)]
pub struct MigrationRegistry {
    migrations: IndexMap<String, Migration>,
}

impl MigrationRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a migration; the id must be unique.
    pub fn register(&mut self, migration: Migration) -> Result<(), ServiceError> {
        let id = migration.id.clone();
        if self.migrations.insert(id.clone(), migration).is_some() {
            return Err(ServiceError::InvalidInput(format!(
                "migration `{id}` is already registered"
            )));
        }
        Ok(())
    }

    /// Look up a migration by id.
    pub fn get(&self, id: &str) -> Option<&Migration> {
        self.migrations.get(id)
    }

    /// Registered migration ids, in registration order.
    pub fn ids(&self) -> Vec<&str> {
        self.migrations.keys().map(String::as_str).collect()
    }
}

/// Execute one registered migration as a batch.
///
/// Already-completed migrations are not re-run. Every affected queue gets a
/// `pre_migration` snapshot before being transformed; the transformed queue
/// persists with validation disabled because it may be mid-schema. The
/// returned record carries the final status and affected players.
pub async fn execute(
    state: &SharedState,
    registry: &MigrationRegistry,
    id: &str,
) -> Result<MigrationRecordEntity, ServiceError> {
    let store = state.queue_store().await.ok_or(ServiceError::Degraded)?;
    let Some(migration) = registry.get(id) else {
        return Err(ServiceError::NotFound(format!(
            "migration `{id}` is not registered"
        )));
    };

    if let Some(existing) = store.find_migration(id).await?
        && existing.status == MigrationStatus::Completed
    {
        info!(migration_id = id, "migration already completed; skipping");
        return Ok(existing);
    }

    let mut record = MigrationRecordEntity {
        migration_id: migration.id.clone(),
        from_version: migration.from_version,
        to_version: migration.to_version,
        timestamp_ms: state.now_ms(),
        status: MigrationStatus::Pending,
        affected_players: Vec::new(),
        error: None,
    };
    store.save_migration(record.clone()).await?;

    record.status = MigrationStatus::InProgress;
    record.timestamp_ms = state.now_ms();
    store.save_migration(record.clone()).await?;

    let scanned = match store.scan_queues_at_version(migration.from_version).await {
        Ok(records) => records,
        Err(err) => {
            error!(migration_id = id, error = %err, "migration scan failed");
            record.status = MigrationStatus::Failed;
            record.error = Some(err.to_string());
            record.timestamp_ms = state.now_ms();
            store.save_migration(record.clone()).await?;
            return Ok(record);
        }
    };

    info!(
        migration_id = id,
        candidates = scanned.len(),
        "migration batch started"
    );

    for queue_record in scanned {
        let player_id = queue_record.player_id.clone();
        match migrate_one(state, migration, queue_record.queue_data).await {
            Ok(()) => record.affected_players.push(player_id),
            Err(err) => {
                warn!(
                    migration_id = id,
                    player_id,
                    error = %err,
                    "skipping record that failed to migrate"
                );
            }
        }
    }

    record.status = MigrationStatus::Completed;
    record.timestamp_ms = state.now_ms();
    store.save_migration(record.clone()).await?;

    info!(
        migration_id = id,
        affected = record.affected_players.len(),
        "migration batch completed"
    );
    Ok(record)
}

async fn migrate_one(
    state: &SharedState,
    migration: &Migration,
    mut queue: TaskQueue,
) -> Result<(), ServiceError> {
    snapshot_service::create(state, &queue, SnapshotReason::PreMigration).await?;

    (migration.transform)(&mut queue).map_err(ServiceError::TaskExecution)?;

    queue_service::save(
        state,
        queue,
        queue_service::SaveOptions {
            validate: false,
            snapshot_before_update: false,
        },
    )
    .await?;
    Ok(())
}
