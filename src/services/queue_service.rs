//! Versioned queue persistence with integrity enforcement.
//!
//! Every mutation funnels through [`save`], which recomputes the checksum,
//! bumps the version by exactly one, and writes through the store's
//! compare-and-swap. [`load`] transparently repairs repairable corruption so
//! callers never observe a known-invalid queue.

use std::sync::Arc;

use tracing::{info, warn};

use crate::{
    dao::{models::QueueRecordEntity, queue_store::QueueStore},
    dto::status::QueueStatus,
    error::ServiceError,
    state::{
        SharedState,
        integrity::{self, ValidationReport},
        queue::TaskQueue,
    },
};

/// Behaviour switches for [`save`].
#[derive(Debug, Clone, Copy)]
pub struct SaveOptions {
    /// Reject the write when the queue fails integrity validation.
    pub validate: bool,
    /// Take a `before_update` snapshot of the persisted state first.
    pub snapshot_before_update: bool,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            validate: true,
            snapshot_before_update: false,
        }
    }
}

async fn store(state: &SharedState) -> Result<Arc<dyn QueueStore>, ServiceError> {
    state.queue_store().await.ok_or(ServiceError::Degraded)
}

/// Persist a queue through the store's compare-and-swap.
///
/// The expected version is the queue's current `version`; a queue at version
/// zero has never been persisted and is written as an insert. On success the
/// returned queue carries `version + 1`, a fresh checksum, and an updated
/// history entry. A version conflict is returned as
/// [`ServiceError::Conflict`]; retrying (reload, reapply, save) is the
/// caller's responsibility, usually via the retry service.
pub async fn save(
    state: &SharedState,
    mut queue: TaskQueue,
    options: SaveOptions,
) -> Result<TaskQueue, ServiceError> {
    let store = store(state).await?;
    let now_ms = state.now_ms();

    // Stamp the post-mutation checksum before validating, so a stale
    // checksum from before the mutation is not mistaken for corruption.
    queue.checksum = integrity::compute_checksum(&queue);

    if options.validate {
        let report = integrity::validate(&queue, now_ms);
        if !report.is_valid {
            return Err(integrity_error(&queue.player_id, &report));
        }
    }

    if options.snapshot_before_update && queue.version > 0 {
        if let Some(previous) = store.find_queue(&queue.player_id).await? {
            super::snapshot_service::create(
                state,
                &previous.queue_data,
                crate::dao::models::SnapshotReason::BeforeUpdate,
            )
            .await?;
        }
    }

    let expected = (queue.version > 0).then_some(queue.version);
    queue.version += 1;
    queue.last_updated_ms = now_ms;
    queue.record_history(now_ms);

    let record = QueueRecordEntity::from_queue(queue.clone(), Some(now_ms));
    store.save_queue(record, expected).await?;
    Ok(queue)
}

/// Load a player's queue, repairing repairable corruption transparently.
///
/// Records without a player id are treated as absent. Unrepairable
/// corruption surfaces as [`ServiceError::Integrity`].
pub async fn load(
    state: &SharedState,
    player_id: &str,
) -> Result<Option<TaskQueue>, ServiceError> {
    let store = store(state).await?;
    let Some(record) = store.find_queue(player_id).await? else {
        return Ok(None);
    };

    let mut queue: TaskQueue = record.into();
    if queue.player_id.is_empty() {
        warn!(player_id, "stored record has no player id; treating as absent");
        return Ok(None);
    }

    let now_ms = state.now_ms();
    let report = integrity::validate(&queue, now_ms);
    if report.is_valid {
        return Ok(Some(queue));
    }
    if !report.can_repair {
        return Err(integrity_error(player_id, &report));
    }

    info!(
        player_id,
        score = report.integrity_score,
        actions = ?report.repair_actions,
        "repairing corrupted queue on load"
    );
    integrity::repair(&mut queue, &report, now_ms);

    // Best-effort re-persist; a concurrent writer fixing the same record is
    // not an error for this reader.
    let repaired = queue.clone();
    match save(state, queue, SaveOptions::default()).await {
        Ok(saved) => Ok(Some(saved)),
        Err(err) if err.is_conflict() => {
            warn!(player_id, "lost repair write race; returning repaired copy");
            Ok(Some(repaired))
        }
        Err(err) => Err(err),
    }
}

/// Load a player's queue, creating an empty unpersisted one when absent.
pub async fn load_or_create(
    state: &SharedState,
    player_id: &str,
) -> Result<TaskQueue, ServiceError> {
    match load(state, player_id).await? {
        Some(queue) => Ok(queue),
        None => Ok(TaskQueue::new(
            player_id,
            state.config().queue.clone(),
            state.now_ms(),
        )),
    }
}

/// Read-only status projection of a player's last persisted queue state.
pub async fn status(state: &SharedState, player_id: &str) -> Result<QueueStatus, ServiceError> {
    let queue = load(state, player_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("no queue for player `{player_id}`")))?;
    Ok(QueueStatus::from(&queue))
}

/// Delete a player's queue record, returning whether one existed.
pub async fn delete(state: &SharedState, player_id: &str) -> Result<bool, ServiceError> {
    let store = store(state).await?;
    let deleted = store.delete_queue(player_id).await?;
    state.unregister_active_player(player_id);
    Ok(deleted)
}

fn integrity_error(player_id: &str, report: &ValidationReport) -> ServiceError {
    let detail = report
        .errors
        .iter()
        .map(|issue| issue.message.as_str())
        .collect::<Vec<_>>()
        .join("; ");
    ServiceError::Integrity {
        player_id: player_id.to_owned(),
        detail,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::queue_store::memory::MemoryQueueStore,
        state::{
            EngineState,
            clock::ManualClock,
            queue::{ActivityPayload, Task},
        },
    };

    async fn test_state() -> SharedState {
        let state =
            EngineState::with_clock(AppConfig::default(), Arc::new(ManualClock::starting_at(1_000)));
        state
            .install_queue_store(Arc::new(MemoryQueueStore::new()))
            .await;
        state
    }

    fn sample_task(player: &str) -> Task {
        Task::new(
            player,
            "Mine copper",
            ActivityPayload::Harvesting {
                resource_id: "copper_ore".into(),
                skill: "mining".into(),
                skill_level: 4,
            },
            30_000,
            5,
            3,
        )
    }

    #[tokio::test]
    async fn save_bumps_version_and_stamps_checksum() {
        let state = test_state().await;
        let mut queue = load_or_create(&state, "gearsmith-01").await.unwrap();
        queue.enqueue(sample_task("gearsmith-01")).unwrap();

        let saved = save(&state, queue, SaveOptions::default()).await.unwrap();
        assert_eq!(saved.version, 1);
        assert_eq!(saved.checksum, integrity::compute_checksum(&saved));

        let reloaded = load(&state, "gearsmith-01").await.unwrap().unwrap();
        assert_eq!(reloaded.version, 1);
        assert_eq!(reloaded.checksum, saved.checksum);

        let again = save(&state, reloaded, SaveOptions::default()).await.unwrap();
        assert_eq!(again.version, 2);
    }

    #[tokio::test]
    async fn stale_writer_gets_a_conflict() {
        let state = test_state().await;
        let queue = load_or_create(&state, "gearsmith-01").await.unwrap();
        let saved = save(&state, queue, SaveOptions::default()).await.unwrap();

        let stale = saved.clone();
        save(&state, saved, SaveOptions::default()).await.unwrap();

        let err = save(&state, stale, SaveOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        // The store still holds the winning write.
        let current = load(&state, "gearsmith-01").await.unwrap().unwrap();
        assert_eq!(current.version, 2);
    }

    #[tokio::test]
    async fn load_repairs_a_checksum_mismatch_and_repersists() {
        let state = test_state().await;
        let mut queue = load_or_create(&state, "gearsmith-01").await.unwrap();
        queue.enqueue(sample_task("gearsmith-01")).unwrap();
        let saved = save(&state, queue, SaveOptions::default()).await.unwrap();

        // Corrupt the stored checksum behind the service's back.
        let store = state.queue_store().await.unwrap();
        let mut record = store.find_queue("gearsmith-01").await.unwrap().unwrap();
        record.queue_data.checksum = "0badc0de".into();
        store
            .save_queue(record, Some(saved.version))
            .await
            .unwrap();

        let repaired = load(&state, "gearsmith-01").await.unwrap().unwrap();
        assert_eq!(repaired.checksum, integrity::compute_checksum(&repaired));
        // Repair re-persisted, so the version moved past the corrupted write.
        assert_eq!(repaired.version, saved.version + 1);
    }

    #[tokio::test]
    async fn degraded_engine_refuses_queue_operations() {
        let state = EngineState::with_clock(
            AppConfig::default(),
            Arc::new(ManualClock::starting_at(1_000)),
        );
        let err = load(&state, "gearsmith-01").await.unwrap_err();
        assert!(matches!(err, ServiceError::Degraded));
    }

    #[tokio::test]
    async fn invalid_queue_is_rejected_when_validation_requested() {
        let state = test_state().await;
        let mut queue = load_or_create(&state, "gearsmith-01").await.unwrap();
        queue.player_id = String::new();

        let err = save(&state, queue, SaveOptions::default()).await.unwrap_err();
        assert!(matches!(err, ServiceError::Integrity { .. }));
    }
}
