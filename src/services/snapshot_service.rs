//! Snapshot creation, restore, and retention.

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::models::{SnapshotEntity, SnapshotReason},
    error::ServiceError,
    state::{SharedState, integrity, queue::TaskQueue},
};

/// History entries kept in a compressed snapshot.
const COMPRESSED_HISTORY_LEN: usize = 5;
/// Reward records kept in a compressed snapshot.
const COMPRESSED_REWARDS_LEN: usize = 100;

/// Take a snapshot of a queue and prune beyond the retention cap.
///
/// Compression trims the history ring buffer to its last
/// [`COMPRESSED_HISTORY_LEN`] entries and the reward history to its last
/// [`COMPRESSED_REWARDS_LEN`] records; the queue identity is untouched, so
/// the stored checksum still matches the compressed copy.
pub async fn create(
    state: &SharedState,
    queue: &TaskQueue,
    reason: SnapshotReason,
) -> Result<SnapshotEntity, ServiceError> {
    let store = state.queue_store().await.ok_or(ServiceError::Degraded)?;
    let now_ms = state.now_ms();

    let original_size_bytes = serialized_len(queue)?;
    let mut compressed = queue.clone();
    trim_to_tail(&mut compressed.state_history, COMPRESSED_HISTORY_LEN);
    trim_to_tail(&mut compressed.total_rewards_earned, COMPRESSED_REWARDS_LEN);
    let compressed_size_bytes = serialized_len(&compressed)?;

    let ttl_ms = match reason {
        SnapshotReason::Periodic => state
            .config()
            .snapshots
            .ttl_ms
            .map(|ttl| now_ms.saturating_add(ttl)),
        _ => None,
    };

    let snapshot = SnapshotEntity {
        snapshot_id: Uuid::new_v4(),
        player_id: queue.player_id.clone(),
        timestamp_ms: now_ms,
        reason,
        source_version: queue.version,
        checksum: integrity::compute_checksum(&compressed),
        snapshot_data: compressed,
        original_size_bytes,
        compressed_size_bytes,
        ttl_ms,
    };

    store.save_snapshot(snapshot.clone()).await?;
    debug!(
        player_id = %queue.player_id,
        snapshot_id = %snapshot.snapshot_id,
        reason = ?reason,
        ratio = snapshot.compression_ratio(),
        "snapshot written"
    );

    prune(state, &queue.player_id).await?;
    Ok(snapshot)
}

/// List a player's snapshots, newest first.
pub async fn list(
    state: &SharedState,
    player_id: &str,
    limit: usize,
) -> Result<Vec<SnapshotEntity>, ServiceError> {
    let store = state.queue_store().await.ok_or(ServiceError::Degraded)?;
    let mut snapshots = store.list_snapshots(player_id).await?;
    snapshots.truncate(limit);
    Ok(snapshots)
}

/// Restore a player's queue from one of their snapshots.
///
/// Ownership is enforced before anything is touched. The restored queue
/// resumes the live record's version counter so compare-and-swap stays
/// monotonic; the snapshot's own version remains available as
/// `source_version` provenance. The restore persists with validation
/// disabled, because the snapshot predates the current integrity state.
pub async fn restore(
    state: &SharedState,
    player_id: &str,
    snapshot_id: Uuid,
) -> Result<TaskQueue, ServiceError> {
    let store = state.queue_store().await.ok_or(ServiceError::Degraded)?;

    let Some(snapshot) = store.find_snapshot(snapshot_id).await? else {
        return Err(ServiceError::NotFound(format!(
            "snapshot `{snapshot_id}` not found"
        )));
    };
    if snapshot.player_id != player_id {
        return Err(ServiceError::InvalidInput(format!(
            "snapshot `{snapshot_id}` does not belong to player `{player_id}`"
        )));
    }

    let live_version = store
        .find_queue(player_id)
        .await?
        .map(|record| record.version)
        .unwrap_or(0);

    let mut restored = snapshot.snapshot_data;
    restored.version = live_version;

    let saved = super::queue_service::save(
        state,
        restored,
        super::queue_service::SaveOptions {
            validate: false,
            snapshot_before_update: false,
        },
    )
    .await?;

    info!(
        player_id,
        snapshot_id = %snapshot_id,
        source_version = snapshot.source_version,
        restored_version = saved.version,
        "queue restored from snapshot"
    );
    Ok(saved)
}

/// Delete oldest snapshots beyond the per-player retention cap.
async fn prune(state: &SharedState, player_id: &str) -> Result<(), ServiceError> {
    let store = state.queue_store().await.ok_or(ServiceError::Degraded)?;
    let cap = state.config().snapshots.max_per_player;

    let snapshots = store.list_snapshots(player_id).await?;
    for stale in snapshots.iter().skip(cap) {
        if !store.delete_snapshot(stale.snapshot_id).await? {
            warn!(
                player_id,
                snapshot_id = %stale.snapshot_id,
                "retention prune found snapshot already gone"
            );
        }
    }
    Ok(())
}

fn trim_to_tail<T>(items: &mut Vec<T>, keep: usize) {
    if items.len() > keep {
        let excess = items.len() - keep;
        items.drain(..excess);
    }
}

fn serialized_len(queue: &TaskQueue) -> Result<usize, ServiceError> {
    serde_json::to_vec(queue)
        .map(|bytes| bytes.len())
        .map_err(|err| ServiceError::InvalidState(format!("queue not serializable: {err}")))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::queue_store::memory::MemoryQueueStore,
        services::queue_service::{self, SaveOptions},
        state::{
            EngineState,
            clock::ManualClock,
            queue::{ActivityPayload, QueueConfig, Reward, Task},
        },
    };

    async fn test_state(clock: Arc<ManualClock>) -> SharedState {
        let state = EngineState::with_clock(AppConfig::default(), clock);
        state
            .install_queue_store(Arc::new(MemoryQueueStore::new()))
            .await;
        state
    }

    fn busy_queue(player: &str, now_ms: u64) -> TaskQueue {
        let mut queue = TaskQueue::new(player, QueueConfig::default(), now_ms);
        queue
            .enqueue(Task::new(
                player,
                "Smelt bronze",
                ActivityPayload::Crafting {
                    recipe_id: "bronze_bar".into(),
                    output_item_id: "bronze_bar".into(),
                    output_quantity: 1,
                },
                20_000,
                4,
                3,
            ))
            .unwrap();
        for cycle in 0..150u64 {
            queue.total_rewards_earned.push(Reward::Currency { amount: cycle });
        }
        for at in 0..20u64 {
            queue.record_history(at);
        }
        queue
    }

    #[tokio::test]
    async fn snapshot_compresses_history_and_reward_tails() {
        let clock = Arc::new(ManualClock::starting_at(5_000));
        let state = test_state(clock).await;
        let queue = busy_queue("gearsmith-01", 5_000);

        let snapshot = create(&state, &queue, SnapshotReason::Manual).await.unwrap();
        assert!(snapshot.snapshot_data.state_history.len() <= COMPRESSED_HISTORY_LEN);
        assert_eq!(
            snapshot.snapshot_data.total_rewards_earned.len(),
            COMPRESSED_REWARDS_LEN
        );
        // The kept rewards are the most recent ones.
        assert_eq!(
            snapshot.snapshot_data.total_rewards_earned.first(),
            Some(&Reward::Currency { amount: 50 })
        );
        assert!(snapshot.compressed_size_bytes < snapshot.original_size_bytes);
        assert_eq!(snapshot.source_version, queue.version);
    }

    #[tokio::test]
    async fn retention_prunes_oldest_snapshots_first() {
        let clock = Arc::new(ManualClock::starting_at(0));
        let state = test_state(clock.clone()).await;
        let queue = busy_queue("gearsmith-01", 0);
        let cap = state.config().snapshots.max_per_player;

        for _ in 0..cap + 3 {
            clock.advance(1_000);
            create(&state, &queue, SnapshotReason::Manual).await.unwrap();
        }

        let kept = list(&state, "gearsmith-01", usize::MAX).await.unwrap();
        assert_eq!(kept.len(), cap);
        // Newest first, and the oldest three were pruned.
        assert_eq!(kept.first().unwrap().timestamp_ms, (cap as u64 + 3) * 1_000);
        assert_eq!(kept.last().unwrap().timestamp_ms, 4_000);
    }

    #[tokio::test]
    async fn restore_enforces_ownership() {
        let clock = Arc::new(ManualClock::starting_at(0));
        let state = test_state(clock).await;
        let queue = busy_queue("gearsmith-01", 0);
        let snapshot = create(&state, &queue, SnapshotReason::Manual).await.unwrap();

        let err = restore(&state, "someone-else", snapshot.snapshot_id)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn restore_resumes_the_live_version_counter() {
        let clock = Arc::new(ManualClock::starting_at(0));
        let state = test_state(clock.clone()).await;

        let queue = queue_service::load_or_create(&state, "gearsmith-01")
            .await
            .unwrap();
        let mut saved = queue_service::save(&state, queue, SaveOptions::default())
            .await
            .unwrap();
        let snapshot = create(&state, &saved, SnapshotReason::Manual).await.unwrap();

        // Live record moves on a few versions after the snapshot.
        for _ in 0..3 {
            saved = queue_service::save(&state, saved, SaveOptions::default())
                .await
                .unwrap();
        }
        assert_eq!(saved.version, 4);

        let restored = restore(&state, "gearsmith-01", snapshot.snapshot_id)
            .await
            .unwrap();
        assert_eq!(restored.version, 5);
        assert_eq!(snapshot.source_version, 1);
    }
}
