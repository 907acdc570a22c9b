//! Timer-driven processing loop.
//!
//! One interval task drives every active player's queue. Shutdown lands
//! between ticks, so an in-flight pass always completes before the loop
//! exits.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info};

use crate::{
    dao::models::SnapshotReason,
    error::ServiceError,
    services::{pipeline_service, queue_service, snapshot_service},
    state::SharedState,
};

/// Run the scheduler until `shutdown` fires.
pub async fn run(state: SharedState, mut shutdown: watch::Receiver<bool>) {
    let tick_interval_ms = state.config().scheduler.tick_interval_ms;
    let periodic_every = state.config().snapshots.periodic_every_ticks;

    let mut ticker = interval(Duration::from_millis(tick_interval_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut degraded = state.degraded_watcher();
    let mut tick_count: u64 = 0;

    info!(tick_interval_ms, "scheduler started");
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if *degraded.borrow() {
                    debug!("skipping tick while degraded");
                    continue;
                }
                tick_count += 1;
                let take_snapshots = periodic_every > 0 && tick_count % periodic_every == 0;
                run_pass(&state, take_snapshots).await;
            }
            changed = degraded.changed() => {
                if changed.is_ok() {
                    info!(degraded = *degraded.borrow(), "storage availability changed");
                }
            }
            _ = shutdown.changed() => {
                info!("scheduler stopping");
                break;
            }
        }
    }
}

/// One scheduler pass over the active player set.
async fn run_pass(state: &SharedState, take_snapshots: bool) {
    if state.is_degraded().await {
        debug!("skipping scheduler pass while degraded");
        return;
    }

    for player_id in state.active_players() {
        match pipeline_service::tick(state, &player_id).await {
            Ok(status) => {
                // An idle, unpaused queue has nothing left to schedule.
                if !status.is_running && !status.is_paused && status.queue_size == 0 {
                    state.unregister_active_player(&player_id);
                }
            }
            Err(ServiceError::NotFound(_)) => {
                state.unregister_active_player(&player_id);
            }
            Err(err) => {
                error!(player_id, error = %err, "tick failed");
            }
        }

        if take_snapshots {
            if let Err(err) = periodic_snapshot(state, &player_id).await {
                error!(player_id, error = %err, "periodic snapshot failed");
            }
        }
    }
}

async fn periodic_snapshot(state: &SharedState, player_id: &str) -> Result<(), ServiceError> {
    let Some(queue) = queue_service::load(state, player_id).await? else {
        return Ok(());
    };
    snapshot_service::create(state, &queue, SnapshotReason::Periodic).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::queue_store::memory::MemoryQueueStore,
        services::queue_service::SaveOptions,
        state::{EngineState, clock::ManualClock},
    };

    #[tokio::test]
    async fn idle_players_fall_out_of_the_active_set() {
        let state =
            EngineState::with_clock(AppConfig::default(), Arc::new(ManualClock::starting_at(0)));
        state
            .install_queue_store(Arc::new(MemoryQueueStore::new()))
            .await;

        // An empty, stopped queue.
        let queue = queue_service::load_or_create(&state, "gearsmith-01")
            .await
            .unwrap();
        queue_service::save(&state, queue, SaveOptions::default())
            .await
            .unwrap();
        state.register_active_player("gearsmith-01");

        run_pass(&state, false).await;
        assert!(state.active_players().is_empty());
    }

    #[tokio::test]
    async fn degraded_engine_skips_the_pass() {
        let state =
            EngineState::with_clock(AppConfig::default(), Arc::new(ManualClock::starting_at(0)));
        state.register_active_player("gearsmith-01");

        // No store installed: the pass must not error or touch the set.
        run_pass(&state, true).await;
        assert_eq!(state.active_players(), vec!["gearsmith-01".to_owned()]);
    }
}
