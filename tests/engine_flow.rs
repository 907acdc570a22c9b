//! End-to-end coverage of the command -> tick -> persist flow against the
//! in-memory store with a manual clock.

use std::sync::Arc;

use cogforge_back::{
    config::AppConfig,
    dao::queue_store::memory::MemoryQueueStore,
    dto::commands::{AddTaskRequest, PauseQueueRequest, ResumeQueueRequest},
    error::ServiceError,
    services::{command_service, pipeline_service, queue_service, snapshot_service},
    state::{EngineState, SharedState, clock::ManualClock, integrity, queue::ActivityPayload},
};

const PLAYER: &str = "gearsmith-01";

async fn engine(clock: Arc<ManualClock>) -> SharedState {
    let state = EngineState::with_clock(AppConfig::default(), clock);
    state
        .install_queue_store(Arc::new(MemoryQueueStore::new()))
        .await;
    state
}

fn crafting_request(name: &str, duration_ms: u64, priority: u8) -> AddTaskRequest {
    AddTaskRequest {
        player_id: PLAYER.into(),
        name: name.into(),
        description: String::new(),
        icon: String::new(),
        payload: ActivityPayload::Crafting {
            recipe_id: "bronze_bar".into(),
            output_item_id: "bronze_bar".into(),
            output_quantity: 1,
        },
        duration_ms,
        priority,
        prerequisites: Vec::new(),
        resource_requirements: Vec::new(),
        max_retries: None,
    }
}

#[tokio::test]
async fn add_tick_complete_round_trip() {
    let clock = Arc::new(ManualClock::starting_at(1_000_000));
    let state = engine(clock.clone()).await;

    let status = command_service::add_task(&state, crafting_request("Smelt", 30_000, 5))
        .await
        .unwrap();
    assert_eq!(status.version, 1);
    assert_eq!(status.queue_size, 1);

    // First tick dispatches.
    let status = pipeline_service::tick(&state, PLAYER).await.unwrap();
    assert!(status.is_running);
    let current = status.current_task.expect("task dispatched");
    assert_eq!(current.started_at_ms, Some(1_000_000));
    assert_eq!(status.version, 2);

    // Halfway through the cycle.
    clock.advance(15_000);
    let status = pipeline_service::tick(&state, PLAYER).await.unwrap();
    let current = status.current_task.expect("task still running");
    assert!((current.progress - 0.5).abs() < 1e-9);

    // Past the boundary: one completion, rewards recorded, version strictly
    // incremented, stored checksum matches the stored content.
    clock.advance(20_000);
    let status = pipeline_service::tick(&state, PLAYER).await.unwrap();
    assert_eq!(status.total_tasks_completed, 1);

    let queue = queue_service::load(&state, PLAYER).await.unwrap().unwrap();
    assert_eq!(queue.checksum, integrity::compute_checksum(&queue));
    assert!(!queue.total_rewards_earned.is_empty());
    assert!(queue.version > status.version - 1);
}

#[tokio::test]
async fn offline_catch_up_replays_missed_cycles() {
    let clock = Arc::new(ManualClock::starting_at(0));
    let state = engine(clock.clone()).await;

    command_service::add_task(&state, crafting_request("Smelt", 30_000, 5))
        .await
        .unwrap();
    pipeline_service::tick(&state, PLAYER).await.unwrap();

    // The player disappears for 95 seconds.
    clock.advance(95_000);
    let status = pipeline_service::tick(&state, PLAYER).await.unwrap();

    assert_eq!(status.total_tasks_completed, 3);
    assert_eq!(status.total_time_spent_ms, 90_000);
    let current = status.current_task.expect("continuation task");
    assert_eq!(current.started_at_ms, Some(95_000 - 5_000));
}

#[tokio::test]
async fn priority_dispatch_runs_b_c_a() {
    let clock = Arc::new(ManualClock::starting_at(0));
    let state = engine(clock.clone()).await;

    let a = command_service::add_task(&state, crafting_request("A", 10_000, 1))
        .await
        .unwrap();
    let a_id = a.queued_tasks[0].id;
    command_service::add_task(&state, crafting_request("B", 10_000, 5))
        .await
        .unwrap();
    let c = command_service::add_task(&state, crafting_request("C", 10_000, 5))
        .await
        .unwrap();
    let ids: Vec<_> = c.queued_tasks.iter().map(|task| task.id).collect();
    let (b_id, c_id) = (ids[1], ids[2]);

    let status = pipeline_service::tick(&state, PLAYER).await.unwrap();
    assert_eq!(status.current_task.unwrap().id, b_id);

    clock.advance(12_000);
    let status = pipeline_service::tick(&state, PLAYER).await.unwrap();
    assert_eq!(status.current_task.unwrap().id, c_id);

    clock.advance(11_000);
    let status = pipeline_service::tick(&state, PLAYER).await.unwrap();
    assert_eq!(status.current_task.unwrap().id, a_id);
}

#[tokio::test]
async fn manual_pause_survives_ticks_until_resumed() {
    let clock = Arc::new(ManualClock::starting_at(0));
    let state = engine(clock.clone()).await;

    command_service::add_task(&state, crafting_request("Smelt", 30_000, 5))
        .await
        .unwrap();
    command_service::pause_queue(
        &state,
        PauseQueueRequest {
            player_id: PLAYER.into(),
            reason: Some("afk".into()),
        },
    )
    .await
    .unwrap();

    // Ticks must not auto-resume a manual pause.
    clock.advance(60_000);
    let status = pipeline_service::tick(&state, PLAYER).await.unwrap();
    assert!(status.is_paused);
    assert!(status.current_task.is_none());

    command_service::resume_queue(
        &state,
        ResumeQueueRequest {
            player_id: PLAYER.into(),
        },
    )
    .await
    .unwrap();
    let status = pipeline_service::tick(&state, PLAYER).await.unwrap();
    assert!(status.is_running);
}

#[tokio::test]
async fn snapshot_restore_round_trip() {
    let clock = Arc::new(ManualClock::starting_at(0));
    let state = engine(clock.clone()).await;

    command_service::add_task(&state, crafting_request("Smelt", 30_000, 5))
        .await
        .unwrap();
    let before = queue_service::load(&state, PLAYER).await.unwrap().unwrap();
    let snapshot = snapshot_service::create(
        &state,
        &before,
        cogforge_back::dao::models::SnapshotReason::Manual,
    )
    .await
    .unwrap();

    // Clear the queue, then roll back.
    command_service::clear_queue(
        &state,
        cogforge_back::dto::commands::ClearQueueRequest {
            player_id: PLAYER.into(),
        },
    )
    .await
    .unwrap();
    let cleared = queue_service::load(&state, PLAYER).await.unwrap().unwrap();
    assert!(cleared.queued_tasks.is_empty());

    let restored = snapshot_service::restore(&state, PLAYER, snapshot.snapshot_id)
        .await
        .unwrap();
    assert_eq!(restored.queued_tasks.len(), 1);
    assert!(restored.version > cleared.version);
}

#[tokio::test]
async fn degraded_engine_rejects_commands() {
    let clock = Arc::new(ManualClock::starting_at(0));
    let state = EngineState::with_clock(AppConfig::default(), clock);

    let err = command_service::add_task(&state, crafting_request("Smelt", 30_000, 5))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Degraded));
}
