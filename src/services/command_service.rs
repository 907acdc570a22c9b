//! Command intake: validation, rate limiting, and queue mutations.
//!
//! Commands mutate the last persisted state and leave processing to the next
//! tick; stop and pause therefore take effect on the tick after they land.

use tracing::info;
use validator::Validate;

use crate::{
    dto::{
        commands::{
            AddTaskRequest, ClearQueueRequest, PauseQueueRequest, RemoveTaskRequest,
            ReorderQueueRequest, ResumeQueueRequest, StopQueueRequest,
        },
        status::QueueStatus,
    },
    error::ServiceError,
    services::{queue_service, retry_service},
    state::{
        SharedState,
        queue::{EnqueueError, Task, TaskQueue},
    },
};

/// Append a task to the player's queue.
pub async fn add_task(
    state: &SharedState,
    request: AddTaskRequest,
) -> Result<QueueStatus, ServiceError> {
    request.validate()?;
    admit(state, &request.player_id, true)?;
    let player_id = request.player_id.clone();

    mutate(state, &player_id, move |state, queue| {
        let config = &queue.config;
        if request.duration_ms > config.max_task_duration_ms {
            return Err(ServiceError::InvalidInput(format!(
                "task duration {}ms exceeds the queue maximum {}ms",
                request.duration_ms, config.max_task_duration_ms
            )));
        }

        let mut task = Task::new(
            request.player_id.clone(),
            request.name.clone(),
            request.payload.clone(),
            request.duration_ms,
            request.priority,
            request.max_retries.unwrap_or(config.default_max_retries),
        );
        task.description = request.description.clone();
        task.icon = request.icon.clone();
        task.prerequisites = request.prerequisites.clone();
        task.resource_requirements = request.resource_requirements.clone();

        queue.enqueue(task).map_err(|err| match err {
            EnqueueError::Full { .. } | EnqueueError::DuplicateTask { .. } => {
                ServiceError::InvalidState(err.to_string())
            }
        })?;

        state.register_active_player(&queue.player_id);
        Ok(())
    })
    .await
}

/// Remove a queued task, or abandon the current one.
pub async fn remove_task(
    state: &SharedState,
    request: RemoveTaskRequest,
) -> Result<QueueStatus, ServiceError> {
    request.validate()?;
    admit(state, &request.player_id, false)?;
    let player_id = request.player_id.clone();

    mutate(state, &player_id, move |_state, queue| {
        if queue
            .current_task
            .as_ref()
            .is_some_and(|current| current.id == request.task_id)
        {
            queue.current_task = None;
            queue.is_running = false;
            return Ok(());
        }
        if queue.remove_task(request.task_id) {
            Ok(())
        } else {
            Err(ServiceError::NotFound(format!(
                "task `{}` is not queued",
                request.task_id
            )))
        }
    })
    .await
}

/// Rearrange the queued tasks.
pub async fn reorder_queue(
    state: &SharedState,
    request: ReorderQueueRequest,
) -> Result<QueueStatus, ServiceError> {
    request.validate()?;
    admit(state, &request.player_id, false)?;
    let player_id = request.player_id.clone();

    mutate(state, &player_id, move |_state, queue| {
        queue
            .reorder(&request.task_ids)
            .map_err(|err| ServiceError::InvalidInput(err.to_string()))
    })
    .await
}

/// Pause processing until an explicit resume.
///
/// Manual pauses are not auto-resumed by the scheduler, unlike requirement
/// pauses raised by the pipeline.
pub async fn pause_queue(
    state: &SharedState,
    request: PauseQueueRequest,
) -> Result<QueueStatus, ServiceError> {
    request.validate()?;
    admit(state, &request.player_id, false)?;
    let player_id = request.player_id.clone();

    mutate(state, &player_id, move |state, queue| {
        let reason = request
            .reason
            .clone()
            .unwrap_or_else(|| "paused by player".into());
        queue.pause(reason, false, state.now_ms());
        Ok(())
    })
    .await
}

/// Resume a paused queue.
pub async fn resume_queue(
    state: &SharedState,
    request: ResumeQueueRequest,
) -> Result<QueueStatus, ServiceError> {
    request.validate()?;
    admit(state, &request.player_id, false)?;

    mutate(state, &request.player_id, move |state, queue| {
        if !queue.is_paused {
            return Err(ServiceError::InvalidState("queue is not paused".into()));
        }
        queue.resume(state.now_ms());
        state.register_active_player(&queue.player_id);
        Ok(())
    })
    .await
}

/// Stop processing, returning the current task to the head of the queue.
pub async fn stop_queue(
    state: &SharedState,
    request: StopQueueRequest,
) -> Result<QueueStatus, ServiceError> {
    request.validate()?;
    admit(state, &request.player_id, false)?;

    mutate(state, &request.player_id, move |state, queue| {
        if let Some(mut current) = queue.current_task.take() {
            current.started_at_ms = None;
            current.estimated_completion_ms = None;
            current.progress = 0.0;
            queue.queued_tasks.insert(0, current);
        }
        queue.is_running = false;
        state.unregister_active_player(&queue.player_id);
        Ok(())
    })
    .await
}

/// Drop the current task and every queued task.
pub async fn clear_queue(
    state: &SharedState,
    request: ClearQueueRequest,
) -> Result<QueueStatus, ServiceError> {
    request.validate()?;
    admit(state, &request.player_id, false)?;

    mutate(state, &request.player_id, move |state, queue| {
        let dropped = queue.queued_tasks.len() + usize::from(queue.current_task.is_some());
        queue.current_task = None;
        queue.queued_tasks.clear();
        queue.is_running = false;
        state.unregister_active_player(&queue.player_id);
        info!(player_id = %queue.player_id, dropped, "queue cleared");
        Ok(())
    })
    .await
}

/// Common admission checks shared by every command.
fn admit(state: &SharedState, player_id: &str, is_add_task: bool) -> Result<(), ServiceError> {
    if let Some(limit) = state.check_rate_limit(player_id, is_add_task) {
        return Err(ServiceError::RateLimited(limit));
    }
    Ok(())
}

/// Load-mutate-save under the queue-operations retry policy.
///
/// `apply` runs against a freshly loaded queue on every attempt, so a CAS
/// conflict replays the mutation against the winning writer's state. When
/// configured, the previously persisted state is snapshotted before each
/// write so a bad command can be rolled back.
async fn mutate<F>(
    state: &SharedState,
    player_id: &str,
    apply: F,
) -> Result<QueueStatus, ServiceError>
where
    F: Fn(&SharedState, &mut TaskQueue) -> Result<(), ServiceError>,
{
    let policy = state.config().retry.queue_operations.clone();
    let options = queue_service::SaveOptions {
        validate: true,
        snapshot_before_update: state.config().snapshots.before_command_updates,
    };
    let apply = &apply;

    let queue = retry_service::execute_with_retry(state, "queue.command", &policy, || async {
        let mut queue = queue_service::load_or_create(state, player_id).await?;
        apply(state, &mut queue)?;
        queue_service::save(state, queue, options).await
    })
    .await?;

    Ok(QueueStatus::from(&queue))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::{models::SnapshotReason, queue_store::memory::MemoryQueueStore},
        services::snapshot_service,
        state::{EngineState, clock::ManualClock, queue::ActivityPayload},
    };

    async fn test_state() -> SharedState {
        let state =
            EngineState::with_clock(AppConfig::default(), Arc::new(ManualClock::starting_at(0)));
        state
            .install_queue_store(Arc::new(MemoryQueueStore::new()))
            .await;
        state
    }

    fn add_request(player: &str, name: &str, priority: u8) -> AddTaskRequest {
        AddTaskRequest {
            player_id: player.into(),
            name: name.into(),
            description: String::new(),
            icon: String::new(),
            payload: ActivityPayload::Harvesting {
                resource_id: "copper_ore".into(),
                skill: "mining".into(),
                skill_level: 3,
            },
            duration_ms: 30_000,
            priority,
            prerequisites: Vec::new(),
            resource_requirements: Vec::new(),
            max_retries: None,
        }
    }

    #[tokio::test]
    async fn add_task_persists_and_registers_the_player() {
        let state = test_state().await;

        let status = add_task(&state, add_request("gearsmith-01", "Mine", 3))
            .await
            .unwrap();
        assert_eq!(status.queue_size, 1);
        assert_eq!(status.version, 1);
        assert!(state.active_players().contains(&"gearsmith-01".to_owned()));
    }

    #[tokio::test]
    async fn remove_task_drops_a_queued_task() {
        let state = test_state().await;
        let status = add_task(&state, add_request("gearsmith-01", "Mine", 0))
            .await
            .unwrap();
        let task_id = status.queued_tasks[0].id;

        let status = remove_task(
            &state,
            RemoveTaskRequest {
                player_id: "gearsmith-01".into(),
                task_id,
            },
        )
        .await
        .unwrap();
        assert_eq!(status.queue_size, 0);

        let err = remove_task(
            &state,
            RemoveTaskRequest {
                player_id: "gearsmith-01".into(),
                task_id,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn command_updates_snapshot_the_previous_state() {
        let state = test_state().await;
        add_task(&state, add_request("gearsmith-01", "one", 0))
            .await
            .unwrap();
        add_task(&state, add_request("gearsmith-01", "two", 0))
            .await
            .unwrap();

        // The first save is an insert; only the second had a previous state
        // to capture.
        let snapshots = snapshot_service::list(&state, "gearsmith-01", usize::MAX)
            .await
            .unwrap();
        assert_eq!(snapshots.len(), 1);
        assert!(matches!(snapshots[0].reason, SnapshotReason::BeforeUpdate));
        assert_eq!(snapshots[0].source_version, 1);
        assert_eq!(snapshots[0].snapshot_data.queued_tasks.len(), 1);
    }

    #[tokio::test]
    async fn commands_run_under_the_queue_operations_breaker() {
        let state = test_state().await;
        add_task(&state, add_request("gearsmith-01", "Mine", 0))
            .await
            .unwrap();

        let breakers = state.breaker_metrics();
        assert!(
            breakers
                .iter()
                .any(|(operation, _)| operation.as_str() == "queue.command")
        );
    }

    #[tokio::test]
    async fn add_task_rejects_malformed_requests() {
        let state = test_state().await;

        let mut request = add_request("gearsmith-01", "Mine", 3);
        request.player_id = "NOT VALID".into();
        let err = add_task(&state, request).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn add_task_is_rate_limited() {
        let state = test_state().await;
        let limit = state.config().rate_limits.add_task_per_window;

        for index in 0..limit {
            add_task(&state, add_request("gearsmith-01", &format!("t{index}"), 0))
                .await
                .unwrap();
        }
        let err = add_task(&state, add_request("gearsmith-01", "over", 0))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::RateLimited(_)));
    }

    #[tokio::test]
    async fn reorder_applies_the_requested_permutation() {
        let state = test_state().await;
        add_task(&state, add_request("gearsmith-01", "one", 0))
            .await
            .unwrap();
        let status = add_task(&state, add_request("gearsmith-01", "two", 0))
            .await
            .unwrap();

        let mut order: Vec<_> = status.queued_tasks.iter().map(|task| task.id).collect();
        order.reverse();

        let status = reorder_queue(
            &state,
            ReorderQueueRequest {
                player_id: "gearsmith-01".into(),
                task_ids: order.clone(),
            },
        )
        .await
        .unwrap();

        let reordered: Vec<_> = status.queued_tasks.iter().map(|task| task.id).collect();
        assert_eq!(reordered, order);
    }

    #[tokio::test]
    async fn pause_then_resume_round_trips() {
        let state = test_state().await;
        add_task(&state, add_request("gearsmith-01", "Mine", 0))
            .await
            .unwrap();

        let status = pause_queue(
            &state,
            PauseQueueRequest {
                player_id: "gearsmith-01".into(),
                reason: Some("dinner".into()),
            },
        )
        .await
        .unwrap();
        assert!(status.is_paused);
        assert_eq!(status.pause_reason.as_deref(), Some("dinner"));
        assert!(!status.can_resume);

        let status = resume_queue(
            &state,
            ResumeQueueRequest {
                player_id: "gearsmith-01".into(),
            },
        )
        .await
        .unwrap();
        assert!(!status.is_paused);
    }

    #[tokio::test]
    async fn resume_requires_a_paused_queue() {
        let state = test_state().await;
        add_task(&state, add_request("gearsmith-01", "Mine", 0))
            .await
            .unwrap();

        let err = resume_queue(
            &state,
            ResumeQueueRequest {
                player_id: "gearsmith-01".into(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));
    }

    #[tokio::test]
    async fn clear_drops_everything() {
        let state = test_state().await;
        add_task(&state, add_request("gearsmith-01", "one", 0))
            .await
            .unwrap();
        add_task(&state, add_request("gearsmith-01", "two", 0))
            .await
            .unwrap();

        let status = clear_queue(
            &state,
            ClearQueueRequest {
                player_id: "gearsmith-01".into(),
            },
        )
        .await
        .unwrap();
        assert_eq!(status.queue_size, 0);
        assert!(status.current_task.is_none());
        assert!(!state.active_players().contains(&"gearsmith-01".to_owned()));
    }
}
