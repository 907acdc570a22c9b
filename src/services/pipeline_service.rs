//! Tick processing: dispatch, progress, completion, and offline catch-up.
//!
//! A tick is the single authoritative way a queue advances. Each tick loads
//! the persisted state, replays every cycle boundary that has passed since
//! the task started (one iteration per boundary, so an offline gap of many
//! cycles is caught up in one tick), and persists the result through the
//! retry service.

use rand::Rng;
use tracing::{debug, info, warn};

use crate::{
    config::RewardConfig,
    dto::status::QueueStatus,
    error::ServiceError,
    services::{queue_service, retry_service, rewards},
    state::{SharedState, backoff::RetryPolicy, queue::TaskQueue},
};

/// Cycle boundaries replayed by a single [`advance`] pass.
///
/// A gap longer than this is caught up across several ticks; the persisted
/// continuation task stays backdated to the last replayed boundary, so no
/// elapsed time is lost.
const MAX_CYCLES_PER_TICK: u32 = 10_000;

/// Run one processing tick for a player.
///
/// When another tick for the same player is already in flight this is a
/// no-op returning the last persisted state. Version conflicts with writers
/// in other processes are absorbed by reloading and replaying inside the
/// retry loop.
pub async fn tick(state: &SharedState, player_id: &str) -> Result<QueueStatus, ServiceError> {
    let Some(_guard) = state.try_acquire_tick_guard(player_id) else {
        debug!(player_id, "tick already in flight; returning persisted state");
        return queue_service::status(state, player_id).await;
    };

    let persistence = state.config().retry.persistence.clone();
    let queue = retry_service::execute_with_retry(state, "persistence.save", &persistence, || {
        process_once(state, player_id)
    })
    .await?;

    Ok(QueueStatus::from(&queue))
}

/// One load-advance-save pass; the retry service replays this on conflict.
async fn process_once(state: &SharedState, player_id: &str) -> Result<TaskQueue, ServiceError> {
    let Some(mut queue) = queue_service::load(state, player_id).await? else {
        return Err(ServiceError::NotFound(format!(
            "no queue for player `{player_id}`"
        )));
    };

    let outcome = advance(
        &mut queue,
        state.now_ms(),
        &state.config().rewards,
        &state.config().retry.task_processing,
        &mut rand::rng(),
    );

    if outcome.completed_cycles > 0 {
        info!(
            player_id,
            cycles = outcome.completed_cycles,
            dropped = outcome.dropped_tasks,
            "tick completed task cycles"
        );
    }
    if outcome.changed {
        queue = queue_service::save(state, queue, Default::default()).await?;
    }
    Ok(queue)
}

/// What a single [`advance`] pass did to the queue.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickOutcome {
    /// Whether the queue needs persisting.
    pub changed: bool,
    /// Task cycles completed, including replayed offline cycles.
    pub completed_cycles: u32,
    /// Tasks dropped after exhausting their retry budget.
    pub dropped_tasks: u32,
}

/// Advance a queue to `now_ms`.
///
/// Pure with respect to storage: the caller persists afterwards. The loop
/// walks cycle boundaries one at a time, so catching up after an offline
/// period replays each completion (rewards and counters included) and leaves
/// the continuation task backdated by the remainder of the elapsed time.
pub fn advance(
    queue: &mut TaskQueue,
    now_ms: u64,
    reward_config: &RewardConfig,
    task_policy: &RetryPolicy,
    rng: &mut impl Rng,
) -> TickOutcome {
    let mut outcome = TickOutcome::default();
    // Dispatch time for the next task; moves to the cycle boundary when a
    // finished task hands over mid-catch-up.
    let mut dispatch_at_ms = now_ms;

    loop {
        if outcome.completed_cycles >= MAX_CYCLES_PER_TICK {
            break;
        }

        if queue.is_paused {
            if !queue.can_resume || !blocking_task_ready(queue) {
                break;
            }
            queue.resume(now_ms);
            outcome.changed = true;
            continue;
        }

        let Some(mut task) = queue.current_task.take() else {
            if !dispatch_next(queue, dispatch_at_ms.min(now_ms), now_ms, &mut outcome) {
                break;
            }
            continue;
        };

        let started_ms = match task.started_at_ms {
            Some(at) => at,
            None => {
                task.started_at_ms = Some(now_ms);
                task.estimated_completion_ms = Some(now_ms + task.duration_ms);
                outcome.changed = true;
                now_ms
            }
        };

        // A failed task's restart can sit in the future; wait it out.
        if started_ms > now_ms {
            queue.current_task = Some(task);
            break;
        }

        let elapsed_ms = now_ms - started_ms;
        if elapsed_ms < task.duration_ms {
            let progress = elapsed_ms as f64 / task.duration_ms as f64;
            if (progress - task.progress).abs() > f64::EPSILON {
                task.progress = progress;
                outcome.changed = true;
            }
            queue.current_task = Some(task);
            break;
        }

        // A cycle boundary has passed.
        if !task.is_valid {
            let reason = task
                .validation_errors
                .first()
                .cloned()
                .unwrap_or_else(|| "task failed validation".into());
            queue.current_task = Some(task);
            if fail_current_task(queue, &reason, now_ms, task_policy) {
                outcome.dropped_tasks += 1;
            }
            outcome.changed = true;
            continue;
        }

        let granted = rewards::for_completed_cycle(
            &task.payload,
            task.duration_ms,
            reward_config,
            rng,
        );
        task.record_rewards(&granted);
        queue.record_rewards(granted);
        queue.total_tasks_completed += 1;
        queue.total_time_spent_ms += task.duration_ms;
        outcome.completed_cycles += 1;
        outcome.changed = true;

        let boundary_ms = started_ms + task.duration_ms;
        if queue.queued_tasks.is_empty() {
            // Nothing waiting: the activity repeats from the boundary.
            task.started_at_ms = Some(boundary_ms);
            task.estimated_completion_ms = Some(boundary_ms + task.duration_ms);
            task.progress = 0.0;
            queue.current_task = Some(task);
        } else {
            // Hand over to the next task at the boundary it completed on.
            task.completed = true;
            dispatch_at_ms = boundary_ms;
        }
    }

    outcome
}

/// Mark the current task as failed once.
///
/// Below the retry budget the task stays current with its start pushed
/// forward by the policy's backoff delay and progress reset. Past the budget
/// the task is dropped and the queue moves on. Returns whether the task was
/// dropped.
pub fn fail_current_task(
    queue: &mut TaskQueue,
    reason: &str,
    now_ms: u64,
    policy: &RetryPolicy,
) -> bool {
    let Some(mut task) = queue.current_task.take() else {
        return false;
    };

    task.retry_count += 1;
    if !task.validation_errors.iter().any(|seen| seen == reason) {
        task.validation_errors.push(reason.to_owned());
    }

    if task.retry_count <= task.max_retries {
        let delay_ms = policy.delay_for_attempt(task.retry_count);
        warn!(
            player_id = %queue.player_id,
            task_id = %task.id,
            retry = task.retry_count,
            delay_ms,
            reason,
            "task failed; retrying in place"
        );
        task.progress = 0.0;
        task.started_at_ms = Some(now_ms + delay_ms);
        task.estimated_completion_ms = Some(now_ms + delay_ms + task.duration_ms);
        queue.current_task = Some(task);
        false
    } else {
        warn!(
            player_id = %queue.player_id,
            task_id = %task.id,
            retries = task.retry_count - 1,
            reason,
            "task exhausted its retry budget; dropping"
        );
        true
    }
}

/// Whether the task that would run next has its requirements satisfied.
fn blocking_task_ready(queue: &TaskQueue) -> bool {
    if let Some(current) = &queue.current_task {
        return current.requirements_satisfied();
    }
    match queue.next_task_index() {
        Some(index) => queue.queued_tasks[index].requirements_satisfied(),
        None => true,
    }
}

/// Try to move the next queued task into the current slot.
///
/// An unmet prerequisite or insufficient resource pauses the queue with a
/// recorded reason instead of erroring. Returns whether dispatch succeeded.
fn dispatch_next(
    queue: &mut TaskQueue,
    dispatch_at_ms: u64,
    now_ms: u64,
    outcome: &mut TickOutcome,
) -> bool {
    loop {
        let Some(index) = queue.next_task_index() else {
            if queue.is_running {
                queue.is_running = false;
                outcome.changed = true;
            }
            return false;
        };

        let candidate = &queue.queued_tasks[index];
        if !candidate.is_valid {
            let dropped = queue.queued_tasks.remove(index);
            warn!(
                player_id = %queue.player_id,
                task_id = %dropped.id,
                "skipping invalid queued task"
            );
            outcome.dropped_tasks += 1;
            outcome.changed = true;
            continue;
        }

        if !candidate.requirements_satisfied() {
            let reason = candidate
                .first_blocking_requirement()
                .unwrap_or_else(|| "requirements not met".into());
            queue.pause(reason, true, now_ms);
            outcome.changed = true;
            return false;
        }

        let mut task = queue.queued_tasks.remove(index);
        task.started_at_ms = Some(dispatch_at_ms);
        task.estimated_completion_ms = Some(dispatch_at_ms + task.duration_ms);
        task.progress = 0.0;
        queue.current_task = Some(task);
        queue.is_running = true;
        outcome.changed = true;
        return true;
    }
}
