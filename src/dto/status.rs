//! Read-model projections of queue and engine state.

use serde::Serialize;
use uuid::Uuid;

use crate::state::{
    circuit::BreakerMetrics,
    queue::{ActivityKind, Reward, Task, TaskQueue},
};

/// Public projection of a single task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSummary {
    /// Task id.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Display description.
    pub description: String,
    /// Display icon handle.
    pub icon: String,
    /// Activity category.
    pub kind: ActivityKind,
    /// One cycle's duration, milliseconds.
    pub duration_ms: u64,
    /// Progress through the current cycle, `0.0..=1.0`.
    pub progress: f64,
    /// Dispatch priority, higher first.
    pub priority: u8,
    /// When the current cycle started, epoch milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at_ms: Option<u64>,
    /// Expected completion of the current cycle, epoch milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_completion_ms: Option<u64>,
    /// Failures recorded against the task so far.
    pub retry_count: u32,
    /// Rewards granted by completed cycles of this task.
    pub rewards: Vec<Reward>,
}

impl From<&Task> for TaskSummary {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id,
            name: task.name.clone(),
            description: task.description.clone(),
            icon: task.icon.clone(),
            kind: task.payload.kind(),
            duration_ms: task.duration_ms,
            progress: task.progress,
            priority: task.priority,
            started_at_ms: task.started_at_ms,
            estimated_completion_ms: task.estimated_completion_ms,
            retry_count: task.retry_count,
            rewards: task.rewards.clone(),
        }
    }
}

/// Public projection of a player's queue.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    /// Owning player.
    pub player_id: String,
    /// Whether a task is currently running.
    pub is_running: bool,
    /// Whether processing is paused.
    pub is_paused: bool,
    /// Why the queue is paused, when it is.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pause_reason: Option<String>,
    /// Whether the pipeline may auto-resume the pause.
    pub can_resume: bool,
    /// The task occupying the current slot.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_task: Option<TaskSummary>,
    /// Tasks waiting to be dispatched.
    pub queued_tasks: Vec<TaskSummary>,
    /// Number of queued tasks.
    pub queue_size: usize,
    /// Queue capacity.
    pub max_queue_size: usize,
    /// Lifetime completed cycle count.
    pub total_tasks_completed: u64,
    /// Lifetime active processing time, milliseconds.
    pub total_time_spent_ms: u64,
    /// Persisted version counter.
    pub version: u64,
    /// Persisted integrity checksum.
    pub checksum: String,
    /// Last persisted write, epoch milliseconds.
    pub last_updated_ms: u64,
}

impl From<&TaskQueue> for QueueStatus {
    fn from(queue: &TaskQueue) -> Self {
        Self {
            player_id: queue.player_id.clone(),
            is_running: queue.is_running,
            is_paused: queue.is_paused,
            pause_reason: queue.pause_reason.clone(),
            can_resume: queue.can_resume,
            current_task: queue.current_task.as_ref().map(Into::into),
            queued_tasks: queue.queued_tasks.iter().map(Into::into).collect(),
            queue_size: queue.queued_tasks.len(),
            max_queue_size: queue.config.max_queue_size,
            total_tasks_completed: queue.total_tasks_completed,
            total_time_spent_ms: queue.total_time_spent_ms,
            version: queue.version,
            checksum: queue.checksum.clone(),
            last_updated_ms: queue.last_updated_ms,
        }
    }
}

/// Operational snapshot of the engine itself.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    /// Whether the engine currently has no storage backend.
    pub degraded: bool,
    /// Breaker metrics keyed by operation name.
    pub breakers: Vec<BreakerStatus>,
}

/// Metrics for one named circuit breaker.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStatus {
    /// Operation the breaker guards.
    pub operation: String,
    /// Rolling counters and current state.
    #[serde(flatten)]
    pub metrics: BreakerMetrics,
}
