//! Incoming command payloads for queue mutations.

use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::validation::validate_player_id,
    state::queue::{ActivityPayload, Prerequisite, ResourceRequirement},
};

/// Minimum single-cycle duration accepted from clients, one second.
///
/// Bounds how many cycle boundaries an offline gap can produce.
pub const MIN_TASK_DURATION_MS: u64 = 1_000;
/// Maximum single-cycle duration accepted from clients, 24 hours.
pub const MAX_TASK_DURATION_MS: u64 = 24 * 60 * 60 * 1_000;

/// Request to append a new task to a player's queue.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AddTaskRequest {
    /// Target player.
    #[validate(custom(function = validate_player_id))]
    pub player_id: String,
    /// Display name.
    #[validate(length(min = 1, max = 128))]
    pub name: String,
    /// Display description.
    #[serde(default)]
    pub description: String,
    /// Display icon handle.
    #[serde(default)]
    pub icon: String,
    /// Activity the task performs.
    pub payload: ActivityPayload,
    /// One cycle's duration in milliseconds, between one second and 24 hours.
    #[validate(range(min = 1_000, max = 86_400_000))]
    pub duration_ms: u64,
    /// Dispatch priority, 0-10.
    #[validate(range(min = 0, max = 10))]
    #[serde(default)]
    pub priority: u8,
    /// Conditions that must hold before dispatch.
    #[serde(default)]
    pub prerequisites: Vec<Prerequisite>,
    /// Consumables checked before dispatch.
    #[serde(default)]
    pub resource_requirements: Vec<ResourceRequirement>,
    /// Failure budget override; the queue default applies when omitted.
    #[serde(default)]
    pub max_retries: Option<u32>,
}

/// Request to remove a queued or current task.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RemoveTaskRequest {
    /// Target player.
    #[validate(custom(function = validate_player_id))]
    pub player_id: String,
    /// Task to remove.
    pub task_id: Uuid,
}

/// Request to reorder the pending tasks.
///
/// `task_ids` must be a permutation of the currently queued task IDs; the
/// current task is not part of the ordering.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ReorderQueueRequest {
    /// Target player.
    #[validate(custom(function = validate_player_id))]
    pub player_id: String,
    /// Desired order; must list every queued task exactly once.
    #[validate(length(min = 1))]
    pub task_ids: Vec<Uuid>,
}

/// Request to pause processing for a player.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct PauseQueueRequest {
    /// Target player.
    #[validate(custom(function = validate_player_id))]
    pub player_id: String,
    /// Optional reason recorded on the queue.
    #[serde(default)]
    pub reason: Option<String>,
}

/// Request to resume a paused queue.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ResumeQueueRequest {
    /// Target player.
    #[validate(custom(function = validate_player_id))]
    pub player_id: String,
}

/// Request to stop processing, keeping queued tasks in place.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct StopQueueRequest {
    /// Target player.
    #[validate(custom(function = validate_player_id))]
    pub player_id: String,
}

/// Request to drop the current task and every queued task.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ClearQueueRequest {
    /// Target player.
    #[validate(custom(function = validate_player_id))]
    pub player_id: String,
}
