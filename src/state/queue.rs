//! Runtime domain model for per-player task queues.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Reward records kept on a live queue or task; older entries are dropped
/// oldest first.
pub const MAX_REWARD_HISTORY: usize = 1_000;

/// Broad activity families the engine knows how to process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    /// Gathering raw resources over time.
    Harvesting,
    /// Turning resources into items at a station.
    Crafting,
    /// Fighting an enemy for currency and loot.
    Combat,
}

impl std::fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ActivityKind::Harvesting => "harvesting",
            ActivityKind::Crafting => "crafting",
            ActivityKind::Combat => "combat",
        };
        f.write_str(label)
    }
}

/// Activity-specific payload carried by a task.
///
/// Each variant owns its own strongly typed fields and is dispatched through
/// exhaustive matching; the engine never peeks into untyped payload blobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActivityPayload {
    /// Resource gathering parameters.
    Harvesting {
        /// Identifier of the resource node being worked.
        resource_id: String,
        /// Skill the activity trains (e.g. "mining").
        skill: String,
        /// Player's current level in that skill.
        skill_level: u32,
    },
    /// Item crafting parameters.
    Crafting {
        /// Identifier of the recipe being crafted.
        recipe_id: String,
        /// Item the recipe produces.
        output_item_id: String,
        /// Number of items produced per completion.
        output_quantity: u32,
    },
    /// Combat encounter parameters.
    Combat {
        /// Identifier of the enemy being fought.
        enemy_id: String,
        /// Enemy difficulty level, scales currency rewards.
        enemy_level: u32,
    },
}

impl ActivityPayload {
    /// The activity family this payload belongs to.
    pub fn kind(&self) -> ActivityKind {
        match self {
            ActivityPayload::Harvesting { .. } => ActivityKind::Harvesting,
            ActivityPayload::Crafting { .. } => ActivityKind::Crafting,
            ActivityPayload::Combat { .. } => ActivityKind::Combat,
        }
    }
}

/// A condition that must hold before a task may start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prerequisite {
    /// Human readable description (e.g. "Mining level 10").
    pub description: String,
    /// Whether the condition currently holds.
    pub met: bool,
}

/// A consumable requirement checked before dispatching a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequirement {
    /// Identifier of the required resource.
    pub resource_id: String,
    /// Quantity the task consumes.
    pub required: u32,
    /// Quantity the player currently holds.
    pub available: u32,
    /// Whether `available` covers `required`.
    pub sufficient: bool,
}

/// A single reward granted by a completed task cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reward {
    /// Skill experience.
    Experience {
        /// Skill the experience applies to.
        skill: String,
        /// Amount of experience granted.
        amount: u64,
    },
    /// A stack of raw resources.
    Resource {
        /// Identifier of the granted resource.
        resource_id: String,
        /// Number of units granted.
        quantity: u32,
    },
    /// In-game currency.
    Currency {
        /// Amount of currency granted.
        amount: u64,
    },
    /// A concrete item (crafted output or combat loot).
    Item {
        /// Identifier of the granted item.
        item_id: String,
        /// Number of items granted.
        quantity: u32,
    },
}

/// A unit of long-running work owned by exactly one player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Stable identifier for the task.
    pub id: Uuid,
    /// Owning player.
    pub player_id: String,
    /// Display name shown in the UI.
    pub name: String,
    /// Longer description shown in the UI.
    pub description: String,
    /// Icon key resolved by the UI layer.
    pub icon: String,
    /// Activity-specific payload.
    pub payload: ActivityPayload,
    /// How long one cycle of this task takes.
    pub duration_ms: u64,
    /// Epoch milliseconds when the task actually started running.
    pub started_at_ms: Option<u64>,
    /// Conditions that must hold before dispatch.
    pub prerequisites: Vec<Prerequisite>,
    /// Consumables checked before dispatch.
    pub resource_requirements: Vec<ResourceRequirement>,
    /// Completion fraction in `0.0..=1.0`.
    pub progress: f64,
    /// Whether the task has finished its cycle.
    pub completed: bool,
    /// Rewards accumulated by this task, bounded to the most recent
    /// [`MAX_REWARD_HISTORY`] records.
    pub rewards: Vec<Reward>,
    /// Dispatch priority, 0-10, higher runs first.
    pub priority: u8,
    /// Expected completion time in epoch milliseconds, set on dispatch.
    pub estimated_completion_ms: Option<u64>,
    /// Processing failures recorded against this task.
    pub retry_count: u32,
    /// Failure budget before the task is dropped.
    pub max_retries: u32,
    /// Whether the task passed structural validation.
    pub is_valid: bool,
    /// Validation findings, if any.
    pub validation_errors: Vec<String>,
}

impl Task {
    /// Create a pending task with defaulted bookkeeping fields.
    pub fn new(
        player_id: impl Into<String>,
        name: impl Into<String>,
        payload: ActivityPayload,
        duration_ms: u64,
        priority: u8,
        max_retries: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            player_id: player_id.into(),
            name: name.into(),
            description: String::new(),
            icon: String::new(),
            payload,
            duration_ms,
            started_at_ms: None,
            prerequisites: Vec::new(),
            resource_requirements: Vec::new(),
            progress: 0.0,
            completed: false,
            rewards: Vec::new(),
            priority,
            estimated_completion_ms: None,
            retry_count: 0,
            max_retries,
            is_valid: true,
            validation_errors: Vec::new(),
        }
    }

    /// Milliseconds elapsed since the task started, or `None` when pending.
    pub fn elapsed_ms(&self, now_ms: u64) -> Option<u64> {
        self.started_at_ms
            .map(|started| now_ms.saturating_sub(started))
    }

    /// Whether every prerequisite and resource requirement is satisfied.
    pub fn requirements_satisfied(&self) -> bool {
        self.prerequisites.iter().all(|p| p.met)
            && self.resource_requirements.iter().all(|r| r.sufficient)
    }

    /// Append granted rewards, keeping only the most recent
    /// [`MAX_REWARD_HISTORY`] records.
    pub fn record_rewards(&mut self, granted: &[Reward]) {
        self.rewards.extend_from_slice(granted);
        trim_oldest(&mut self.rewards, MAX_REWARD_HISTORY);
    }

    /// First unsatisfied requirement, phrased for the pause reason.
    pub fn first_blocking_requirement(&self) -> Option<String> {
        if let Some(prereq) = self.prerequisites.iter().find(|p| !p.met) {
            return Some(format!("prerequisite not met: {}", prereq.description));
        }
        self.resource_requirements
            .iter()
            .find(|r| !r.sufficient)
            .map(|r| {
                format!(
                    "insufficient resource `{}`: need {}, have {}",
                    r.resource_id, r.required, r.available
                )
            })
    }
}

/// Per-queue behaviour knobs, bounded by command validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum number of queued (non-current) tasks.
    pub max_queue_size: usize,
    /// Longest single-task duration accepted.
    pub max_task_duration_ms: u64,
    /// Default failure budget stamped on new tasks.
    pub default_max_retries: u32,
    /// When true, dispatch picks the highest-priority task first.
    pub priority_handling: bool,
    /// Cap on the state-history ring buffer.
    pub max_history: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 50,
            max_task_duration_ms: 24 * 60 * 60 * 1000,
            default_max_retries: 3,
            priority_handling: true,
            max_history: 10,
        }
    }
}

/// Lightweight point-in-time summary kept in the queue's history ring buffer.
///
/// Used for debugging and rollback inspection, never for gameplay decisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSummary {
    /// When the summary was recorded.
    pub timestamp_ms: u64,
    /// Queue version at that moment.
    pub version: u64,
    /// Number of queued tasks.
    pub queue_size: usize,
    /// Identifier of the task running at that moment, if any.
    pub current_task_id: Option<Uuid>,
    /// Running flag at that moment.
    pub is_running: bool,
    /// Paused flag at that moment.
    pub is_paused: bool,
}

/// Error returned when a task cannot be added to a queue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnqueueError {
    /// The queue already holds the configured maximum of tasks.
    #[error("queue is full ({max} tasks)")]
    Full {
        /// Configured queue capacity.
        max: usize,
    },
    /// A task with the same id is already present.
    #[error("task `{id}` is already queued")]
    DuplicateTask {
        /// The conflicting task id.
        id: Uuid,
    },
}

/// Error returned when a reorder request does not match the queue contents.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReorderError {
    /// The request does not list every queued task exactly once.
    #[error("reorder must list each queued task exactly once (expected {expected} ids, got {got})")]
    NotAPermutation {
        /// Number of queued tasks.
        expected: usize,
        /// Number of ids supplied.
        got: usize,
    },
    /// The request references a task that is not queued.
    #[error("reorder references unknown task `{id}`")]
    UnknownTask {
        /// The unknown task id.
        id: Uuid,
    },
}

/// Root aggregate: the ordered set of pending and active work for one player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskQueue {
    /// Owning player, primary key.
    pub player_id: String,
    /// The at-most-one task currently being processed.
    pub current_task: Option<Task>,
    /// Pending tasks; insertion order is the FIFO tie-break.
    pub queued_tasks: Vec<Task>,
    /// Whether the queue is actively processing.
    pub is_running: bool,
    /// Whether processing is paused.
    pub is_paused: bool,
    /// Human readable reason recorded when pausing.
    pub pause_reason: Option<String>,
    /// Whether the pause is recoverable by re-evaluating requirements.
    pub can_resume: bool,
    /// Epoch milliseconds when the current pause began.
    pub paused_at_ms: Option<u64>,
    /// Total completed task cycles over the queue's lifetime.
    pub total_tasks_completed: u64,
    /// Total processing time accumulated, in milliseconds.
    pub total_time_spent_ms: u64,
    /// Total time spent paused, in milliseconds.
    pub total_pause_time_ms: u64,
    /// Reward history, bounded to the most recent [`MAX_REWARD_HISTORY`]
    /// records and compressed further on snapshotting.
    pub total_rewards_earned: Vec<Reward>,
    /// Behaviour knobs for this queue.
    pub config: QueueConfig,
    /// Monotonic version, incremented by exactly one per persisted mutation.
    pub version: u64,
    /// Hash of the queue's identity fields, recomputed on every save.
    pub checksum: String,
    /// Last time the queue record was written.
    pub last_updated_ms: u64,
    /// Ring buffer of recent lightweight summaries.
    pub state_history: Vec<QueueSummary>,
}

impl TaskQueue {
    /// Create an empty queue for a player.
    pub fn new(player_id: impl Into<String>, config: QueueConfig, now_ms: u64) -> Self {
        Self {
            player_id: player_id.into(),
            current_task: None,
            queued_tasks: Vec::new(),
            is_running: false,
            is_paused: false,
            pause_reason: None,
            can_resume: false,
            paused_at_ms: None,
            total_tasks_completed: 0,
            total_time_spent_ms: 0,
            total_pause_time_ms: 0,
            total_rewards_earned: Vec::new(),
            config,
            version: 0,
            checksum: String::new(),
            last_updated_ms: now_ms,
            state_history: Vec::new(),
        }
    }

    /// Append a task, enforcing capacity and id uniqueness.
    pub fn enqueue(&mut self, task: Task) -> Result<(), EnqueueError> {
        if self.queued_tasks.len() >= self.config.max_queue_size {
            return Err(EnqueueError::Full {
                max: self.config.max_queue_size,
            });
        }

        let duplicate = self.queued_tasks.iter().any(|queued| queued.id == task.id)
            || self
                .current_task
                .as_ref()
                .is_some_and(|current| current.id == task.id);
        if duplicate {
            return Err(EnqueueError::DuplicateTask { id: task.id });
        }

        self.queued_tasks.push(task);
        Ok(())
    }

    /// Remove a queued task by id, returning whether anything was removed.
    pub fn remove_task(&mut self, id: Uuid) -> bool {
        let before = self.queued_tasks.len();
        self.queued_tasks.retain(|task| task.id != id);
        self.queued_tasks.len() != before
    }

    /// Rearrange queued tasks to match `order`, which must be a permutation
    /// of the currently queued ids.
    pub fn reorder(&mut self, order: &[Uuid]) -> Result<(), ReorderError> {
        if order.len() != self.queued_tasks.len() {
            return Err(ReorderError::NotAPermutation {
                expected: self.queued_tasks.len(),
                got: order.len(),
            });
        }

        let mut remaining: Vec<Task> = std::mem::take(&mut self.queued_tasks);
        let mut reordered = Vec::with_capacity(order.len());
        for id in order {
            let Some(position) = remaining.iter().position(|task| task.id == *id) else {
                // Restore the original contents before failing.
                remaining.extend(reordered);
                self.queued_tasks = remaining;
                return Err(ReorderError::UnknownTask { id: *id });
            };
            reordered.push(remaining.swap_remove(position));
        }

        self.queued_tasks = reordered;
        Ok(())
    }

    /// Index of the next task to dispatch.
    ///
    /// With priority handling enabled this is the highest-priority task,
    /// ties broken by insertion order (stable FIFO); otherwise strict FIFO.
    pub fn next_task_index(&self) -> Option<usize> {
        if self.queued_tasks.is_empty() {
            return None;
        }

        if !self.config.priority_handling {
            return Some(0);
        }

        let mut best = 0;
        for (index, task) in self.queued_tasks.iter().enumerate().skip(1) {
            if task.priority > self.queued_tasks[best].priority {
                best = index;
            }
        }
        Some(best)
    }

    /// Pause processing with a recorded reason.
    pub fn pause(&mut self, reason: impl Into<String>, can_resume: bool, now_ms: u64) {
        self.is_paused = true;
        self.is_running = false;
        self.pause_reason = Some(reason.into());
        self.can_resume = can_resume;
        self.paused_at_ms = Some(now_ms);
    }

    /// Resume processing, folding the elapsed pause into the pause counter.
    pub fn resume(&mut self, now_ms: u64) {
        if let Some(paused_at) = self.paused_at_ms.take() {
            self.total_pause_time_ms += now_ms.saturating_sub(paused_at);
        }
        self.is_paused = false;
        self.pause_reason = None;
        self.can_resume = false;
    }

    /// Append granted rewards to the lifetime history, keeping only the most
    /// recent [`MAX_REWARD_HISTORY`] records.
    pub fn record_rewards(&mut self, granted: impl IntoIterator<Item = Reward>) {
        self.total_rewards_earned.extend(granted);
        trim_oldest(&mut self.total_rewards_earned, MAX_REWARD_HISTORY);
    }

    /// Record a lightweight summary in the history ring buffer.
    pub fn record_history(&mut self, now_ms: u64) {
        let summary = QueueSummary {
            timestamp_ms: now_ms,
            version: self.version,
            queue_size: self.queued_tasks.len(),
            current_task_id: self.current_task.as_ref().map(|task| task.id),
            is_running: self.is_running,
            is_paused: self.is_paused,
        };
        self.state_history.push(summary);
        trim_oldest(&mut self.state_history, self.config.max_history);
    }
}

fn trim_oldest<T>(items: &mut Vec<T>, keep: usize) {
    if items.len() > keep {
        let excess = items.len() - keep;
        items.drain(..excess);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(player: &str, priority: u8) -> Task {
        Task::new(
            player,
            format!("task-p{priority}"),
            ActivityPayload::Harvesting {
                resource_id: "copper_vein".into(),
                skill: "mining".into(),
                skill_level: 3,
            },
            30_000,
            priority,
            3,
        )
    }

    #[test]
    fn enqueue_rejects_duplicates_and_overflow() {
        let mut queue = TaskQueue::new(
            "gearsmith-01",
            QueueConfig {
                max_queue_size: 2,
                ..QueueConfig::default()
            },
            0,
        );

        let first = task("gearsmith-01", 1);
        let duplicate = first.clone();
        queue.enqueue(first).unwrap();
        assert!(matches!(
            queue.enqueue(duplicate),
            Err(EnqueueError::DuplicateTask { .. })
        ));

        queue.enqueue(task("gearsmith-01", 2)).unwrap();
        assert!(matches!(
            queue.enqueue(task("gearsmith-01", 3)),
            Err(EnqueueError::Full { max: 2 })
        ));
    }

    #[test]
    fn priority_dispatch_is_stable_within_equal_priority() {
        let mut queue = TaskQueue::new("gearsmith-01", QueueConfig::default(), 0);
        let a = task("gearsmith-01", 1);
        let b = task("gearsmith-01", 5);
        let c = task("gearsmith-01", 5);
        let (b_id, c_id, a_id) = (b.id, c.id, a.id);
        queue.enqueue(a).unwrap();
        queue.enqueue(b).unwrap();
        queue.enqueue(c).unwrap();

        // Dispatch order must be B, C, A.
        for expected in [b_id, c_id, a_id] {
            let index = queue.next_task_index().unwrap();
            let picked = queue.queued_tasks.remove(index);
            assert_eq!(picked.id, expected);
        }
        assert!(queue.next_task_index().is_none());
    }

    #[test]
    fn fifo_dispatch_ignores_priority() {
        let mut queue = TaskQueue::new(
            "gearsmith-01",
            QueueConfig {
                priority_handling: false,
                ..QueueConfig::default()
            },
            0,
        );
        let low = task("gearsmith-01", 0);
        let high = task("gearsmith-01", 10);
        let low_id = low.id;
        queue.enqueue(low).unwrap();
        queue.enqueue(high).unwrap();

        let index = queue.next_task_index().unwrap();
        assert_eq!(queue.queued_tasks[index].id, low_id);
    }

    #[test]
    fn reorder_requires_a_permutation() {
        let mut queue = TaskQueue::new("gearsmith-01", QueueConfig::default(), 0);
        let first = task("gearsmith-01", 1);
        let second = task("gearsmith-01", 2);
        let (first_id, second_id) = (first.id, second.id);
        queue.enqueue(first).unwrap();
        queue.enqueue(second).unwrap();

        assert!(matches!(
            queue.reorder(&[first_id]),
            Err(ReorderError::NotAPermutation { .. })
        ));
        assert!(matches!(
            queue.reorder(&[first_id, Uuid::new_v4()]),
            Err(ReorderError::UnknownTask { .. })
        ));
        // A failed reorder must leave the queue intact.
        assert_eq!(queue.queued_tasks.len(), 2);

        queue.reorder(&[second_id, first_id]).unwrap();
        assert_eq!(queue.queued_tasks[0].id, second_id);
        assert_eq!(queue.queued_tasks[1].id, first_id);
    }

    #[test]
    fn pause_and_resume_accumulate_pause_time() {
        let mut queue = TaskQueue::new("gearsmith-01", QueueConfig::default(), 0);
        queue.pause("missing prerequisite", true, 1_000);
        assert!(queue.is_paused);
        assert!(queue.can_resume);

        queue.resume(4_500);
        assert!(!queue.is_paused);
        assert_eq!(queue.pause_reason, None);
        assert_eq!(queue.total_pause_time_ms, 3_500);
    }

    #[test]
    fn history_ring_buffer_keeps_most_recent_entries() {
        let mut queue = TaskQueue::new(
            "gearsmith-01",
            QueueConfig {
                max_history: 3,
                ..QueueConfig::default()
            },
            0,
        );
        for tick in 0..5u64 {
            queue.version = tick;
            queue.record_history(tick * 100);
        }

        assert_eq!(queue.state_history.len(), 3);
        assert_eq!(queue.state_history[0].timestamp_ms, 200);
        assert_eq!(queue.state_history[2].timestamp_ms, 400);
    }

    #[test]
    fn reward_history_keeps_most_recent_records() {
        let mut queue = TaskQueue::new("gearsmith-01", QueueConfig::default(), 0);
        for batch in 0..21u64 {
            let rewards: Vec<Reward> = (0..50u64)
                .map(|n| Reward::Currency { amount: batch * 50 + n })
                .collect();
            queue.record_rewards(rewards);
        }

        assert_eq!(queue.total_rewards_earned.len(), MAX_REWARD_HISTORY);
        // 1050 granted in total, so the oldest 50 were dropped.
        assert_eq!(
            queue.total_rewards_earned.first(),
            Some(&Reward::Currency { amount: 50 })
        );
        assert_eq!(
            queue.total_rewards_earned.last(),
            Some(&Reward::Currency { amount: 1_049 })
        );
    }

    #[test]
    fn blocking_requirement_message_names_the_shortfall() {
        let mut blocked = task("gearsmith-01", 1);
        blocked.resource_requirements.push(ResourceRequirement {
            resource_id: "coal".into(),
            required: 10,
            available: 4,
            sufficient: false,
        });

        assert!(!blocked.requirements_satisfied());
        let reason = blocked.first_blocking_requirement().unwrap();
        assert!(reason.contains("coal"));
        assert!(reason.contains("need 10"));
    }
}
