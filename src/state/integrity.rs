//! Checksum computation and structural validation/repair for task queues.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::state::queue::TaskQueue;

/// Severity of a validation finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Unrepairable; the record cannot be trusted at all.
    Critical,
    /// Structural defect that repair can fix.
    Major,
    /// Advisory finding; the queue is still usable.
    Warning,
}

/// Machine-readable code identifying a validation finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueCode {
    /// The record has no player id; nothing can be keyed to it.
    MissingPlayerId,
    /// Stored checksum does not match the recomputed one.
    ChecksumMismatch,
    /// `last_updated` lies in the future.
    FutureTimestamp,
    /// A never-started current task is not in the queued list.
    OrphanedCurrentTask,
    /// Two queued entries share an id, or a started current task still sits
    /// in the queued list.
    DuplicateTaskIds,
    /// More tasks are queued than the configured maximum allows.
    QueueOverCapacity,
    /// The history ring buffer exceeds its configured cap.
    HistoryOverCapacity,
}

/// A single validation finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Machine-readable code.
    pub code: IssueCode,
    /// How serious the finding is.
    pub severity: Severity,
    /// Human readable explanation.
    pub message: String,
}

/// Concrete fix the repair pass can apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairAction {
    /// Recompute and store the checksum.
    RecomputeChecksum,
    /// Clamp a future `last_updated` to the current time.
    ClampLastUpdated,
    /// Clear the orphaned current task and the running flag.
    ClearCurrentTask,
    /// Drop duplicate queued entries (including a started current task's id).
    DropDuplicateTasks,
    /// Truncate the history ring buffer to its most recent entries.
    TruncateHistory,
}

/// Outcome of validating a queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// True when no error-severity findings were recorded.
    pub is_valid: bool,
    /// Critical and major findings.
    pub errors: Vec<ValidationIssue>,
    /// Warning findings.
    pub warnings: Vec<ValidationIssue>,
    /// `max(0, 100 - 20*errors - 5*warnings)`.
    pub integrity_score: u8,
    /// True when no finding is critical.
    pub can_repair: bool,
    /// Fixes that would clear the repairable findings.
    pub repair_actions: Vec<RepairAction>,
}

/// Compute the stable content checksum of a queue.
///
/// Only identity fields participate: player id, current-task id, sorted
/// queued-task ids, running/paused flags, and the completion counter.
/// Volatile fields (timestamps, progress) are deliberately excluded so the
/// checksum stays meaningful across small time deltas.
pub fn compute_checksum(queue: &TaskQueue) -> String {
    let mut hasher = Sha256::new();
    hasher.update(queue.player_id.as_bytes());
    hasher.update(b"|");
    if let Some(current) = &queue.current_task {
        hasher.update(current.id.as_bytes());
    }
    hasher.update(b"|");

    let mut queued_ids: Vec<_> = queue.queued_tasks.iter().map(|task| task.id).collect();
    queued_ids.sort();
    for id in queued_ids {
        hasher.update(id.as_bytes());
        hasher.update(b",");
    }

    hasher.update(b"|");
    hasher.update([queue.is_running as u8, queue.is_paused as u8]);
    hasher.update(queue.total_tasks_completed.to_be_bytes());

    let digest = hasher.finalize();
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

/// Validate a queue's structure against its invariants.
pub fn validate(queue: &TaskQueue, now_ms: u64) -> ValidationReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let mut repair_actions = Vec::new();

    if queue.player_id.trim().is_empty() {
        errors.push(ValidationIssue {
            code: IssueCode::MissingPlayerId,
            severity: Severity::Critical,
            message: "queue record has no player id".into(),
        });
    }

    let expected = compute_checksum(queue);
    if queue.checksum != expected {
        errors.push(ValidationIssue {
            code: IssueCode::ChecksumMismatch,
            severity: Severity::Major,
            message: format!(
                "stored checksum `{}` does not match computed `{}`",
                queue.checksum, expected
            ),
        });
        repair_actions.push(RepairAction::RecomputeChecksum);
    }

    if queue.last_updated_ms > now_ms {
        warnings.push(ValidationIssue {
            code: IssueCode::FutureTimestamp,
            severity: Severity::Warning,
            message: format!(
                "last_updated {} is {}ms in the future",
                queue.last_updated_ms,
                queue.last_updated_ms - now_ms
            ),
        });
        repair_actions.push(RepairAction::ClampLastUpdated);
    }

    if let Some(current) = &queue.current_task {
        let in_queue = queue.queued_tasks.iter().any(|task| task.id == current.id);
        if current.started_at_ms.is_none() && !in_queue {
            errors.push(ValidationIssue {
                code: IssueCode::OrphanedCurrentTask,
                severity: Severity::Major,
                message: format!("current task `{}` never started and is not queued", current.id),
            });
            repair_actions.push(RepairAction::ClearCurrentTask);
        }
        if current.started_at_ms.is_some() && in_queue {
            errors.push(ValidationIssue {
                code: IssueCode::DuplicateTaskIds,
                severity: Severity::Major,
                message: format!("started current task `{}` still present in queue", current.id),
            });
            if !repair_actions.contains(&RepairAction::DropDuplicateTasks) {
                repair_actions.push(RepairAction::DropDuplicateTasks);
            }
        }
    }

    let mut seen = std::collections::HashSet::new();
    let duplicate_ids: Vec<_> = queue
        .queued_tasks
        .iter()
        .filter(|task| !seen.insert(task.id))
        .map(|task| task.id)
        .collect();
    if !duplicate_ids.is_empty() {
        errors.push(ValidationIssue {
            code: IssueCode::DuplicateTaskIds,
            severity: Severity::Major,
            message: format!("duplicate queued task ids: {duplicate_ids:?}"),
        });
        if !repair_actions.contains(&RepairAction::DropDuplicateTasks) {
            repair_actions.push(RepairAction::DropDuplicateTasks);
        }
    }

    if queue.queued_tasks.len() > queue.config.max_queue_size {
        // Informational only: the cap is enforced on enqueue, an oversized
        // queue from an older config is still processable.
        warnings.push(ValidationIssue {
            code: IssueCode::QueueOverCapacity,
            severity: Severity::Warning,
            message: format!(
                "queue holds {} tasks, configured maximum is {}",
                queue.queued_tasks.len(),
                queue.config.max_queue_size
            ),
        });
    }

    if queue.state_history.len() > queue.config.max_history {
        warnings.push(ValidationIssue {
            code: IssueCode::HistoryOverCapacity,
            severity: Severity::Warning,
            message: format!(
                "history holds {} entries, cap is {}",
                queue.state_history.len(),
                queue.config.max_history
            ),
        });
        repair_actions.push(RepairAction::TruncateHistory);
    }

    let score = 100i32 - 20 * errors.len() as i32 - 5 * warnings.len() as i32;
    let can_repair = !errors
        .iter()
        .any(|issue| issue.severity == Severity::Critical);

    ValidationReport {
        is_valid: errors.is_empty(),
        errors,
        warnings,
        integrity_score: score.max(0) as u8,
        can_repair,
        repair_actions,
    }
}

/// Apply the report's repair actions in place.
///
/// Structural fixes run first and the checksum is recomputed last, so a
/// repaired queue always validates cleanly afterwards. Repair is idempotent.
pub fn repair(queue: &mut TaskQueue, report: &ValidationReport, now_ms: u64) {
    for action in &report.repair_actions {
        match action {
            RepairAction::ClearCurrentTask => {
                queue.current_task = None;
                queue.is_running = false;
            }
            RepairAction::DropDuplicateTasks => {
                let mut seen = std::collections::HashSet::new();
                if let Some(current) = &queue.current_task
                    && current.started_at_ms.is_some()
                {
                    seen.insert(current.id);
                }
                queue.queued_tasks.retain(|task| seen.insert(task.id));
            }
            RepairAction::ClampLastUpdated => {
                queue.last_updated_ms = queue.last_updated_ms.min(now_ms);
            }
            RepairAction::TruncateHistory => {
                let max = queue.config.max_history;
                if queue.state_history.len() > max {
                    queue
                        .state_history
                        .sort_by_key(|summary| summary.timestamp_ms);
                    let excess = queue.state_history.len() - max;
                    queue.state_history.drain(..excess);
                }
            }
            RepairAction::RecomputeChecksum => {}
        }
    }

    // Any structural change above shifts the identity hash.
    queue.checksum = compute_checksum(queue);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::queue::{ActivityPayload, QueueConfig, Task};

    fn payload() -> ActivityPayload {
        ActivityPayload::Combat {
            enemy_id: "rust_golem".into(),
            enemy_level: 4,
        }
    }

    fn valid_queue() -> TaskQueue {
        let mut queue = TaskQueue::new("gearsmith-01", QueueConfig::default(), 1_000);
        queue
            .enqueue(Task::new("gearsmith-01", "fight", payload(), 30_000, 5, 3))
            .unwrap();
        queue.checksum = compute_checksum(&queue);
        queue
    }

    #[test]
    fn checksum_ignores_volatile_fields() {
        let mut queue = valid_queue();
        let before = compute_checksum(&queue);

        queue.last_updated_ms += 99_999;
        queue.queued_tasks[0].progress = 0.7;
        assert_eq!(compute_checksum(&queue), before);

        queue.total_tasks_completed += 1;
        assert_ne!(compute_checksum(&queue), before);
    }

    #[test]
    fn checksum_is_order_insensitive_for_queued_ids() {
        let mut queue = valid_queue();
        queue
            .enqueue(Task::new("gearsmith-01", "more", payload(), 10_000, 1, 3))
            .unwrap();
        let before = compute_checksum(&queue);
        queue.queued_tasks.reverse();
        assert_eq!(compute_checksum(&queue), before);
    }

    #[test]
    fn clean_queue_scores_100() {
        let queue = valid_queue();
        let report = validate(&queue, 2_000);
        assert!(report.is_valid);
        assert!(report.can_repair);
        assert_eq!(report.integrity_score, 100);
        assert!(report.repair_actions.is_empty());
    }

    #[test]
    fn missing_player_id_is_critical_and_unrepairable() {
        let mut queue = valid_queue();
        queue.player_id = String::new();
        queue.checksum = compute_checksum(&queue);

        let report = validate(&queue, 2_000);
        assert!(!report.is_valid);
        assert!(!report.can_repair);
        assert_eq!(report.errors[0].code, IssueCode::MissingPlayerId);
    }

    #[test]
    fn checksum_mismatch_detected_and_scored() {
        let mut queue = valid_queue();
        queue.checksum = "garbage".into();

        let report = validate(&queue, 2_000);
        assert!(!report.is_valid);
        assert_eq!(report.errors[0].code, IssueCode::ChecksumMismatch);
        assert_eq!(report.integrity_score, 80);
        assert!(report.repair_actions.contains(&RepairAction::RecomputeChecksum));
    }

    #[test]
    fn orphaned_unstarted_current_task_is_cleared_by_repair() {
        let mut queue = valid_queue();
        let mut orphan = Task::new("gearsmith-01", "ghost", payload(), 10_000, 1, 3);
        orphan.started_at_ms = None;
        queue.current_task = Some(orphan);
        queue.is_running = true;
        queue.checksum = compute_checksum(&queue);

        let report = validate(&queue, 2_000);
        assert!(report
            .errors
            .iter()
            .any(|issue| issue.code == IssueCode::OrphanedCurrentTask));

        repair(&mut queue, &report, 2_000);
        assert!(queue.current_task.is_none());
        assert!(!queue.is_running);
        assert!(validate(&queue, 2_000).is_valid);
    }

    #[test]
    fn started_current_task_must_leave_the_queue() {
        let mut queue = valid_queue();
        let mut current = queue.queued_tasks[0].clone();
        current.started_at_ms = Some(1_500);
        queue.current_task = Some(current);
        queue.checksum = compute_checksum(&queue);

        let report = validate(&queue, 2_000);
        assert!(report
            .errors
            .iter()
            .any(|issue| issue.code == IssueCode::DuplicateTaskIds));

        repair(&mut queue, &report, 2_000);
        assert!(queue.queued_tasks.is_empty());
        assert!(queue.current_task.is_some());
        assert!(validate(&queue, 2_000).is_valid);
    }

    #[test]
    fn duplicate_queued_ids_are_deduplicated() {
        let mut queue = valid_queue();
        let cloned = queue.queued_tasks[0].clone();
        queue.queued_tasks.push(cloned);
        queue.checksum = compute_checksum(&queue);

        let report = validate(&queue, 2_000);
        assert!(report
            .errors
            .iter()
            .any(|issue| issue.code == IssueCode::DuplicateTaskIds));

        repair(&mut queue, &report, 2_000);
        assert_eq!(queue.queued_tasks.len(), 1);
        assert!(validate(&queue, 2_000).is_valid);
    }

    #[test]
    fn future_timestamp_is_clamped() {
        let mut queue = valid_queue();
        queue.last_updated_ms = 10_000;

        let report = validate(&queue, 2_000);
        assert!(report.is_valid); // warnings alone do not invalidate
        assert_eq!(report.warnings[0].code, IssueCode::FutureTimestamp);
        assert_eq!(report.integrity_score, 95);

        let mut repaired = queue.clone();
        repair(&mut repaired, &report, 2_000);
        assert_eq!(repaired.last_updated_ms, 2_000);
    }

    #[test]
    fn repair_is_idempotent() {
        let mut queue = valid_queue();
        let cloned = queue.queued_tasks[0].clone();
        queue.queued_tasks.push(cloned);
        queue.checksum = "bogus".into();
        queue.last_updated_ms = 999_999;

        let report = validate(&queue, 2_000);
        repair(&mut queue, &report, 2_000);
        let first_pass = validate(&queue, 2_000);
        assert!(first_pass.is_valid);
        assert!(first_pass.errors.is_empty());

        repair(&mut queue, &first_pass, 2_000);
        let second_pass = validate(&queue, 2_000);
        assert!(second_pass.errors.is_empty());
    }

    #[test]
    fn oversized_history_warns_and_truncates() {
        let mut queue = valid_queue();
        queue.config.max_history = 2;
        for tick in 0..5u64 {
            queue.state_history.push(crate::state::queue::QueueSummary {
                timestamp_ms: tick * 10,
                version: tick,
                queue_size: 1,
                current_task_id: None,
                is_running: false,
                is_paused: false,
            });
        }
        queue.checksum = compute_checksum(&queue);

        let report = validate(&queue, 2_000);
        assert!(report
            .warnings
            .iter()
            .any(|issue| issue.code == IssueCode::HistoryOverCapacity));

        repair(&mut queue, &report, 2_000);
        assert_eq!(queue.state_history.len(), 2);
        assert_eq!(queue.state_history[0].timestamp_ms, 30);
        assert_eq!(queue.state_history[1].timestamp_ms, 40);
    }
}
