//! Service layer orchestrating commands, processing, and persistence.

/// Command intake: validation, rate limiting, queue mutations.
pub mod command_service;
/// Schema migration registry and batch executor.
pub mod migration_service;
/// Tick processing: dispatch, progress, completion, offline catch-up.
pub mod pipeline_service;
/// Versioned queue persistence with integrity enforcement.
pub mod queue_service;
/// Retry orchestration with per-operation circuit breakers.
pub mod retry_service;
/// Per-activity reward computation.
pub mod rewards;
/// Timer-driven processing loop.
pub mod scheduler;
/// Snapshot creation, restore, and retention.
pub mod snapshot_service;
/// Storage reconnect loop and degraded-mode coordination.
pub mod storage_supervisor;
