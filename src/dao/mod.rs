//! Persistence layer: storage traits, backends, and database models.

/// Database model definitions.
pub mod models;
/// Queue, snapshot, and migration record storage operations.
pub mod queue_store;
/// Storage abstraction layer for database operations.
pub mod storage;
