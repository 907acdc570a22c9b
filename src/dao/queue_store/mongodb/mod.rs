//! MongoDB-backed [`QueueStore`](super::QueueStore) implementation.
//!
//! The optimistic concurrency contract maps onto a conditional
//! `replace_one` filtered by `{_id, version}`; a zero match count is decoded
//! into a [`StorageError::VersionConflict`](crate::dao::storage::StorageError).

mod config;
mod connection;
mod error;
mod models;
pub mod store;

pub use config::MongoConfig;
pub use error::MongoDaoError;
pub use store::MongoQueueStore;

use crate::dao::storage::StorageError;

impl From<MongoDaoError> for StorageError {
    fn from(err: MongoDaoError) -> Self {
        match err {
            MongoDaoError::VersionConflict {
                player_id,
                expected,
                actual,
            } => StorageError::VersionConflict {
                player_id,
                expected,
                actual,
            },
            other => StorageError::unavailable(other.to_string(), other),
        }
    }
}
