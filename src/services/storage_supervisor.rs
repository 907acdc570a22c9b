//! Storage supervision: connect, health polling, reconnect, degraded mode.
//!
//! The supervisor is the only component that installs or removes the queue
//! store; mutating services observe storage availability solely through the
//! shared state's store slot.

use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    dao::{queue_store::QueueStore, storage::StorageError},
    state::SharedState,
};

const CONNECT_BACKOFF_START: Duration = Duration::from_secs(1);
const CONNECT_BACKOFF_CAP: Duration = Duration::from_secs(30);
const HEALTH_INTERVAL: Duration = Duration::from_secs(5);
const RECONNECT_ATTEMPTS: u32 = 3;
const RECONNECT_BACKOFF_START: Duration = Duration::from_millis(500);
const RECONNECT_BACKOFF_CAP: Duration = Duration::from_secs(10);

/// Keep the engine supplied with a healthy queue store.
///
/// Connects with exponential backoff, installs the store, then polls its
/// health until the store is lost for good. A lost store is uninstalled, so
/// mutating operations fail fast as degraded instead of retrying against a
/// dead backend, and the loop starts over with a fresh connection.
pub async fn run<F, Fut>(state: SharedState, mut connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn QueueStore>, StorageError>> + Send,
{
    let mut backoff = CONNECT_BACKOFF_START;

    loop {
        match connect().await {
            Ok(store) => {
                info!("queue store connected");
                state.install_queue_store(store.clone()).await;
                backoff = CONNECT_BACKOFF_START;
                supervise(&state, store).await;
            }
            Err(err) => {
                warn!(
                    error = %err,
                    backoff_ms = backoff.as_millis() as u64,
                    "queue store connection failed"
                );
            }
        }
        sleep(backoff).await;
        backoff = (backoff * 2).min(CONNECT_BACKOFF_CAP);
    }
}

/// Poll an installed store's health until it cannot be recovered.
///
/// A failed health check gets [`RECONNECT_ATTEMPTS`] reconnect attempts;
/// when those are exhausted the store is uninstalled and this returns, so
/// the caller can rebuild the connection from scratch.
async fn supervise(state: &SharedState, store: Arc<dyn QueueStore>) {
    loop {
        sleep(HEALTH_INTERVAL).await;
        if let Err(err) = store.health_check().await {
            warn!(error = %err, "queue store health check failed");
            if !reconnect(store.as_ref()).await {
                state.clear_queue_store().await;
                warn!("queue store lost; engine degraded until a new connection succeeds");
                return;
            }
            info!("queue store reconnected");
        }
    }
}

/// Bounded reconnect attempts with exponential backoff.
async fn reconnect(store: &dyn QueueStore) -> bool {
    let mut backoff = RECONNECT_BACKOFF_START;
    for attempt in 1..=RECONNECT_ATTEMPTS {
        match store.try_reconnect().await {
            Ok(()) => return true,
            Err(err) => {
                warn!(attempt, error = %err, "queue store reconnect attempt failed");
                sleep(backoff).await;
                backoff = (backoff * 2).min(RECONNECT_BACKOFF_CAP);
            }
        }
    }
    false
}
