//! Cogforge Back binary entrypoint wiring config, storage, and the scheduler.

use std::{env, sync::Arc};

use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cogforge_back::{
    config::AppConfig,
    dao::queue_store::memory::MemoryQueueStore,
    services::{scheduler, storage_supervisor},
    state::EngineState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let state = EngineState::new(config);

    spawn_store_supervisor(state.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_handle = tokio::spawn(scheduler::run(state.clone(), shutdown_rx));

    shutdown_signal().await;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    scheduler_handle.await?;

    Ok(())
}

/// Install the configured storage backend in the background.
///
/// `QUEUE_STORE=memory` selects the in-process store (also the fallback when
/// the crate is built without the `mongo-store` feature); otherwise the
/// supervisor keeps a MongoDB connection alive from `MONGO_URI` / `MONGO_DB`.
fn spawn_store_supervisor(state: cogforge_back::state::SharedState) {
    let backend = env::var("QUEUE_STORE").unwrap_or_else(|_| "mongo".into());

    #[cfg(feature = "mongo-store")]
    if backend != "memory" {
        let uri = env::var("MONGO_URI").unwrap_or_else(|_| "mongodb://localhost:27017".into());
        let db_name = env::var("MONGO_DB").ok();

        tokio::spawn(storage_supervisor::run(state, move || {
            let uri = uri.clone();
            let db_name = db_name.clone();
            async move {
                let config = cogforge_back::dao::queue_store::mongodb::MongoConfig::from_uri(
                    &uri,
                    db_name.as_deref(),
                )
                .await
                .map_err(cogforge_back::dao::storage::StorageError::from)?;
                let store =
                    cogforge_back::dao::queue_store::mongodb::MongoQueueStore::connect(config)
                        .await
                        .map_err(cogforge_back::dao::storage::StorageError::from)?;
                Ok(Arc::new(store) as Arc<dyn cogforge_back::dao::queue_store::QueueStore>)
            }
        }));
        return;
    }

    let _ = backend;
    info!("using in-memory queue store");
    tokio::spawn(storage_supervisor::run(state, || async {
        Ok(Arc::new(MemoryQueueStore::new())
            as Arc<dyn cogforge_back::dao::queue_store::QueueStore>)
    }));
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
