//! Shared engine state and the domain primitives it coordinates.

pub mod backoff;
pub mod circuit;
pub mod clock;
pub mod integrity;
pub mod queue;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, watch};

use crate::{
    config::AppConfig,
    dao::queue_store::QueueStore,
    state::{
        circuit::{BreakerMetrics, CircuitBreaker},
        clock::{SharedClock, SystemClock},
    },
};

/// Cheaply clonable handle to the engine state.
pub type SharedState = Arc<EngineState>;

/// Fixed-window counter used for command rate limiting.
#[derive(Debug, Clone, Copy)]
pub struct RateWindow {
    /// Epoch milliseconds at which the window opened.
    pub window_start_ms: u64,
    /// Commands of any kind counted in the window.
    pub general: u32,
    /// Task additions counted in the window.
    pub add_task: u32,
}

/// Central engine state storing the storage handle, per-player guards, and
/// shared circuit breakers.
pub struct EngineState {
    queue_store: RwLock<Option<Arc<dyn QueueStore>>>,
    degraded: watch::Sender<bool>,
    /// Players with a tick currently in flight; entries guard against
    /// overlapping processing runs for the same player.
    tick_guards: DashMap<String, ()>,
    active_players: DashMap<String, ()>,
    breakers: DashMap<String, CircuitBreaker>,
    rate_windows: DashMap<String, RateWindow>,
    clock: SharedClock,
    config: AppConfig,
}

impl EngineState {
    /// Construct a new [`EngineState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The engine starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig) -> SharedState {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Construct an engine state driven by the given clock.
    pub fn with_clock(config: AppConfig, clock: SharedClock) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            queue_store: RwLock::new(None),
            degraded: degraded_tx,
            tick_guards: DashMap::new(),
            active_players: DashMap::new(),
            breakers: DashMap::new(),
            rate_windows: DashMap::new(),
            clock,
            config,
        })
    }

    /// Obtain a handle to the current queue store, if one is installed.
    pub async fn queue_store(&self) -> Option<Arc<dyn QueueStore>> {
        let guard = self.queue_store.read().await;
        guard.as_ref().cloned()
    }

    /// Install a new queue store implementation and leave degraded mode.
    pub async fn install_queue_store(&self, store: Arc<dyn QueueStore>) {
        {
            let mut guard = self.queue_store.write().await;
            *guard = Some(store);
        }
        self.set_degraded(false);
    }

    /// Remove the current queue store and enter degraded mode.
    pub async fn clear_queue_store(&self) {
        {
            let mut guard = self.queue_store.write().await;
            guard.take();
        }
        self.set_degraded(true);
    }

    /// Broadcast the degraded flag when it changes.
    ///
    /// Only [`install_queue_store`](Self::install_queue_store) and
    /// [`clear_queue_store`](Self::clear_queue_store) call this, so the watch
    /// channel always agrees with the store slot.
    fn set_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }

    /// Current degraded flag.
    pub async fn is_degraded(&self) -> bool {
        let guard = self.queue_store.read().await;
        guard.is_none()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Engine configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Clock driving all engine timestamps.
    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Current time in epoch milliseconds.
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Try to acquire the processing guard for a player.
    ///
    /// Returns `None` when a tick for this player is already in flight.
    pub fn try_acquire_tick_guard(self: &Arc<Self>, player_id: &str) -> Option<TickGuard> {
        use dashmap::mapref::entry::Entry;

        match self.tick_guards.entry(player_id.to_owned()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(());
                Some(TickGuard {
                    state: Arc::clone(self),
                    player_id: player_id.to_owned(),
                })
            }
        }
    }

    /// Mark a player as active so the scheduler ticks their queue.
    pub fn register_active_player(&self, player_id: &str) {
        self.active_players.insert(player_id.to_owned(), ());
    }

    /// Remove a player from the scheduler's active set.
    pub fn unregister_active_player(&self, player_id: &str) {
        self.active_players.remove(player_id);
    }

    /// Players currently in the scheduler's active set.
    pub fn active_players(&self) -> Vec<String> {
        self.active_players
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Run `f` against the named circuit breaker, creating it on first use.
    pub fn with_breaker<T>(&self, name: &str, f: impl FnOnce(&mut CircuitBreaker) -> T) -> T {
        let mut entry = self
            .breakers
            .entry(name.to_owned())
            .or_insert_with(|| CircuitBreaker::new(self.config.breaker.clone()));
        f(entry.value_mut())
    }

    /// Metrics snapshot for every breaker that has been exercised.
    pub fn breaker_metrics(&self) -> Vec<(String, BreakerMetrics)> {
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().metrics()))
            .collect()
    }

    /// Count a command against the player's rate windows.
    ///
    /// Returns the limit that was exceeded, if any. Windows are fixed-length
    /// and reset wholesale when the current one expires.
    pub fn check_rate_limit(&self, player_id: &str, is_add_task: bool) -> Option<String> {
        let limits = &self.config.rate_limits;
        let now_ms = self.now_ms();

        let mut window = self
            .rate_windows
            .entry(player_id.to_owned())
            .or_insert(RateWindow {
                window_start_ms: now_ms,
                general: 0,
                add_task: 0,
            });

        if now_ms.saturating_sub(window.window_start_ms) >= limits.window_ms {
            window.window_start_ms = now_ms;
            window.general = 0;
            window.add_task = 0;
        }

        if window.general >= limits.general_per_window {
            return Some(format!(
                "at most {} commands per {}ms",
                limits.general_per_window, limits.window_ms
            ));
        }
        if is_add_task && window.add_task >= limits.add_task_per_window {
            return Some(format!(
                "at most {} task additions per {}ms",
                limits.add_task_per_window, limits.window_ms
            ));
        }

        window.general += 1;
        if is_add_task {
            window.add_task += 1;
        }
        None
    }

}

/// RAII guard marking a player's tick as in flight.
pub struct TickGuard {
    state: SharedState,
    player_id: String,
}

impl Drop for TickGuard {
    fn drop(&mut self) {
        self.state.tick_guards.remove(&self.player_id);
    }
}
