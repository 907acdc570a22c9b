//! Application-level configuration loading for the queue engine.

use std::{env, fs, io::ErrorKind, path::PathBuf};

use serde::Deserialize;
use tracing::{info, warn};

use crate::state::{backoff::RetryPolicy, circuit::BreakerConfig, queue::QueueConfig};

/// Default location on disk where the engine looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "COGFORGE_BACK_CONFIG_PATH";

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the engine.
pub struct AppConfig {
    /// Per-player queue limits and behavior switches.
    pub queue: QueueConfig,
    /// Retry policies keyed by concern.
    pub retry: RetryConfig,
    /// Circuit breaker tuning shared by all operation breakers.
    pub breaker: BreakerConfig,
    /// Command rate limiting windows.
    pub rate_limits: RateLimitConfig,
    /// Snapshot retention and cadence.
    pub snapshots: SnapshotConfig,
    /// Pipeline scheduling.
    pub scheduler: SchedulerConfig,
    /// Reward computation constants.
    pub rewards: RewardConfig,
}

/// Retry policies for the three retryable concerns.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Queue state reads and mutations.
    pub queue_operations: RetryPolicy,
    /// Task execution inside the pipeline.
    pub task_processing: RetryPolicy,
    /// Writes to the backing store.
    pub persistence: RetryPolicy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            queue_operations: RetryPolicy::queue_operations(),
            task_processing: RetryPolicy::task_processing(),
            persistence: RetryPolicy::persistence(),
        }
    }
}

/// Fixed-window command rate limits.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Window length in milliseconds.
    pub window_ms: u64,
    /// Commands allowed per window across all command kinds.
    pub general_per_window: u32,
    /// Task additions allowed per window.
    pub add_task_per_window: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_ms: 60_000,
            general_per_window: 30,
            add_task_per_window: 10,
        }
    }
}

/// Snapshot retention and periodic cadence.
#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotConfig {
    /// Snapshots kept per player before pruning oldest first.
    pub max_per_player: usize,
    /// Scheduler ticks between automatic periodic snapshots.
    pub periodic_every_ticks: u64,
    /// Time-to-live applied to periodic snapshots, if any.
    pub ttl_ms: Option<u64>,
    /// Snapshot the previous persisted state before each command write.
    pub before_command_updates: bool,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            max_per_player: 10,
            periodic_every_ticks: 20,
            ttl_ms: Some(7 * 24 * 60 * 60 * 1_000),
            before_command_updates: true,
        }
    }
}

/// Pipeline scheduler settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Interval between processing ticks in milliseconds.
    pub tick_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1_000,
        }
    }
}

/// Constants used when computing task rewards.
#[derive(Debug, Clone, Deserialize)]
pub struct RewardConfig {
    /// Experience multiplier added per skill level on harvesting tasks.
    pub skill_bonus_per_level: f64,
    /// Chance of an exotic bonus drop on harvesting tasks.
    pub exotic_drop_chance: f64,
    /// Chance of bonus loot on combat tasks.
    pub combat_loot_chance: f64,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            skill_bonus_per_level: 0.02,
            exotic_drop_chance: 0.05,
            combat_loot_chance: 0.30,
        }
    }
}

impl AppConfig {
    /// Load the engine configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(path = %path.display(), "loaded engine configuration");
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            retry: RetryConfig::default(),
            breaker: BreakerConfig::default(),
            rate_limits: RateLimitConfig::default(),
            snapshots: SnapshotConfig::default(),
            scheduler: SchedulerConfig::default(),
            rewards: RewardConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    #[serde(default)]
    queue: Option<QueueConfig>,
    #[serde(default)]
    retry: Option<RawRetryConfig>,
    #[serde(default)]
    breaker: Option<BreakerConfig>,
    #[serde(default)]
    rate_limits: Option<RateLimitConfig>,
    #[serde(default)]
    snapshots: Option<SnapshotConfig>,
    #[serde(default)]
    scheduler: Option<SchedulerConfig>,
    #[serde(default)]
    rewards: Option<RewardConfig>,
}

#[derive(Debug, Deserialize)]
/// JSON overrides for the retry policies; unset entries keep their preset.
struct RawRetryConfig {
    #[serde(default)]
    queue_operations: Option<RetryPolicy>,
    #[serde(default)]
    task_processing: Option<RetryPolicy>,
    #[serde(default)]
    persistence: Option<RetryPolicy>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let defaults = RetryConfig::default();
        let retry = match value.retry {
            Some(raw) => RetryConfig {
                queue_operations: raw.queue_operations.unwrap_or(defaults.queue_operations),
                task_processing: raw.task_processing.unwrap_or(defaults.task_processing),
                persistence: raw.persistence.unwrap_or(defaults.persistence),
            },
            None => defaults,
        };

        Self {
            queue: value.queue.unwrap_or_default(),
            retry,
            breaker: value.breaker.unwrap_or_default(),
            rate_limits: value.rate_limits.unwrap_or_default(),
            snapshots: value.snapshots.unwrap_or_default(),
            scheduler: value.scheduler.unwrap_or_default(),
            rewards: value.rewards.unwrap_or_default(),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
