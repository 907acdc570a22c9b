//! Circuit breaker state machine guarding repeatedly failing operations.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Breaker phases.
///
/// Transitions:
/// - Closed -> Open after `failure_threshold` consecutive failures
/// - Open -> HalfOpen on the first status check after `recovery_timeout_ms`
/// - HalfOpen -> Closed after `half_open_max_attempts` consecutive successes
/// - HalfOpen -> Open on any failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    /// Calls flow normally.
    Closed,
    /// Calls short-circuit immediately.
    Open,
    /// A limited number of probe calls are allowed through.
    HalfOpen,
}

/// Tuning knobs for a single breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures that trip the breaker.
    pub failure_threshold: u32,
    /// How long the breaker stays open before probing.
    pub recovery_timeout_ms: u64,
    /// Consecutive half-open successes required to close again.
    pub half_open_max_attempts: u32,
    /// Number of recent outcomes kept for metrics.
    pub window_size: usize,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_ms: 30_000,
            half_open_max_attempts: 3,
            window_size: 50,
        }
    }
}

/// One recorded call outcome inside the sliding window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Outcome {
    success: bool,
    latency_ms: u64,
    at_ms: u64,
}

/// Aggregate view over a breaker's sliding window, for operational inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerMetrics {
    /// Current breaker phase.
    pub state: BreakerState,
    /// Calls recorded in the window.
    pub total_calls: u64,
    /// Successful calls in the window.
    pub successes: u64,
    /// Failed calls in the window.
    pub failures: u64,
    /// `failures / total_calls`, 0 when empty.
    pub failure_rate: f64,
    /// Mean latency over the window, milliseconds.
    pub average_latency_ms: f64,
    /// Epoch milliseconds of the most recent failure, if any.
    pub last_failure_ms: Option<u64>,
}

/// Process-local breaker for one operation key. Never persisted.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: BreakerState,
    consecutive_failures: u32,
    half_open_successes: u32,
    window: VecDeque<Outcome>,
    last_failure_ms: Option<u64>,
    opened_at_ms: Option<u64>,
}

impl CircuitBreaker {
    /// Create a closed breaker with the given tuning.
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: BreakerState::Closed,
            consecutive_failures: 0,
            half_open_successes: 0,
            window: VecDeque::new(),
            last_failure_ms: None,
            opened_at_ms: None,
        }
    }

    /// Current state, applying the Open -> HalfOpen timeout transition.
    pub fn status(&mut self, now_ms: u64) -> BreakerState {
        if self.state == BreakerState::Open
            && let Some(opened_at) = self.opened_at_ms
            && now_ms.saturating_sub(opened_at) >= self.config.recovery_timeout_ms
        {
            self.state = BreakerState::HalfOpen;
            self.half_open_successes = 0;
        }
        self.state
    }

    /// Whether a call may proceed right now.
    pub fn allow(&mut self, now_ms: u64) -> bool {
        self.status(now_ms) != BreakerState::Open
    }

    /// Record a successful call.
    pub fn record_success(&mut self, now_ms: u64, latency_ms: u64) {
        self.push_outcome(Outcome {
            success: true,
            latency_ms,
            at_ms: now_ms,
        });
        self.consecutive_failures = 0;

        if self.state == BreakerState::HalfOpen {
            self.half_open_successes += 1;
            if self.half_open_successes >= self.config.half_open_max_attempts {
                self.state = BreakerState::Closed;
                self.opened_at_ms = None;
                self.half_open_successes = 0;
            }
        }
    }

    /// Record a failed call, tripping the breaker when warranted.
    pub fn record_failure(&mut self, now_ms: u64, latency_ms: u64) {
        self.push_outcome(Outcome {
            success: false,
            latency_ms,
            at_ms: now_ms,
        });
        self.last_failure_ms = Some(now_ms);
        self.consecutive_failures += 1;

        match self.state {
            // Any failure while probing reopens immediately.
            BreakerState::HalfOpen => self.trip(now_ms),
            BreakerState::Closed => {
                if self.consecutive_failures >= self.config.failure_threshold {
                    self.trip(now_ms);
                }
            }
            BreakerState::Open => {}
        }
    }

    /// Aggregate metrics over the sliding window.
    pub fn metrics(&self) -> BreakerMetrics {
        let total = self.window.len() as u64;
        let failures = self.window.iter().filter(|o| !o.success).count() as u64;
        let latency_sum: u64 = self.window.iter().map(|o| o.latency_ms).sum();

        BreakerMetrics {
            state: self.state,
            total_calls: total,
            successes: total - failures,
            failures,
            failure_rate: if total == 0 {
                0.0
            } else {
                failures as f64 / total as f64
            },
            average_latency_ms: if total == 0 {
                0.0
            } else {
                latency_sum as f64 / total as f64
            },
            last_failure_ms: self.last_failure_ms,
        }
    }

    fn trip(&mut self, now_ms: u64) {
        self.state = BreakerState::Open;
        self.opened_at_ms = Some(now_ms);
        self.half_open_successes = 0;
        self.consecutive_failures = 0;
    }

    fn push_outcome(&mut self, outcome: Outcome) {
        self.window.push_back(outcome);
        while self.window.len() > self.config.window_size {
            self.window.pop_front();
        }
    }
}
