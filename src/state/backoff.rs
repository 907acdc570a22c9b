//! Exponential backoff policies with jitter and retryable-error matching.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Maximum jitter applied on top of a computed delay, as a fraction.
const JITTER_FRACTION: f64 = 0.25;

/// Retry tuning for one class of operations.
///
/// The delay for attempt `n` (1-indexed) is
/// `min(max_delay_ms, base_delay_ms * multiplier^(n - 1))`, optionally spread
/// by up to ±25% jitter to avoid thundering herds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Number of retries after the initial attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay_ms: u64,
    /// Exponential growth factor.
    pub multiplier: f64,
    /// Upper bound on any single delay.
    pub max_delay_ms: u64,
    /// Whether to apply ±25% jitter.
    pub jitter: bool,
    /// Lowercase fragments matched against error text; only matching errors
    /// are retried.
    pub retryable_errors: Vec<String>,
}

impl RetryPolicy {
    /// Policy for generic queue operations.
    pub fn queue_operations() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 500,
            multiplier: 2.0,
            max_delay_ms: 30_000,
            jitter: true,
            retryable_errors: vec![
                "network".into(),
                "timeout".into(),
                "timed out".into(),
                "unavailable".into(),
                "version conflict".into(),
                "throttl".into(),
            ],
        }
    }

    /// Policy for task processing work.
    pub fn task_processing() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 2_000,
            multiplier: 3.0,
            max_delay_ms: 60_000,
            jitter: true,
            retryable_errors: vec![
                "timeout".into(),
                "timed out".into(),
                "task execution".into(),
                "unavailable".into(),
            ],
        }
    }

    /// Policy for persistence operations.
    pub fn persistence() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 1_000,
            multiplier: 2.0,
            max_delay_ms: 30_000,
            jitter: true,
            retryable_errors: vec![
                "network".into(),
                "timeout".into(),
                "timed out".into(),
                "unavailable".into(),
                "version conflict".into(),
                "throttl".into(),
                "connection".into(),
            ],
        }
    }

    /// Pre-jitter delay for a 1-indexed attempt number.
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        let exponent = attempt.saturating_sub(1).min(63);
        let raw = self.base_delay_ms as f64 * self.multiplier.powi(exponent as i32);
        if raw >= self.max_delay_ms as f64 {
            self.max_delay_ms
        } else {
            raw as u64
        }
    }

    /// Delay for an attempt with jitter applied when enabled.
    pub fn jittered_delay_for_attempt(&self, attempt: u32) -> u64 {
        let base = self.delay_for_attempt(attempt);
        if !self.jitter || base == 0 {
            return base;
        }

        let spread = (base as f64 * JITTER_FRACTION) as i64;
        if spread == 0 {
            return base;
        }
        let offset = rand::rng().random_range(-spread..=spread);
        base.saturating_add_signed(offset)
    }

    /// Whether an error message matches the retryable allow-list.
    pub fn is_retryable(&self, error_text: &str) -> bool {
        let lowered = error_text.to_lowercase();
        self.retryable_errors
            .iter()
            .any(|fragment| lowered.contains(fragment.as_str()))
    }
}
