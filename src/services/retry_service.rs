//! Retry orchestration combining backoff policies with per-operation circuit
//! breakers.

use std::{future::Future, time::Duration};

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::{
    dto::status::{BreakerStatus, EngineStatus},
    error::ServiceError,
    state::SharedState,
    state::backoff::RetryPolicy,
};

/// Run `op` under the named breaker, retrying per `policy`.
///
/// The breaker is consulted before every attempt; an open breaker
/// short-circuits without invoking `op`. Only errors matching the policy's
/// retryable allow-list are retried, and each retry waits the policy's
/// jittered exponential delay. Attempt numbering starts at 1 for the first
/// retry, so a policy with `max_retries = 3` allows up to 4 invocations.
pub async fn execute_with_retry<T, F, Fut>(
    state: &SharedState,
    operation: &str,
    policy: &RetryPolicy,
    mut op: F,
) -> Result<T, ServiceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    let mut retries: u32 = 0;

    loop {
        let started_ms = state.now_ms();
        if !state.with_breaker(operation, |breaker| breaker.allow(started_ms)) {
            return Err(ServiceError::CircuitOpen(operation.to_owned()));
        }

        match op().await {
            Ok(value) => {
                let finished_ms = state.now_ms();
                state.with_breaker(operation, |breaker| {
                    breaker.record_success(finished_ms, finished_ms.saturating_sub(started_ms));
                });
                return Ok(value);
            }
            Err(err) => {
                let finished_ms = state.now_ms();
                state.with_breaker(operation, |breaker| {
                    breaker.record_failure(finished_ms, finished_ms.saturating_sub(started_ms));
                });

                if !policy.is_retryable(&err.to_string()) {
                    return Err(err);
                }
                if retries >= policy.max_retries {
                    warn!(
                        operation,
                        attempts = retries + 1,
                        error = %err,
                        "retry budget exhausted"
                    );
                    return Err(ServiceError::RetriesExhausted {
                        operation: operation.to_owned(),
                        attempts: retries + 1,
                        source: Box::new(err),
                    });
                }

                retries += 1;
                let delay_ms = policy.jittered_delay_for_attempt(retries);
                debug!(operation, retry = retries, delay_ms, error = %err, "retrying operation");
                sleep(Duration::from_millis(delay_ms)).await;
            }
        }
    }
}

/// Operational snapshot of the engine: degraded flag plus the metrics of
/// every breaker touched so far.
pub async fn engine_status(state: &SharedState) -> EngineStatus {
    let breakers = state
        .breaker_metrics()
        .into_iter()
        .map(|(operation, metrics)| BreakerStatus { operation, metrics })
        .collect();

    EngineStatus {
        degraded: state.is_degraded().await,
        breakers,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };

    use super::*;
    use crate::{
        config::AppConfig,
        state::{EngineState, clock::ManualClock},
    };

    fn test_state() -> SharedState {
        EngineState::with_clock(AppConfig::default(), Arc::new(ManualClock::starting_at(0)))
    }

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay_ms: 1,
            multiplier: 1.0,
            max_delay_ms: 1,
            jitter: false,
            retryable_errors: vec!["transient".into()],
        }
    }

    #[tokio::test]
    async fn returns_first_success_without_retrying() {
        let state = test_state();
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let result = execute_with_retry(&state, "test.success", &fast_policy(3), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ServiceError>(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_transient_failures_until_success() {
        let state = test_state();
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let result = execute_with_retry(&state, "test.flaky", &fast_policy(3), move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ServiceError::TaskExecution("transient glitch".into()))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_surface_immediately() {
        let state = test_state();
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let result: Result<(), _> =
            execute_with_retry(&state, "test.permanent", &fast_policy(3), move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(ServiceError::InvalidInput("bad payload".into()))
                }
            })
            .await;

        assert!(matches!(result, Err(ServiceError::InvalidInput(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_wrap_the_final_error() {
        let state = test_state();

        let result: Result<(), _> =
            execute_with_retry(&state, "test.down", &fast_policy(2), || async {
                Err(ServiceError::TaskExecution("transient glitch".into()))
            })
            .await;

        match result {
            Err(ServiceError::RetriesExhausted { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn open_breaker_short_circuits() {
        let state = test_state();
        let threshold = state.config().breaker.failure_threshold;

        // Trip the breaker directly.
        let now = state.now_ms();
        state.with_breaker("test.tripped", |breaker| {
            for _ in 0..threshold {
                breaker.record_failure(now, 1);
            }
        });

        let result: Result<(), _> =
            execute_with_retry(&state, "test.tripped", &fast_policy(3), || async {
                panic!("operation must not run while the breaker is open")
            })
            .await;

        assert!(matches!(result, Err(ServiceError::CircuitOpen(_))));
    }

    #[tokio::test]
    async fn engine_status_reports_touched_breakers() {
        let state = test_state();

        let _: Result<(), _> =
            execute_with_retry(&state, "test.observed", &fast_policy(0), || async {
                Err(ServiceError::InvalidInput("nope".into()))
            })
            .await;

        let status = engine_status(&state).await;
        assert!(status.degraded);
        let breaker = status
            .breakers
            .iter()
            .find(|breaker| breaker.operation == "test.observed")
            .expect("breaker recorded");
        assert_eq!(breaker.metrics.failures, 1);
    }
}
