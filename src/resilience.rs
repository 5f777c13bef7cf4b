/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/resilience.rs
*
* This file implements the guard placed around calls to external subsystems:
* a circuit breaker combined with a bounded, fixed-delay retry loop.
*
* Architecture:
* - Circuit state is kept per operation name in a single map behind a
*   `tokio::sync::Mutex`. The lock is taken for the admission check and for
*   each success/failure record, never across the guarded call itself, so a
*   slow call does not stall other tasks using the same breaker.
* - The breaker is consulted once per `execute`. Each failed attempt is
*   recorded immediately, so the breaker can trip in the middle of a retry
*   loop; the loop still runs to completion and a late success closes the
*   breaker again.
* - An open breaker lets a single trial call through once the open timeout
*   has passed since the last failure (half-open). Other callers are rejected
*   while that trial is in flight. The trial does not close the breaker by
*   itself; only a success does. A trial that never reports back stops
*   blocking others after another open timeout.
* - An optional per-attempt deadline cancels the in-flight future through
*   `tokio::time::timeout`. A missed deadline counts as a failure.
* - All waiting uses tokio timers, so retry delays only suspend the task that
*   owns them and tests can drive them with a paused clock.
*
* SPDX-License-Identifier: Apache-2.0
*/

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Tunables for one guarded operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResiliencePolicy {
    /// Total number of attempts, the first one included.
    pub max_attempts: u32,
    /// Pause between two attempts.
    pub retry_delay: Duration,
    /// Consecutive failures that open the breaker.
    pub failure_threshold: u32,
    /// How long an open breaker rejects calls after the last failure.
    pub open_timeout: Duration,
    /// Deadline for a single attempt. `None` waits indefinitely.
    pub attempt_timeout: Option<Duration>,
}

impl Default for ResiliencePolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_secs(2),
            failure_threshold: 5,
            open_timeout: Duration::from_secs(30),
            attempt_timeout: Some(Duration::from_secs(5)),
        }
    }
}

#[derive(Debug, Error)]
pub enum ResilienceError<E> {
    /// The breaker is open. The operation was not invoked.
    #[error("circuit breaker is open for {operation} after {failures} consecutive failures")]
    CircuitOpen { operation: String, failures: u32 },

    /// Every attempt failed and the last one hit its deadline.
    #[error("{operation} timed out after {timeout:?} (attempt {attempts})")]
    TimedOut {
        operation: String,
        attempts: u32,
        timeout: Duration,
    },

    /// Every attempt failed; carries the last error.
    #[error("{operation} failed after {attempts} attempts: {source}")]
    Failed {
        operation: String,
        attempts: u32,
        #[source]
        source: E,
    },
}

impl<E> ResilienceError<E> {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, ResilienceError::CircuitOpen { .. })
    }
}

/// Point-in-time view of one breaker, for logs, metrics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CircuitStatus {
    pub consecutive_failures: u32,
    pub open: bool,
    /// A trial call admitted after the open timeout has not reported back yet.
    pub half_open: bool,
}

#[derive(Debug, Default)]
struct CircuitState {
    failures: u32,
    last_failure: Option<Instant>,
    open: bool,
    trial_started: Option<Instant>,
}

impl CircuitState {
    fn trial_in_flight(&self, open_timeout: Duration) -> bool {
        self.trial_started.is_some_and(|at| at.elapsed() <= open_timeout)
    }
}

enum AttemptError<E> {
    Failed(E),
    TimedOut(Duration),
}

/// Circuit breakers and retry loops for named operations. Share one instance
/// across every task that calls the same dependency.
#[derive(Debug, Default)]
pub struct ResilienceController {
    circuits: Mutex<HashMap<String, CircuitState>>,
}

impl ResilienceController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `call` under the breaker for `operation`, retrying per `policy`.
    pub async fn execute<T, E, F, Fut>(
        &self,
        operation: &str,
        policy: &ResiliencePolicy,
        mut call: F,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.admit(operation, policy).await?;

        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let outcome = match policy.attempt_timeout {
                Some(deadline) => match tokio::time::timeout(deadline, call()).await {
                    Ok(result) => result.map_err(AttemptError::Failed),
                    Err(_) => Err(AttemptError::TimedOut(deadline)),
                },
                None => call().await.map_err(AttemptError::Failed),
            };

            match outcome {
                Ok(value) => {
                    self.record_success(operation).await;
                    if attempt > 1 {
                        info!(operation = %operation, attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    self.record_failure(operation, policy).await;
                    match &err {
                        AttemptError::Failed(e) => warn!(
                            operation = %operation,
                            attempt,
                            max_attempts,
                            error = %e,
                            "Attempt failed"
                        ),
                        AttemptError::TimedOut(deadline) => warn!(
                            operation = %operation,
                            attempt,
                            max_attempts,
                            timeout_ms = deadline.as_millis() as u64,
                            "Attempt timed out"
                        ),
                    }

                    if attempt >= max_attempts {
                        error!(operation = %operation, attempts = attempt, "Operation failed, retries exhausted");
                        return Err(match err {
                            AttemptError::Failed(source) => ResilienceError::Failed {
                                operation: operation.to_string(),
                                attempts: attempt,
                                source,
                            },
                            AttemptError::TimedOut(timeout) => ResilienceError::TimedOut {
                                operation: operation.to_string(),
                                attempts: attempt,
                                timeout,
                            },
                        });
                    }
                }
            }

            tokio::time::sleep(policy.retry_delay).await;
            attempt += 1;
        }
    }

    /// Current state of the breaker for `operation`. Unknown operations read
    /// as closed with no failures.
    pub async fn status(&self, operation: &str) -> CircuitStatus {
        let circuits = self.circuits.lock().await;
        circuits
            .get(operation)
            .map(|state| CircuitStatus {
                consecutive_failures: state.failures,
                open: state.open,
                half_open: state.trial_started.is_some(),
            })
            .unwrap_or_default()
    }

    async fn admit<E>(&self, operation: &str, policy: &ResiliencePolicy) -> Result<(), ResilienceError<E>> {
        let mut circuits = self.circuits.lock().await;
        let Some(state) = circuits.get_mut(operation) else {
            return Ok(());
        };
        if !state.open {
            return Ok(());
        }

        let cooled_down = state
            .last_failure
            .map_or(true, |at| at.elapsed() > policy.open_timeout);
        if cooled_down && !state.trial_in_flight(policy.open_timeout) {
            state.trial_started = Some(Instant::now());
            info!(operation = %operation, failures = state.failures, "Circuit breaker open timeout elapsed, allowing one trial call");
            return Ok(());
        }

        debug!(operation = %operation, failures = state.failures, "Circuit breaker open, rejecting call");
        Err(ResilienceError::CircuitOpen {
            operation: operation.to_string(),
            failures: state.failures,
        })
    }

    async fn record_success(&self, operation: &str) {
        let mut circuits = self.circuits.lock().await;
        let state = circuits.entry(operation.to_string()).or_default();
        if state.open {
            info!(
                alert_type = "circuit_breaker_closed",
                operation = %operation,
                "RECOVERY: circuit breaker closed"
            );
        }
        state.failures = 0;
        state.last_failure = None;
        state.open = false;
        state.trial_started = None;
    }

    async fn record_failure(&self, operation: &str, policy: &ResiliencePolicy) {
        let mut circuits = self.circuits.lock().await;
        let state = circuits.entry(operation.to_string()).or_default();
        state.failures = state.failures.saturating_add(1);
        state.last_failure = Some(Instant::now());
        state.trial_started = None;

        if !state.open && state.failures >= policy.failure_threshold {
            state.open = true;
            error!(
                alert_type = "circuit_breaker_opened",
                operation = %operation,
                failures = state.failures,
                threshold = policy.failure_threshold,
                "ALERT: circuit breaker opened"
            );
        }
    }
}
