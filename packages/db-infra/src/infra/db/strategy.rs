//! Bounded retry with exponential backoff around a fault-prone operation.

use std::future::Future;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{info, trace, warn};

use crate::config::db::RetrySettings;
use crate::error::MigrationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Add up to 25% random jitter so peers restarting together spread out.
    pub jitter: bool,
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, given that `attempt` just failed.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        let base = self
            .base_delay
            .checked_mul(1u32 << shift)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);

        if !self.jitter || base.is_zero() {
            return base;
        }
        let jitter_ceiling_ms = u64::try_from(base.as_millis() / 4).unwrap_or(u64::MAX);
        if jitter_ceiling_ms == 0 {
            return base;
        }
        base + Duration::from_millis(rand::rng().random_range(0..=jitter_ceiling_ms))
    }
}

impl From<RetrySettings> for RetryPolicy {
    fn from(settings: RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay: settings.base_delay,
            max_delay: settings.max_delay.max(settings.base_delay),
            jitter: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Transient,
    Fatal,
}

/// One try of a guarded operation. Handed to the observer, never stored.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionAttempt {
    pub index: u32,
    pub elapsed: Duration,
    pub outcome: AttemptOutcome,
}

/// Runs an operation, retrying transient failures within a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct ExecutionStrategy {
    operation: &'static str,
    policy: RetryPolicy,
}

impl ExecutionStrategy {
    pub fn new(operation: &'static str, policy: RetryPolicy) -> Self {
        Self { operation, policy }
    }

    pub async fn run<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        operation: F,
    ) -> Result<T, MigrationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, MigrationError>>,
    {
        self.run_observed(cancel, operation, |_| {}).await
    }

    /// Like [`run`](Self::run), reporting every attempt to `observe`.
    ///
    /// `operation` is called once per attempt and must build its resources
    /// (connections, transactions) from scratch each time.
    pub async fn run_observed<T, F, Fut, O>(
        &self,
        cancel: &CancellationToken,
        mut operation: F,
        mut observe: O,
    ) -> Result<T, MigrationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, MigrationError>>,
        O: FnMut(&ExecutionAttempt),
    {
        let max_attempts = self.policy.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                info!(op = self.operation, attempt, "retry=cancelled before attempt");
                return Err(MigrationError::Cancelled);
            }

            let started = Instant::now();
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(
                        op = self.operation,
                        attempt,
                        elapsed_ms = started.elapsed().as_millis(),
                        "retry=cancelled during attempt"
                    );
                    return Err(MigrationError::Cancelled);
                }
                result = operation() => result,
            };

            let outcome = match &result {
                Ok(_) => AttemptOutcome::Success,
                Err(e) if e.is_transient() => AttemptOutcome::Transient,
                Err(_) => AttemptOutcome::Fatal,
            };
            let record = ExecutionAttempt {
                index: attempt,
                elapsed: started.elapsed(),
                outcome,
            };
            observe(&record);
            trace!(
                op = self.operation,
                attempt = record.index,
                elapsed_ms = record.elapsed.as_millis(),
                outcome = ?record.outcome,
                "retry=attempt"
            );

            let err = match result {
                Ok(value) => {
                    if attempt > 1 {
                        info!(op = self.operation, attempts = attempt, "retry=success");
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => e,
            };

            if attempt == max_attempts {
                warn!(
                    op = self.operation,
                    attempts = attempt,
                    error = %err,
                    "retry=exhausted"
                );
                return Err(MigrationError::RetryExhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            let delay = self.policy.delay_for(attempt);
            warn!(
                op = self.operation,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis(),
                error = %err,
                "retry=failed"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(op = self.operation, attempt, "retry=cancelled during backoff");
                    return Err(MigrationError::Cancelled);
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        // The loop always returns; max_attempts is at least one.
        Err(MigrationError::config(format!(
            "{} finished without an attempt outcome",
            self.operation
        )))
    }
}
