//! Retry-with-backoff executor.
//!
//! Every fallible engine call goes through `RetryExecutor::execute`: the
//! circuit breaker is consulted before each attempt, errors are classified
//! as transient or permanent by a caller-supplied function, and backoff
//! delays are cooperative waits on the caller's `CancelToken`.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::cancel::{CancelToken, Interrupt};
use super::circuit::CircuitBreaker;

/// Transient errors are retried; permanent errors abort immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Transient,
    Permanent,
}

/// How many times to try and how long to wait in between.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff_multiplier: f64,
    pub max_delay: Duration,
    /// Perturb each delay by up to ±10%.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(5),
            jitter: true,
        }
    }
}

/// Jitter amplitude as a fraction of the computed delay.
const JITTER_FRACTION: f64 = 0.10;

impl RetryPolicy {
    /// A policy that tries once and never waits.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    /// Deterministic delay after attempt `n` (0-indexed):
    /// `min(base_delay * multiplier^n, max_delay)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.max(0.0).powi(attempt as i32);
        let secs = self.base_delay.as_secs_f64() * factor;
        let capped = secs.min(self.max_delay.as_secs_f64());
        if capped.is_finite() && capped > 0.0 {
            Duration::from_secs_f64(capped)
        } else if capped.is_finite() {
            Duration::ZERO
        } else {
            self.max_delay
        }
    }

    /// Delay actually slept, with jitter applied when enabled.
    pub fn jittered_delay_for(&self, attempt: u32) -> Duration {
        let delay = self.delay_for(attempt);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(-JITTER_FRACTION..=JITTER_FRACTION);
        Duration::from_secs_f64((delay.as_secs_f64() * factor).max(0.0))
    }
}

/// Failure modes of `RetryExecutor::execute`.
#[derive(Debug, Error)]
pub enum RetryError<E: fmt::Display> {
    /// Breaker was open; the operation was not invoked on this attempt.
    #[error("circuit open for '{operation}' (retry after {retry_after:?}, {attempts} attempts made)")]
    CircuitOpen {
        operation: String,
        retry_after: Duration,
        attempts: u32,
    },

    #[error("'{operation}' failed permanently on attempt {attempt}: {last_error}")]
    Permanent {
        operation: String,
        attempt: u32,
        last_error: E,
    },

    #[error("'{operation}' failed after {attempts} attempts: {last_error}")]
    Exhausted {
        operation: String,
        attempts: u32,
        last_error: E,
    },

    #[error("'{operation}' interrupted after {attempts} attempts: {interrupt}")]
    Interrupted {
        operation: String,
        attempts: u32,
        interrupt: Interrupt,
        last_error: Option<E>,
    },
}

impl<E: fmt::Display> RetryError<E> {
    /// Number of times the operation was actually invoked.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::CircuitOpen { attempts, .. } => *attempts,
            Self::Permanent { attempt, .. } => *attempt,
            Self::Exhausted { attempts, .. } => *attempts,
            Self::Interrupted { attempts, .. } => *attempts,
        }
    }

    /// The last error returned by the operation, if it ran at all.
    pub fn last_error(&self) -> Option<&E> {
        match self {
            Self::CircuitOpen { .. } => None,
            Self::Permanent { last_error, .. } | Self::Exhausted { last_error, .. } => {
                Some(last_error)
            }
            Self::Interrupted { last_error, .. } => last_error.as_ref(),
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }
}

/// Executes operations under a retry policy and a shared circuit breaker.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    breaker: Arc<CircuitBreaker>,
}

impl RetryExecutor {
    pub fn new(breaker: Arc<CircuitBreaker>) -> Self {
        Self { breaker }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Run `op` until it succeeds, fails permanently, exhausts
    /// `policy.max_attempts`, hits an open circuit, or `cancel` fires.
    ///
    /// `op` receives the 0-indexed attempt number. `classify` decides
    /// whether an error is worth another attempt.
    pub async fn execute<T, E, F, Fut, C>(
        &self,
        operation: &str,
        policy: &RetryPolicy,
        mut op: F,
        classify: C,
        cancel: &CancelToken,
    ) -> Result<T, RetryError<E>>
    where
        E: fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> ErrorClass,
    {
        let max_attempts = policy.max_attempts.max(1);
        let mut attempts = 0u32;
        let mut last_error: Option<E> = None;

        while attempts < max_attempts {
            if let Some(interrupt) = cancel.interruption() {
                return Err(RetryError::Interrupted {
                    operation: operation.to_string(),
                    attempts,
                    interrupt,
                    last_error,
                });
            }

            if let Err(rejection) = self.breaker.try_acquire(operation) {
                tracing::warn!(
                    operation,
                    attempts,
                    retry_after_ms = rejection.retry_after.as_millis() as u64,
                    "Circuit open, short-circuiting call"
                );
                return Err(RetryError::CircuitOpen {
                    operation: operation.to_string(),
                    retry_after: rejection.retry_after,
                    attempts,
                });
            }

            let attempt = attempts;
            attempts += 1;

            let outcome = match cancel.run(op(attempt)).await {
                Ok(outcome) => outcome,
                Err(interrupt) => {
                    // The call never reported back; count it against the breaker.
                    self.breaker.record_failure(operation);
                    return Err(RetryError::Interrupted {
                        operation: operation.to_string(),
                        attempts,
                        interrupt,
                        last_error,
                    });
                }
            };

            match outcome {
                Ok(value) => {
                    self.breaker.record_success(operation);
                    if attempt > 0 {
                        tracing::info!(operation, attempts, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => {
                    self.breaker.record_failure(operation);
                    if classify(&e) == ErrorClass::Permanent {
                        tracing::warn!(operation, attempt = attempts, error = %e, "Permanent failure, not retrying");
                        return Err(RetryError::Permanent {
                            operation: operation.to_string(),
                            attempt: attempts,
                            last_error: e,
                        });
                    }

                    tracing::warn!(
                        operation,
                        attempt = attempts,
                        max_attempts,
                        error = %e,
                        "Transient failure"
                    );
                    last_error = Some(e);

                    if attempts < max_attempts {
                        let delay = policy.jittered_delay_for(attempt);
                        if let Err(interrupt) = cancel.sleep(delay).await {
                            return Err(RetryError::Interrupted {
                                operation: operation.to_string(),
                                attempts,
                                interrupt,
                                last_error,
                            });
                        }
                    }
                }
            }
        }

        match last_error {
            Some(last_error) => Err(RetryError::Exhausted {
                operation: operation.to_string(),
                attempts,
                last_error,
            }),
            // Unreachable in practice: the loop runs at least once and every
            // path that leaves it without an error returns early.
            None => Err(RetryError::Interrupted {
                operation: operation.to_string(),
                attempts,
                interrupt: Interrupt::Cancelled,
                last_error: None,
            }),
        }
    }
}
