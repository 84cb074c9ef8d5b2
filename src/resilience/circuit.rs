//! Per-operation circuit breaker.
//!
//! State per operation name: `closed` → (`failure_count >= threshold`) →
//! `open` → (reopen duration elapsed) → `half_open` (one trial) →
//! `closed` on trial success, back to `open` on trial failure.
//!
//! The registry is shared by every document worker; each operation name has
//! independent state behind a single `Mutex` that is never held across an
//! `.await`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Breaker state for one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Breaker tuning shared by every operation in a registry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Failures that flip a closed breaker to open.
    pub failure_threshold: u32,
    /// How long an open breaker rejects calls before allowing a trial.
    pub reopen_after: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reopen_after: Duration::from_secs(30),
        }
    }
}

/// Snapshot of one operation's breaker, safe to hand out.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerState {
    pub operation_name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub reopen_after_duration: Duration,
}

/// Returned when a call is short-circuited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitRejection {
    /// Time until the breaker will admit a trial. Zero while a half-open
    /// trial is already in flight.
    pub retry_after: Duration,
}

#[derive(Debug)]
struct Entry {
    state: CircuitState,
    failure_count: u32,
    last_failure_at: Option<DateTime<Utc>>,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

impl Entry {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_at: None,
            opened_at: None,
            trial_in_flight: false,
        }
    }

    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.last_failure_at = Some(Utc::now());
        self.trial_in_flight = false;
    }
}

/// Registry of breakers keyed by operation name.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    entries: Mutex<HashMap<String, Entry>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> CircuitBreakerConfig {
        self.config
    }

    fn with_entry<R>(&self, operation: &str, f: impl FnOnce(&mut Entry) -> R) -> R {
        // A poisoned lock only means another worker panicked mid-update;
        // the counters are still usable.
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let entry = entries
            .entry(operation.to_string())
            .or_insert_with(Entry::new);
        f(entry)
    }

    /// Ask permission to make one call.
    ///
    /// An open breaker whose reopen duration has elapsed moves to half-open
    /// and admits exactly one trial; concurrent callers are rejected until
    /// that trial reports back.
    pub fn try_acquire(&self, operation: &str) -> Result<(), CircuitRejection> {
        let reopen_after = self.config.reopen_after;
        self.with_entry(operation, |entry| match entry.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let elapsed = entry
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or(reopen_after);
                if elapsed >= reopen_after {
                    entry.state = CircuitState::HalfOpen;
                    entry.trial_in_flight = true;
                    tracing::info!(operation, "Circuit half-open, admitting trial call");
                    Ok(())
                } else {
                    Err(CircuitRejection {
                        retry_after: reopen_after - elapsed,
                    })
                }
            }
            CircuitState::HalfOpen => {
                if entry.trial_in_flight {
                    Err(CircuitRejection {
                        retry_after: Duration::ZERO,
                    })
                } else {
                    entry.trial_in_flight = true;
                    Ok(())
                }
            }
        })
    }

    /// Report a successful call. Closes a half-open breaker; no-op otherwise.
    pub fn record_success(&self, operation: &str) {
        self.with_entry(operation, |entry| {
            if entry.state == CircuitState::HalfOpen {
                entry.state = CircuitState::Closed;
                entry.failure_count = 0;
                entry.opened_at = None;
                entry.trial_in_flight = false;
                tracing::info!(operation, "Circuit closed after successful trial");
            }
        });
    }

    /// Report a failed call.
    pub fn record_failure(&self, operation: &str) {
        let threshold = self.config.failure_threshold;
        self.with_entry(operation, |entry| {
            entry.failure_count = entry.failure_count.saturating_add(1);
            entry.last_failure_at = Some(Utc::now());
            match entry.state {
                CircuitState::Closed if entry.failure_count >= threshold => {
                    entry.open(Instant::now());
                    tracing::warn!(
                        operation,
                        failures = entry.failure_count,
                        "Circuit opened"
                    );
                }
                CircuitState::HalfOpen => {
                    entry.open(Instant::now());
                    tracing::warn!(operation, "Trial call failed, circuit re-opened");
                }
                _ => {}
            }
        });
    }

    pub fn state(&self, operation: &str) -> CircuitState {
        self.with_entry(operation, |entry| entry.state)
    }

    pub fn snapshot(&self, operation: &str) -> CircuitBreakerState {
        let reopen_after = self.config.reopen_after;
        self.with_entry(operation, |entry| CircuitBreakerState {
            operation_name: operation.to_string(),
            state: entry.state,
            failure_count: entry.failure_count,
            last_failure_at: entry.last_failure_at,
            reopen_after_duration: reopen_after,
        })
    }

    /// Forget all state for an operation.
    pub fn reset(&self, operation: &str) {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.remove(operation);
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
