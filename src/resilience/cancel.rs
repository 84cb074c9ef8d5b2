//! Cooperative cancellation and per-document deadlines.
//!
//! A `CancelToken` combines an optional deadline with a shutdown signal
//! (a `tokio::sync::watch` channel). Every wait in the pipeline (retry
//! backoff, engine calls, stage futures) races against the token so a slow
//! document never blocks graceful shutdown.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;

/// Why a wait was cut short.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum Interrupt {
    #[error("operation cancelled")]
    Cancelled,
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

/// Owner side of a cancellation signal. Dropping it does not cancel.
#[derive(Debug)]
pub struct CancelSource {
    tx: watch::Sender<bool>,
}

impl CancelSource {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Hand out a token observing this source.
    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: Some(self.tx.subscribe()),
            deadline: None,
        }
    }

    /// Signal every token created from this source.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer side: cheap to clone, carries an optional deadline.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    rx: Option<watch::Receiver<bool>>,
    deadline: Option<Instant>,
}

impl CancelToken {
    /// A token that is never cancelled and has no deadline.
    pub fn never() -> Self {
        Self::default()
    }

    /// Derive a token that additionally expires at `deadline`.
    /// The earlier of the existing and new deadline wins.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(existing) if existing <= deadline => existing,
            _ => deadline,
        };
        Self {
            rx: self.rx.clone(),
            deadline: Some(deadline),
        }
    }

    /// Derive a token that expires `timeout` from now.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, if one is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Non-blocking check. Cancellation takes precedence over the deadline.
    pub fn interruption(&self) -> Option<Interrupt> {
        if let Some(rx) = &self.rx {
            if *rx.borrow() {
                return Some(Interrupt::Cancelled);
            }
        }
        match self.deadline {
            Some(d) if Instant::now() >= d => Some(Interrupt::DeadlineExceeded),
            _ => None,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        self.interruption().is_some()
    }

    /// Resolves once the token is cancelled or its deadline passes.
    /// Pends forever for `CancelToken::never()`.
    pub async fn interrupted(&self) -> Interrupt {
        let cancelled = async {
            match &self.rx {
                Some(rx) => {
                    let mut rx = rx.clone();
                    loop {
                        if *rx.borrow_and_update() {
                            return;
                        }
                        if rx.changed().await.is_err() {
                            // Source dropped without cancelling.
                            std::future::pending::<()>().await;
                        }
                    }
                }
                None => std::future::pending::<()>().await,
            }
        };

        let expired = async {
            match self.deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancelled => Interrupt::Cancelled,
            _ = expired => Interrupt::DeadlineExceeded,
        }
    }

    /// Cooperative, non-busy sleep that wakes early on interruption.
    pub async fn sleep(&self, duration: Duration) -> Result<(), Interrupt> {
        if let Some(i) = self.interruption() {
            return Err(i);
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            i = self.interrupted() => Err(i),
        }
    }

    /// Run `fut` to completion unless the token fires first.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, Interrupt> {
        if let Some(i) = self.interruption() {
            return Err(i);
        }
        tokio::select! {
            out = fut => Ok(out),
            i = self.interrupted() => Err(i),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn never_token_is_not_interrupted() {
        let token = CancelToken::never();
        assert!(token.interruption().is_none());
        assert!(token.sleep(Duration::from_millis(5)).await.is_ok());
    }

    #[tokio::test]
    async fn cancel_wakes_sleeping_token() {
        let source = CancelSource::new();
        let token = source.token();

        let handle = tokio::spawn(async move { token.sleep(Duration::from_secs(30)).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        source.cancel();

        let result = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, Err(Interrupt::Cancelled));
    }

    #[tokio::test]
    async fn deadline_cuts_run_short() {
        let token = CancelToken::never().with_timeout(Duration::from_millis(20));
        let result = token
            .run(tokio::time::sleep(Duration::from_secs(30)))
            .await;
        assert_eq!(result, Err(Interrupt::DeadlineExceeded));
    }

    #[tokio::test]
    async fn earlier_deadline_wins() {
        let now = Instant::now();
        let token = CancelToken::never()
            .with_deadline(now + Duration::from_millis(10))
            .with_deadline(now + Duration::from_secs(60));
        assert_eq!(token.deadline(), Some(now + Duration::from_millis(10)));
    }

    #[tokio::test]
    async fn cancellation_takes_precedence_over_deadline() {
        let source = CancelSource::new();
        let token = source.token().with_deadline(Instant::now());
        source.cancel();
        assert_eq!(token.interruption(), Some(Interrupt::Cancelled));
    }

    #[tokio::test]
    async fn dropped_source_does_not_cancel() {
        let token = {
            let source = CancelSource::new();
            source.token()
        };
        assert!(token.interruption().is_none());
        assert!(token.sleep(Duration::from_millis(5)).await.is_ok());
    }
}
