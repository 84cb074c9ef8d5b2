//! Fault-tolerance primitives shared by every fallible pipeline call.

pub mod cancel;
pub mod circuit;
pub mod retry;

pub use cancel::{CancelSource, CancelToken, Interrupt};
pub use circuit::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerState, CircuitState};
pub use retry::{ErrorClass, RetryError, RetryExecutor, RetryPolicy};
