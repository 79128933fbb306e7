//! Resilience layer wrapping outbound dependencies
//!
//! - [`CircuitBreaker`] - three-state failure gate with generation counter
//! - [`FallbackManager`] - strategy-driven recovery (cache / default / retry / degraded)

pub mod circuit_breaker;
pub mod fallback;

pub use circuit_breaker::{CircuitBreaker, Counts, Settings, State};
pub use fallback::{FallbackConfig, FallbackManager, FallbackStrategy, RetryItem, RetryQueue};
