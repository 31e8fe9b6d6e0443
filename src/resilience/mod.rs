//! Failure handling for calls to external providers.
//!
//! ```text
//! execute_request
//!     → circuit_breaker (gate, records the outcome of the whole call)
//!     → backoff (schedules retries of transient failures)
//!     → classifier (decides transient vs permanent)
//! ```

pub mod backoff;
pub mod circuit_breaker;
pub mod classifier;
pub mod errors;
pub mod metrics;

pub use backoff::{Backoff, RetryPolicy};
pub use circuit_breaker::{BreakerSettings, BreakerStats, CircuitBreaker, CircuitState, Counts};
pub use errors::{CircuitOpen, ClientError, StreamError, TransportError};
pub use metrics::{ClientMetrics, MetricsStats};
