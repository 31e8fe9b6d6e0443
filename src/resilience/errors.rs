use std::time::Duration;
use thiserror::Error;

use crate::resilience::circuit_breaker::CircuitState;

/// Failure of a single transport attempt, before any retry decision is made.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Request timed out: {0}")]
    Timeout(String),
    #[error("Attempt exceeded per-call timeout of {0:?}")]
    AttemptTimeout(Duration),
    #[error("Temporary network failure: {0}")]
    Temporary(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Malformed request: {0}")]
    InvalidRequest(String),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Failed to read response body: {0}")]
    Body(String),
    #[error("Caller deadline exceeded")]
    DeadlineExceeded,
    #[error("Cancelled by caller")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum StreamError {
    /// The stream failed before a single increment was consumed.
    #[error("Stream read failed: {0}")]
    Read(#[source] TransportError),
    #[error("Stream interrupted after {increments} increment(s): {source}")]
    Interrupted {
        increments: usize,
        #[source]
        source: TransportError,
    },
}

#[derive(Debug, Clone, Error)]
#[error("Circuit breaker for {target} is {state:?}, rejecting request")]
pub struct CircuitOpen {
    pub target: String,
    pub state: CircuitState,
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("{target}: dependency unavailable (circuit open), request not attempted")]
    CircuitOpen { target: String },
    #[error("{target}: transport error after {attempts} attempt(s): {source}")]
    Transport {
        target: String,
        attempts: u32,
        #[source]
        source: TransportError,
    },
    #[error("{target}: retries exhausted after {attempts} attempt(s): {source}")]
    RetriesExhausted {
        target: String,
        attempts: u32,
        #[source]
        source: TransportError,
    },
    #[error("{target}: stream decode failed after {attempts} attempt(s): {source}")]
    Stream {
        target: String,
        attempts: u32,
        #[source]
        source: StreamError,
    },
    #[error("{target}: cancelled after {attempts} attempt(s)")]
    Cancelled { target: String, attempts: u32 },
    #[error("{target}: deadline exceeded after {attempts} attempt(s)")]
    DeadlineExceeded { target: String, attempts: u32 },
}

impl From<CircuitOpen> for ClientError {
    fn from(err: CircuitOpen) -> Self {
        ClientError::CircuitOpen { target: err.target }
    }
}

impl ClientError {
    /// Number of transport attempts made before the error was produced.
    pub fn attempts(&self) -> u32 {
        match self {
            ClientError::InvalidRequest(_) | ClientError::CircuitOpen { .. } => 0,
            ClientError::Transport { attempts, .. }
            | ClientError::RetriesExhausted { attempts, .. }
            | ClientError::Stream { attempts, .. }
            | ClientError::Cancelled { attempts, .. }
            | ClientError::DeadlineExceeded { attempts, .. } => *attempts,
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, ClientError::CircuitOpen { .. })
    }

    /// Whether a later, independent call might succeed where this one failed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::CircuitOpen { .. }
                | ClientError::RetriesExhausted { .. }
                | ClientError::DeadlineExceeded { .. }
        )
    }

    /// Manual cancellation and malformed requests say nothing about the health
    /// of the dependency, so the circuit breaker must not count them.
    pub fn counts_against_circuit(&self) -> bool {
        !matches!(
            self,
            ClientError::Cancelled { .. }
                | ClientError::InvalidRequest(_)
                | ClientError::CircuitOpen { .. }
        )
    }
}
