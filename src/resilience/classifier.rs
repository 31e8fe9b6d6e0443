use std::error::Error as StdError;
use std::io;

use crate::resilience::errors::TransportError;

/// Whether a failed attempt is worth repeating.
///
/// Only timeouts, the caller's own deadline, and failures the transport marks
/// as temporary qualify. Everything else recurs identically on retry.
pub fn is_transient(error: &TransportError) -> bool {
    match error {
        TransportError::Timeout(_)
        | TransportError::AttemptTimeout(_)
        | TransportError::Temporary(_)
        | TransportError::DeadlineExceeded => true,
        TransportError::Network(_)
        | TransportError::InvalidRequest(_)
        | TransportError::Status { .. }
        | TransportError::Body(_)
        | TransportError::Cancelled => false,
    }
}

fn io_error_kind(err: &(dyn StdError + 'static)) -> Option<io::ErrorKind> {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            return Some(io_err.kind());
        }
        current = e.source();
    }
    None
}

fn is_temporary_io(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

/// Maps a `reqwest` failure onto the transport taxonomy.
pub fn from_reqwest(err: &reqwest::Error) -> TransportError {
    let message = err.to_string();

    if err.is_timeout() {
        return TransportError::Timeout(message);
    }
    if err.is_builder() {
        return TransportError::InvalidRequest(message);
    }

    match io_error_kind(err) {
        Some(io::ErrorKind::TimedOut) => return TransportError::Timeout(message),
        Some(kind) if is_temporary_io(kind) => return TransportError::Temporary(message),
        _ => {}
    }

    if err.is_body() || err.is_decode() {
        TransportError::Body(message)
    } else if let Some(status) = err.status() {
        TransportError::Status {
            status: status.as_u16(),
            body: message,
        }
    } else {
        // DNS resolution, TLS handshake, refused connections
        TransportError::Network(message)
    }
}
