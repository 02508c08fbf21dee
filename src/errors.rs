//! Crate-wide error type and the termination codes reported to `notify-completed`.

use std::{error, fmt, io};

/// The error kinds the connection state machine can terminate on.
///
/// Every variant except [`ServerError::Application`] always ends the connection; see
/// [`ServerError::termination_code`] for the mapping used by the daemon's
/// notify-completed callback.
#[derive(Debug)]
pub enum ServerError {
    /// Protocol syntax the parser could not make sense of.
    MalformedRequest(&'static str),
    /// The request line named a version of the right shape (`HTTP/x.y`) but not one this
    /// server speaks. Distinct from [`ServerError::MalformedRequest`] because it gets its
    /// own wire response (`505`, not `400`).
    UnsupportedVersion(&'static str),
    /// A request exceeded a configured pool or field-size limit.
    OversizedRequest(&'static str),
    /// No bytes arrived within the connection's idle timeout.
    Timeout,
    /// A socket read or write failed.
    Io(io::Error),
    /// The TLS handshake or session reported a fatal condition.
    Tls(String),
    /// Allocation failure or an invariant the implementation assumed held did not.
    Internal(&'static str),
    /// The application's handler callback reported failure.
    Application(Box<dyn error::Error + Send + Sync>),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::MalformedRequest(msg) => write!(f, "malformed request: {msg}"),
            ServerError::UnsupportedVersion(msg) => write!(f, "unsupported version: {msg}"),
            ServerError::OversizedRequest(msg) => write!(f, "oversized request: {msg}"),
            ServerError::Timeout => write!(f, "connection timed out"),
            ServerError::Io(e) => write!(f, "io error: {e}"),
            ServerError::Tls(msg) => write!(f, "tls error: {msg}"),
            ServerError::Internal(msg) => write!(f, "internal error: {msg}"),
            ServerError::Application(e) => write!(f, "application error: {e}"),
        }
    }
}

impl error::Error for ServerError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            ServerError::Io(e) => Some(e),
            ServerError::Application(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<io::Error> for ServerError {
    fn from(e: io::Error) -> Self {
        ServerError::Io(e)
    }
}

impl From<rustls::Error> for ServerError {
    fn from(e: rustls::Error) -> Self {
        ServerError::Tls(e.to_string())
    }
}

impl From<crate::pool::PoolExhausted> for ServerError {
    fn from(_: crate::pool::PoolExhausted) -> Self {
        ServerError::OversizedRequest("connection's memory pool is exhausted")
    }
}

/// Outcome reported to the daemon's notify-completed callback, once per connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationCode {
    CompletedOk,
    WithError,
    Timeout,
    DaemonShutdown,
    TlsError,
}

impl ServerError {
    /// Maps this error to the termination code surfaced to the notify-completed callback.
    pub fn termination_code(&self) -> TerminationCode {
        match self {
            ServerError::Timeout => TerminationCode::Timeout,
            ServerError::Tls(_) => TerminationCode::TlsError,
            ServerError::Application(_) => TerminationCode::WithError,
            ServerError::MalformedRequest(_)
            | ServerError::UnsupportedVersion(_)
            | ServerError::OversizedRequest(_)
            | ServerError::Io(_)
            | ServerError::Internal(_) => TerminationCode::WithError,
        }
    }

    /// Whether this error has a well-defined best-effort HTTP response (malformed/oversized
    /// requests do; timeouts and internal errors just close the socket).
    pub fn wire_response(&self) -> Option<(u16, &'static [u8])> {
        match self {
            ServerError::MalformedRequest(_) => Some((
                400,
                b"HTTP/1.1 400 Bad Request\r\nContent-Length: 11\r\nConnection: close\r\n\r\nBad Request",
            )),
            ServerError::UnsupportedVersion(_) => Some((
                505,
                b"HTTP/1.1 505 HTTP Version Not Supported\r\nContent-Length: 26\r\nConnection: close\r\n\r\nHTTP Version Not Supported",
            )),
            ServerError::OversizedRequest(_) => Some((
                413,
                b"HTTP/1.1 413 Payload Too Large\r\nContent-Length: 17\r\nConnection: close\r\n\r\nPayload Too Large",
            )),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn termination_code_mapping() {
        assert_eq!(ServerError::Timeout.termination_code(), TerminationCode::Timeout);
        assert_eq!(
            ServerError::MalformedRequest("x").termination_code(),
            TerminationCode::WithError
        );
        assert_eq!(
            ServerError::Tls("bad cert".into()).termination_code(),
            TerminationCode::TlsError
        );
    }

    #[test]
    fn malformed_has_400_response() {
        let (status, body) = ServerError::MalformedRequest("nul byte in url").wire_response().unwrap();
        assert_eq!(status, 400);
        assert!(body.starts_with(b"HTTP/1.1 400"));
    }

    #[test]
    fn unsupported_version_has_505_response() {
        let (status, body) = ServerError::UnsupportedVersion("HTTP/2.0").wire_response().unwrap();
        assert_eq!(status, 505);
        assert!(body.starts_with(b"HTTP/1.1 505"));
    }

    #[test]
    fn timeout_has_no_response() {
        assert!(ServerError::Timeout.wire_response().is_none());
    }
}
