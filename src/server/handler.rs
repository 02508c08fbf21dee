//! Application callbacks: the request handler and the accept-policy hook.
//!
//! Both traits follow the same shape as the connection-filter/handler pair found
//! throughout this crate's lineage: a required async method plus an optional one with a
//! permissive default, and a blanket `impl ... for ()` so a unit handler compiles without
//! writing a type for it (useful in tests and minimal examples).

use crate::http::request::RequestView;
use crate::http::response::{Response, ResponseBuilder};
use crate::http::types::StatusCode;
use std::future::Future;
use std::net::SocketAddr;

/// Boxed error returned by a failing [`Handler::handle`] call. Opaque to the connection
/// state machine beyond its `Display`/`source` chain — it is logged and surfaced to the
/// notify-completed callback, never inspected for type.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Processes one fully-parsed request and produces the response to serialize back.
///
/// Returning `Err` reports an application-error termination for this request without
/// closing the connection: the daemon writes a best-effort `500` and keeps the connection
/// alive for the next keep-alive request, unlike every other error kind this crate
/// produces.
///
/// # Examples
///
/// ```
/// use mhttpd::{Handler, RequestView, Response, ResponseBuilder, StatusCode};
///
/// struct Echo;
///
/// impl Handler for Echo {
///     async fn handle(&self, request: &RequestView<'_>) -> Result<Response, mhttpd::HandlerError> {
///         let (resp, _handled) = ResponseBuilder::new()
///             .status(StatusCode::Ok)
///             .header("X-Path-Len", request.path().len().to_string())
///             .unwrap()
///             .body("hello");
///         Ok(resp)
///     }
/// }
/// ```
pub trait Handler: Sync + Send + 'static {
    fn handle(&self, request: &RequestView<'_>) -> impl Future<Output = Result<Response, HandlerError>> + Send;
}

impl Handler for () {
    async fn handle(&self, _request: &RequestView<'_>) -> Result<Response, HandlerError> {
        let (resp, _handled) = ResponseBuilder::new().status(StatusCode::NotFound).body("");
        Ok(resp)
    }
}

/// Admission control, invoked at two points in a connection's lifetime: once on accept
/// (before any bytes are read) and once per request that carries `Expect: 100-continue`.
///
/// Both methods default to permissive; a host only overrides the checks it cares about.
pub trait AcceptPolicy: Sync + Send + 'static {
    /// Whether to accept a newly connected peer at all. Called before any request is read.
    fn accept(&self, _peer: SocketAddr) -> bool {
        true
    }

    /// Whether to honor an `Expect: 100-continue` request by sending the interim response
    /// and reading the body, versus answering immediately (typically with an error status
    /// and `must-close`).
    fn accept_continue(&self, _request: &RequestView<'_>) -> bool {
        true
    }
}

impl AcceptPolicy for () {}

#[cfg(test)]
mod tests {
    use super::*;

    struct RejectAll;
    impl AcceptPolicy for RejectAll {
        fn accept(&self, _peer: SocketAddr) -> bool {
            false
        }
        fn accept_continue(&self, _request: &RequestView<'_>) -> bool {
            false
        }
    }

    #[test]
    fn default_accept_policy_is_permissive() {
        let policy = ();
        assert!(AcceptPolicy::accept(&policy, "127.0.0.1:1".parse().unwrap()));
    }

    #[test]
    fn custom_policy_can_reject() {
        let policy = RejectAll;
        assert!(!policy.accept("127.0.0.1:1".parse().unwrap()));
    }
}
