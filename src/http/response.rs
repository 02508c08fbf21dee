//! The Response Object: built once by the application, frozen, and optionally shared
//! across many connections.
//!
//! This type is shared across connections rather than reset and reused per-request: it is
//! built through [`ResponseBuilder`] — a debug-assert-guarded status/header/body state
//! machine — and then [`ResponseBuilder::freeze`]s into an immutable, `Clone`-cheap
//! [`Response`] backed by `Arc`. Cloning a frozen `Response` is a "+1 refcount"; dropping a
//! clone is the "-1"; `Arc`'s strong count doubles as the atomic reference counter.

use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

/// What a handler returns to prove it actually produced a response. Carries no data; its
/// only job is to make "forgot to call a body-finishing method" a compile error, the same
/// role `Handled` plays here.
#[derive(Debug, Clone, Copy)]
pub struct Handled(());

/// Result of one call to a [`BodyProducer`].
pub enum BodyPoll {
    /// `n` bytes were written into the supplied buffer.
    Ready(usize),
    /// No bytes are available yet; the caller should suspend and retry later (the
    /// producer-returns-nothing-yet contract).
    Pending,
    /// The body is complete; no more bytes will ever be produced.
    Eof,
    /// The producer failed; the connection should be closed.
    Err(std::io::Error),
}

/// A streaming response body source. Instead of a C-shaped `reader(ctx, position, buffer,
/// max) -> isize` callback plus a separate free callback, a closure (or any type
/// implementing this trait) already owns whatever state a `ctx` pointer would otherwise
/// carry, and `Drop` takes care of cleanup.
pub trait BodyProducer: Send {
    /// Writes up to `buf.len()` bytes representing the content at `pos` into `buf`.
    fn poll_read(&mut self, pos: u64, buf: &mut [u8]) -> BodyPoll;
}

impl<F> BodyProducer for F
where
    F: FnMut(u64, &mut [u8]) -> BodyPoll + Send,
{
    fn poll_read(&mut self, pos: u64, buf: &mut [u8]) -> BodyPoll {
        self(pos, buf)
    }
}

pub(crate) enum BodySource {
    Buffer(Bytes),
    Producer(Box<dyn BodyProducer>),
}

struct ResponseInner {
    status: u16,
    reason: &'static str,
    headers: Vec<(Box<str>, Box<str>)>,
    total_size: Option<u64>,
    body: parking_lot_free::Mutex<Option<BodySource>>,
}

/// A `BodySource` is taken out (consumed) the first time a connection serializes this
/// response's body; a plain `std::sync::Mutex<Option<T>>` models "take it exactly once,
/// from whichever connection gets there first" without needing interior unsafe code. Named
/// module only to keep the intent ("this is not a general-purpose lock, it's a one-shot
/// take") visible at the use site.
mod parking_lot_free {
    pub(crate) type Mutex<T> = std::sync::Mutex<T>;
}

/// An immutable, reference-counted response. Cheap to clone; clones all point at the same
/// backing data. The body producer (if any) is consumed by whichever connection writes it
/// first — sharing one `Response` across simultaneous connections only stays cheap in the
/// buffered case; a producer is inherently single-consumer once it starts yielding bytes
/// tied to a particular stream position.
#[derive(Clone)]
pub struct Response(Arc<ResponseInner>);

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.0.status)
            .field("headers", &self.0.headers.len())
            .finish()
    }
}

impl Response {
    pub fn status(&self) -> u16 {
        self.0.status
    }

    pub fn reason(&self) -> &'static str {
        self.0.reason
    }

    pub fn total_size(&self) -> Option<u64> {
        self.0.total_size
    }

    /// Iterates headers in insertion order, stopping early when `f` returns `false` — the
    /// iteration halts as soon as the callback returns `false`.
    pub fn for_each_header(&self, mut f: impl FnMut(&str, &str) -> bool) {
        for (name, value) in &self.0.headers {
            if !f(name, value) {
                break;
            }
        }
    }

    /// Current strong-reference count. Exposed for refcount-conservation tests; not meant
    /// for application logic.
    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// Takes the body source for serialization. Returns `None` if already taken (a second
    /// connection racing a first on the same streamed response) — callers should treat that
    /// as "nothing left to send" for this connection.
    pub(crate) fn take_body(&self) -> Option<BodySource> {
        self.0.body.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuildState {
    Clean,
    Headers,
    Complete,
}

/// Builds one [`Response`] through a `status()` → `header()*` → `body()` chain, including
/// debug-assert-only misuse panics: this builder is used entirely within trusted
/// application code, not parsed from untrusted input, so "cheap in release, loud in debug"
/// is the right tradeoff.
#[derive(Debug)]
pub struct ResponseBuilder {
    status: u16,
    reason: &'static str,
    headers: Vec<(Box<str>, Box<str>)>,
    state: BuildState,
}

impl ResponseBuilder {
    pub fn new() -> Self {
        ResponseBuilder {
            status: 200,
            reason: "OK",
            headers: Vec::new(),
            state: BuildState::Clean,
        }
    }

    #[track_caller]
    pub fn status(mut self, code: crate::http::types::StatusCode) -> Self {
        debug_assert_eq!(self.state, BuildState::Clean, "status() must be called first and only once");
        self.status = code.code();
        self.reason = code.reason();
        self.state = BuildState::Headers;
        self
    }

    /// Adds a header. Rejects (returns `Err`, leaving the builder unchanged) names or
    /// values containing TAB/CR/LF or that are empty.
    #[track_caller]
    pub fn header(mut self, name: impl Into<Box<str>>, value: impl Into<Box<str>>) -> Result<Self, Self> {
        debug_assert_eq!(self.state, BuildState::Headers, "header() must follow status()");
        let name = name.into();
        let value = value.into();
        if !crate::header::is_valid_header_component(name.as_bytes())
            || !crate::header::is_valid_header_component(value.as_bytes())
        {
            return Err(self);
        }
        self.headers.push((name, value));
        Ok(self)
    }

    /// Removes every previously added header matching `name`, case-insensitively. A no-op if
    /// none match.
    #[track_caller]
    pub fn remove_header(mut self, name: &str) -> Self {
        debug_assert_eq!(self.state, BuildState::Headers, "remove_header() must follow status()");
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self
    }

    #[track_caller]
    pub fn body(self, data: impl Into<Bytes>) -> (Response, Handled) {
        let bytes = data.into();
        let size = Some(bytes.len() as u64);
        (self.freeze(size, BodySource::Buffer(bytes)), Handled(()))
    }

    #[track_caller]
    pub fn body_stream(self, total_size: Option<u64>, producer: impl BodyProducer + 'static) -> (Response, Handled) {
        (self.freeze(total_size, BodySource::Producer(Box::new(producer))), Handled(()))
    }

    fn freeze(self, total_size: Option<u64>, body: BodySource) -> Response {
        debug_assert_eq!(self.state, BuildState::Headers, "body()/body_stream() must follow status()");
        Response(Arc::new(ResponseInner {
            status: self.status,
            reason: self.reason,
            headers: self.headers,
            total_size,
            body: std::sync::Mutex::new(Some(body)),
        }))
    }
}

impl Default for ResponseBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::types::StatusCode;

    #[test]
    fn builder_chain_produces_frozen_response() {
        let (resp, _handled) = ResponseBuilder::new()
            .status(StatusCode::Ok)
            .header("X-Test", "1")
            .unwrap()
            .body("hello");
        assert_eq!(resp.status(), 200);
        let mut seen = Vec::new();
        resp.for_each_header(|n, v| {
            seen.push((n.to_string(), v.to_string()));
            true
        });
        assert_eq!(seen, vec![("X-Test".to_string(), "1".to_string())]);
    }

    #[test]
    fn header_injection_is_rejected_by_builder() {
        let result = ResponseBuilder::new().status(StatusCode::Ok).header("X-Foo", "a\r\nSet-Cookie: evil");
        assert!(result.is_err());
    }

    #[test]
    fn remove_header_drops_matching_entries_case_insensitively() {
        let (resp, _) = ResponseBuilder::new()
            .status(StatusCode::Ok)
            .header("X-Test", "1")
            .unwrap()
            .header("X-Keep", "2")
            .unwrap()
            .remove_header("x-test")
            .body("hello");
        let mut seen = Vec::new();
        resp.for_each_header(|n, v| {
            seen.push((n.to_string(), v.to_string()));
            true
        });
        assert_eq!(seen, vec![("X-Keep".to_string(), "2".to_string())]);
    }

    #[test]
    fn refcount_tracks_clones() {
        let (resp, _) = ResponseBuilder::new().status(StatusCode::Ok).body("x");
        assert_eq!(resp.strong_count(), 1);
        let clones: Vec<_> = (0..4).map(|_| resp.clone()).collect();
        assert_eq!(resp.strong_count(), 5);
        drop(clones);
        assert_eq!(resp.strong_count(), 1);
    }

    #[test]
    fn body_is_taken_exactly_once() {
        let (resp, _) = ResponseBuilder::new().status(StatusCode::Ok).body("x");
        assert!(resp.take_body().is_some());
        assert!(resp.take_body().is_none());
    }

    #[test]
    #[should_panic]
    fn status_twice_panics_in_debug() {
        let _ = ResponseBuilder::new().status(StatusCode::Ok).status(StatusCode::NotFound);
    }
}
