//! Request-line and header-line lexing, plus the immutable `Request` the FSM hands to the
//! application once `HEADERS_RECEIVED` (and, if there is a body, `BODY_RECEIVED`) is reached.
//!
//! The actual suspend/resume bookkeeping (how much of the socket's bytes have been seen so
//! far) lives in [`crate::server::fsm`]; the functions here are pure byte-slice parsers the
//! FSM calls once per available line, using `memchr`-based, CR-or-LF-lenient line scanning
//! shaped to be called incrementally rather than once over an already-complete buffer.

use crate::connection_info::ConnectionInfo;
use crate::errors::ServerError;
use crate::header::{HeaderKind, HeaderStore};
use crate::http::types::{Method, Version};
use crate::pool::Pool;
use memchr::memchr;

/// Outcome of scanning one line (terminated by `\n`, optionally preceded by `\r`) out of a
/// buffer that may not yet contain a complete line.
pub(crate) enum Line<'a> {
    /// A complete line, its CR/LF stripped, and the number of bytes (including the
    /// terminator) consumed from the input.
    Complete { bytes: &'a [u8], consumed: usize },
    /// No `\n` found yet; wait for more bytes.
    Incomplete,
}

/// Finds the next line in `buf`. CR-alone or LF-alone both terminate a line (lenient); a
/// trailing CR before the LF is stripped so canonical CRLF and bare-LF callers see the same
/// content either way: CR alone or LF alone both end a line.
pub(crate) fn next_line(buf: &[u8]) -> Line<'_> {
    match memchr(b'\n', buf) {
        None => Line::Incomplete,
        Some(lf) => {
            let consumed = lf + 1;
            let mut end = lf;
            if end > 0 && buf[end - 1] == b'\r' {
                end -= 1;
            }
            Line::Complete {
                bytes: &buf[..end],
                consumed,
            }
        }
    }
}

/// A fully parsed request line: method, target (path + optional query, unsplit), version,
/// and its keep-alive default.
pub(crate) struct RequestLine<'a> {
    pub method: Method,
    pub target: &'a [u8],
    pub version: Version,
    pub keep_alive_default: bool,
}

pub(crate) fn parse_request_line(line: &[u8]) -> Result<RequestLine<'_>, ServerError> {
    if line.contains(&0u8) {
        return Err(ServerError::MalformedRequest("NUL byte in request line"));
    }
    let (method, method_len) = Method::from_bytes(line)?;
    let rest = &line[method_len..];
    let space = memchr(b' ', rest).ok_or(ServerError::MalformedRequest("missing version in request line"))?;
    let target = &rest[..space];
    if target.is_empty() {
        return Err(ServerError::MalformedRequest("empty request target"));
    }
    let version_bytes = &rest[space + 1..];
    if version_bytes.len() != 8 {
        return Err(ServerError::MalformedRequest("malformed HTTP version token"));
    }
    let (version, keep_alive_default) = Version::from_bytes(version_bytes)?;
    Ok(RequestLine {
        method,
        target,
        version,
        keep_alive_default,
    })
}

/// Splits a request-target into `(path, query)`.
pub fn split_target(target: &[u8]) -> (&[u8], Option<&[u8]>) {
    match memchr(b'?', target) {
        Some(pos) => (&target[..pos], Some(&target[pos + 1..])),
        None => (target, None),
    }
}

/// Outcome of scanning one header line.
pub(crate) enum HeaderLine<'a> {
    /// `name: value`, already trimmed.
    Header { name: &'a [u8], value: &'a [u8] },
    /// A continuation line (leading whitespace): folds into the previous header.
    Continuation { value: &'a [u8] },
    /// The blank line ending the header block.
    End,
}

pub(crate) fn parse_header_line(line: &[u8]) -> Result<HeaderLine<'_>, ServerError> {
    if line.is_empty() {
        return Ok(HeaderLine::End);
    }
    if line[0] == b' ' || line[0] == b'\t' {
        return Ok(HeaderLine::Continuation {
            value: trim(&line[1..]),
        });
    }
    let colon = memchr(b':', line).ok_or(ServerError::MalformedRequest("header line missing ':'"))?;
    let name = &line[..colon];
    if name.is_empty() || name.iter().any(|&b| b == b' ' || b == b'\t') {
        return Err(ServerError::MalformedRequest("invalid header name"));
    }
    let value = trim(&line[colon + 1..]);
    Ok(HeaderLine::Header { name, value })
}

fn trim(mut b: &[u8]) -> &[u8] {
    while let [b' ' | b'\t', rest @ ..] = b {
        b = rest;
    }
    while let [rest @ .., b' ' | b'\t'] = b {
        b = rest;
    }
    b
}

/// Lowercases `name` into `out` (which must be at least `name.len()` bytes), for
/// case-normalized header-name storage.
pub(crate) fn lowercase_into(name: &[u8], out: &mut [u8]) {
    for (dst, &src) in out.iter_mut().zip(name.iter()) {
        *dst = src.to_ascii_lowercase();
    }
}

/// The fully parsed, immutable request line + headers the FSM hands to the application. Body
/// bytes (if any) are attached once `BODY_RECEIVED` is reached, via [`Request::set_body`].
pub struct Request {
    pub(crate) method: Method,
    pub(crate) version: Version,
    pub(crate) target: crate::pool::PoolRef,
    pub(crate) headers: HeaderStore,
    pub(crate) keep_alive: bool,
    pub(crate) body: Option<crate::pool::PoolRef>,
}

impl Request {
    pub(crate) fn set_body(&mut self, body: Option<crate::pool::PoolRef>) {
        self.body = body;
    }
}

/// A borrow of `(pool, request, connection info)` bundled together so the application
/// doesn't have to thread a pool reference through every accessor call.
pub struct RequestView<'a> {
    pub(crate) pool: &'a Pool,
    pub(crate) request: &'a Request,
    pub(crate) info: &'a ConnectionInfo,
}

impl<'a> RequestView<'a> {
    pub fn method(&self) -> Method {
        self.request.method
    }

    pub fn version(&self) -> Version {
        self.request.version
    }

    pub fn target(&self) -> &'a [u8] {
        self.pool.get(self.request.target)
    }

    pub fn path(&self) -> &'a [u8] {
        split_target(self.target()).0
    }

    pub fn query(&self) -> Option<&'a [u8]> {
        split_target(self.target()).1
    }

    pub fn header(&self, name: &[u8]) -> Option<&'a [u8]> {
        self.request.headers.get(self.pool, name, Some(HeaderKind::Request))
    }

    pub fn cookie(&self, name: &[u8]) -> Option<&'a [u8]> {
        self.request.headers.get(self.pool, name, Some(HeaderKind::Cookie))
    }

    pub fn get_arg(&self, name: &[u8]) -> Option<&'a [u8]> {
        self.request.headers.get(self.pool, name, Some(HeaderKind::GetArg))
    }

    pub fn post_arg(&self, name: &[u8]) -> Option<&'a [u8]> {
        self.request.headers.get(self.pool, name, Some(HeaderKind::PostArg))
    }

    pub fn footer(&self, name: &[u8]) -> Option<&'a [u8]> {
        self.request.headers.get(self.pool, name, Some(HeaderKind::Footer))
    }

    pub fn body(&self) -> Option<&'a [u8]> {
        self.request.body.map(|r| self.pool.get(r))
    }

    /// Peer address and, when the daemon has TLS configured, the negotiated protocol/cipher.
    pub fn connection_info(&self) -> &'a ConnectionInfo {
        self.info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_request_line() {
        let line = parse_request_line(b"GET /a?b=1 HTTP/1.1").unwrap();
        assert_eq!(line.method, Method::Get);
        assert_eq!(line.target, b"/a?b=1");
        assert_eq!(line.version, Version::Http11);
        assert!(line.keep_alive_default);
    }

    #[test]
    fn rejects_nul_byte_in_target() {
        assert!(parse_request_line(b"GET /\x00 HTTP/1.1").is_err());
    }

    #[test]
    fn splits_path_and_query() {
        assert_eq!(split_target(b"/a/b?x=1&y=2"), (&b"/a/b"[..], Some(&b"x=1&y=2"[..])));
        assert_eq!(split_target(b"/a/b"), (&b"/a/b"[..], None));
    }

    #[test]
    fn header_line_trims_whitespace() {
        match parse_header_line(b"Host:  example.com  ").unwrap() {
            HeaderLine::Header { name, value } => {
                assert_eq!(name, b"Host");
                assert_eq!(value, b"example.com");
            }
            _ => panic!("expected header"),
        }
    }

    #[test]
    fn continuation_line_detected() {
        match parse_header_line(b"  more-value").unwrap() {
            HeaderLine::Continuation { value } => assert_eq!(value, b"more-value"),
            _ => panic!("expected continuation"),
        }
    }

    #[test]
    fn blank_line_ends_headers() {
        assert!(matches!(parse_header_line(b"").unwrap(), HeaderLine::End));
    }

    #[test]
    fn line_scanning_is_lenient_to_bare_lf() {
        match next_line(b"GET / HTTP/1.1\nHost: x\r\n") {
            Line::Complete { bytes, consumed } => {
                assert_eq!(bytes, b"GET / HTTP/1.1");
                assert_eq!(consumed, 15);
            }
            Line::Incomplete => panic!("expected complete line"),
        }
    }

    #[test]
    fn incomplete_line_waits_for_more_bytes() {
        assert!(matches!(next_line(b"GET / HTTP/1.1"), Line::Incomplete));
    }
}
