//! The per-connection state machine: parse request, dispatch to the application, serialize
//! response, decide keep-alive, repeat.
//!
//! One connection is driven by a single `async fn run` loop rather than a manually-ticked
//! poll state machine: suspension is just `.await`, supplied by the runtime instead of
//! hand-rolled readiness bookkeeping. An explicit [`State`] field is threaded through it
//! anyway, so the named states are real, observable values (queryable for logging and
//! diagnostics) rather than only implicit in the control flow.

use crate::config::ConnConfig;
use crate::connection_info::ConnectionInfo;
use crate::errors::ServerError;
use crate::header::HeaderKind;
use crate::http::chunked::{encode_chunk, encode_last_chunk, ChunkStep, ChunkedDecoder};
use crate::http::request::{self, HeaderLine, Line, Request, RequestView};
use crate::http::response::{BodyPoll, BodySource, Response, ResponseBuilder};
use crate::http::types::{Method, StatusCode, Version};
use crate::pool::{Pool, PoolRef};
use crate::server::handler::{AcceptPolicy, Handler};
use std::io;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

/// Named states from the connection's parse/dispatch/serialize lifecycle. Not every
/// transition changes the enum (e.g. individual incomplete-line reads stay in
/// `HeaderPartReceived`); it exists so a logger or test can observe where in the request
/// cycle a connection currently sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum State {
    Init,
    UrlReceived,
    HeaderPartReceived,
    HeadersReceived,
    HeadersProcessed,
    ContinueSending,
    ContinueSent,
    BodyReceived,
    FootersReceived,
    HeadersSending,
    HeadersSent,
    NormalBodyReady,
    NormalBodyUnready,
    ChunkedBodyReady,
    ChunkedBodyUnready,
    BodySent,
    FootersSent,
    Closed,
}

/// One accepted connection's parsing/serialization state, independent of transport (plain or
/// TLS — both arrive here as `S: AsyncRead + AsyncWrite`).
pub(crate) struct Connection {
    pub(crate) state: State,
    pool: Pool,
    recv: Vec<u8>,
    recv_pos: usize,
    request: Request,
    response: Option<Response>,
    last_activity: Instant,
    info: ConnectionInfo,
}

const READ_CHUNK: usize = 4096;

impl Connection {
    pub(crate) fn new(pool_size: usize, info: ConnectionInfo) -> Self {
        Connection {
            state: State::Init,
            pool: Pool::new(pool_size),
            recv: Vec::with_capacity(READ_CHUNK),
            recv_pos: 0,
            request: Request::empty(),
            response: None,
            last_activity: Instant::now(),
            info,
        }
    }

    /// Drives this connection through as many keep-alive request/response cycles as the
    /// client and configuration allow, returning once the socket should be closed.
    pub(crate) async fn run<S, H, A>(
        &mut self,
        stream: &mut S,
        handler: &H,
        accept_policy: &A,
        config: &ConnConfig,
    ) -> Result<(), ServerError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
        H: Handler,
        A: AcceptPolicy,
    {
        loop {
            let mark = self.pool.mark();
            match self.one_request(stream, handler, accept_policy, config).await {
                Ok(true) => {
                    self.release_response();
                    self.recv.drain(0..self.recv_pos);
                    self.recv_pos = 0;
                    self.pool.reset_to_mark(mark);
                    self.state = State::Init;
                    trace!("keep-alive: reset for next request");
                }
                Ok(false) => {
                    self.release_response();
                    self.state = State::Closed;
                    return Ok(());
                }
                Err(ServerError::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof && self.recv_pos == self.recv.len() => {
                    // Graceful close with nothing mid-flight: not an error.
                    self.state = State::Closed;
                    return Ok(());
                }
                Err(e) => {
                    self.release_response();
                    self.state = State::Closed;
                    let _ = self.try_write_error(stream, &e).await;
                    return Err(e);
                }
            }
        }
    }

    /// Runs one request/response exchange. Returns `Ok(true)` to continue the connection,
    /// `Ok(false)` to close after a clean response, `Err` on a fatal condition.
    async fn one_request<S, H, A>(
        &mut self,
        stream: &mut S,
        handler: &H,
        accept_policy: &A,
        config: &ConnConfig,
    ) -> Result<bool, ServerError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
        H: Handler,
        A: AcceptPolicy,
    {
        self.state = State::Init;
        let first_line = match self.next_line(stream, config.idle_timeout, config.max_header_line, true).await? {
            Some(range) => range,
            None => return Ok(false),
        };
        let (method, version, keep_alive_default, target_ref, query_pairs) = {
            let bytes = &self.recv[first_line.0..first_line.1];
            let request_line = request::parse_request_line(bytes)?;
            let (_, query) = request::split_target(request_line.target);
            (
                request_line.method,
                request_line.version,
                request_line.keep_alive_default,
                self.pool.write(request_line.target)?,
                query.map(|q| q.to_vec()),
            )
        };
        self.state = State::UrlReceived;

        let mut headers = crate::header::HeaderStore::new();
        self.state = State::HeaderPartReceived;
        loop {
            let (s, e) = match self.next_line(stream, config.idle_timeout, config.max_header_line, false).await? {
                Some(range) => range,
                None => return Err(ServerError::MalformedRequest("connection closed mid-headers")),
            };
            let line = self.recv[s..e].to_vec();
            match request::parse_header_line(&line)? {
                HeaderLine::End => break,
                HeaderLine::Header { name, value } => {
                    if headers.len() >= config.max_header_count {
                        return Err(ServerError::OversizedRequest("too many header lines"));
                    }
                    headers.append(&mut self.pool, HeaderKind::Request, name, value)?;
                    if name.eq_ignore_ascii_case(b"cookie") {
                        for (k, v) in split_pairs(value, b';', b'=') {
                            headers.append(&mut self.pool, HeaderKind::Cookie, &k, &v)?;
                        }
                    }
                }
                HeaderLine::Continuation { value } => {
                    let idx = headers
                        .last_of_kind(HeaderKind::Request)
                        .ok_or(ServerError::MalformedRequest("continuation line without a preceding header"))?;
                    let old = headers.value_ref(idx);
                    let new_len = old.len() + 1 + value.len();
                    let grown = self.pool.reallocate(old, new_len)?;
                    {
                        let buf = self.pool.get_mut(grown);
                        buf[old.len()] = b' ';
                        buf[old.len() + 1..].copy_from_slice(value);
                    }
                    headers.set_value_ref(idx, grown);
                }
            }
        }
        self.state = State::HeadersReceived;

        if let Some(pairs) = query_pairs {
            for (k, v) in split_pairs(&pairs, b'&', b'=') {
                headers.append(&mut self.pool, HeaderKind::GetArg, &url_decode(&k), &url_decode(&v))?;
            }
        }

        let content_length = headers.get(&self.pool, b"content-length", Some(HeaderKind::Request)).map(|v| v.to_vec());
        let transfer_encoding = headers.get(&self.pool, b"transfer-encoding", Some(HeaderKind::Request)).map(|v| v.to_vec());
        let is_chunked = transfer_encoding.as_deref().map_or(false, |v| v.eq_ignore_ascii_case(b"chunked"));
        if content_length.is_some() && is_chunked {
            self.write_simple_status(stream, StatusCode::BadRequest, true).await?;
            return Ok(false);
        }

        let connection_header = headers.get(&self.pool, b"connection", Some(HeaderKind::Request)).map(|v| v.to_vec());
        let keep_alive = decide_keep_alive(version, keep_alive_default, connection_header.as_deref());
        let expects_continue = headers
            .get(&self.pool, b"expect", Some(HeaderKind::Request))
            .map_or(false, |v| v.eq_ignore_ascii_case(b"100-continue"));
        let content_type = headers.get(&self.pool, b"content-type", Some(HeaderKind::Request)).map(|v| v.to_vec());

        self.request = Request {
            method,
            version,
            target: target_ref,
            headers,
            keep_alive,
            body: None,
        };
        self.state = State::HeadersProcessed;

        if expects_continue && version == Version::Http11 {
            let view = RequestView {
                pool: &self.pool,
                request: &self.request,
                info: &self.info,
            };
            if accept_policy.accept_continue(&view) {
                self.state = State::ContinueSending;
                stream.write_all(b"HTTP/1.1 100 Continue\r\n\r\n").await?;
                self.state = State::ContinueSent;
            } else {
                self.write_simple_status(stream, StatusCode::ExpectationFailed, true).await?;
                return Ok(false);
            }
        }

        let body = if is_chunked {
            Some(self.read_chunked_body(stream, config).await?)
        } else if let Some(len_bytes) = &content_length {
            let len = parse_content_length(len_bytes).ok_or(ServerError::MalformedRequest("invalid Content-Length"))?;
            if len as usize > config.max_body_size {
                self.write_simple_status(stream, StatusCode::PayloadTooLarge, true).await?;
                return Ok(false);
            }
            Some(self.read_fixed_body(stream, len as usize, config).await?)
        } else {
            None
        };
        self.request.set_body(body);
        self.state = State::BodyReceived;

        if let (Some(body_ref), Some(ct)) = (body, &content_type) {
            if ct.starts_with(b"application/x-www-form-urlencoded") {
                let body_bytes = self.pool.get(body_ref).to_vec();
                let mut count = 0usize;
                for (k, v) in split_pairs(&body_bytes, b'&', b'=') {
                    count += 1;
                    if count > config.max_form_fields {
                        self.write_simple_status(stream, StatusCode::PayloadTooLarge, true).await?;
                        return Ok(false);
                    }
                    self.request
                        .headers
                        .append(&mut self.pool, HeaderKind::PostArg, &url_decode(&k), &url_decode(&v))?;
                }
            } else if ct.starts_with(b"multipart/form-data") {
                if let Some(boundary) = extract_boundary(ct) {
                    let body_bytes = self.pool.get(body_ref).to_vec();
                    let mut count = 0usize;
                    for (name, value) in parse_multipart(&body_bytes, &boundary) {
                        count += 1;
                        if count > config.max_form_fields {
                            self.write_simple_status(stream, StatusCode::PayloadTooLarge, true).await?;
                            return Ok(false);
                        }
                        self.request.headers.append(&mut self.pool, HeaderKind::PostArg, &name, &value)?;
                    }
                }
            }
        }

        let view = RequestView {
            pool: &self.pool,
            request: &self.request,
            info: &self.info,
        };
        let response = match handler.handle(&view).await {
            Ok(response) => response,
            Err(err) => {
                let app_err = ServerError::Application(err);
                debug!(error = %app_err, "handler returned an error; responding 500 without closing the connection");
                let (resp, _handled) = ResponseBuilder::new().status(StatusCode::InternalServerError).body("Internal Server Error");
                resp
            }
        };
        self.queue_response(response);

        let force_close = self.write_response(stream, version, keep_alive).await?;
        let must_close = !keep_alive || force_close;
        self.state = State::BodySent;
        Ok(!must_close)
    }

    fn queue_response(&mut self, response: Response) {
        self.response = Some(response);
    }

    fn release_response(&mut self) {
        self.response = None;
    }

    /// Serializes the queued response. Returns whether the connection must close regardless
    /// of the negotiated keep-alive (true for an unknown-length HTTP/1.0 body, which uses
    /// socket close as the framing terminator).
    async fn write_response<S>(&mut self, stream: &mut S, version: Version, keep_alive: bool) -> Result<bool, ServerError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let response = self.response.take().expect("handler always queues a response");
        let total_size = response.total_size();
        let use_chunked = total_size.is_none() && version == Version::Http11;
        let force_close = total_size.is_none() && version == Version::Http10;
        let effective_keep_alive = keep_alive && !force_close;

        self.state = State::HeadersSending;
        let mut head = Vec::with_capacity(256);
        head.extend_from_slice(format_status_line(version, response.status(), response.reason()).as_bytes());
        head.extend_from_slice(format!("Date: {}\r\n", httpdate::fmt_http_date(std::time::SystemTime::now())).as_bytes());
        if use_chunked {
            head.extend_from_slice(b"Transfer-Encoding: chunked\r\n");
        } else if let Some(size) = total_size {
            head.extend_from_slice(format!("Content-Length: {size}\r\n").as_bytes());
        }
        head.extend_from_slice(format!("Connection: {}\r\n", if effective_keep_alive { "keep-alive" } else { "close" }).as_bytes());
        response.for_each_header(|name, value| {
            head.extend_from_slice(name.as_bytes());
            head.extend_from_slice(b": ");
            head.extend_from_slice(value.as_bytes());
            head.extend_from_slice(b"\r\n");
            true
        });
        head.extend_from_slice(b"\r\n");
        stream.write_all(&head).await?;
        self.state = State::HeadersSent;

        let body_source = response.take_body();
        match body_source {
            None => {}
            Some(BodySource::Buffer(bytes)) => {
                self.state = State::NormalBodyReady;
                if use_chunked {
                    let mut framed = Vec::with_capacity(bytes.len() + 16);
                    encode_chunk(&mut framed, &bytes);
                    encode_last_chunk(&mut framed);
                    stream.write_all(&framed).await?;
                } else {
                    stream.write_all(&bytes).await?;
                }
            }
            Some(BodySource::Producer(mut producer)) => {
                let mut pos: u64 = 0;
                let mut buf = [0u8; 8192];
                loop {
                    match producer.poll_read(pos, &mut buf) {
                        BodyPoll::Ready(n) => {
                            self.state = if use_chunked { State::ChunkedBodyReady } else { State::NormalBodyReady };
                            if n == 0 {
                                continue;
                            }
                            if use_chunked {
                                let mut framed = Vec::with_capacity(n + 16);
                                encode_chunk(&mut framed, &buf[..n]);
                                stream.write_all(&framed).await?;
                            } else {
                                stream.write_all(&buf[..n]).await?;
                            }
                            pos += n as u64;
                        }
                        BodyPoll::Pending => {
                            self.state = if use_chunked { State::ChunkedBodyUnready } else { State::NormalBodyUnready };
                            tokio::task::yield_now().await;
                        }
                        BodyPoll::Eof => break,
                        BodyPoll::Err(e) => return Err(ServerError::Io(e)),
                    }
                }
                if use_chunked {
                    let mut last = Vec::with_capacity(8);
                    encode_last_chunk(&mut last);
                    stream.write_all(&last).await?;
                }
            }
        }
        if use_chunked {
            self.state = State::FootersSent;
        }
        Ok(force_close)
    }

    async fn write_simple_status<S>(&mut self, stream: &mut S, status: StatusCode, close: bool) -> Result<(), ServerError>
    where
        S: AsyncWrite + Unpin,
    {
        let body = status.reason().as_bytes();
        let mut out = Vec::with_capacity(128);
        out.extend_from_slice(format_status_line(Version::Http11, status.code(), status.reason()).as_bytes());
        out.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
        out.extend_from_slice(format!("Connection: {}\r\n", if close { "close" } else { "keep-alive" }).as_bytes());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(body);
        stream.write_all(&out).await?;
        Ok(())
    }

    async fn try_write_error<S>(&mut self, stream: &mut S, error: &ServerError) -> Result<(), ServerError>
    where
        S: AsyncWrite + Unpin,
    {
        if let Some((_, body)) = error.wire_response() {
            stream.write_all(body).await?;
        }
        Ok(())
    }

    async fn read_chunked_body<S>(&mut self, stream: &mut S, config: &ConnConfig) -> Result<PoolRef, ServerError>
    where
        S: AsyncRead + Unpin,
    {
        let mut decoder = ChunkedDecoder::new();
        let mut body_ref: Option<PoolRef> = None;
        let mut total = 0usize;
        loop {
            let step = {
                let slice = &self.recv[self.recv_pos..];
                decoder.step(slice)
            };
            match step? {
                ChunkStep::Data { data, consumed } => {
                    if !data.is_empty() {
                        total += data.len();
                        if total > config.max_body_size {
                            return Err(ServerError::OversizedRequest("chunked body exceeds max size"));
                        }
                        body_ref = Some(match body_ref {
                            None => self.pool.write(data)?,
                            Some(existing) => {
                                let new_len = existing.len() + data.len();
                                let grown = self.pool.reallocate(existing, new_len)?;
                                self.pool.get_mut(grown)[existing.len()..].copy_from_slice(data);
                                grown
                            }
                        });
                    }
                    self.recv_pos += consumed;
                }
                ChunkStep::Trailer { name, value, consumed } => {
                    self.request.headers.append(&mut self.pool, HeaderKind::Footer, name, value)?;
                    self.recv_pos += consumed;
                }
                ChunkStep::Done { consumed } => {
                    self.recv_pos += consumed;
                    self.state = State::FootersReceived;
                    break;
                }
                ChunkStep::NeedMore => {
                    self.fill(stream, config.idle_timeout).await?;
                }
            }
        }
        match body_ref {
            Some(r) => Ok(r),
            None => Ok(self.pool.write(b"")?),
        }
    }

    async fn read_fixed_body<S>(&mut self, stream: &mut S, len: usize, config: &ConnConfig) -> Result<PoolRef, ServerError>
    where
        S: AsyncRead + Unpin,
    {
        while self.recv.len() - self.recv_pos < len {
            self.fill(stream, config.idle_timeout).await?;
        }
        let body = self.pool.write(&self.recv[self.recv_pos..self.recv_pos + len])?;
        self.recv_pos += len;
        Ok(body)
    }

    /// Scans for the next complete line starting at `recv_pos`, reading more bytes from the
    /// socket as needed. Returns `None` only when `eof_ok` and the peer closes before sending
    /// anything at all.
    async fn next_line<S>(
        &mut self,
        stream: &mut S,
        idle_timeout: Duration,
        max_line: usize,
        eof_ok: bool,
    ) -> Result<Option<(usize, usize)>, ServerError>
    where
        S: AsyncRead + Unpin,
    {
        loop {
            if let Line::Complete { bytes, consumed } = request::next_line(&self.recv[self.recv_pos..]) {
                let start = self.recv_pos;
                let end = start + bytes.len();
                self.recv_pos += consumed;
                return Ok(Some((start, end)));
            }
            if self.recv.len() - self.recv_pos >= max_line {
                return Err(ServerError::OversizedRequest("header line exceeds configured maximum"));
            }
            match self.fill(stream, idle_timeout).await {
                Ok(()) => {}
                Err(ServerError::Io(e)) if eof_ok && e.kind() == io::ErrorKind::UnexpectedEof && self.recv.is_empty() => {
                    return Ok(None);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fill<S>(&mut self, stream: &mut S, idle_timeout: Duration) -> Result<(), ServerError>
    where
        S: AsyncRead + Unpin,
    {
        let mut buf = [0u8; READ_CHUNK];
        let n = if idle_timeout.is_zero() {
            stream.read(&mut buf).await?
        } else {
            tokio::select! {
                biased;
                result = stream.read(&mut buf) => result?,
                _ = tokio::time::sleep(idle_timeout) => return Err(ServerError::Timeout),
            }
        };
        if n == 0 {
            return Err(ServerError::Io(io::Error::new(io::ErrorKind::UnexpectedEof, "peer closed connection")));
        }
        self.recv.extend_from_slice(&buf[..n]);
        self.last_activity = Instant::now();
        debug!(bytes = n, "read from socket");
        Ok(())
    }
}

impl Request {
    fn empty() -> Self {
        Request {
            method: Method::Get,
            version: Version::Http11,
            target: PoolRef::default(),
            headers: crate::header::HeaderStore::new(),
            keep_alive: true,
            body: None,
        }
    }
}

fn format_status_line(version: Version, code: u16, reason: &str) -> String {
    format!("{} {} {}\r\n", version.as_str(), code, reason)
}

fn decide_keep_alive(version: Version, default: bool, connection_header: Option<&[u8]>) -> bool {
    match connection_header {
        Some(v) if v.eq_ignore_ascii_case(b"close") => false,
        Some(v) if v.eq_ignore_ascii_case(b"keep-alive") => true,
        _ => {
            let _ = version;
            default
        }
    }
}

fn parse_content_length(bytes: &[u8]) -> Option<u64> {
    if bytes.is_empty() {
        return None;
    }
    let mut n: u64 = 0;
    for &b in bytes {
        if !b.is_ascii_digit() {
            return None;
        }
        n = n.checked_mul(10)?.checked_add((b - b'0') as u64)?;
    }
    Some(n)
}

/// Splits `input` on `sep` into `(key, value)` pairs split on the first `kv_sep` in each
/// piece; a piece with no `kv_sep` yields an empty value. Used for query strings, urlencoded
/// bodies, and `Cookie` headers alike.
fn split_pairs(input: &[u8], sep: u8, kv_sep: u8) -> Vec<(Vec<u8>, Vec<u8>)> {
    input
        .split(|&b| b == sep)
        .map(|piece| trim_ascii_space(piece))
        .filter(|piece| !piece.is_empty())
        .map(|piece| match memchr::memchr(kv_sep, piece) {
            Some(pos) => (piece[..pos].to_vec(), piece[pos + 1..].to_vec()),
            None => (piece.to_vec(), Vec::new()),
        })
        .collect()
}

fn trim_ascii_space(mut b: &[u8]) -> &[u8] {
    while let [b' ', rest @ ..] = b {
        b = rest;
    }
    while let [rest @ .., b' '] = b {
        b = rest;
    }
    b
}

/// Decodes `application/x-www-form-urlencoded` percent-escapes and `+`-as-space.
fn url_decode(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        match input[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < input.len() => {
                if let (Some(hi), Some(lo)) = (hex_digit(input[i + 1]), hex_digit(input[i + 2])) {
                    out.push(hi * 16 + lo);
                    i += 3;
                } else {
                    out.push(input[i]);
                    i += 1;
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    out
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

fn extract_boundary(content_type: &[u8]) -> Option<Vec<u8>> {
    let marker = b"boundary=";
    let pos = content_type
        .windows(marker.len())
        .position(|w| w.eq_ignore_ascii_case(marker))?;
    let mut rest = &content_type[pos + marker.len()..];
    if rest.first() == Some(&b'"') {
        rest = &rest[1..];
        let end = memchr::memchr(b'"', rest)?;
        Some(rest[..end].to_vec())
    } else {
        let end = rest.iter().position(|&b| b == b';' || b == b' ').unwrap_or(rest.len());
        Some(rest[..end].to_vec())
    }
}

/// A deliberately simple multipart reader: extracts each part's `name` and raw value,
/// skipping filename/content-type sub-headers. Good enough for form fields; file uploads are
/// out of scope; request bodies never stream to disk here.
fn parse_multipart(body: &[u8], boundary: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut delim = Vec::with_capacity(boundary.len() + 2);
    delim.extend_from_slice(b"--");
    delim.extend_from_slice(boundary);

    let mut out = Vec::new();
    let mut rest = body;
    while let Some(start) = find(rest, &delim) {
        rest = &rest[start + delim.len()..];
        if rest.starts_with(b"--") {
            break;
        }
        let Some(header_end) = find(rest, b"\r\n\r\n") else { break };
        let part_headers = &rest[..header_end];
        let value_start = header_end + 4;
        let Some(next_delim) = find(&rest[value_start..], &delim) else { break };
        let mut value_end = value_start + next_delim;
        if value_end >= 2 && &rest[value_end - 2..value_end] == b"\r\n" {
            value_end -= 2;
        }
        if let Some(name) = extract_content_disposition_name(part_headers) {
            out.push((name, rest[value_start..value_end].to_vec()));
        }
        rest = &rest[value_start..];
    }
    out
}

fn extract_content_disposition_name(headers: &[u8]) -> Option<Vec<u8>> {
    let marker = b"name=\"";
    let pos = headers.windows(marker.len()).position(|w| w == marker)?;
    let rest = &headers[pos + marker.len()..];
    let end = memchr::memchr(b'"', rest)?;
    Some(rest[..end].to_vec())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keep_alive_defaults_by_version() {
        assert!(decide_keep_alive(Version::Http11, true, None));
        assert!(!decide_keep_alive(Version::Http10, false, None));
    }

    #[test]
    fn connection_header_overrides_default() {
        assert!(!decide_keep_alive(Version::Http11, true, Some(b"close")));
        assert!(decide_keep_alive(Version::Http10, false, Some(b"keep-alive")));
    }

    #[test]
    fn parses_content_length() {
        assert_eq!(parse_content_length(b"1234"), Some(1234));
        assert_eq!(parse_content_length(b""), None);
        assert_eq!(parse_content_length(b"12a4"), None);
    }

    #[test]
    fn splits_query_pairs() {
        let pairs = split_pairs(b"a=1&b=2&flag", b'&', b'=');
        assert_eq!(
            pairs,
            vec![
                (b"a".to_vec(), b"1".to_vec()),
                (b"b".to_vec(), b"2".to_vec()),
                (b"flag".to_vec(), b"".to_vec()),
            ]
        );
    }

    #[test]
    fn url_decode_handles_percent_and_plus() {
        assert_eq!(url_decode(b"a+b%3Dc"), b"a b=c");
    }

    #[test]
    fn extracts_multipart_boundary() {
        assert_eq!(
            extract_boundary(b"multipart/form-data; boundary=abc123"),
            Some(b"abc123".to_vec())
        );
        assert_eq!(
            extract_boundary(b"multipart/form-data; boundary=\"abc 123\""),
            Some(b"abc 123".to_vec())
        );
    }

    #[test]
    fn parses_simple_multipart_field() {
        let body = b"--XYZ\r\nContent-Disposition: form-data; name=\"field\"\r\n\r\nvalue\r\n--XYZ--\r\n";
        let parts = parse_multipart(body, b"XYZ");
        assert_eq!(parts, vec![(b"field".to_vec(), b"value".to_vec())]);
    }
}
