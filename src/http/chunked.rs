//! Chunked transfer-coding: decoding an incoming request body (with trailers) and encoding
//! an outgoing response body.
//!
//! Shaped like the `TransferCoding`/`ChunkResult` split used by other h1 dispatchers:
//! decoding returns an enum of "got data" / "need more" / "done" rather than requiring the
//! whole body up front.

use crate::errors::ServerError;
use crate::http::request::{next_line, parse_header_line, HeaderLine, Line};
use memchr::memchr;

/// One step of decoding a chunked request body.
pub(crate) enum ChunkStep<'a> {
    /// `len` bytes of chunk data are available at the front of the remaining buffer;
    /// `consumed` bytes (data + trailing CRLF) should be dropped from the input once the
    /// caller has copied the data out.
    Data { data: &'a [u8], consumed: usize },
    /// A trailer header line (after the terminal `0`-chunk).
    Trailer { name: &'a [u8], value: &'a [u8], consumed: usize },
    /// The chunked body (and its trailers) is fully consumed.
    Done { consumed: usize },
    /// Not enough bytes buffered yet to make progress.
    NeedMore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    ChunkSize,
    ChunkData(usize),
    ChunkDataCrlf,
    TrailerLines,
}

/// Drives chunked-body decoding across repeated calls as more bytes arrive, in the same
/// "call again when you have more input" style as [`crate::http::request::next_line`].
pub(crate) struct ChunkedDecoder {
    state: State,
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        ChunkedDecoder { state: State::ChunkSize }
    }

    /// Attempts one decode step against `buf`. Call in a loop, advancing `buf` by
    /// `consumed` each time, until `NeedMore` or `Done` is returned.
    pub fn step<'a>(&mut self, buf: &'a [u8]) -> Result<ChunkStep<'a>, ServerError> {
        match self.state {
            State::ChunkSize => match next_line(buf) {
                Line::Incomplete => Ok(ChunkStep::NeedMore),
                Line::Complete { bytes, consumed } => {
                    let size_str = match memchr(b';', bytes) {
                        Some(pos) => &bytes[..pos],
                        None => bytes,
                    };
                    let size = parse_hex(size_str).ok_or(ServerError::MalformedRequest("invalid chunk size"))?;
                    if size == 0 {
                        self.state = State::TrailerLines;
                        Ok(ChunkStep::Data { data: &[], consumed })
                    } else {
                        self.state = State::ChunkData(size);
                        Ok(ChunkStep::Data { data: &[], consumed })
                    }
                }
            },
            State::ChunkData(remaining) => {
                if buf.len() < remaining + 2 {
                    return Ok(ChunkStep::NeedMore);
                }
                let data = &buf[..remaining];
                if &buf[remaining..remaining + 2] != b"\r\n" {
                    return Err(ServerError::MalformedRequest("chunk data missing CRLF terminator"));
                }
                self.state = State::ChunkSize;
                Ok(ChunkStep::Data {
                    data,
                    consumed: remaining + 2,
                })
            }
            State::ChunkDataCrlf => unreachable!("folded into ChunkData"),
            State::TrailerLines => match next_line(buf) {
                Line::Incomplete => Ok(ChunkStep::NeedMore),
                Line::Complete { bytes, consumed } => {
                    if bytes.is_empty() {
                        return Ok(ChunkStep::Done { consumed });
                    }
                    match parse_header_line(bytes)? {
                        HeaderLine::Header { name, value } => Ok(ChunkStep::Trailer { name, value, consumed }),
                        HeaderLine::Continuation { .. } | HeaderLine::End => {
                            Err(ServerError::MalformedRequest("malformed trailer line"))
                        }
                    }
                }
            },
        }
    }
}

fn parse_hex(b: &[u8]) -> Option<usize> {
    if b.is_empty() {
        return None;
    }
    let mut n: usize = 0;
    for &c in b {
        let digit = match c {
            b'0'..=b'9' => c - b'0',
            b'a'..=b'f' => c - b'a' + 10,
            b'A'..=b'F' => c - b'A' + 10,
            _ => return None,
        };
        n = n.checked_mul(16)?.checked_add(digit as usize)?;
    }
    Some(n)
}

/// Appends one chunked-framing `"<hex-len>\r\n<data>\r\n"` frame to `out`.
pub(crate) fn encode_chunk(out: &mut Vec<u8>, data: &[u8]) {
    use std::io::Write;
    write!(out, "{:x}\r\n", data.len()).expect("writing to a Vec<u8> cannot fail");
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
}

/// Appends the terminal `"0\r\n\r\n"` frame.
pub(crate) fn encode_last_chunk(out: &mut Vec<u8>) {
    out.extend_from_slice(b"0\r\n\r\n");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_single_chunk_then_terminator() {
        let input = b"5\r\nhello\r\n0\r\n\r\n";
        let mut dec = ChunkedDecoder::new();
        let mut cursor = &input[..];
        let mut collected = Vec::new();
        loop {
            match dec.step(cursor).unwrap() {
                ChunkStep::Data { data, consumed } => {
                    collected.extend_from_slice(data);
                    cursor = &cursor[consumed..];
                }
                ChunkStep::Trailer { .. } => unreachable!(),
                ChunkStep::Done { consumed } => {
                    cursor = &cursor[consumed..];
                    break;
                }
                ChunkStep::NeedMore => panic!("unexpected NeedMore on complete input"),
            }
        }
        assert_eq!(collected, b"hello");
        assert!(cursor.is_empty());
    }

    #[test]
    fn decodes_trailers() {
        let input = b"0\r\nX-Checksum: abc\r\n\r\n";
        let mut dec = ChunkedDecoder::new();
        let mut cursor = &input[..];
        let mut trailers = Vec::new();
        loop {
            match dec.step(cursor).unwrap() {
                ChunkStep::Data { consumed, .. } => cursor = &cursor[consumed..],
                ChunkStep::Trailer { name, value, consumed } => {
                    trailers.push((name.to_vec(), value.to_vec()));
                    cursor = &cursor[consumed..];
                }
                ChunkStep::Done { .. } => break,
                ChunkStep::NeedMore => panic!("unexpected NeedMore"),
            }
        }
        assert_eq!(trailers, vec![(b"X-Checksum".to_vec(), b"abc".to_vec())]);
    }

    #[test]
    fn needs_more_on_partial_chunk() {
        let mut dec = ChunkedDecoder::new();
        // size line completes, then data is incomplete
        let mut cursor: &[u8] = b"5\r\nhel";
        match dec.step(cursor).unwrap() {
            ChunkStep::Data { consumed, .. } => cursor = &cursor[consumed..],
            _ => panic!(),
        }
        assert!(matches!(dec.step(cursor).unwrap(), ChunkStep::NeedMore));
    }

    #[test]
    fn rejects_malformed_chunk_size() {
        let mut dec = ChunkedDecoder::new();
        assert!(dec.step(b"zz\r\n").is_err());
    }

    #[test]
    fn encode_round_trip_ends_in_terminal_frame() {
        let mut out = Vec::new();
        encode_chunk(&mut out, b"hello");
        encode_last_chunk(&mut out);
        assert_eq!(out, b"5\r\nhello\r\n0\r\n\r\n");
    }
}
