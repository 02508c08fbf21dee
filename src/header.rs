//! Append-ordered, case-insensitive, pool-backed header store.
//!
//! Covers six header *kinds* (request, response, cookie, GET arg, POST arg, footer) while
//! keeping one simple design: bytes live in the connection's pool, lookup is a linear
//! case-insensitive scan. n is small in practice, so the scan never shows up in a profile.

use crate::pool::{Pool, PoolRef};

/// Which logical bucket a stored header belongs to. `Lookup`s can filter by kind; iteration
/// without a filter walks all of them in insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderKind {
    Request,
    Response,
    Cookie,
    GetArg,
    PostArg,
    Footer,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    kind: HeaderKind,
    name: PoolRef,
    value: PoolRef,
}

/// Ordered sequence of `(kind, name, value)` triples, all backed by one connection's pool.
#[derive(Default)]
pub struct HeaderStore {
    entries: Vec<Entry>,
}

impl HeaderStore {
    pub fn new() -> Self {
        HeaderStore { entries: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Appends a header. `name`/`value` are copied into `pool`. O(1) besides the copy.
    pub fn append(
        &mut self,
        pool: &mut Pool,
        kind: HeaderKind,
        name: &[u8],
        value: &[u8],
    ) -> Result<(), crate::pool::PoolExhausted> {
        let name = pool.write(name)?;
        let value = pool.write(value)?;
        self.entries.push(Entry { kind, name, value });
        Ok(())
    }

    /// Case-insensitive lookup of the first header named `name`, optionally restricted to
    /// one kind. Returns the raw bytes.
    pub fn get<'a>(&self, pool: &'a Pool, name: &[u8], kind: Option<HeaderKind>) -> Option<&'a [u8]> {
        self.entries
            .iter()
            .find(|e| kind.map_or(true, |k| k == e.kind) && pool.get(e.name).eq_ignore_ascii_case(name))
            .map(|e| pool.get(e.value))
    }

    /// All values for `name`, in insertion order, optionally restricted to one kind.
    pub fn get_all<'a>(
        &'a self,
        pool: &'a Pool,
        name: &'a [u8],
        kind: Option<HeaderKind>,
    ) -> impl Iterator<Item = &'a [u8]> + 'a {
        self.entries
            .iter()
            .filter(move |e| kind.map_or(true, |k| k == e.kind) && pool.get(e.name).eq_ignore_ascii_case(name))
            .map(move |e| pool.get(e.value))
    }

    /// Iterates every stored header, in insertion order, halting early when `f` returns
    /// `false`.
    pub fn for_each<'a>(&'a self, pool: &'a Pool, mut f: impl FnMut(HeaderKind, &'a [u8], &'a [u8]) -> bool) {
        for e in &self.entries {
            if !f(e.kind, pool.get(e.name), pool.get(e.value)) {
                break;
            }
        }
    }

    /// The most recently appended header of the given kind, used by continuation-line
    /// folding to find the header a leading-whitespace line should extend.
    pub(crate) fn last_of_kind(&self, kind: HeaderKind) -> Option<usize> {
        self.entries.iter().rposition(|e| e.kind == kind)
    }

    pub(crate) fn value_ref(&self, index: usize) -> PoolRef {
        self.entries[index].value
    }

    pub(crate) fn set_value_ref(&mut self, index: usize, value: PoolRef) {
        self.entries[index].value = value;
    }
}

/// Header names/values containing these bytes are rejected outright (CRLF injection);
/// empty names/values are rejected too.
pub fn is_valid_header_component(bytes: &[u8]) -> bool {
    !bytes.is_empty() && !bytes.iter().any(|&b| b == b'\t' || b == b'\r' || b == b'\n')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_insensitive_lookup() {
        let mut pool = Pool::new(256);
        let mut headers = HeaderStore::new();
        headers
            .append(&mut pool, HeaderKind::Request, b"Content-Length", b"13")
            .unwrap();
        assert_eq!(headers.get(&pool, b"content-length", None), Some(&b"13"[..]));
        assert_eq!(headers.get(&pool, b"CONTENT-LENGTH", None), Some(&b"13"[..]));
    }

    #[test]
    fn kind_filtering() {
        let mut pool = Pool::new(256);
        let mut headers = HeaderStore::new();
        headers.append(&mut pool, HeaderKind::Request, b"x", b"1").unwrap();
        headers.append(&mut pool, HeaderKind::Footer, b"x", b"2").unwrap();
        assert_eq!(headers.get(&pool, b"x", Some(HeaderKind::Request)), Some(&b"1"[..]));
        assert_eq!(headers.get(&pool, b"x", Some(HeaderKind::Footer)), Some(&b"2"[..]));
    }

    #[test]
    fn duplicates_preserved_in_order() {
        let mut pool = Pool::new(256);
        let mut headers = HeaderStore::new();
        headers.append(&mut pool, HeaderKind::Request, b"x-tag", b"a").unwrap();
        headers.append(&mut pool, HeaderKind::Request, b"x-tag", b"b").unwrap();
        let all: Vec<_> = headers.get_all(&pool, b"x-tag", None).collect();
        assert_eq!(all, vec![&b"a"[..], &b"b"[..]]);
    }

    #[test]
    fn iteration_stop_signal() {
        let mut pool = Pool::new(256);
        let mut headers = HeaderStore::new();
        headers.append(&mut pool, HeaderKind::Request, b"a", b"1").unwrap();
        headers.append(&mut pool, HeaderKind::Request, b"b", b"2").unwrap();
        let mut seen = Vec::new();
        headers.for_each(&pool, |_, name, _| {
            seen.push(name.to_vec());
            false
        });
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], b"a");
    }

    #[test]
    fn header_injection_rejected() {
        assert!(!is_valid_header_component(b"a\r\nSet-Cookie: evil"));
        assert!(!is_valid_header_component(b""));
        assert!(is_valid_header_component(b"normal-value"));
    }
}
