//! Per-connection bump allocator with a "reset to mark" discipline.
//!
//! One region is sized at connection creation and reused for the life of the connection;
//! `reset_to_mark` reclaims everything allocated since a saved cursor without touching the
//! allocator, which is what makes keep-alive cheap: parsing the next request on the same
//! connection starts from the same high-water mark as the first one did.
//!
//! Allocations are handed back as `(offset, len)` pairs ([`PoolRef`]) rather than raw
//! pointers, so nothing here needs `unsafe`: a `PoolRef` is only ever meaningful together
//! with the `Pool` it came from, and borrowing through `Pool::get` ties the returned slice's
//! lifetime to `&self` the ordinary way.

/// An allocation inside a [`Pool`]. Meaningless on its own — resolve it with
/// [`Pool::get`]/[`Pool::get_mut`] on the same pool that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolRef {
    offset: usize,
    len: usize,
}

impl PoolRef {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// A saved allocation cursor. Opaque; obtained from [`Pool::mark`], consumed by
/// [`Pool::reset_to_mark`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mark(usize);

/// Errors from pool operations. There is no "free a specific allocation" error because
/// there is no per-object free: callers that over-allocate abandon the allocation and
/// `reset_to_mark` to recover it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolExhausted;

/// A contiguous, linearly-allocated region owned by one connection.
pub struct Pool {
    buffer: Box<[u8]>,
    cursor: usize,
    /// Offset of the most recent allocation, for in-place `reallocate` growth.
    last_alloc: Option<PoolRef>,
    high_water_mark: usize,
}

impl Pool {
    /// Allocates a region of `region_size` zeroed bytes.
    pub fn new(region_size: usize) -> Self {
        Pool {
            buffer: vec![0u8; region_size].into_boxed_slice(),
            cursor: 0,
            last_alloc: None,
            high_water_mark: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.cursor
    }

    /// The furthest the allocation cursor has ever advanced. This only decreases via
    /// [`Pool::reset_to_mark`], never on its own.
    pub fn high_water_mark(&self) -> usize {
        self.high_water_mark
    }

    /// Reserves `n` bytes, returning a [`PoolRef`] to them. Fails (without partially
    /// mutating state) when fewer than `n` bytes remain.
    pub fn allocate(&mut self, n: usize) -> Result<PoolRef, PoolExhausted> {
        if self.remaining() < n {
            return Err(PoolExhausted);
        }
        let r = PoolRef {
            offset: self.cursor,
            len: n,
        };
        self.cursor += n;
        if self.cursor > self.high_water_mark {
            self.high_water_mark = self.cursor;
        }
        self.last_alloc = Some(r);
        Ok(r)
    }

    /// Copies `data` into a fresh allocation and returns a reference to it.
    pub fn write(&mut self, data: &[u8]) -> Result<PoolRef, PoolExhausted> {
        let r = self.allocate(data.len())?;
        self.buffer[r.offset..r.offset + r.len].copy_from_slice(data);
        Ok(r)
    }

    /// Grows or shrinks `r` to `new_len`. If `r` is the most recent allocation this extends
    /// in place (when room remains); otherwise a fresh allocation is made and the
    /// overlapping prefix copied.
    pub fn reallocate(&mut self, r: PoolRef, new_len: usize) -> Result<PoolRef, PoolExhausted> {
        if self.last_alloc == Some(r) {
            let grow_by = new_len.saturating_sub(r.len);
            if grow_by == 0 {
                let shrunk = PoolRef {
                    offset: r.offset,
                    len: new_len,
                };
                self.cursor = r.offset + new_len;
                self.last_alloc = Some(shrunk);
                return Ok(shrunk);
            }
            if self.remaining() >= grow_by {
                self.cursor += grow_by;
                if self.cursor > self.high_water_mark {
                    self.high_water_mark = self.cursor;
                }
                let grown = PoolRef {
                    offset: r.offset,
                    len: new_len,
                };
                self.last_alloc = Some(grown);
                return Ok(grown);
            }
            return Err(PoolExhausted);
        }
        let fresh = self.allocate(new_len)?;
        let copy_len = r.len.min(new_len);
        let (src_start, src_end) = (r.offset, r.offset + copy_len);
        let dst_start = fresh.offset;
        self.buffer.copy_within(src_start..src_end, dst_start);
        Ok(fresh)
    }

    /// Saves the current allocation cursor.
    pub fn mark(&self) -> Mark {
        Mark(self.cursor)
    }

    /// Restores the cursor to a previously saved mark, invalidating every [`PoolRef`]
    /// allocated since. Callers must not dereference such refs afterward; nothing here can
    /// enforce that statically since refs are plain `Copy` values, not borrows.
    pub fn reset_to_mark(&mut self, mark: Mark) {
        debug_assert!(mark.0 <= self.cursor, "mark must not be ahead of the cursor");
        self.cursor = mark.0;
        self.last_alloc = None;
    }

    pub fn get(&self, r: PoolRef) -> &[u8] {
        &self.buffer[r.offset..r.offset + r.len]
    }

    pub fn get_mut(&mut self, r: PoolRef) -> &mut [u8] {
        &mut self.buffer[r.offset..r.offset + r.len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_and_read_back() {
        let mut pool = Pool::new(64);
        let r = pool.write(b"hello").unwrap();
        assert_eq!(pool.get(r), b"hello");
        assert_eq!(pool.high_water_mark(), 5);
    }

    #[test]
    fn exhaustion_fails_cleanly() {
        let mut pool = Pool::new(4);
        assert!(pool.allocate(5).is_err());
        assert_eq!(pool.remaining(), 4);
    }

    #[test]
    fn reset_to_mark_reclaims_space_but_keeps_high_water_mark() {
        let mut pool = Pool::new(16);
        let mark = pool.mark();
        pool.write(b"0123456789ABCDE").unwrap();
        assert_eq!(pool.remaining(), 1);
        pool.reset_to_mark(mark);
        assert_eq!(pool.remaining(), 16);
        assert_eq!(pool.high_water_mark(), 15);
    }

    #[test]
    fn reallocate_in_place_when_most_recent() {
        let mut pool = Pool::new(32);
        let r = pool.write(b"abc").unwrap();
        let grown = pool.reallocate(r, 6).unwrap();
        assert_eq!(grown.len(), 6);
        pool.get_mut(grown)[3..6].copy_from_slice(b"def");
        assert_eq!(pool.get(grown), b"abcdef");
    }

    #[test]
    fn reallocate_copies_when_not_most_recent() {
        let mut pool = Pool::new(32);
        let first = pool.write(b"abc").unwrap();
        let _second = pool.write(b"xyz").unwrap();
        let grown = pool.reallocate(first, 5).unwrap();
        assert_eq!(&pool.get(grown)[..3], b"abc");
    }

    #[test]
    fn keepalive_cycle_restores_same_high_water_mark() {
        let mut pool = Pool::new(64);
        for _ in 0..3 {
            let mark = pool.mark();
            pool.write(b"request-scratch").unwrap();
            pool.reset_to_mark(mark);
        }
        assert_eq!(pool.high_water_mark(), 15);
        assert_eq!(pool.remaining(), 64);
    }
}
