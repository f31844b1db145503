use std::ops::Range;

/// Fixed size buffer shared by request parsing and response serialization.
///
/// Bytes between `0` and `limit` are valid. Parsing moves `index` forward as
/// input is consumed, serialization appends at `limit`. The buffer never
/// grows, so a [`Range`] recorded into it stays meaningful until the next
/// reset.
///
/// Invariant: `index <= limit <= capacity()`.
#[derive(Debug)]
pub(crate) struct ExchangeBuf {
    buf: Box<[u8]>,
    index: usize,
    limit: usize,
}

impl ExchangeBuf {
    pub fn with_capacity(capacity: usize) -> Self {
        ExchangeBuf {
            buf: vec![0; capacity].into_boxed_slice(),
            index: 0,
            limit: 0,
        }
    }

    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    #[inline(always)]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline(always)]
    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn set_index(&mut self, index: usize) {
        assert!(index <= self.limit, "ExchangeBuf::set_index past limit");
        self.index = index;
    }

    /// Sets both cursors, used when a chunk is framed somewhere inside the buffer.
    pub fn set_window(&mut self, window: Range<usize>) {
        assert!(window.start <= window.end && window.end <= self.buf.len());
        self.index = window.start;
        self.limit = window.end;
    }

    pub fn reset(&mut self) {
        self.index = 0;
        self.limit = 0;
    }

    pub fn is_full(&self) -> bool {
        self.limit == self.buf.len()
    }

    /// Tells if `index` points to a readable byte.
    #[inline(always)]
    pub fn has_index(&self, index: usize) -> bool {
        index < self.limit
    }

    #[inline(always)]
    pub fn get(&self, index: usize) -> u8 {
        self.buf[index]
    }

    /// Compares the buffer contents starting at `start` with `target`.
    ///
    /// Returns false when the buffer does not hold enough bytes.
    pub fn equals(&self, target: &[u8], start: usize) -> bool {
        let end = start + target.len();
        end <= self.limit && &self.buf[start..end] == target
    }

    /// Tells if the readable bytes at `start` are a prefix of `target`.
    pub fn is_prefix_of(&self, target: &[u8], start: usize) -> bool {
        let end = self.limit.min(start + target.len());
        self.buf[start..end] == target[..(end - start)]
    }

    /// The part of the buffer after `limit` that can be read into.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.limit..]
    }

    /// Extends `limit` after bytes were read into `spare_mut()`.
    pub fn extend(&mut self, amount: usize) {
        assert!(
            self.limit + amount <= self.buf.len(),
            "ExchangeBuf::extend with not enough len"
        );
        self.limit += amount;
    }

    /// Number of bytes that can still be appended.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.limit
    }

    /// Appends the slice if it fits entirely, returns whether it did.
    pub fn append(&mut self, data: &[u8]) -> bool {
        if data.len() > self.remaining() {
            return false;
        }
        self.buf[self.limit..(self.limit + data.len())].copy_from_slice(data);
        self.limit += data.len();
        true
    }

    /// The bytes between `index` and `limit`.
    pub fn pending(&self) -> &[u8] {
        &self.buf[self.index..self.limit]
    }

    /// Read access to a range inside the buffer.
    pub fn slice(&self, range: Range<usize>) -> &[u8] {
        &self.buf[range]
    }
}

impl std::ops::Deref for ExchangeBuf {
    type Target = [u8];
    fn deref(&self) -> &Self::Target {
        &self.buf[..]
    }
}

impl std::ops::DerefMut for ExchangeBuf {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buf[..]
    }
}
