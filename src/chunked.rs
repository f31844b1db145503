//! Chunked transfer coding of a streamed response body.
//!
//! Chunks are framed in place in the exchange buffer. The writer keeps room
//! for the hex length and CRLF in front of the data and for the trailing CRLF
//! after it:
//!
//! ```text
//! |  head room  |          data           |CRLF|
//!      ^ hex length + CRLF, right aligned
//! ```
//!
//! so a full buffer goes out as one contiguous write.
//!
//! A HTTP/1.0 peer can't receive chunks. The same writer then passes the
//! data through unframed and the end of the body is the end of the connection.

use std::ops::Range;

const CRLF: &[u8] = b"\r\n";
const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

/// Smallest buffer able to carry at least one byte of chunk data.
pub(crate) const MIN_CAPACITY: usize = 16;

#[derive(Debug)]
pub(crate) struct ChunkedWriter {
    /// Start of the data region.
    head: usize,
    /// Room kept after the data region.
    tail: usize,
    /// Chunk framing, false for a close delimited body.
    framed: bool,
    /// Bytes of data currently buffered.
    len: usize,
    /// The body producer reported end of data.
    eof: bool,
}

impl ChunkedWriter {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= MIN_CAPACITY, "Buffer too small for chunked body");

        // the largest chunk is smaller than the capacity, so its length
        // never needs more hex digits than the capacity itself.
        let head = hex_digits(capacity) + CRLF.len();

        ChunkedWriter {
            head,
            tail: CRLF.len(),
            framed: true,
            len: 0,
            eof: false,
        }
    }

    /// Writer passing data through without chunk framing.
    pub fn close_delimited() -> Self {
        ChunkedWriter {
            head: 0,
            tail: 0,
            framed: false,
            len: 0,
            eof: false,
        }
    }

    /// Where the next body bytes go.
    pub fn spare<'a>(&self, buf: &'a mut [u8]) -> &'a mut [u8] {
        let end = buf.len() - self.tail;
        &mut buf[(self.head + self.len)..end]
    }

    /// Accept `amount` bytes written into `spare()`.
    pub fn advance(&mut self, amount: usize) {
        self.len += amount;
    }

    pub fn is_full(&self, capacity: usize) -> bool {
        self.head + self.len == capacity - self.tail
    }

    pub fn has_data(&self) -> bool {
        self.len > 0
    }

    pub fn set_eof(&mut self) {
        self.eof = true;
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// Frames the buffered data as one chunk, returning the range to write out.
    ///
    /// The writer is empty again afterwards.
    pub fn frame(&mut self, buf: &mut [u8]) -> Range<usize> {
        assert!(self.len > 0, "frame() with no chunk data");

        if !self.framed {
            let len = self.len;
            self.len = 0;
            return 0..len;
        }

        let mut hex = [0_u8; 16];
        let digits = write_hex(self.len, &mut hex);

        let crlf_at = self.head - CRLF.len();
        let start = crlf_at - digits;

        buf[start..crlf_at].copy_from_slice(&hex[..digits]);
        buf[crlf_at..self.head].copy_from_slice(CRLF);

        let end = self.head + self.len;
        buf[end..(end + CRLF.len())].copy_from_slice(CRLF);

        trace!("Chunk framed: {} bytes", self.len);

        self.len = 0;

        start..(end + CRLF.len())
    }

    /// Writes the terminating zero length chunk.
    pub fn finish(&mut self, buf: &mut [u8]) -> Range<usize> {
        assert!(self.len == 0, "finish() with unframed chunk data");

        if !self.framed {
            return 0..0;
        }

        buf[..LAST_CHUNK.len()].copy_from_slice(LAST_CHUNK);

        0..LAST_CHUNK.len()
    }
}

fn hex_digits(mut n: usize) -> usize {
    let mut digits = 1;
    while n >= 16 {
        n >>= 4;
        digits += 1;
    }
    digits
}

fn write_hex(n: usize, out: &mut [u8; 16]) -> usize {
    const HEX: &[u8] = b"0123456789abcdef";

    let digits = hex_digits(n);
    let mut v = n;
    for i in (0..digits).rev() {
        out[i] = HEX[v & 0xf];
        v >>= 4;
    }
    digits
}
