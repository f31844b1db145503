//! Request headers recognized by the exchange, and response headers.

use crate::buf::ExchangeBuf;
use http::header::{HeaderName, HeaderValue as ResponseValue};
use std::fmt;
use std::ops::Range;

/// The closed set of request header names the exchange parses into values.
///
/// Any other header is scanned past without being retained.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Header {
    /// `Accept-Encoding`
    AcceptEncoding,
    /// `Connection`
    Connection,
    /// `Content-Length`
    ContentLength,
    /// `Content-Type`
    ContentType,
    /// `Date`
    Date,
    /// `Host`
    Host,
    /// `Transfer-Encoding`
    TransferEncoding,
    /// `User-Agent`
    UserAgent,
}

const COUNT: usize = 8;

// candidate lists keyed by the lowercased first byte of the name
const A: &[Header] = &[Header::AcceptEncoding];
const C: &[Header] = &[Header::Connection, Header::ContentLength, Header::ContentType];
const D: &[Header] = &[Header::Date];
const H: &[Header] = &[Header::Host];
const T: &[Header] = &[Header::TransferEncoding];
const U: &[Header] = &[Header::UserAgent];

impl Header {
    /// Canonical spelling of the header name.
    pub fn as_str(self) -> &'static str {
        match self {
            Header::AcceptEncoding => "Accept-Encoding",
            Header::Connection => "Connection",
            Header::ContentLength => "Content-Length",
            Header::ContentType => "Content-Type",
            Header::Date => "Date",
            Header::Host => "Host",
            Header::TransferEncoding => "Transfer-Encoding",
            Header::UserAgent => "User-Agent",
        }
    }

    /// Canonical byte pattern used for matching.
    pub fn bytes(self) -> &'static [u8] {
        self.as_str().as_bytes()
    }

    fn index(self) -> usize {
        self as usize
    }

    /// Registry entries whose name starts with `first`, ignoring case.
    pub(crate) fn candidates(first: u8) -> &'static [Header] {
        match first.to_ascii_lowercase() {
            b'a' => A,
            b'c' => C,
            b'd' => D,
            b'h' => H,
            b't' => T,
            b'u' => U,
            _ => &[],
        }
    }

    /// Looks up a header name in the registry. Never allocates.
    pub fn from_bytes(name: &[u8]) -> Option<Header> {
        let first = *name.first()?;
        let candidates = Header::candidates(first);

        // exact canonical spelling is the common case
        candidates
            .iter()
            .find(|c| c.bytes() == name)
            .or_else(|| candidates.iter().find(|c| c.bytes().eq_ignore_ascii_case(name)))
            .copied()
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A header value as a view into the exchange buffer.
///
/// The view holds no bytes of its own, it must be resolved against the buffer
/// it was parsed from. The exchange only hands out the resolved `&[u8]` while
/// borrowing itself, so a value can never outlive the bytes it points to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct HeaderValue {
    start: usize,
    end: usize,
}

impl HeaderValue {
    pub fn new(start: usize, end: usize) -> Self {
        assert!(start <= end);
        HeaderValue { start, end }
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn resolve<'a>(&self, buf: &'a ExchangeBuf) -> &'a [u8] {
        buf.slice(self.range())
    }

    /// Case insensitive comparison with `lit`, without allocating.
    pub fn eq_ignore_case(&self, buf: &ExchangeBuf, lit: &[u8]) -> bool {
        self.resolve(buf).eq_ignore_ascii_case(lit)
    }

    /// Parses the value as an unsigned decimal number.
    ///
    /// Only ASCII digits are accepted, no sign and no whitespace.
    pub fn unsigned(&self, buf: &ExchangeBuf) -> Option<u64> {
        let bytes = self.resolve(buf);
        if bytes.is_empty() {
            return None;
        }
        let mut n: u64 = 0;
        for b in bytes {
            if !b.is_ascii_digit() {
                return None;
            }
            n = n.checked_mul(10)?.checked_add((b - b'0') as u64)?;
        }
        Some(n)
    }
}

/// Values of the recognized request headers, keyed by registry index.
#[derive(Debug, Default)]
pub(crate) struct RequestHeaders {
    values: [Option<HeaderValue>; COUNT],
}

impl RequestHeaders {
    pub fn get(&self, header: Header) -> Option<HeaderValue> {
        self.values[header.index()]
    }

    pub fn contains(&self, header: Header) -> bool {
        self.values[header.index()].is_some()
    }

    /// Stores the value, returning the previous one if the header was already seen.
    pub fn insert(&mut self, header: Header, value: HeaderValue) -> Option<HeaderValue> {
        self.values[header.index()].replace(value)
    }

    pub fn clear(&mut self) {
        self.values = Default::default();
    }

    pub fn iter(&self) -> impl Iterator<Item = (Header, HeaderValue)> + '_ {
        ALL.iter()
            .filter_map(move |h| self.get(*h).map(|v| (*h, v)))
    }
}

const ALL: [Header; COUNT] = [
    Header::AcceptEncoding,
    Header::Connection,
    Header::ContentLength,
    Header::ContentType,
    Header::Date,
    Header::Host,
    Header::TransferEncoding,
    Header::UserAgent,
];

/// A response header, serialized to the wire form only when written out.
#[derive(Clone, Debug)]
pub(crate) struct ResponseHeader {
    name: HeaderName,
    value: ResponseValue,
}

impl ResponseHeader {
    pub fn new(name: HeaderName, value: ResponseValue) -> Self {
        ResponseHeader { name, value }
    }

    pub fn name(&self) -> &HeaderName {
        &self.name
    }

    pub fn value(&self) -> &ResponseValue {
        &self.value
    }

    /// Length of `name: value\r\n`.
    pub fn wire_len(&self) -> usize {
        self.name.as_str().len() + 2 + self.value.as_bytes().len() + 2
    }

    /// Appends `name: value\r\n` to the buffer, returns false if it doesn't fit.
    pub fn write_to(&self, buf: &mut ExchangeBuf) -> bool {
        if self.wire_len() > buf.remaining() {
            return false;
        }
        buf.append(self.name.as_str().as_bytes());
        buf.append(b": ");
        buf.append(self.value.as_bytes());
        buf.append(b"\r\n");
        true
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn registry_lookup() {
        assert_eq!(Header::from_bytes(b"Host"), Some(Header::Host));
        assert_eq!(Header::from_bytes(b"content-length"), Some(Header::ContentLength));
        assert_eq!(Header::from_bytes(b"CONTENT-TYPE"), Some(Header::ContentType));
        assert_eq!(Header::from_bytes(b"Content-Lengthy"), None);
        assert_eq!(Header::from_bytes(b"X-Forwarded-For"), None);
        assert_eq!(Header::from_bytes(b""), None);
    }

    #[test]
    fn header_order_matches_index() {
        for (i, h) in ALL.iter().enumerate() {
            assert_eq!(h.index(), i);
        }
    }

    #[test]
    fn unsigned_values() {
        let mut buf = ExchangeBuf::with_capacity(64);
        buf.append(b"123 12a 18446744073709551616");

        assert_eq!(HeaderValue::new(0, 3).unsigned(&buf), Some(123));
        assert_eq!(HeaderValue::new(4, 7).unsigned(&buf), None);
        assert_eq!(HeaderValue::new(8, 28).unsigned(&buf), None);
        assert_eq!(HeaderValue::new(0, 0).unsigned(&buf), None);
    }
}
