use crate::buf::ExchangeBuf;
use crate::handler::{Response, ResponseBody};
use crate::header::{Header, RequestHeaders};
use crate::Error;
use http::header::{CONNECTION, CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderValue, StatusCode};
use std::fmt;

/// How the request body is delimited, decided from the request headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LimitRead {
    /// Body data is limited by a `content-length` header.
    ContentLength(u64),
    /// Some `transfer-encoding` is used. Not supported for requests.
    TransferCoded,
    /// The `content-length` header is not a valid number.
    Invalid,
    /// No expected body.
    NoBody,
}

impl LimitRead {
    /// Create an instance from request headers.
    ///
    /// 1. If header `transfer-encoding` is present, regardless of other headers.
    /// 2. If header `content-length: <number>` use a reader limited by length
    /// 3. Otherwise consider there being no body.
    pub fn from_headers(headers: &RequestHeaders, buf: &ExchangeBuf) -> Self {
        // https://tools.ietf.org/html/rfc7230#page-31
        // If a message is received with both a Transfer-Encoding and a
        // Content-Length header field, the Transfer-Encoding overrides the
        // Content-Length.
        let ret = if headers.contains(Header::TransferEncoding) {
            LimitRead::TransferCoded
        } else if let Some(value) = headers.get(Header::ContentLength) {
            match value.unsigned(buf) {
                Some(size) => LimitRead::ContentLength(size),
                None => LimitRead::Invalid,
            }
        } else {
            LimitRead::NoBody
        };

        trace!("LimitRead from headers: {:?}", ret);

        ret
    }
}

/// Decides whether the connection is kept open after this exchange.
///
/// An explicit `connection: keep-alive` or `close` wins, otherwise
/// HTTP/1.1 and later defaults to keep-alive.
pub(crate) fn allow_reuse(
    headers: &RequestHeaders,
    buf: &ExchangeBuf,
    version_major: u8,
    version_minor: u8,
) -> bool {
    let default = version_major == 1 && version_minor >= 1;

    headers
        .get(Header::Connection)
        .and_then(|v| {
            if v.eq_ignore_case(buf, b"keep-alive") {
                Some(true)
            } else if v.eq_ignore_case(buf, b"close") {
                Some(false)
            } else {
                None
            }
        })
        .unwrap_or(default)
}

/// How the response body is written, decided once the handler returned.
pub(crate) enum LimitWrite {
    /// Write data using a chunked encoder.
    ChunkedEncoder,
    /// Body bytes of a length announced by the `content-length` header.
    ContentLength(u64),
    /// Streamed body to a HTTP/1.0 peer, delimited by closing the connection.
    CloseDelimited,
    /// There should be no body.
    NoBody,
}

impl LimitWrite {
    /// Decide the framing of a response and add the framing headers the handler left out.
    ///
    /// https://tools.ietf.org/html/rfc7230#page-31
    /// Any response to a HEAD request and any response with a 1xx
    /// (Informational), 204 (No Content), or 304 (Not Modified) status code
    /// is always terminated by the first empty line after the header fields.
    pub fn from_response(
        res: &mut Response,
        is_head: bool,
        version_major: u8,
        version_minor: u8,
    ) -> Result<Self, Error> {
        let status = res.status.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let declared = match res.header(&CONTENT_LENGTH) {
            Some(v) => Some(
                v.to_str()
                    .ok()
                    .and_then(|v| v.parse::<u64>().ok())
                    .ok_or_else(|| Error::User(format!("Bad content-length header: {:?}", v)))?,
            ),
            None => None,
        };

        let transfer_encoding = res.header(&TRANSFER_ENCODING).cloned();
        let has_te = transfer_encoding.is_some();

        let no_body_status = status.is_informational()
            || status == StatusCode::NO_CONTENT
            || status == StatusCode::NOT_MODIFIED;

        // length of a fixed body, if that is what the handler gave us
        let fixed_len = match &res.body {
            Some(ResponseBody::Bytes(b)) => Some(b.len() as u64),
            _ => None,
        };

        if no_body_status || is_head {
            // a HEAD response announces the length a GET would have had
            if let (false, Some(len)) = (no_body_status, fixed_len) {
                if declared.is_none() && !has_te {
                    res.push_header(CONTENT_LENGTH, HeaderValue::from(len));
                }
            }

            if res.body.take().is_some() {
                trace!("Dropping response body for {} (HEAD: {})", status, is_head);
            }

            return Ok(LimitWrite::NoBody);
        }

        let ret = if let Some(len) = fixed_len {
            if has_te {
                let m = "Fixed size body with transfer-encoding header".to_string();
                return Err(Error::User(m));
            }

            match declared {
                Some(n) if n != len => {
                    let m = format!(
                        "Body data length differs from content-length header: {} != {}",
                        len, n
                    );
                    return Err(Error::User(m));
                }
                Some(_) => {}
                None => res.push_header(CONTENT_LENGTH, HeaderValue::from(len)),
            }

            LimitWrite::ContentLength(len)
        } else if res.body.is_some() {
            // streamed body
            if declared.is_some() {
                let m = "Streamed body with content-length header".to_string();
                return Err(Error::User(m));
            }

            // https://tools.ietf.org/html/rfc7230#section-3.3.1
            // A server MUST NOT send a response containing Transfer-Encoding
            // unless the corresponding request indicates HTTP/1.1 (or later).
            let is_11 = version_major == 1 && version_minor >= 1;

            if !is_11 {
                if has_te {
                    let m = "Transfer-encoding header in response to HTTP/1.0".to_string();
                    return Err(Error::User(m));
                }

                LimitWrite::CloseDelimited
            } else {
                match transfer_encoding {
                    None => {
                        res.set_header(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
                    }
                    Some(v) if !ends_with_chunked(&v) => {
                        // the body goes out chunked regardless, say so last
                        let mut value = v.as_bytes().to_vec();
                        value.extend_from_slice(b", chunked");
                        let value =
                            HeaderValue::from_bytes(&value).map_err(|e| Error::Http(e.into()))?;
                        res.set_header(TRANSFER_ENCODING, value);
                    }
                    Some(_) => {}
                }

                LimitWrite::ChunkedEncoder
            }
        } else {
            if let Some(n) = declared {
                if n > 0 {
                    let m = format!("Response has content-length {} but no body", n);
                    return Err(Error::User(m));
                }
            } else if !has_te {
                res.push_header(CONTENT_LENGTH, HeaderValue::from(0_u64));
            }

            LimitWrite::NoBody
        };

        trace!("LimitWrite from response: {:?}", ret);

        Ok(ret)
    }

    /// Tells if the end of the body is signalled by closing the connection.
    pub fn is_close_delimited(&self) -> bool {
        matches!(self, LimitWrite::CloseDelimited)
    }
}

/// Tells if the last transfer coding in the header value is `chunked`.
fn ends_with_chunked(value: &HeaderValue) -> bool {
    value
        .as_bytes()
        .rsplit(|b| *b == b',')
        .next()
        .map(|last| trim(last).eq_ignore_ascii_case(b"chunked"))
        .unwrap_or(false)
}

fn trim(mut v: &[u8]) -> &[u8] {
    while let [b' ' | b'\t', rest @ ..] = v {
        v = rest;
    }
    while let [rest @ .., b' ' | b'\t'] = v {
        v = rest;
    }
    v
}

/// Makes the response tell the peer whether the connection stays open.
///
/// A `connection: close` set by the handler forfeits keep-alive. A
/// `connection: keep-alive` set by the handler on an exchange that is
/// going to close is replaced with `close`.
pub(crate) fn connection_header(
    res: &mut Response,
    keep_alive: &mut bool,
    version_major: u8,
    version_minor: u8,
) {
    if let Some(v) = res.header(&CONNECTION) {
        if v.as_bytes().eq_ignore_ascii_case(b"close") {
            *keep_alive = false;
        } else if !*keep_alive {
            res.set_header(CONNECTION, HeaderValue::from_static("close"));
        }
        return;
    }

    let is_11 = version_major == 1 && version_minor >= 1;

    if is_11 && !*keep_alive {
        res.push_header(CONNECTION, HeaderValue::from_static("close"));
    } else if !is_11 && *keep_alive {
        res.push_header(CONNECTION, HeaderValue::from_static("keep-alive"));
    }
}

impl fmt::Debug for LimitWrite {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LimitWrite::ChunkedEncoder => write!(f, "ChunkedEncoder")?,
            LimitWrite::ContentLength(l) => write!(f, "ContentLength({})", l)?,
            LimitWrite::CloseDelimited => write!(f, "CloseDelimited")?,
            LimitWrite::NoBody => write!(f, "NoBody")?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn last_coding_is_chunked() {
        let chunked = |v: &'static str| ends_with_chunked(&HeaderValue::from_static(v));

        assert!(chunked("chunked"));
        assert!(chunked("gzip, Chunked"));
        assert!(chunked("gzip,chunked \t"));
        assert!(!chunked("gzip"));
        assert!(!chunked("chunked, gzip"));
        assert!(!chunked(""));
    }
}
