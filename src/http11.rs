use crate::buf::ExchangeBuf;
use crate::Error;
use http::{Method, StatusCode, Version};
use std::io::Write;

/// Outcome of looking at the first byte of a request line.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum MethodCandidate {
    /// A single method is possible, verify against `method + SP`.
    One(Method),
    /// `P` is ambiguous, peek at the second byte.
    P,
    /// No method starts with this byte.
    None,
}

/// Selects the method candidate by the first byte of the request line.
pub(crate) fn method_by_first(first: u8) -> MethodCandidate {
    match first {
        b'C' => MethodCandidate::One(Method::CONNECT),
        b'D' => MethodCandidate::One(Method::DELETE),
        b'G' => MethodCandidate::One(Method::GET),
        b'H' => MethodCandidate::One(Method::HEAD),
        b'O' => MethodCandidate::One(Method::OPTIONS),
        b'P' => MethodCandidate::P,
        b'T' => MethodCandidate::One(Method::TRACE),
        _ => MethodCandidate::None,
    }
}

/// Selects between PATCH, POST and PUT by the second byte.
pub(crate) fn method_by_second_p(second: u8) -> Option<Method> {
    match second {
        b'A' => Some(Method::PATCH),
        b'O' => Some(Method::POST),
        b'U' => Some(Method::PUT),
        _ => None,
    }
}

/// The method token followed by a single space, as expected on the wire.
pub(crate) fn method_and_space(method: &Method) -> &'static [u8] {
    match method.as_str() {
        "CONNECT" => b"CONNECT ",
        "DELETE" => b"DELETE ",
        "GET" => b"GET ",
        "HEAD" => b"HEAD ",
        "OPTIONS" => b"OPTIONS ",
        "PATCH" => b"PATCH ",
        "POST" => b"POST ",
        "PUT" => b"PUT ",
        "TRACE" => b"TRACE ",
        // extension methods are never produced by the dispatch table
        _ => b"",
    }
}

/// Maps the parsed major/minor digits to an `http::Version`.
pub(crate) fn version_of(major: u8, minor: u8) -> Version {
    match (major, minor) {
        (0, 9) => Version::HTTP_09,
        (1, 0) => Version::HTTP_10,
        (1, _) => Version::HTTP_11,
        (2, _) => Version::HTTP_2,
        _ => Version::HTTP_3,
    }
}

/// Status line for a response.
///
/// The exchange always answers with HTTP/1.1, also to 1.0 clients.
pub(crate) fn status_line(status: StatusCode) -> Vec<u8> {
    let mut w = Vec::with_capacity(64);

    // writing to a Vec doesn't fail
    let _ = write!(
        w,
        "HTTP/1.1 {} {}\r\n",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Unknown")
    );

    w
}

/// Write the status line at the end of the buffer.
pub(crate) fn write_status_line(status: StatusCode, buf: &mut ExchangeBuf) -> Result<(), Error> {
    let line = status_line(status);

    if !buf.append(&line) {
        let msg = format!(
            "Buffer is not large enough to write out status line: {} < {}",
            buf.remaining(),
            line.len()
        );
        return Err(Error::User(msg));
    }

    trace!("write_status_line: {:?}", String::from_utf8_lossy(&line));

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn first_byte_dispatch_covers_all_methods() {
        let all = [
            Method::CONNECT,
            Method::DELETE,
            Method::GET,
            Method::HEAD,
            Method::OPTIONS,
            Method::PATCH,
            Method::POST,
            Method::PUT,
            Method::TRACE,
        ];

        for m in &all {
            let token = method_and_space(m);
            assert_eq!(&token[..token.len() - 1], m.as_str().as_bytes());

            let found = match method_by_first(token[0]) {
                MethodCandidate::One(m) => m,
                MethodCandidate::P => method_by_second_p(token[1]).unwrap(),
                MethodCandidate::None => panic!("no candidate for {}", m),
            };

            assert_eq!(&found, m);
        }
    }

    #[test]
    fn status_lines() {
        assert_eq!(status_line(StatusCode::OK), b"HTTP/1.1 200 OK\r\n");
        assert_eq!(
            status_line(StatusCode::URI_TOO_LONG),
            b"HTTP/1.1 414 URI Too Long\r\n".to_vec()
        );
    }
}
