//! Application handlers and the capability they are invoked with.

use crate::buf::ExchangeBuf;
use crate::error::BoxError;
use crate::header::{Header, RequestHeaders, ResponseHeader};
use crate::http11::version_of;
use crate::segments::Segments;
use crate::Error;
use http::header::{HeaderName, HeaderValue, DATE};
use http::{Method, StatusCode, Version};
use httpdate::fmt_http_date;
use percent_encoding::percent_decode_str;
use std::borrow::Cow;
use std::convert::TryFrom;
use std::fmt;
use std::io;
use std::ops::Range;
use std::time::SystemTime;
use url::form_urlencoded;

/// Handles one request.
///
/// A new handler is obtained from the [`HandlerFactory`] for every request,
/// so handler state never leaks between requests on a kept-alive connection.
pub trait Handler {
    /// Read the request and set the response on `http`.
    ///
    /// Returning an error (or panicking) makes the exchange answer with
    /// `500 Internal Server Error` and close the connection. The error is
    /// then returned from the response phase.
    fn handle(&mut self, http: &mut Http<'_>) -> Result<(), BoxError>;
}

/// Produces one [`Handler`] per request.
///
/// Implemented for any `Fn() -> impl Handler`.
pub trait HandlerFactory: Send + Sync {
    /// Create the handler for the next request.
    fn create(&self) -> Box<dyn Handler>;
}

impl<F, H> HandlerFactory for F
where
    F: Fn() -> H + Send + Sync,
    H: Handler + 'static,
{
    fn create(&self) -> Box<dyn Handler> {
        Box::new(self())
    }
}

/// Handler wrapping a closure, see [`handler_fn`].
pub struct HandlerFn<F>(F);

/// Make a [`Handler`] from a closure.
///
/// ```
/// use h1_exchange::handler_fn;
/// use http::StatusCode;
///
/// let factory = || {
///     handler_fn(|http| {
///         http.status(StatusCode::OK);
///         http.header("content-type", "text/plain")?;
///         http.body("Hello world!\n");
///         Ok(())
///     })
/// };
/// # let _ = factory;
/// ```
pub fn handler_fn<F>(f: F) -> HandlerFn<F>
where
    F: FnMut(&mut Http<'_>) -> Result<(), BoxError>,
{
    HandlerFn(f)
}

impl<F> Handler for HandlerFn<F>
where
    F: FnMut(&mut Http<'_>) -> Result<(), BoxError>,
{
    fn handle(&mut self, http: &mut Http<'_>) -> Result<(), BoxError> {
        (self.0)(http)
    }
}

impl<F> fmt::Debug for HandlerFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HandlerFn")
    }
}

/// The parsed request. Ranges point into the exchange buffer.
#[derive(Debug, Default)]
pub(crate) struct RequestParts {
    pub method: Option<Method>,
    pub segments: Segments,
    pub path: Option<Range<usize>>,
    pub query: Option<Range<usize>>,
    pub headers: RequestHeaders,
    pub body: Option<Range<usize>>,
    pub version_major: u8,
    pub version_minor: u8,
}

impl RequestParts {
    pub fn clear(&mut self) {
        self.method = None;
        self.segments = Segments::new();
        self.path = None;
        self.query = None;
        self.headers.clear();
        self.body = None;
        self.version_major = 0;
        self.version_minor = 0;
    }
}

/// Response body set by a handler.
pub(crate) enum ResponseBody {
    /// Fixed payload, written after the header block.
    Bytes(Vec<u8>),
    /// Streamed payload, written with chunked transfer coding.
    Stream(Box<dyn io::Read + Send>),
}

/// The response a handler builds.
#[derive(Default)]
pub(crate) struct Response {
    pub status: Option<StatusCode>,
    pub headers: Vec<ResponseHeader>,
    pub body: Option<ResponseBody>,
}

impl Response {
    /// First header with `name`.
    pub fn header(&self, name: &HeaderName) -> Option<&HeaderValue> {
        self.headers
            .iter()
            .find(|h| h.name() == name)
            .map(|h| h.value())
    }

    pub fn push_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.push(ResponseHeader::new(name, value));
    }

    /// Replaces the first header with `name`, or adds it.
    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        match self.headers.iter_mut().find(|h| *h.name() == name) {
            Some(h) => *h = ResponseHeader::new(name, value),
            None => self.push_header(name, value),
        }
    }

    pub fn clear(&mut self) {
        self.status = None;
        self.headers.clear();
        self.body = None;
    }
}

/// Read access to the request and write access to the response.
///
/// Only exists while the handler is invoked. Request values borrow the
/// exchange buffer, which is why they can't be kept past the handler call.
pub struct Http<'a> {
    buf: &'a ExchangeBuf,
    req: &'a RequestParts,
    res: &'a mut Response,
}

impl<'a> Http<'a> {
    pub(crate) fn new(buf: &'a ExchangeBuf, req: &'a RequestParts, res: &'a mut Response) -> Self {
        Http { buf, req, res }
    }

    /// The request method.
    pub fn method(&self) -> &'a Method {
        self.req
            .method
            .as_ref()
            .expect("Http created before the request method was parsed")
    }

    /// The request path split into segments.
    pub fn segments(&self) -> &'a Segments {
        &self.req.segments
    }

    /// The request path, percent decoded, without query.
    pub fn path(&self) -> Cow<'a, str> {
        percent_decode_str(self.raw_path()).decode_utf8_lossy()
    }

    /// The request path as received, without query.
    pub fn raw_path(&self) -> &'a str {
        self.req
            .path
            .clone()
            .and_then(|r| std::str::from_utf8(self.buf.slice(r)).ok())
            .unwrap_or("/")
    }

    /// The query part of the request target as received, without the `?`.
    pub fn raw_query(&self) -> Option<&'a str> {
        self.req
            .query
            .clone()
            .and_then(|r| std::str::from_utf8(self.buf.slice(r)).ok())
    }

    /// First value of the query parameter `name`, decoded.
    ///
    /// A parameter without `=` has the empty value.
    pub fn query_param(&self, name: &str) -> Option<Cow<'a, str>> {
        self.query_pairs().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    /// All values of the query parameter `name` in request order.
    pub fn query_param_all(&self, name: &str) -> Vec<Cow<'a, str>> {
        self.query_pairs()
            .filter(|(k, _)| k == name)
            .map(|(_, v)| v)
            .collect()
    }

    /// Names of the query parameters, each once, in request order.
    pub fn query_param_names(&self) -> Vec<Cow<'a, str>> {
        let mut names: Vec<Cow<'a, str>> = vec![];
        for (k, _) in self.query_pairs() {
            if !names.contains(&k) {
                names.push(k);
            }
        }
        names
    }

    fn query_pairs(&self) -> form_urlencoded::Parse<'a> {
        form_urlencoded::parse(self.raw_query().unwrap_or("").as_bytes())
    }

    /// The request HTTP version.
    pub fn version(&self) -> Version {
        version_of(self.req.version_major, self.req.version_minor)
    }

    /// Value of a recognized request header.
    pub fn request_header(&self, header: Header) -> Option<&'a [u8]> {
        let buf = self.buf;
        self.req.headers.get(header).map(|v| v.resolve(buf))
    }

    /// Value of a recognized request header, if it is valid UTF-8.
    pub fn request_header_str(&self, header: Header) -> Option<&'a str> {
        self.request_header(header)
            .and_then(|v| std::str::from_utf8(v).ok())
    }

    /// The request body, a view into the exchange buffer.
    pub fn request_body(&self) -> Option<&'a [u8]> {
        self.req.body.clone().map(|r| self.buf.slice(r))
    }

    /// Set the response status.
    pub fn status(&mut self, status: StatusCode) {
        self.res.status = Some(status);
    }

    /// Add a response header.
    ///
    /// `content-length`, `transfer-encoding` and `connection` are filled in
    /// by the exchange when not set here.
    pub fn header<K, V>(&mut self, name: K, value: V) -> Result<(), Error>
    where
        HeaderName: TryFrom<K>,
        <HeaderName as TryFrom<K>>::Error: Into<http::Error>,
        HeaderValue: TryFrom<V>,
        <HeaderValue as TryFrom<V>>::Error: Into<http::Error>,
    {
        let name = HeaderName::try_from(name).map_err(|e| Error::Http(e.into()))?;
        let value = HeaderValue::try_from(value).map_err(|e| Error::Http(e.into()))?;

        self.res.push_header(name, value);

        Ok(())
    }

    /// Set the `date` response header to the current time.
    pub fn date_now(&mut self) -> Result<(), Error> {
        let now = fmt_http_date(SystemTime::now());
        let value = HeaderValue::try_from(now).map_err(|e| Error::Http(e.into()))?;

        self.res.set_header(DATE, value);

        Ok(())
    }

    /// Respond with a fixed body.
    pub fn body<B: Into<Vec<u8>>>(&mut self, body: B) {
        self.res.body = Some(ResponseBody::Bytes(body.into()));
    }

    /// Respond with a body streamed from `entity`, sent using chunked transfer coding.
    pub fn body_stream<R>(&mut self, entity: R)
    where
        R: io::Read + Send + 'static,
    {
        self.res.body = Some(ResponseBody::Stream(Box::new(entity)));
    }
}

impl fmt::Debug for Http<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Http")
            .field("method", &self.req.method)
            .field("segments", &self.req.segments)
            .field("status", &self.res.status)
            .finish()
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let body = match &self.body {
            None => "None".to_string(),
            Some(ResponseBody::Bytes(b)) => format!("Bytes({})", b.len()),
            Some(ResponseBody::Stream(_)) => "Stream".to_string(),
        };
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body", &body)
            .finish()
    }
}
