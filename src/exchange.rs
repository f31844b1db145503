//! The per connection state machine.
//!
//! An [`Exchange`] owns one fixed size buffer and moves through [`State`]s
//! one transition per [`step`]. It never touches the transport. When it needs
//! bytes, wants bytes written, or wants the connection closed, `step` says so
//! and the caller performs the I/O and reports back:
//!
//! ```text
//!   Step::Read   => fill input_buf(), then filled(n) or read_failed(e)
//!   Step::Write  => write output_buf(), then flushed() or write_failed(e)
//!   Step::Handle => invoke()
//!   Step::Close  => close the transport, then closed(result)
//!   Step::Done   => nothing more to do
//! ```
//!
//! Calling `step` again without completing the I/O returns the same `Step`.
//!
//! [`step`]: Exchange::step

use crate::buf::ExchangeBuf;
use crate::chunked::ChunkedWriter;
use crate::handler::{HandlerFactory, Http, RequestParts, Response, ResponseBody};
use crate::header::{Header, HeaderValue};
use crate::http11::{method_and_space, method_by_first, method_by_second_p, MethodCandidate};
use crate::http11::{version_of, write_status_line};
use crate::limit::{allow_reuse, connection_header, LimitRead, LimitWrite};
use crate::options::Options;
use crate::segments::Segments;
use crate::telemetry::NoteSink;
use crate::Error;
use http::header::{CONNECTION, CONTENT_LENGTH};
use http::{HeaderValue as ResponseValue, Method, StatusCode, Version};
use percent_encoding::percent_decode;
use std::any::Any;
use std::fmt;
use std::io;
use std::io::Read;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Where the exchange is.
///
/// States are ordered in the sequence a request normally passes through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum State {
    /// Start of a request, the buffer is reset.
    Setup,
    /// Prepare to read the start of a request.
    Input,
    /// Waiting for the caller to read from the transport.
    InputRead,
    /// Look at the first byte of the method.
    RequestLine,
    /// Verify the method token and the space after it.
    RequestLineMethod,
    /// Tell PATCH, POST and PUT apart.
    RequestLineMethodP,
    /// The request target must start with `/`.
    RequestLineTarget,
    /// Scan path segments and query.
    RequestLinePath,
    /// `HTTP/x.y` and the line end.
    RequestLineVersion,
    /// A header line or the empty line ending the header block.
    ParseHeader,
    /// Header name up to `:`.
    ParseHeaderName,
    /// Header value up to the line end.
    ParseHeaderValue,
    /// Wait for a `content-length` delimited body.
    RequestBody,
    /// Decide keep-alive before the handler runs.
    Handle,
    /// Waiting for the caller to invoke the handler.
    HandleInvoke,
    /// Replace the response with an error status and no body.
    ClientError,
    /// Start serializing the response.
    Output,
    /// Status line.
    OutputStatus,
    /// One response header per step.
    OutputHeader,
    /// The empty line after the headers.
    OutputTerminator,
    /// Decide how the body goes out.
    OutputBody,
    /// Waiting for the caller to write the buffer.
    OutputBuffer,
    /// Waiting for the caller to write a fixed body.
    OutputBytes,
    /// Frame the next chunk of a streamed body.
    OutputChunk,
    /// Request done, keep the connection or close it.
    Result,
    /// Waiting for the caller to close the transport.
    ResultClose,
    /// Nothing more to do.
    Stop,
}

/// What the caller must do before stepping again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// A transition was made, step again.
    Ready,
    /// Read into [`Exchange::input_buf`].
    Read,
    /// Write out [`Exchange::output_buf`].
    Write,
    /// A request is parsed, call [`Exchange::invoke`].
    Handle,
    /// Close the transport.
    Close,
    /// The exchange is over.
    Done,
}

/// One HTTP/1.1 connection, without the connection.
pub struct Exchange {
    state: State,
    /// Where to go after the pending read or write.
    next_action: State,
    buf: ExchangeBuf,
    keep_alive: bool,
    req: RequestParts,
    res: Response,
    // request parsing
    target_start: usize,
    query_start: Option<usize>,
    header_name: Option<Header>,
    content_length: usize,
    pipelined: bool,
    // response serialization
    limit: Option<LimitWrite>,
    header_index: usize,
    chunked: Option<ChunkedWriter>,
    error: Option<Error>,
    factory: Arc<dyn HandlerFactory>,
    notes: Arc<dyn NoteSink>,
}

impl Exchange {
    /// Create an exchange at `State::Setup` with a buffer sized from `options`.
    pub fn new(options: &Options, factory: Arc<dyn HandlerFactory>) -> Self {
        Exchange {
            state: State::Setup,
            next_action: State::Setup,
            buf: ExchangeBuf::with_capacity(options.get_buffer_size()),
            keep_alive: true,
            req: RequestParts::default(),
            res: Response::default(),
            target_start: 0,
            query_start: None,
            header_name: None,
            content_length: 0,
            pipelined: false,
            limit: None,
            header_index: 0,
            chunked: None,
            error: None,
            factory,
            notes: options.notes(),
        }
    }

    /// Make one transition.
    pub fn step(&mut self) -> Step {
        let next = match self.state {
            State::InputRead => return Step::Read,
            State::OutputBuffer | State::OutputBytes => return Step::Write,
            State::HandleInvoke => return Step::Handle,
            State::ResultClose => return Step::Close,
            State::Stop => return Step::Done,

            State::Setup => self.setup(),
            State::Input => self.to_input_read(State::RequestLine),
            State::RequestLine => self.request_line(),
            State::RequestLineMethod => self.request_line_method(),
            State::RequestLineMethodP => self.request_line_method_p(),
            State::RequestLineTarget => self.request_line_target(),
            State::RequestLinePath => self.request_line_path(),
            State::RequestLineVersion => self.request_line_version(),
            State::ParseHeader => self.parse_header(),
            State::ParseHeaderName => self.parse_header_name(),
            State::ParseHeaderValue => self.parse_header_value(),
            State::RequestBody => self.body_input(),
            State::Handle => self.handle(),
            State::ClientError => self.client_error(),
            State::Output => self.output(),
            State::OutputStatus => self.output_status(),
            State::OutputHeader => self.output_header(),
            State::OutputTerminator => self.output_terminator(),
            State::OutputBody => self.output_body(),
            State::OutputChunk => self.output_chunk(),
            State::Result => self.result(),
        };

        trace!("{:?} -> {:?}", self.state, next);

        self.state = next;

        Step::Ready
    }

    /// Step until the caller has to act, or until the next request starts.
    ///
    /// Returns `Step::Ready` only when a kept-alive connection is back at
    /// `State::Setup`.
    pub fn advance(&mut self) -> Step {
        loop {
            let step = self.step();
            if step != Step::Ready || self.state == State::Setup {
                return step;
            }
        }
    }

    /// Where the next read goes. Only valid on `Step::Read`.
    pub fn input_buf(&mut self) -> &mut [u8] {
        assert_eq!(self.state, State::InputRead, "input_buf() outside InputRead");
        self.buf.spare_mut()
    }

    /// Report `amount` bytes read into `input_buf()`. 0 means end of stream.
    pub fn filled(&mut self, amount: usize) {
        assert_eq!(self.state, State::InputRead, "filled() outside InputRead");

        if amount == 0 {
            if self.buf.limit() > 0 {
                debug!("EOF in partial request");
            } else {
                trace!("EOF");
            }
            self.keep_alive = false;
            self.state = State::ResultClose;
            return;
        }

        self.buf.extend(amount);
        self.state = self.next_action;
    }

    /// Report a failed read. The connection is closed and the error kept.
    pub fn read_failed(&mut self, err: io::Error) {
        assert_eq!(self.state, State::InputRead, "read_failed() outside InputRead");

        self.notes.read_error(&err);

        self.error = Some(err.into());
        self.keep_alive = false;
        self.state = State::ResultClose;
    }

    /// Bytes to write. Only valid on `Step::Write`.
    pub fn output_buf(&self) -> &[u8] {
        match self.state {
            State::OutputBuffer => self.buf.pending(),
            State::OutputBytes => match &self.res.body {
                Some(ResponseBody::Bytes(b)) => &b[..],
                _ => &[],
            },
            _ => &[],
        }
    }

    /// Report that all of `output_buf()` was written.
    pub fn flushed(&mut self) {
        match self.state {
            State::OutputBuffer => {
                self.buf.reset();
                self.state = self.next_action;
            }
            State::OutputBytes => {
                self.res.body = None;
                self.state = State::Result;
            }
            other => panic!("flushed() in state: {:?}", other),
        }
    }

    /// Report a failed write. The connection is closed and the error kept.
    pub fn write_failed(&mut self, err: io::Error) {
        assert!(
            self.state == State::OutputBuffer || self.state == State::OutputBytes,
            "write_failed() in state: {:?}",
            self.state
        );

        debug!("Write failed: {}", err);

        self.state = self.to_result_error(err.into());
    }

    /// Report the transport closed.
    pub fn closed(&mut self, result: io::Result<()>) {
        assert_eq!(self.state, State::ResultClose, "closed() outside ResultClose");

        if let Err(e) = result {
            debug!("Close failed: {}", e);
        }

        self.state = State::Stop;
    }

    /// Run the handler for the parsed request.
    ///
    /// A handler error, a panic or a response without status turns into
    /// `500 Internal Server Error` and the connection is closed after it.
    pub fn invoke(&mut self) {
        assert_eq!(self.state, State::HandleInvoke, "invoke() outside HandleInvoke");

        let mut handler = self.factory.create();

        let outcome = {
            let mut http = Http::new(&self.buf, &self.req, &mut self.res);
            panic::catch_unwind(AssertUnwindSafe(|| handler.handle(&mut http)))
        };

        let err = match outcome {
            Ok(Ok(())) => self.prepare_response().err(),
            Ok(Err(e)) => Some(Error::Handler(e)),
            Err(p) => Some(Error::HandlerPanic(panic_message(p))),
        };

        let next = if let Some(e) = err {
            debug!("Handler failed: {}", e);
            self.error = Some(e);
            self.to_client_error(StatusCode::INTERNAL_SERVER_ERROR)
        } else if let Some(e) = self.oversized_header() {
            // nothing written yet, close without a response
            self.to_result_error(e)
        } else {
            State::Output
        };

        trace!("{:?} -> {:?}", self.state, next);

        self.state = next;
    }

    fn prepare_response(&mut self) -> Result<(), Error> {
        if self.res.status.is_none() {
            return Err(Error::User("Handler did not set a response status".into()));
        }

        let is_head = self.req.method == Some(Method::HEAD);

        let limit = LimitWrite::from_response(
            &mut self.res,
            is_head,
            self.req.version_major,
            self.req.version_minor,
        )?;

        if limit.is_close_delimited() {
            self.keep_alive = false;
        }

        self.limit = Some(limit);

        connection_header(
            &mut self.res,
            &mut self.keep_alive,
            self.req.version_major,
            self.req.version_minor,
        );

        Ok(())
    }

    /// A response header that can't fit the buffer even when it is empty.
    fn oversized_header(&self) -> Option<Error> {
        let capacity = self.buf.capacity();

        self.res
            .headers
            .iter()
            .find(|h| h.wire_len() > capacity)
            .map(|h| {
                Error::User(format!(
                    "Header larger than buffer: {} > {}",
                    h.name(),
                    capacity
                ))
            })
    }

    // --- transitions

    fn setup(&mut self) -> State {
        self.reset();
        State::Input
    }

    fn to_input_read(&mut self, on_read: State) -> State {
        self.next_action = on_read;
        State::InputRead
    }

    /// Read more unless the buffer is full, in which case the request is refused.
    fn to_input_read_if_possible(&mut self, on_read: State, on_full: StatusCode) -> State {
        if self.buf.is_full() {
            debug!("Request does not fit buffer of {}", self.buf.capacity());
            return self.to_client_error(on_full);
        }
        self.to_input_read(on_read)
    }

    fn to_client_error(&mut self, status: StatusCode) -> State {
        self.res.status = Some(status);
        State::ClientError
    }

    fn to_result_error(&mut self, err: Error) -> State {
        self.error = Some(err);
        self.keep_alive = false;
        State::Result
    }

    fn request_line(&mut self) -> State {
        let start = self.buf.index();

        if !self.buf.has_index(start) {
            return self.to_input_read_if_possible(State::RequestLine, StatusCode::BAD_REQUEST);
        }

        match method_by_first(self.buf.get(start)) {
            MethodCandidate::One(m) => {
                self.req.method = Some(m);
                State::RequestLineMethod
            }
            MethodCandidate::P => State::RequestLineMethodP,
            MethodCandidate::None => self.to_client_error(StatusCode::BAD_REQUEST),
        }
    }

    fn request_line_method_p(&mut self) -> State {
        let second = self.buf.index() + 1;

        if !self.buf.has_index(second) {
            return self
                .to_input_read_if_possible(State::RequestLineMethodP, StatusCode::BAD_REQUEST);
        }

        match method_by_second_p(self.buf.get(second)) {
            Some(m) => {
                self.req.method = Some(m);
                State::RequestLineMethod
            }
            None => self.to_client_error(StatusCode::BAD_REQUEST),
        }
    }

    fn request_line_method(&mut self) -> State {
        let start = self.buf.index();

        let token = match self.req.method.as_ref().map(method_and_space) {
            Some(t) => t,
            None => return self.to_client_error(StatusCode::BAD_REQUEST),
        };

        if self.buf.equals(token, start) {
            self.buf.set_index(start + token.len());
            return State::RequestLineTarget;
        }

        if !self.buf.is_prefix_of(token, start) {
            self.req.method = None;
            return self.to_client_error(StatusCode::BAD_REQUEST);
        }

        self.to_input_read_if_possible(State::RequestLineMethod, StatusCode::BAD_REQUEST)
    }

    fn request_line_target(&mut self) -> State {
        let start = self.buf.index();

        if !self.buf.has_index(start) {
            return self
                .to_input_read_if_possible(State::RequestLineTarget, StatusCode::URI_TOO_LONG);
        }

        // only origin-form, "GET /path?query HTTP/1.1"
        if self.buf.get(start) != b'/' {
            return self.to_client_error(StatusCode::BAD_REQUEST);
        }

        self.target_start = start;
        self.query_start = None;
        self.req.segments = Segments::new();
        self.buf.set_index(start + 1);

        State::RequestLinePath
    }

    fn request_line_path(&mut self) -> State {
        // index is at the start of the current segment, or inside the query
        let mut i = self.buf.index();

        while self.buf.has_index(i) {
            let b = self.buf.get(i);

            if b == b' ' {
                if let Some(q) = self.query_start {
                    self.req.query = Some(q..i);
                } else {
                    if !self.push_segment(i) {
                        return self.to_client_error(StatusCode::BAD_REQUEST);
                    }
                    self.req.path = Some(self.target_start..i);
                }
                self.buf.set_index(i + 1);
                return State::RequestLineVersion;
            }

            if b < 0x20 || b == 0x7f {
                return self.to_client_error(StatusCode::BAD_REQUEST);
            }

            if self.query_start.is_none() {
                if b == b'/' {
                    if !self.push_segment(i) {
                        return self.to_client_error(StatusCode::BAD_REQUEST);
                    }
                } else if b == b'?' {
                    if !self.push_segment(i) {
                        return self.to_client_error(StatusCode::BAD_REQUEST);
                    }
                    self.req.path = Some(self.target_start..i);
                    self.query_start = Some(i + 1);
                }
            }

            i += 1;
        }

        self.to_input_read_if_possible(State::RequestLinePath, StatusCode::URI_TOO_LONG)
    }

    /// Append the bytes from index to `end` as a decoded segment and move index past `end`.
    fn push_segment(&mut self, end: usize) -> bool {
        let start = self.buf.index();

        let segment = match percent_decode(self.buf.slice(start..end)).decode_utf8() {
            Ok(v) => v,
            Err(_) => {
                debug!("Path segment is not UTF-8");
                return false;
            }
        };

        self.req.segments = self.req.segments.append(&segment);
        self.buf.set_index(end + 1);

        true
    }

    fn request_line_version(&mut self) -> State {
        const HTTP: &[u8] = b"HTTP/";

        let start = self.buf.index();
        // "HTTP/1.1" followed by CRLF or LF
        let eol = start + 8;

        if !self.buf.has_index(eol) {
            if !self.buf.is_prefix_of(HTTP, start) {
                return self.to_client_error(StatusCode::BAD_REQUEST);
            }
            return self
                .to_input_read_if_possible(State::RequestLineVersion, StatusCode::URI_TOO_LONG);
        }

        let major = self.buf.get(start + 5);
        let dot = self.buf.get(start + 6);
        let minor = self.buf.get(start + 7);

        if !self.buf.equals(HTTP, start)
            || !major.is_ascii_digit()
            || dot != b'.'
            || !minor.is_ascii_digit()
        {
            return self.to_client_error(StatusCode::BAD_REQUEST);
        }

        let end = match self.buf.get(eol) {
            b'\n' => eol + 1,
            b'\r' => {
                if !self.buf.has_index(eol + 1) {
                    return self.to_input_read_if_possible(
                        State::RequestLineVersion,
                        StatusCode::URI_TOO_LONG,
                    );
                }
                if self.buf.get(eol + 1) != b'\n' {
                    return self.to_client_error(StatusCode::BAD_REQUEST);
                }
                eol + 2
            }
            _ => return self.to_client_error(StatusCode::BAD_REQUEST),
        };

        self.req.version_major = major - b'0';
        self.req.version_minor = minor - b'0';

        if self.req.version_major != 1 {
            return self.to_client_error(StatusCode::HTTP_VERSION_NOT_SUPPORTED);
        }

        self.buf.set_index(end);

        State::ParseHeader
    }

    fn parse_header(&mut self) -> State {
        let i = self.buf.index();

        if !self.buf.has_index(i) {
            return self.to_input_read_if_possible(State::ParseHeader, StatusCode::BAD_REQUEST);
        }

        match self.buf.get(i) {
            b'\n' => {
                self.buf.set_index(i + 1);
                self.headers_done()
            }
            b'\r' => {
                if !self.buf.has_index(i + 1) {
                    return self
                        .to_input_read_if_possible(State::ParseHeader, StatusCode::BAD_REQUEST);
                }
                if self.buf.get(i + 1) != b'\n' {
                    return self.to_client_error(StatusCode::BAD_REQUEST);
                }
                self.buf.set_index(i + 2);
                self.headers_done()
            }
            _ => State::ParseHeaderName,
        }
    }

    fn parse_header_name(&mut self) -> State {
        let start = self.buf.index();
        let mut i = start;

        let colon = loop {
            if !self.buf.has_index(i) {
                return self
                    .to_input_read_if_possible(State::ParseHeaderName, StatusCode::BAD_REQUEST);
            }
            match self.buf.get(i) {
                b':' => break i,
                b'\n' => return self.to_client_error(StatusCode::BAD_REQUEST),
                _ => i += 1,
            }
        };

        // no whitespace allowed between name and colon
        if colon == start || matches!(self.buf.get(colon - 1), b' ' | b'\t') {
            return self.to_client_error(StatusCode::BAD_REQUEST);
        }

        self.header_name = Header::from_bytes(self.buf.slice(start..colon));
        self.buf.set_index(colon + 1);

        State::ParseHeaderValue
    }

    fn parse_header_value(&mut self) -> State {
        let mut start = self.buf.index();
        let mut i = start;

        let lf = loop {
            if !self.buf.has_index(i) {
                return self
                    .to_input_read_if_possible(State::ParseHeaderValue, StatusCode::BAD_REQUEST);
            }
            if self.buf.get(i) == b'\n' {
                break i;
            }
            i += 1;
        };

        let mut end = lf;
        while end > start && matches!(self.buf.get(end - 1), b' ' | b'\t' | b'\r') {
            end -= 1;
        }
        while start < end && matches!(self.buf.get(start), b' ' | b'\t') {
            start += 1;
        }

        if let Some(name) = self.header_name.take() {
            let value = HeaderValue::new(start, end);
            if self.req.headers.insert(name, value).is_some() {
                debug!("Duplicate header: {}", name);
                return self.to_client_error(StatusCode::BAD_REQUEST);
            }
        }

        self.buf.set_index(lf + 1);

        State::ParseHeader
    }

    fn headers_done(&mut self) -> State {
        match LimitRead::from_headers(&self.req.headers, &self.buf) {
            LimitRead::NoBody => State::Handle,
            LimitRead::ContentLength(0) => State::Handle,
            LimitRead::ContentLength(n) => {
                if n > self.buf.capacity() as u64 {
                    debug!("Request body too large: {}", n);
                    return self.to_client_error(StatusCode::PAYLOAD_TOO_LARGE);
                }
                self.content_length = n as usize;
                State::RequestBody
            }
            LimitRead::TransferCoded => {
                debug!("Request transfer-encoding is not supported");
                self.to_client_error(StatusCode::NOT_IMPLEMENTED)
            }
            LimitRead::Invalid => self.to_client_error(StatusCode::BAD_REQUEST),
        }
    }

    fn body_input(&mut self) -> State {
        let start = self.buf.index();
        let len = self.content_length;
        let buffered = self.buf.limit() - start;

        if buffered >= len {
            let end = start + len;

            if buffered > len {
                // the next request arrived with this one, which we can't keep
                debug!("Bytes after request body: {}", buffered - len);
                self.pipelined = true;
            }

            self.req.body = Some(start..end);
            self.buf.set_index(end);

            return State::Handle;
        }

        if start + len > self.buf.capacity() {
            debug!("Request body does not fit buffer: {} + {}", start, len);
            return self.to_client_error(StatusCode::PAYLOAD_TOO_LARGE);
        }

        self.to_input_read(State::RequestBody)
    }

    fn handle(&mut self) -> State {
        if self.req.body.is_none() && self.buf.index() < self.buf.limit() {
            debug!("Bytes after request: {}", self.buf.limit() - self.buf.index());
            self.pipelined = true;
        }

        self.keep_alive = !self.pipelined
            && allow_reuse(
                &self.req.headers,
                &self.buf,
                self.req.version_major,
                self.req.version_minor,
            );

        self.res.clear();

        State::HandleInvoke
    }

    fn client_error(&mut self) -> State {
        let status = self
            .res
            .status
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        debug!("Responding with error: {}", status);

        self.keep_alive = false;
        self.res.clear();
        self.res.status = Some(status);
        self.res
            .push_header(CONNECTION, ResponseValue::from_static("close"));
        self.res
            .push_header(CONTENT_LENGTH, ResponseValue::from_static("0"));
        self.limit = Some(LimitWrite::NoBody);

        State::Output
    }

    fn output(&mut self) -> State {
        // the request views point into the buffer we are about to write over
        self.req.clear();
        self.buf.reset();
        self.header_index = 0;

        State::OutputStatus
    }

    fn output_status(&mut self) -> State {
        let status = self
            .res
            .status
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        match write_status_line(status, &mut self.buf) {
            Ok(()) => State::OutputHeader,
            Err(e) => self.to_result_error(e),
        }
    }

    fn output_header(&mut self) -> State {
        let header = match self.res.headers.get(self.header_index) {
            Some(h) => h,
            None => return State::OutputTerminator,
        };

        if header.write_to(&mut self.buf) {
            self.header_index += 1;
            return State::OutputHeader;
        }

        if header.wire_len() > self.buf.capacity() {
            let m = format!(
                "Header larger than buffer: {} > {}",
                header.name(),
                self.buf.capacity()
            );
            return self.to_result_error(Error::User(m));
        }

        // flush and retry into an empty buffer
        self.next_action = State::OutputHeader;
        State::OutputBuffer
    }

    fn output_terminator(&mut self) -> State {
        if self.buf.append(b"\r\n") {
            return State::OutputBody;
        }

        self.next_action = State::OutputTerminator;
        State::OutputBuffer
    }

    fn output_body(&mut self) -> State {
        self.next_action = match self.limit.take() {
            Some(LimitWrite::ContentLength(n)) if n > 0 => State::OutputBytes,
            Some(LimitWrite::ChunkedEncoder) => {
                self.chunked = Some(ChunkedWriter::new(self.buf.capacity()));
                State::OutputChunk
            }
            Some(LimitWrite::CloseDelimited) => {
                self.chunked = Some(ChunkedWriter::close_delimited());
                State::OutputChunk
            }
            _ => State::Result,
        };

        // the header block goes out first in all cases
        State::OutputBuffer
    }

    fn output_chunk(&mut self) -> State {
        let capacity = self.buf.capacity();
        let writer = self
            .chunked
            .get_or_insert_with(|| ChunkedWriter::new(capacity));

        if !writer.is_eof() {
            if let Some(ResponseBody::Stream(entity)) = self.res.body.as_mut() {
                while !writer.is_full(capacity) {
                    match entity.read(writer.spare(&mut self.buf)) {
                        Ok(0) => {
                            writer.set_eof();
                            break;
                        }
                        Ok(n) => writer.advance(n),
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                        Err(e) => {
                            // headers are out, closing is all that tells the peer
                            debug!("Body read failed: {}", e);
                            return self.to_result_error(e.into());
                        }
                    }
                }
            } else {
                writer.set_eof();
            }
        }

        if writer.has_data() {
            let window = writer.frame(&mut self.buf);
            self.buf.set_window(window);
            self.next_action = State::OutputChunk;
            return State::OutputBuffer;
        }

        let window = writer.finish(&mut self.buf);

        self.chunked = None;
        self.res.body = None;

        if window.is_empty() {
            // close delimited, closing the connection ends the body
            return State::Result;
        }

        self.buf.set_window(window);

        self.next_action = State::Result;
        State::OutputBuffer
    }

    fn result(&mut self) -> State {
        if self.error.is_some() {
            self.keep_alive = false;
        }

        self.reset();

        if self.keep_alive {
            State::Setup
        } else {
            State::ResultClose
        }
    }

    /// Clear everything belonging to one request.
    fn reset(&mut self) {
        self.buf.reset();
        self.req.clear();
        self.res.clear();
        self.target_start = 0;
        self.query_start = None;
        self.header_name = None;
        self.content_length = 0;
        self.pipelined = false;
        self.limit = None;
        self.header_index = 0;
        self.chunked = None;
    }

    // --- inspection

    /// The current state.
    pub fn state(&self) -> State {
        self.state
    }

    /// Whether the connection is kept open after the current request.
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Tells if the exchange has not reached `State::Stop`.
    pub fn is_active(&self) -> bool {
        self.state != State::Stop
    }

    /// Takes the error captured since the last call, if any.
    pub fn take_error(&mut self) -> Option<Error> {
        self.error.take()
    }

    /// The captured error, if any.
    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    /// Request method, once the request line is parsed.
    pub fn method(&self) -> Option<&Method> {
        self.req.method.as_ref()
    }

    /// Request path segments.
    pub fn segments(&self) -> &Segments {
        &self.req.segments
    }

    /// Request path as received, without query.
    pub fn raw_path(&self) -> Option<&str> {
        let range = self.req.path.clone()?;
        std::str::from_utf8(self.buf.slice(range)).ok()
    }

    /// Request query as received, without the `?`.
    pub fn raw_query(&self) -> Option<&str> {
        let range = self.req.query.clone()?;
        std::str::from_utf8(self.buf.slice(range)).ok()
    }

    /// Major digit of the request version.
    pub fn version_major(&self) -> u8 {
        self.req.version_major
    }

    /// Minor digit of the request version.
    pub fn version_minor(&self) -> u8 {
        self.req.version_minor
    }

    /// Request version.
    pub fn version(&self) -> Version {
        version_of(self.req.version_major, self.req.version_minor)
    }

    /// Value of a recognized request header, valid until the response is written.
    pub fn header(&self, header: Header) -> Option<&[u8]> {
        self.req.headers.get(header).map(|v| v.resolve(&self.buf))
    }

    /// The request body, a view into the buffer.
    pub fn request_body(&self) -> Option<&[u8]> {
        self.req.body.clone().map(|r| self.buf.slice(r))
    }

    /// Response status, set by the handler or by a refused request.
    pub fn status(&self) -> Option<StatusCode> {
        self.res.status
    }

    /// Parse position, or start of the bytes to write.
    pub fn buffer_index(&self) -> usize {
        self.buf.index()
    }

    /// End of valid bytes in the buffer.
    pub fn buffer_limit(&self) -> usize {
        self.buf.limit()
    }

    /// The whole buffer, also the bytes past the limit.
    pub fn buffer(&self) -> &[u8] {
        &self.buf
    }
}

fn panic_message(p: Box<dyn Any + Send>) -> String {
    if let Some(s) = p.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = p.downcast_ref::<String>() {
        s.clone()
    } else {
        "Box<Any>".to_string()
    }
}

impl fmt::Debug for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exchange")
            .field("state", &self.state)
            .field("keep_alive", &self.keep_alive)
            .field("index", &self.buf.index())
            .field("limit", &self.buf.limit())
            .field("method", &self.req.method)
            .field("segments", &self.req.segments)
            .field("headers", &self.req.headers.iter().collect::<Vec<_>>())
            .field("response", &self.res)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::handler::handler_fn;

    fn exchange(size: usize) -> Exchange {
        let opts = Options::new().buffer_size(size);
        let factory = || {
            handler_fn(|http| {
                http.status(StatusCode::OK);
                Ok(())
            })
        };
        Exchange::new(&opts, Arc::new(factory))
    }

    fn feed(ex: &mut Exchange, input: &[u8]) {
        assert_eq!(ex.advance(), Step::Read);
        let buf = ex.input_buf();
        buf[..input.len()].copy_from_slice(input);
        ex.filled(input.len());
    }

    fn step_to(ex: &mut Exchange, state: State) {
        while ex.state() != state {
            assert_eq!(ex.step(), Step::Ready, "stuck in {:?}", ex.state());
        }
    }

    #[test]
    fn io_states_are_idempotent() {
        let mut ex = exchange(64);
        assert_eq!(ex.step(), Step::Ready);
        assert_eq!(ex.step(), Step::Ready);
        assert_eq!(ex.state(), State::InputRead);
        assert_eq!(ex.step(), Step::Read);
        assert_eq!(ex.step(), Step::Read);
        assert_eq!(ex.state(), State::InputRead);
    }

    #[test]
    fn method_token_advances_cursor() {
        let mut ex = exchange(64);
        feed(&mut ex, b"OPTIONS / HTTP/1.1\r\n\r\n");
        step_to(&mut ex, State::RequestLineTarget);
        assert_eq!(ex.buffer_index(), 8);
        assert_eq!(ex.method(), Some(&Method::OPTIONS));
    }

    #[test]
    fn partial_method_reads_more() {
        let mut ex = exchange(64);
        feed(&mut ex, b"PO");
        assert_eq!(ex.advance(), Step::Read);
        assert_eq!(ex.method(), Some(&Method::POST));

        let buf = ex.input_buf();
        buf[..6].copy_from_slice(b"ST / H");
        ex.filled(6);

        step_to(&mut ex, State::RequestLineTarget);
        assert_eq!(ex.buffer_index(), 5);
    }

    #[test]
    fn segments_and_query() {
        let mut ex = exchange(128);
        feed(&mut ex, b"GET /a/b?x=1/2 HTTP/1.1\r\n\r\n");
        step_to(&mut ex, State::HandleInvoke);

        assert!(ex.segments().matches(&["a", "b"]));
        assert_eq!(ex.raw_path(), Some("/a/b"));
        assert_eq!(ex.raw_query(), Some("x=1/2"));
    }

    #[test]
    fn lone_cr_in_headers_is_refused() {
        let mut ex = exchange(128);
        feed(&mut ex, b"GET / HTTP/1.1\r\n\rX\n");
        step_to(&mut ex, State::ClientError);
        assert_eq!(ex.status(), Some(StatusCode::BAD_REQUEST));
    }
}
