#![allow(dead_code)]

use futures_io::{AsyncRead, AsyncWrite};
use h1_exchange::server::{self, Transport};
use h1_exchange::{Error, Exchange, HandlerFactory, Options, State, Step};
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, Once};
use std::task::{Context, Poll};

pub fn setup_logger() {
    static START: Once = Once::new();
    START.call_once(|| {
        let test_log = std::env::var("TEST_LOG")
            .map(|x| x != "0" && x.to_lowercase() != "false")
            .unwrap_or(false);
        let level = if test_log {
            log::LevelFilter::Trace
        } else {
            log::LevelFilter::Info
        };
        pretty_env_logger::formatted_builder()
            .filter_level(log::LevelFilter::Warn)
            .filter_module("h1_exchange", level)
            .target(env_logger::Target::Stdout)
            .init();
    });
}

/// In memory transport.
///
/// Reads are served from a fixed input, at most `chunk` bytes at a time, to
/// force requests to arrive in pieces. Clones share the same state so a test
/// can inspect what was written while a connection owns the stream.
#[derive(Clone)]
pub struct MockStream {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    input: Vec<u8>,
    pos: usize,
    chunk: usize,
    output: Vec<u8>,
    closed: bool,
    read_error: Option<io::ErrorKind>,
    interrupts: usize,
    write_error: bool,
}

impl MockStream {
    pub fn new(input: &[u8]) -> Self {
        MockStream::chunked(input, usize::max_value())
    }

    pub fn chunked(input: &[u8], chunk: usize) -> Self {
        assert!(chunk > 0);
        MockStream {
            inner: Arc::new(Mutex::new(Inner {
                input: input.to_vec(),
                pos: 0,
                chunk,
                output: vec![],
                closed: false,
                read_error: None,
                interrupts: 0,
                write_error: false,
            })),
        }
    }

    /// Fails reading once the input is used up, instead of reporting EOF.
    pub fn fail_read_at_end(self, kind: io::ErrorKind) -> Self {
        self.inner.lock().unwrap().read_error = Some(kind);
        self
    }

    /// Interrupts the first `count` reads.
    pub fn interrupt_reads(self, count: usize) -> Self {
        self.inner.lock().unwrap().interrupts = count;
        self
    }

    /// Fails every write.
    pub fn fail_write(self) -> Self {
        self.inner.lock().unwrap().write_error = true;
        self
    }

    pub fn output(&self) -> Vec<u8> {
        self.inner.lock().unwrap().output.clone()
    }

    pub fn output_str(&self) -> String {
        String::from_utf8_lossy(&self.output()).into_owned()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }
}

impl io::Read for MockStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut inner = self.inner.lock().unwrap();

        if inner.interrupts > 0 {
            inner.interrupts -= 1;
            return Err(io::Error::new(io::ErrorKind::Interrupted, "mock interrupt"));
        }

        let left = inner.input.len() - inner.pos;

        if left == 0 {
            if let Some(kind) = inner.read_error {
                return Err(io::Error::new(kind, "mock read error"));
            }
        }

        let amount = left.min(inner.chunk).min(buf.len());
        let start = inner.pos;

        buf[..amount].copy_from_slice(&inner.input[start..(start + amount)]);
        inner.pos += amount;

        Ok(amount)
    }
}

impl io::Write for MockStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self.inner.lock().unwrap();

        if inner.write_error {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock write error"));
        }

        inner.output.extend_from_slice(buf);

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for MockStream {
    fn close(&mut self) -> io::Result<()> {
        self.inner.lock().unwrap().closed = true;
        Ok(())
    }
}

impl AsyncRead for MockStream {
    fn poll_read(
        self: Pin<&mut Self>,
        _: &mut Context,
        buf: &mut [u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(io::Read::read(self.get_mut(), buf))
    }
}

impl AsyncWrite for MockStream {
    fn poll_write(self: Pin<&mut Self>, _: &mut Context, buf: &[u8]) -> Poll<io::Result<usize>> {
        Poll::Ready(io::Write::write(self.get_mut(), buf))
    }

    fn poll_flush(self: Pin<&mut Self>, _: &mut Context) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _: &mut Context) -> Poll<io::Result<()>> {
        self.get_mut().inner.lock().unwrap().closed = true;
        Poll::Ready(Ok(()))
    }
}

/// Serve `input` on a blocking connection until it closes.
///
/// Returns the stream to inspect and the outcome of serving.
pub fn serve<F>(input: &[u8], buffer_size: usize, factory: F) -> (MockStream, Result<(), Error>)
where
    F: HandlerFactory + 'static,
{
    serve_stream(MockStream::new(input), buffer_size, factory)
}

pub fn serve_stream<F>(
    stream: MockStream,
    buffer_size: usize,
    factory: F,
) -> (MockStream, Result<(), Error>)
where
    F: HandlerFactory + 'static,
{
    setup_logger();

    let opts = Options::new().buffer_size(buffer_size);
    let conn = server::handshake(stream.clone(), factory, opts);

    let res = conn.serve();

    (stream, res)
}

/// An exchange with `input` already read, sitting at `State::RequestLine`.
pub fn exchange_with<F>(input: &[u8], buffer_size: usize, factory: F) -> Exchange
where
    F: HandlerFactory + 'static,
{
    setup_logger();

    let opts = Options::new().buffer_size(buffer_size);
    let mut ex = Exchange::new(&opts, Arc::new(factory));

    assert_eq!(ex.advance(), Step::Read);

    let buf = ex.input_buf();
    assert!(input.len() <= buf.len(), "input larger than buffer");
    buf[..input.len()].copy_from_slice(input);
    ex.filled(input.len());

    assert_eq!(ex.state(), State::RequestLine);

    ex
}

/// Single step until `state` is reached, failing if the exchange wants I/O first.
pub fn step_to(ex: &mut Exchange, state: State) {
    while ex.state() != state {
        let from = ex.state();
        assert_eq!(ex.step(), Step::Ready, "stuck in {:?} before {:?}", from, state);
    }
}

/// Single step until the exchange wants something from the caller.
pub fn step_until_io(ex: &mut Exchange) -> Step {
    loop {
        match ex.step() {
            Step::Ready => {}
            other => return other,
        }
    }
}

/// Splits a response at the end of the header block.
pub fn split_head(data: &[u8]) -> (String, &[u8]) {
    let pos = data
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("end of header block");
    let head = String::from_utf8(data[..(pos + 4)].to_vec()).unwrap();
    (head, &data[(pos + 4)..])
}

/// Decodes a complete chunked body, asserting it ends with the last chunk.
pub fn decode_chunked(mut data: &[u8]) -> Vec<u8> {
    let mut out = vec![];
    loop {
        let pos = data
            .windows(2)
            .position(|w| w == b"\r\n")
            .expect("chunk size line");
        let size = std::str::from_utf8(&data[..pos]).unwrap();
        let size = usize::from_str_radix(size, 16).unwrap();
        data = &data[(pos + 2)..];

        if size == 0 {
            assert_eq!(data, b"\r\n");
            return out;
        }

        out.extend_from_slice(&data[..size]);
        assert_eq!(&data[size..(size + 2)], b"\r\n");
        data = &data[(size + 2)..];
    }
}
