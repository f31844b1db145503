#![warn(missing_docs, missing_debug_implementations)]
#![warn(clippy::all)]

//! A per connection HTTP/1.1 (and 1.0) server engine over a fixed buffer.
//!
//! The library parses requests, hands them to an application [`Handler`],
//! serializes the response and decides whether the connection is kept open.
//! Which runtime to use, TCP and TLS are handled outside this library.
//!
//! The core is [`Exchange`], a state machine that owns one fixed size buffer
//! and never performs I/O itself. [`server::handshake`] and
//! [`server::handshake_async`] drive it over a blocking or an async transport.
//!
//! ## In scope
//!
//! * Request line, recognized request headers and `Content-Length` bodies,
//!   all parsed in place without copying.
//! * `Content-Length` for fixed response bodies.
//! * `Transfer-Encoding: chunked` for streamed response bodies.
//! * `Connection: keep-alive` or `close`, depending on request version and headers.
//! * Refusing malformed or too large requests with a `4xx` response.
//!
//! ## Out of scope
//!
//! * Chunked request bodies, which are refused with `501`.
//! * Pipelining. A connection receiving the next request early is closed
//!   after the current response.
//! * `Expect: 100-Continue`, upgrades, TLS.
//!
//! # Buffer
//!
//! Everything about a request (line, headers and body) must fit the buffer
//! configured with [`Options::buffer_size`]. Request values handed to the
//! handler are views into that buffer and are only valid during the handler call.

#[macro_use]
extern crate tracing;

mod buf;
mod chunked;
mod error;
mod handler;
mod header;
mod http11;
mod limit;
mod options;
mod segments;
mod telemetry;

pub mod exchange;
pub mod server;

pub(crate) use futures_io::{AsyncRead, AsyncWrite};

pub use error::{BoxError, Error};
pub use exchange::{Exchange, State, Step};
pub use handler::{handler_fn, Handler, HandlerFactory, HandlerFn, Http};
pub use header::Header;
pub use options::{Options, DEFAULT_BUFFER_SIZE, MIN_BUFFER_SIZE};
pub use segments::Segments;
pub use telemetry::{LogNotes, NoteSink};
