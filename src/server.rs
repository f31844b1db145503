//! Drives an [`Exchange`] over a transport.
//!
//! A connection alternates between two phases. The request phase reads and
//! parses until a request is ready for the handler (or the connection is
//! over). The response phase invokes the handler and writes the response,
//! ending either at the start of the next request or when the connection is
//! closed.
//!
//! # Example
//!
//! ```rust, no_run
//! use h1_exchange::{handler_fn, server, Options};
//! use http::StatusCode;
//! use std::net::TcpListener;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let listener = TcpListener::bind("127.0.0.1:3000")?;
//!
//!     for stream in listener.incoming() {
//!         let stream = stream?;
//!
//!         std::thread::spawn(move || {
//!             let factory = || {
//!                 handler_fn(|http| {
//!                     http.status(StatusCode::OK);
//!                     http.body("Hello world!");
//!                     Ok(())
//!                 })
//!             };
//!
//!             let conn = server::handshake(stream, factory, Options::default());
//!
//!             if let Err(e) = conn.serve() {
//!                 println!("Connection failed: {}", e);
//!             }
//!         });
//!     }
//!
//!     Ok(())
//! }
//! ```

use crate::exchange::{Exchange, State, Step};
use crate::handler::HandlerFactory;
use crate::options::Options;
use crate::Error;
use crate::{AsyncRead, AsyncWrite};
use futures_util::io::{AsyncReadExt, AsyncWriteExt};
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;

/// A blocking transport.
pub trait Transport: Read + Write {
    /// Close the transport once the exchange is over.
    fn close(&mut self) -> io::Result<()> {
        self.flush()
    }
}

impl Transport for TcpStream {
    fn close(&mut self) -> io::Result<()> {
        self.shutdown(Shutdown::Both)
    }
}

/// Start serving a blocking connection.
pub fn handshake<S, F>(io: S, factory: F, options: Options) -> Connection<S>
where
    S: Transport,
    F: HandlerFactory + 'static,
{
    Connection {
        io,
        exchange: Exchange::new(&options, Arc::new(factory)),
    }
}

/// Start serving an async connection.
pub fn handshake_async<S, F>(io: S, factory: F, options: Options) -> AsyncConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
    F: HandlerFactory + 'static,
{
    AsyncConnection {
        io,
        exchange: Exchange::new(&options, Arc::new(factory)),
    }
}

/// Blocking server connection.
pub struct Connection<S> {
    io: S,
    exchange: Exchange,
}

impl<S: Transport> Connection<S> {
    /// Read and parse the next request.
    ///
    /// Ends when the request is ready for the handler, or when the connection
    /// is over. A malformed request is answered and the connection closed
    /// within this phase.
    #[tracing::instrument(skip(self))]
    pub fn execute_request_phase(&mut self) -> Result<(), Error> {
        loop {
            match self.exchange.advance() {
                Step::Handle | Step::Done => break,
                Step::Ready => {}
                Step::Read => self.read(),
                Step::Write => self.write(),
                Step::Close => {
                    let res = self.io.close();
                    self.exchange.closed(res);
                }
            }
        }

        surface(&mut self.exchange)
    }

    /// Invoke the handler and write the response.
    ///
    /// Ends at the start of the next request, or when the connection is closed.
    #[tracing::instrument(skip(self))]
    pub fn execute_response_phase(&mut self) -> Result<(), Error> {
        if !respond(&mut self.exchange)? {
            return Ok(());
        }

        loop {
            match self.exchange.advance() {
                Step::Ready | Step::Handle | Step::Done => break,
                Step::Read => self.read(),
                Step::Write => self.write(),
                Step::Close => {
                    let res = self.io.close();
                    self.exchange.closed(res);
                }
            }
        }

        surface(&mut self.exchange)
    }

    /// Serve requests until the connection is closed.
    pub fn serve(mut self) -> Result<(), Error> {
        while self.is_active() {
            self.execute_request_phase()?;

            if !self.is_active() {
                break;
            }

            self.execute_response_phase()?;
        }

        Ok(())
    }

    fn read(&mut self) {
        let res = loop {
            match self.io.read(self.exchange.input_buf()) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                r => break r,
            }
        };

        match res {
            Ok(n) => self.exchange.filled(n),
            Err(e) => self.exchange.read_failed(e),
        }
    }

    fn write(&mut self) {
        let res = self
            .io
            .write_all(self.exchange.output_buf())
            .and_then(|_| self.io.flush());

        match res {
            Ok(()) => self.exchange.flushed(),
            Err(e) => self.exchange.write_failed(e),
        }
    }
}

impl<S> Connection<S> {
    /// Tells if the connection is not yet closed.
    pub fn is_active(&self) -> bool {
        self.exchange.is_active()
    }

    /// Whether the connection stays open after the current request.
    pub fn keep_alive(&self) -> bool {
        self.exchange.keep_alive()
    }

    /// The exchange, to inspect the current request.
    pub fn exchange(&self) -> &Exchange {
        &self.exchange
    }

    /// The transport.
    pub fn get_ref(&self) -> &S {
        &self.io
    }

    /// Give up the transport.
    pub fn into_inner(self) -> S {
        self.io
    }
}

/// Async server connection.
///
/// The handler itself is invoked synchronously on the task driving the connection.
pub struct AsyncConnection<S> {
    io: S,
    exchange: Exchange,
}

impl<S> AsyncConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Read and parse the next request, see [`Connection::execute_request_phase`].
    pub async fn execute_request_phase(&mut self) -> Result<(), Error> {
        loop {
            match self.exchange.advance() {
                Step::Handle | Step::Done => break,
                Step::Ready => {}
                io_step => self.perform(io_step).await,
            }
        }

        surface(&mut self.exchange)
    }

    /// Invoke the handler and write the response, see [`Connection::execute_response_phase`].
    pub async fn execute_response_phase(&mut self) -> Result<(), Error> {
        if !respond(&mut self.exchange)? {
            return Ok(());
        }

        loop {
            match self.exchange.advance() {
                Step::Ready | Step::Handle | Step::Done => break,
                io_step => self.perform(io_step).await,
            }
        }

        surface(&mut self.exchange)
    }

    /// Serve requests until the connection is closed.
    pub async fn serve(mut self) -> Result<(), Error> {
        while self.is_active() {
            self.execute_request_phase().await?;

            if !self.is_active() {
                break;
            }

            self.execute_response_phase().await?;
        }

        Ok(())
    }

    async fn perform(&mut self, step: Step) {
        match step {
            Step::Read => {
                let res = loop {
                    match self.io.read(self.exchange.input_buf()).await {
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        r => break r,
                    }
                };

                match res {
                    Ok(n) => self.exchange.filled(n),
                    Err(e) => self.exchange.read_failed(e),
                }
            }

            Step::Write => {
                let res = match self.io.write_all(self.exchange.output_buf()).await {
                    Ok(()) => self.io.flush().await,
                    Err(e) => Err(e),
                };

                match res {
                    Ok(()) => self.exchange.flushed(),
                    Err(e) => self.exchange.write_failed(e),
                }
            }

            Step::Close => {
                let res = self.io.close().await;
                self.exchange.closed(res);
            }

            _ => {}
        }
    }
}

impl<S> AsyncConnection<S> {
    /// Tells if the connection is not yet closed.
    pub fn is_active(&self) -> bool {
        self.exchange.is_active()
    }

    /// Whether the connection stays open after the current request.
    pub fn keep_alive(&self) -> bool {
        self.exchange.keep_alive()
    }

    /// The exchange, to inspect the current request.
    pub fn exchange(&self) -> &Exchange {
        &self.exchange
    }

    /// The transport.
    pub fn get_ref(&self) -> &S {
        &self.io
    }

    /// Give up the transport.
    pub fn into_inner(self) -> S {
        self.io
    }
}

/// Invokes the handler if a request is waiting. Returns false when the
/// connection is already over.
fn respond(exchange: &mut Exchange) -> Result<bool, Error> {
    match exchange.state() {
        State::HandleInvoke => {
            exchange.invoke();
            Ok(true)
        }
        State::Stop => Ok(false),
        other => Err(Error::User(format!("No request to respond to in state: {:?}", other))),
    }
}

fn surface(exchange: &mut Exchange) -> Result<(), Error> {
    match exchange.take_error() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

impl<S> fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Connection {{ {:?} }}", self.exchange)
    }
}

impl<S> fmt::Debug for AsyncConnection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AsyncConnection {{ {:?} }}", self.exchange)
    }
}
