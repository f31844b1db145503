use std::fmt;
use std::io;

/// Boxed error returned by request handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Possible errors from this crate.
#[derive(Debug)]
pub enum Error {
    /// A user/usage problem such as a body longer than the content-length header specifies.
    User(String),
    /// A wrapped std::io::Error from the underlying transport (socket).
    Io(io::Error),
    /// Http errors from the `http` crate, such as an invalid response header name.
    Http(http::Error),
    /// Error returned by a request handler.
    Handler(BoxError),
    /// A request handler panicked.
    HandlerPanic(String),
}

impl Error {
    /// Tells if this error came out of the request handler.
    pub fn is_handler(&self) -> bool {
        matches!(self, Error::Handler(_) | Error::HandlerPanic(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::User(v) => write!(f, "{}", v),
            Error::Io(v) => fmt::Display::fmt(v, f),
            Error::Http(v) => write!(f, "http api: {}", v),
            Error::Handler(v) => write!(f, "handler: {}", v),
            Error::HandlerPanic(v) => write!(f, "handler panicked: {}", v),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(v) => Some(v),
            Error::Http(v) => Some(v),
            Error::Handler(v) => Some(v.as_ref()),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<http::Error> for Error {
    fn from(e: http::Error) -> Self {
        Error::Http(e)
    }
}
