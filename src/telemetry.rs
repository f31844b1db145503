use std::fmt;
use std::io;

/// Receives notable events the exchange doesn't decide about by itself.
///
/// The exchange only reports. What to do with a note (log it, count it,
/// ignore it) is up to the sink.
pub trait NoteSink: Send + Sync {
    /// Reading from the transport failed. The connection is closed after this.
    fn read_error(&self, err: &io::Error);
}

/// Default sink, forwards notes to `tracing`.
#[derive(Clone, Copy, Default)]
pub struct LogNotes;

impl NoteSink for LogNotes {
    fn read_error(&self, err: &io::Error) {
        warn!("Read failed: {}", err);
    }
}

impl<F> NoteSink for F
where
    F: Fn(&io::Error) + Send + Sync,
{
    fn read_error(&self, err: &io::Error) {
        self(err)
    }
}

impl fmt::Debug for LogNotes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LogNotes")
    }
}
