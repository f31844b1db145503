use crate::telemetry::{LogNotes, NoteSink};
use std::fmt;
use std::sync::Arc;

/// Buffer size used when none is configured.
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Smallest buffer accepted. It must hold a status line and a chunk frame.
pub const MIN_BUFFER_SIZE: usize = 64;

/// Per connection settings.
///
/// ```
/// use h1_exchange::Options;
///
/// let opts = Options::new().buffer_size(8192);
/// assert_eq!(opts.get_buffer_size(), 8192);
/// ```
#[derive(Clone)]
pub struct Options {
    buffer_size: usize,
    notes: Arc<dyn NoteSink>,
}

impl Options {
    /// Default options.
    pub fn new() -> Self {
        Options {
            buffer_size: DEFAULT_BUFFER_SIZE,
            notes: Arc::new(LogNotes),
        }
    }

    /// Size of the exchange buffer.
    ///
    /// The whole request line, headers and body must fit in it. Larger
    /// requests are refused with `414`, `400` or `413`.
    ///
    /// Panics if `size` is less than [`MIN_BUFFER_SIZE`].
    pub fn buffer_size(mut self, size: usize) -> Self {
        assert!(
            size >= MIN_BUFFER_SIZE,
            "Buffer size must be at least {}: {}",
            MIN_BUFFER_SIZE,
            size
        );
        self.buffer_size = size;
        self
    }

    /// Where notes such as read errors go. Defaults to [`LogNotes`].
    pub fn note_sink<N: NoteSink + 'static>(mut self, sink: N) -> Self {
        self.notes = Arc::new(sink);
        self
    }

    /// The configured buffer size.
    pub fn get_buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub(crate) fn notes(&self) -> Arc<dyn NoteSink> {
        self.notes.clone()
    }
}

impl Default for Options {
    fn default() -> Self {
        Options::new()
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("buffer_size", &self.buffer_size)
            .finish()
    }
}
