//! Error types for batchwire.

use thiserror::Error;

/// Main error type for all batchwire operations.
#[derive(Debug, Error)]
pub enum BatchwireError {
    /// I/O error raised by a source or sink.
    ///
    /// Buffering hands the source's own error back, so the kind and message
    /// are the ones the source produced.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// End of data where more bytes were structurally required.
    #[error("Unexpected end of data: {0}")]
    TransportExhausted(String),

    /// Illegal boundary syntax or nesting depth.
    #[error("Malformed boundary: {0}")]
    MalformedBoundary(String),

    /// Missing or invalid request/status line, bad part headers,
    /// duplicate Content-ID or unresolved dependency.
    #[error("Malformed operation: {0}")]
    MalformedOperation(String),

    /// The reader or writer was driven in a state that does not allow the call.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A configured quota was exceeded.
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    /// A stream listener callback failed.
    #[error("Listener error: {0}")]
    Listener(String),

    /// A pending failure whose cleanup also failed.
    #[error("{pending}; release also failed: {release}")]
    Release {
        /// The failure that was already in flight.
        pending: Box<BatchwireError>,
        /// The failure raised while releasing.
        release: Box<BatchwireError>,
    },
}

/// Result type alias using BatchwireError.
pub type Result<T> = std::result::Result<T, BatchwireError>;

impl From<BatchwireError> for std::io::Error {
    fn from(err: BatchwireError) -> Self {
        match err {
            BatchwireError::Io(inner) => inner,
            other => std::io::Error::new(std::io::ErrorKind::Other, other),
        }
    }
}

/// Merge the outcome of some work with the outcome of the release that
/// followed it.
///
/// A release failure is never dropped: with no pending failure it is returned
/// alone, otherwise both are reported as [`BatchwireError::Release`].
pub fn combine_release<T>(pending: Result<T>, release: Result<()>) -> Result<T> {
    match (pending, release) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(release)) => Err(release),
        (Err(pending), Ok(())) => Err(pending),
        (Err(pending), Err(release)) => Err(BatchwireError::Release {
            pending: Box::new(pending),
            release: Box::new(release),
        }),
    }
}
