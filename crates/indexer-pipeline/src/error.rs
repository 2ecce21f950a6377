//! Error types for the indexing pipeline.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while fetching one host slice from the content service.
#[derive(Error, Debug)]
pub enum FetchError {
    /// The host could not be reached at all
    #[error("Connection error for {host}: {message}")]
    Unreachable { host: String, message: String },

    /// The content service answered with a non-success status
    #[error("Index service returned HTTP {status} for {host}: {body}")]
    Status {
        host: String,
        status: u16,
        body: String,
    },

    /// The response body was not the expected JSON document list
    #[error("Could not decode application JSON for {url}: {message}")]
    Decode { url: String, message: String },

    /// The host redirected to the "not a valid destination" page
    #[error("{host} is not a valid destination")]
    InvalidDestination { host: String },

    /// The HTTP client could not be constructed
    #[error("HTTP client error: {0}")]
    Client(String),
}

impl FetchError {
    /// Whether this outcome is routine and should not be reported as an error.
    pub fn is_expected(&self) -> bool {
        matches!(self, FetchError::InvalidDestination { .. })
    }
}

/// Errors raised by the search writer.
#[derive(Error, Debug)]
pub enum WriterError {
    /// The update URL could not be turned into a ping URL
    #[error("Invalid update URL: {0}")]
    InvalidUrl(String),

    /// HTTP client could not be constructed
    #[error("HTTP client error: {0}")]
    Client(String),

    /// Shutdown was requested while waiting for the engine
    #[error("Delivery cancelled")]
    Cancelled,
}

/// Errors that fail a whole spool file.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Reading or moving a spool file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file held no usable events
    #[error("No events found in {}", .0.display())]
    NoEvents(PathBuf),

    /// A slice failed under the dead-letter slice policy
    #[error("Slice for {host} failed: {source}")]
    SliceFailed {
        host: String,
        #[source]
        source: FetchError,
    },

    /// Search writer error
    #[error("Writer error: {0}")]
    Writer(#[from] WriterError),

    /// The search engine rejected the delivery
    #[error("Delivery failed: {0}")]
    Delivery(String),

    /// A worker task panicked or was aborted
    #[error("Worker error: {0}")]
    Worker(String),

    /// Shutdown was requested before the file finished
    #[error("Cancelled")]
    Cancelled,

    /// The slot does not exist or already holds a file
    #[error("Pool slot {0} is not available")]
    SlotUnavailable(usize),

    /// The file is already attached to another slot
    #[error("{} is already being processed", .0.display())]
    AlreadyAttached(PathBuf),

    /// A pipeline component could not be constructed
    #[error("Setup error: {0}")]
    Setup(String),
}

impl From<tokio::task::JoinError> for PipelineError {
    fn from(err: tokio::task::JoinError) -> Self {
        PipelineError::Worker(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FetchError::Status {
            host: "muppet.wikia.com".to_string(),
            status: 500,
            body: "boom".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Index service returned HTTP 500 for muppet.wikia.com: boom"
        );

        let err = PipelineError::NoEvents(PathBuf::from("/spool/events/a.log"));
        assert_eq!(err.to_string(), "No events found in /spool/events/a.log");

        let err = WriterError::Cancelled;
        assert_eq!(err.to_string(), "Delivery cancelled");

        let err = FetchError::Client("no TLS backend".to_string());
        assert_eq!(err.to_string(), "HTTP client error: no TLS backend");
        assert!(!err.is_expected());
    }

    #[test]
    fn test_expected_fetch_errors() {
        let err = FetchError::InvalidDestination {
            host: "gone.wikia.com".to_string(),
        };
        assert!(err.is_expected());

        let err = FetchError::Unreachable {
            host: "gone.wikia.com".to_string(),
            message: "refused".to_string(),
        };
        assert!(!err.is_expected());
    }

    #[test]
    fn test_from_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: PipelineError = io.into();
        assert!(matches!(err, PipelineError::Io(_)));
    }
}
