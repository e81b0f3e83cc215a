//! Simple error types for topology operations

use relay_events::{Error, ErrorKind};
use thiserror::Error as ThisError;

/// Result type for topology operations
pub type TopologyResult<T> = Result<T, TopologyError>;

/// Topology-related errors
#[derive(Clone, Debug, ThisError)]
pub enum TopologyError {
    /// Placement knows no nodes for the stream
    #[error("No nodes placed for stream {0}")]
    NotPlaced(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Placement adaptor error
    #[error("Placement adaptor error: {0}")]
    Adaptor(String),
}

impl From<TopologyError> for Error {
    fn from(err: TopologyError) -> Self {
        let kind = match &err {
            TopologyError::NotPlaced(_) => ErrorKind::StreamNotFound,
            TopologyError::Configuration(_) | TopologyError::Adaptor(_) => ErrorKind::Internal,
        };
        Error::with_context(kind, err.to_string())
    }
}
