//! Error types shared by every layer of the stream engine

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Result type for stream engine operations
pub type RelayResult<T> = Result<T, Error>;

/// Main error type for the stream engine
///
/// Errors are cheap to clone so a stream can cache its load failure and hand
/// the same error to every caller until it is evicted.
#[derive(Debug, Clone, Error)]
pub struct Error {
    /// Error kind
    kind: ErrorKind,
    /// Error context
    context: ErrorContext,
}

impl Error {
    /// Create a new error
    pub fn new(kind: ErrorKind, context: ErrorContext) -> Self {
        Self { kind, context }
    }

    /// Create error with string context
    pub fn with_context(kind: ErrorKind, context: impl Into<String>) -> Self {
        Self {
            kind,
            context: ErrorContext::Message(context.into()),
        }
    }

    /// Create error wrapping a lower level cause
    pub fn chain(
        kind: ErrorKind,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            context: ErrorContext::Chain {
                message: message.into(),
                source: Arc::new(source),
            },
        }
    }

    /// Get error kind
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Get error context
    pub fn context(&self) -> &ErrorContext {
        &self.context
    }

    /// Message part of the context, without the kind prefix
    pub fn message(&self) -> &str {
        match &self.context {
            ErrorContext::Message(msg) => msg,
            ErrorContext::Chain { message, .. } => message,
        }
    }

    /// Malformed or out-of-place event
    pub fn bad_event(msg: impl Into<String>) -> Self {
        Self::with_context(ErrorKind::BadEvent, msg)
    }

    /// Sealed block does not line up with the view it is applied to
    pub fn bad_block(msg: impl Into<String>) -> Self {
        Self::with_context(ErrorKind::BadBlock, msg)
    }

    /// Malformed stream id
    pub fn bad_stream_id(msg: impl Into<String>) -> Self {
        Self::with_context(ErrorKind::BadStreamId, msg)
    }

    /// Malformed or mismatched sync cookie
    pub fn bad_sync_cookie(msg: impl Into<String>) -> Self {
        Self::with_context(ErrorKind::BadSyncCookie, msg)
    }

    /// Stream already exists
    pub fn already_exists(msg: impl Into<String>) -> Self {
        Self::with_context(ErrorKind::StreamAlreadyExists, msg)
    }

    /// Stream does not exist
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::with_context(ErrorKind::StreamNotFound, msg)
    }

    /// Optimistic concurrency mismatch
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::with_context(ErrorKind::Conflict, msg)
    }

    /// Proposal refers to events that are no longer pending
    pub fn minipool_missing_events(msg: impl Into<String>) -> Self {
        Self::with_context(ErrorKind::MinipoolMissingEvents, msg)
    }

    /// Caller is not allowed to perform the operation
    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Self::with_context(ErrorKind::PermissionDenied, msg)
    }

    /// Internal invariant violated
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::with_context(ErrorKind::Internal, msg)
    }

    /// Operation was torn down by cancellation
    pub fn canceled(msg: impl Into<String>) -> Self {
        Self::with_context(ErrorKind::Canceled, msg)
    }

    /// Check if this error is a cancellation
    pub fn is_canceled(&self) -> bool {
        matches!(self.kind, ErrorKind::Canceled)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.context {
            ErrorContext::Message(msg) => write!(f, "{}: {}", self.kind, msg),
            ErrorContext::Chain { message, source } => {
                write!(f, "{}: {} (caused by: {})", self.kind, message, source)
            }
        }
    }
}

/// Error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed or out-of-place event (inception recurrence, missing predecessor)
    BadEvent,
    /// Sealed block linkage mismatch
    BadBlock,
    /// Malformed stream id
    BadStreamId,
    /// Stream already exists
    StreamAlreadyExists,
    /// Stream does not exist
    StreamNotFound,
    /// Malformed or mismatched sync cookie
    BadSyncCookie,
    /// Storage optimistic concurrency mismatch
    Conflict,
    /// Proposal references events that left the minipool
    MinipoolMissingEvents,
    /// Rejected by the entitlement collaborator
    PermissionDenied,
    /// Internal error
    Internal,
    /// Context or timeout teardown
    Canceled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::BadEvent => write!(f, "Bad event"),
            ErrorKind::BadBlock => write!(f, "Bad block"),
            ErrorKind::BadStreamId => write!(f, "Bad stream id"),
            ErrorKind::StreamAlreadyExists => write!(f, "Stream already exists"),
            ErrorKind::StreamNotFound => write!(f, "Stream not found"),
            ErrorKind::BadSyncCookie => write!(f, "Bad sync cookie"),
            ErrorKind::Conflict => write!(f, "Conflict"),
            ErrorKind::MinipoolMissingEvents => write!(f, "Minipool missing events"),
            ErrorKind::PermissionDenied => write!(f, "Permission denied"),
            ErrorKind::Internal => write!(f, "Internal error"),
            ErrorKind::Canceled => write!(f, "Canceled"),
        }
    }
}

/// Error context
#[derive(Debug, Clone)]
pub enum ErrorContext {
    /// Simple message
    Message(String),
    /// Error chain with source
    Chain {
        /// Error message
        message: String,
        /// Source error
        source: Arc<dyn std::error::Error + Send + Sync>,
    },
}

impl From<ciborium::de::Error<std::io::Error>> for Error {
    fn from(err: ciborium::de::Error<std::io::Error>) -> Self {
        Self::chain(ErrorKind::BadEvent, "Decoding error", err)
    }
}

impl From<ciborium::ser::Error<std::io::Error>> for Error {
    fn from(err: ciborium::ser::Error<std::io::Error>) -> Self {
        Self::chain(ErrorKind::Internal, "Encoding error", err)
    }
}
