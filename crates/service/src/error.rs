//! Error codes at the RPC boundary

use std::fmt;

use relay_events::{Error, ErrorContext, ErrorKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Result type for RPC handlers and node clients
pub type RpcResult<T> = Result<T, RpcError>;

/// Stable error code carried over the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    BadEvent,
    BadBlock,
    BadStreamId,
    AlreadyExists,
    NotFound,
    BadSyncCookie,
    Conflict,
    MinipoolMissingEvents,
    PermissionDenied,
    Internal,
    Canceled,
    /// Peer node could not be reached
    Unavailable,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::BadEvent => "bad_event",
            ErrorCode::BadBlock => "bad_block",
            ErrorCode::BadStreamId => "bad_stream_id",
            ErrorCode::AlreadyExists => "already_exists",
            ErrorCode::NotFound => "not_found",
            ErrorCode::BadSyncCookie => "bad_sync_cookie",
            ErrorCode::Conflict => "conflict",
            ErrorCode::MinipoolMissingEvents => "minipool_missing_events",
            ErrorCode::PermissionDenied => "permission_denied",
            ErrorCode::Internal => "internal",
            ErrorCode::Canceled => "canceled",
            ErrorCode::Unavailable => "unavailable",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ErrorKind> for ErrorCode {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::BadEvent => ErrorCode::BadEvent,
            ErrorKind::BadBlock => ErrorCode::BadBlock,
            ErrorKind::BadStreamId => ErrorCode::BadStreamId,
            ErrorKind::StreamAlreadyExists => ErrorCode::AlreadyExists,
            ErrorKind::StreamNotFound => ErrorCode::NotFound,
            ErrorKind::BadSyncCookie => ErrorCode::BadSyncCookie,
            ErrorKind::Conflict => ErrorCode::Conflict,
            ErrorKind::MinipoolMissingEvents => ErrorCode::MinipoolMissingEvents,
            ErrorKind::PermissionDenied => ErrorCode::PermissionDenied,
            ErrorKind::Internal => ErrorCode::Internal,
            ErrorKind::Canceled => ErrorCode::Canceled,
        }
    }
}

impl From<ErrorCode> for ErrorKind {
    fn from(code: ErrorCode) -> Self {
        match code {
            ErrorCode::BadEvent => ErrorKind::BadEvent,
            ErrorCode::BadBlock => ErrorKind::BadBlock,
            ErrorCode::BadStreamId => ErrorKind::BadStreamId,
            ErrorCode::AlreadyExists => ErrorKind::StreamAlreadyExists,
            ErrorCode::NotFound => ErrorKind::StreamNotFound,
            ErrorCode::BadSyncCookie => ErrorKind::BadSyncCookie,
            ErrorCode::Conflict => ErrorKind::Conflict,
            ErrorCode::MinipoolMissingEvents => ErrorKind::MinipoolMissingEvents,
            ErrorCode::PermissionDenied => ErrorKind::PermissionDenied,
            ErrorCode::Internal | ErrorCode::Unavailable => ErrorKind::Internal,
            ErrorCode::Canceled => ErrorKind::Canceled,
        }
    }
}

/// Code and message pair returned to callers and relayed unchanged by
/// forwarding nodes
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct RpcError {
    pub code: ErrorCode,
    pub message: String,
}

impl RpcError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn canceled(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Canceled, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unavailable, message)
    }

    pub fn is_canceled(&self) -> bool {
        self.code == ErrorCode::Canceled
    }
}

impl From<Error> for RpcError {
    fn from(err: Error) -> Self {
        let message = match err.context() {
            ErrorContext::Message(msg) => msg.clone(),
            ErrorContext::Chain { message, source } => format!("{message}: {source}"),
        };
        Self {
            code: err.kind().into(),
            message,
        }
    }
}

impl From<RpcError> for Error {
    fn from(err: RpcError) -> Self {
        Error::with_context(err.code.into(), err.message)
    }
}

impl From<relay_topology::TopologyError> for RpcError {
    fn from(err: relay_topology::TopologyError) -> Self {
        Error::from(err).into()
    }
}

/// Log a failed operation: cancellation is routine, anything else is not
pub fn log_error(operation: &str, err: &RpcError) {
    if err.is_canceled() {
        debug!("{} ended: {}", operation, err);
    } else {
        warn!("{} failed: {}", operation, err);
    }
}
