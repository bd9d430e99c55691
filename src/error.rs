//! Error types for the pool and its sessions.

use crate::proto::ErrorCode;
use thiserror::Error;

/// Result type for pool operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for pool operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A configured host resolved to no usable address
    #[error("failed to resolve {host}: {reason}")]
    AddressResolution { host: String, reason: String },

    /// Bad configuration, empty address list or a failed initial connection
    #[error("failed to initialize connection pool: {0}")]
    Initialization(String),

    /// No live idle connection and the pool is at its maximum size
    #[error("no valid idle connection and the pool reached its capacity of {max_size}")]
    CapacityExceeded { max_size: usize },

    /// Credentials rejected, or the transport died while authenticating
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Byte-stream or network level failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Error code returned by the server over a healthy connection
    #[error("query failed with code {code}: {message}")]
    Query { code: i32, message: String },

    /// The session was already released
    #[error("session has been released")]
    AlreadyReleased,

    /// The pool was closed
    #[error("connection pool is closed")]
    PoolClosed,

    /// Invalid parameter
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// URL parse error
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    AddressResolution,
    Initialization,
    CapacityExceeded,
    Authentication,
    Transport,
    Query,
    AlreadyReleased,
    PoolClosed,
    InvalidParameter,
}

impl ErrorKind {
    /// Whether a session should swap its connection and retry the statement.
    ///
    /// Only transport failures qualify. A query error comes from a healthy
    /// connection and retrying it elsewhere would give the same answer.
    pub fn triggers_reconnect(self) -> bool {
        matches!(self, ErrorKind::Transport)
    }
}

impl Error {
    /// Build a query error from a server status code.
    pub fn query(code: i32, message: impl Into<String>) -> Self {
        Error::Query {
            code,
            message: message.into(),
        }
    }

    /// Get the classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::AddressResolution { .. } => ErrorKind::AddressResolution,
            Error::Initialization(_) => ErrorKind::Initialization,
            Error::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
            Error::Authentication(_) => ErrorKind::Authentication,
            Error::Transport(_) => ErrorKind::Transport,
            Error::Query { .. } => ErrorKind::Query,
            Error::AlreadyReleased => ErrorKind::AlreadyReleased,
            Error::PoolClosed => ErrorKind::PoolClosed,
            Error::InvalidParameter(_) | Error::UrlParse(_) => ErrorKind::InvalidParameter,
        }
    }

    /// Check if this is a transport-level failure.
    pub fn is_transport(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }

    /// Get the server status code of a query error.
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            Error::Query { code, .. } => ErrorCode::try_from(*code).ok(),
            _ => None,
        }
    }
}

impl From<tonic::transport::Error> for Error {
    fn from(e: tonic::transport::Error) -> Self {
        Error::Transport(e.to_string())
    }
}

impl From<tonic::Status> for Error {
    fn from(status: tonic::Status) -> Self {
        use tonic::Code;

        match status.code() {
            // Statuses raised by the channel itself; anything else came from
            // the server handler and is not retried.
            Code::Unavailable | Code::Cancelled | Code::DeadlineExceeded => {
                Error::Transport(status.message().to_string())
            }
            _ => Error::query(ErrorCode::RpcFailure as i32, status.message()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transport_triggers_reconnect() {
        assert!(Error::Transport("eof".into()).kind().triggers_reconnect());
        assert!(!Error::query(ErrorCode::SyntaxError as i32, "bad")
            .kind()
            .triggers_reconnect());
        assert!(!Error::Authentication("denied".into())
            .kind()
            .triggers_reconnect());
        assert!(!Error::CapacityExceeded { max_size: 1 }
            .kind()
            .triggers_reconnect());
        assert!(!Error::AlreadyReleased.kind().triggers_reconnect());
    }

    #[test]
    fn test_status_classification() {
        let err: Error = tonic::Status::unavailable("connection reset").into();
        assert!(err.is_transport());

        let err: Error = tonic::Status::deadline_exceeded("timed out").into();
        assert!(err.is_transport());

        let err: Error = tonic::Status::permission_denied("nope").into();
        assert_eq!(err.kind(), ErrorKind::Query);
        assert_eq!(err.error_code(), Some(ErrorCode::RpcFailure));

        let err: Error = tonic::Status::internal("statement failed").into();
        assert_eq!(err.kind(), ErrorKind::Query);
        assert!(!err.kind().triggers_reconnect());
    }

    #[test]
    fn test_error_code_of_query_error() {
        let err = Error::query(ErrorCode::SemanticError as i32, "no such tag");
        assert_eq!(err.error_code(), Some(ErrorCode::SemanticError));
        assert_eq!(Error::PoolClosed.error_code(), None);
    }
}
