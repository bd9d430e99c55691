//! Boundary to the RPC transport.
//!
//! A [`Connector`] opens byte-stream transports to endpoints; a
//! [`Transport`] carries the raw RPCs over one of them. Implementations
//! report network failures as [`Error::Transport`](crate::Error::Transport)
//! and hand back server status codes untouched inside the replies; turning
//! those codes into errors is the job of [`Connection`](crate::Connection).

use crate::error::Result;
use crate::proto::{self, ErrorCode};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;

/// Opens transports to endpoints.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a transport; `None` means no timeout.
    async fn open(&self, addr: SocketAddr, timeout: Option<Duration>)
        -> Result<Box<dyn Transport>>;
}

/// One open transport to one endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn authenticate(&self, username: &str, password: &str) -> Result<AuthReply>;

    async fn execute(&self, session_id: i64, stmt: &str) -> Result<Response>;

    async fn signout(&self, session_id: i64) -> Result<()>;

    async fn close(&self);
}

/// Raw reply to an authentication request.
#[derive(Debug, Clone)]
pub struct AuthReply {
    pub session_id: i64,
    pub error_code: i32,
    pub error_msg: String,
}

impl AuthReply {
    pub fn is_succeeded(&self) -> bool {
        self.error_code == ErrorCode::Succeeded as i32
    }
}

impl From<proto::AuthResponse> for AuthReply {
    fn from(resp: proto::AuthResponse) -> Self {
        Self {
            session_id: resp.session_id.unwrap_or_default(),
            error_code: resp.error_code,
            error_msg: resp.error_msg,
        }
    }
}

/// Result of a statement execution.
#[derive(Debug, Clone, Default)]
pub struct Response {
    /// Server status code
    pub error_code: i32,
    /// Server error message, empty on success
    pub error_msg: String,
    /// Server-side latency in microseconds
    pub latency_in_us: i64,
    /// Graph space the statement ran in
    pub space_name: String,
    /// Column names
    pub columns: Vec<String>,
    /// Row data, one encoded value per column
    pub rows: Vec<Vec<prost_types::Any>>,
}

impl Response {
    /// Create an empty successful response.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_succeeded(&self) -> bool {
        self.error_code == ErrorCode::Succeeded as i32
    }

    /// Get the status code, if it is a known one.
    pub fn code(&self) -> Option<ErrorCode> {
        ErrorCode::try_from(self.error_code).ok()
    }

    /// Get the number of rows.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Get the number of columns.
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }
}

impl From<proto::ExecutionResponse> for Response {
    fn from(resp: proto::ExecutionResponse) -> Self {
        let (columns, rows) = match resp.data {
            Some(data) => (
                data.column_names,
                data.rows.into_iter().map(|row| row.values).collect(),
            ),
            None => (vec![], vec![]),
        };

        Self {
            error_code: resp.error_code,
            error_msg: resp.error_msg,
            latency_in_us: resp.latency_in_us,
            space_name: resp.space_name,
            columns,
            rows,
        }
    }
}
