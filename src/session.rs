//! Authenticated session bound to a pooled connection.

use crate::connection::{Connection, ConnectionId};
use crate::error::{Error, Result};
use crate::pool::ConnectionPool;
use crate::transport::Response;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// A server-issued session, executing statements over one connection at a time.
///
/// A session survives the loss of its connection: after a transport failure
/// it moves to another connection from the pool and retries the statement
/// once. Call [`Session::release`] when done; a dropped session hands its
/// connection back to the pool without signing out.
pub struct Session {
    session_id: i64,
    pool: ConnectionPool,
    connection: Mutex<Option<Arc<Connection>>>,
}

impl Session {
    pub(crate) fn new(session_id: i64, connection: Arc<Connection>, pool: ConnectionPool) -> Self {
        Self {
            session_id,
            pool,
            connection: Mutex::new(Some(connection)),
        }
    }

    /// Execute a statement.
    ///
    /// Statements on one session run one at a time. A query error is
    /// returned untouched; a transport error triggers exactly one reconnect
    /// and retry, whose outcome is returned as is.
    pub async fn execute(&self, stmt: &str) -> Result<Response> {
        let mut bound = self.connection.lock().await;
        let conn = bound.as_ref().ok_or(Error::AlreadyReleased)?.clone();

        let err = match conn.execute(self.session_id, stmt).await {
            Err(err) if err.kind().triggers_reconnect() => err,
            other => return other,
        };

        warn!(
            "Session {} lost {} to {}: {}",
            self.session_id,
            conn.id(),
            conn.address(),
            err
        );

        let replacement = match self.pool.replace_connection(&conn).await {
            Ok(replacement) => replacement,
            Err(reconnect_err) => {
                error!(
                    "Failed to reconnect session {}: {}",
                    self.session_id, reconnect_err
                );
                return Err(err);
            }
        };

        info!(
            "Session {} reconnected to {}",
            self.session_id,
            replacement.address()
        );
        *bound = Some(replacement.clone());
        replacement.execute(self.session_id, stmt).await
    }

    /// Sign out and return the connection to the pool.
    ///
    /// Releasing twice is a no-op. A failed sign-out is logged and the
    /// connection is returned anyway.
    pub async fn release(&self) -> Result<()> {
        let Some(conn) = self.connection.lock().await.take() else {
            debug!("Session {} has already been released", self.session_id);
            return Ok(());
        };

        if let Err(e) = conn.sign_out(self.session_id).await {
            warn!("Sign out of session {} failed: {}", self.session_id, e);
        }
        self.pool.release_connection(&conn);
        Ok(())
    }

    /// Get the server-issued session id.
    pub fn session_id(&self) -> i64 {
        self.session_id
    }

    /// Get the id of the connection currently bound, if not released.
    pub async fn connection_id(&self) -> Option<ConnectionId> {
        self.connection.lock().await.as_ref().map(|c| c.id())
    }

    /// Get the server address currently bound, if not released.
    pub async fn server_address(&self) -> Option<SocketAddr> {
        self.connection.lock().await.as_ref().map(|c| c.address())
    }

    pub async fn is_released(&self) -> bool {
        self.connection.lock().await.is_none()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(conn) = self.connection.get_mut().take() {
            warn!(
                "Session {} dropped without release, returning {} to the pool",
                self.session_id,
                conn.id()
            );
            self.pool.release_connection(&conn);
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id)
            .field("pool", &self.pool)
            .finish()
    }
}
