//! Connection to a single graph server.

use crate::error::{Error, Result};
use crate::registry::EndpointId;
use crate::transport::{Connector, Response, Transport};
use parking_lot::Mutex;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Statement used to probe a connection.
pub const PING_STATEMENT: &str = "YIELD 1";

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a connection.
///
/// Two connections to the same endpoint never share an id, so the pool
/// tracks connections by id rather than by their fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Authenticated,
    Closed,
}

/// An open transport to one endpoint.
pub struct Connection {
    id: ConnectionId,
    endpoint: EndpointId,
    address: SocketAddr,
    transport: Box<dyn Transport>,
    state: Mutex<ConnectionState>,
    valid: AtomicBool,
}

impl Connection {
    /// Open a new connection.
    ///
    /// Failure is returned as is; retrying is up to the pool.
    pub async fn open(
        connector: &dyn Connector,
        endpoint: EndpointId,
        address: SocketAddr,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let transport = connector.open(address, timeout).await?;
        let conn = Self::from_transport(endpoint, address, transport);
        debug!("Opened {} to {}", conn.id, address);
        Ok(conn)
    }

    /// Wrap an already open transport.
    pub fn from_transport(
        endpoint: EndpointId,
        address: SocketAddr,
        transport: Box<dyn Transport>,
    ) -> Self {
        Self {
            id: ConnectionId::next(),
            endpoint,
            address,
            transport,
            state: Mutex::new(ConnectionState::Open),
            valid: AtomicBool::new(true),
        }
    }

    /// Authenticate and return the server-issued session id.
    ///
    /// A transport failure here is reported as an authentication error too,
    /// but it also leaves the connection marked invalid.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<i64> {
        self.check_closed()?;

        let reply = match self.transport.authenticate(username, password).await {
            Ok(reply) => reply,
            Err(e) => {
                self.invalidate(&e);
                return Err(Error::Authentication(e.to_string()));
            }
        };

        if !reply.is_succeeded() {
            return Err(Error::Authentication(format!(
                "error code {}: {}",
                reply.error_code, reply.error_msg
            )));
        }

        *self.state.lock() = ConnectionState::Authenticated;
        Ok(reply.session_id)
    }

    /// Execute a statement within a session.
    ///
    /// A non-success status code comes back as [`Error::Query`] and leaves the
    /// connection valid.
    pub async fn execute(&self, session_id: i64, stmt: &str) -> Result<Response> {
        self.check_closed()?;

        let response = self
            .transport
            .execute(session_id, stmt)
            .await
            .inspect_err(|e| self.invalidate(e))?;

        if !response.is_succeeded() {
            return Err(Error::query(response.error_code, response.error_msg));
        }
        Ok(response)
    }

    /// Check that the transport still answers.
    ///
    /// Any reply counts, including an error code or a query error: only a
    /// transport failure makes the connection invalid.
    pub async fn ping(&self) -> bool {
        if !self.is_valid() {
            return false;
        }
        match self.transport.execute(0, PING_STATEMENT).await {
            Err(e) if e.is_transport() => {
                self.invalidate(&e);
                false
            }
            _ => true,
        }
    }

    /// Sign out a session on the server.
    pub async fn sign_out(&self, session_id: i64) -> Result<()> {
        self.check_closed()?;
        self.transport
            .signout(session_id)
            .await
            .inspect_err(|e| self.invalidate(e))?;

        let mut state = self.state.lock();
        if *state == ConnectionState::Authenticated {
            *state = ConnectionState::Open;
        }
        Ok(())
    }

    /// Close the transport. Closing twice is a no-op.
    pub async fn close(&self) {
        {
            let mut state = self.state.lock();
            if *state == ConnectionState::Closed {
                return;
            }
            *state = ConnectionState::Closed;
        }
        self.valid.store(false, Ordering::SeqCst);
        self.transport.close().await;
        debug!("Closed {} to {}", self.id, self.address);
    }

    fn invalidate(&self, err: &Error) {
        if err.is_transport() && self.valid.swap(false, Ordering::SeqCst) {
            warn!("{} to {} is broken: {}", self.id, self.address, err);
        }
    }

    fn check_closed(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Transport(format!("{} is closed", self.id)));
        }
        Ok(())
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn endpoint(&self) -> EndpointId {
        self.endpoint
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// False once a transport failure was observed or the connection closed.
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("state", &self.state())
            .field("valid", &self.is_valid())
            .finish()
    }
}
