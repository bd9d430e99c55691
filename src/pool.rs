//! Connection pool shared by all sessions of one cluster.

use crate::balancer::{LoadBalancer, SelectionPolicy};
use crate::client::GrpcConnector;
use crate::config::PoolConfig;
use crate::connection::{Connection, ConnectionId};
use crate::error::{Error, Result};
use crate::registry::{EndpointId, HostAddress, HostRegistry};
use crate::session::Session;
use crate::transport::Connector;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

/// Where a connection currently sits in the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionSlot {
    Idle,
    Active,
}

/// Health and load of one endpoint.
#[derive(Debug, Clone)]
pub struct EndpointStatus {
    pub address: HostAddress,
    pub socket_addr: SocketAddr,
    pub available: bool,
    pub load: usize,
}

/// Point-in-time view of the pool.
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub idle: usize,
    pub active: usize,
    /// Connections being opened, already counted against the maximum size
    pub opening: usize,
    pub endpoints: Vec<EndpointStatus>,
}

impl PoolStats {
    pub fn total(&self) -> usize {
        self.idle + self.active + self.opening
    }
}

struct IdleConnection {
    conn: Arc<Connection>,
    idle_since: Instant,
}

impl IdleConnection {
    fn new(conn: Arc<Connection>) -> Self {
        Self {
            conn,
            idle_since: Instant::now(),
        }
    }
}

/// Everything guarded by the pool lock.
struct PoolState {
    idle: VecDeque<IdleConnection>,
    active: HashMap<ConnectionId, Arc<Connection>>,
    opening: usize,
    balancer: LoadBalancer,
    closed: bool,
}

/// Next step of an acquisition, decided under the lock.
enum Acquisition {
    /// An idle connection moved to the active set that still needs a ping
    Validate(Arc<Connection>),
    /// A reserved slot to fill with a new connection
    Open(EndpointId, SocketAddr),
}

impl PoolState {
    fn total(&self) -> usize {
        self.idle.len() + self.active.len() + self.opening
    }

    fn next_acquisition(&mut self, max_size: usize) -> Result<Acquisition> {
        if let Some(entry) = self.idle.pop_front() {
            let conn = entry.conn;
            self.active.insert(conn.id(), conn.clone());
            self.balancer.increase_load(conn.endpoint());
            return Ok(Acquisition::Validate(conn));
        }

        if self.total() >= max_size {
            return Err(Error::CapacityExceeded { max_size });
        }

        let endpoint = self
            .balancer
            .select_host()
            .ok_or_else(|| Error::Transport("no endpoint registered".to_string()))?;
        let addr = self
            .socket_addr(endpoint)
            .ok_or_else(|| Error::Transport(format!("unknown endpoint {:?}", endpoint)))?;
        self.opening += 1;
        Ok(Acquisition::Open(endpoint, addr))
    }

    fn socket_addr(&self, id: EndpointId) -> Option<SocketAddr> {
        self.balancer.registry().get(id).map(|e| e.socket_addr)
    }

    fn take_expired(&mut self, ttl: Option<Duration>) -> Vec<Arc<Connection>> {
        let Some(ttl) = ttl else {
            return Vec::new();
        };
        let (keep, expired): (VecDeque<_>, VecDeque<_>) = self
            .idle
            .drain(..)
            .partition(|entry| entry.idle_since.elapsed() < ttl);
        self.idle = keep;
        expired.into_iter().map(|entry| entry.conn).collect()
    }
}

struct PoolInner {
    config: PoolConfig,
    connector: Arc<dyn Connector>,
    state: Mutex<PoolState>,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        if let Some(handle) = self.maintenance.get_mut().take() {
            handle.abort();
        }
    }
}

/// A bounded pool of connections to a cluster of graph servers.
///
/// Cloning is cheap; all clones share the same pool. Every step that reads
/// and then changes the idle set, the active set or the endpoint loads runs
/// under one lock, and the lock is never held across network I/O.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Create a pool that talks gRPC to the given servers.
    pub async fn connect(addresses: &[HostAddress], config: PoolConfig) -> Result<Self> {
        Self::init(addresses, config, GrpcConnector).await
    }

    /// Create a pool over a custom transport.
    pub async fn init(
        addresses: &[HostAddress],
        config: PoolConfig,
        connector: impl Connector,
    ) -> Result<Self> {
        let policy = config.selection.policy();
        Self::init_with_policy(addresses, config, Arc::new(connector), policy).await
    }

    /// Create a pool with a custom endpoint selection policy.
    ///
    /// Opens `min_conn_pool_size` connections round-robin across the
    /// endpoints; if any of them fails, the ones already opened are closed
    /// and initialization fails.
    pub async fn init_with_policy(
        addresses: &[HostAddress],
        config: PoolConfig,
        connector: Arc<dyn Connector>,
        policy: Box<dyn SelectionPolicy>,
    ) -> Result<Self> {
        if addresses.is_empty() {
            return Err(Error::Initialization("address list is empty".to_string()));
        }
        config.validate()?;

        let registry = HostRegistry::register(addresses).await?;
        let mut balancer = LoadBalancer::new(registry, policy);

        let mut idle = VecDeque::with_capacity(config.min_conn_pool_size);
        for _ in 0..config.min_conn_pool_size {
            let opened = match balancer.next_round_robin() {
                Some(id) => {
                    let addr = balancer
                        .registry()
                        .get(id)
                        .map(|e| e.socket_addr)
                        .ok_or_else(|| Error::Initialization(format!("unknown endpoint {:?}", id)))?;
                    Connection::open(connector.as_ref(), id, addr, config.timeout())
                        .await
                        .map_err(|e| {
                            Error::Initialization(format!(
                                "failed to open connection to {}: {}",
                                addr, e
                            ))
                        })
                }
                None => Err(Error::Initialization("no endpoint registered".to_string())),
            };

            match opened {
                Ok(conn) => idle.push_back(IdleConnection::new(Arc::new(conn))),
                Err(e) => {
                    for entry in idle {
                        entry.conn.close().await;
                    }
                    return Err(e);
                }
            }
        }

        info!(
            "Connection pool initialized: {} endpoints, {} idle connections, max size {}",
            balancer.registry().len(),
            idle.len(),
            config.max_conn_pool_size
        );

        let health_check_interval = config.health_check_interval();
        let inner = Arc::new(PoolInner {
            config,
            connector,
            state: Mutex::new(PoolState {
                idle,
                active: HashMap::new(),
                opening: 0,
                balancer,
                closed: false,
            }),
            maintenance: Mutex::new(None),
        });

        if let Some(period) = health_check_interval {
            *inner.maintenance.lock() = Some(spawn_maintenance(Arc::downgrade(&inner), period));
        }

        Ok(Self { inner })
    }

    /// Get an authenticated session.
    ///
    /// Never waits for capacity: when no live idle connection exists and the
    /// pool is full, this fails with [`Error::CapacityExceeded`]. If the
    /// credentials are rejected, the connection goes back to the idle set.
    pub async fn get_session(&self, username: &str, password: &str) -> Result<Session> {
        let conn = self.acquire().await?;

        match conn.authenticate(username, password).await {
            Ok(session_id) => {
                debug!(
                    "Session {} bound to {} on {}",
                    session_id,
                    conn.id(),
                    conn.address()
                );
                Ok(Session::new(session_id, conn, self.clone()))
            }
            Err(e) => {
                warn!("Authentication on {} failed: {}", conn.id(), e);
                self.release_connection(&conn);
                Err(e)
            }
        }
    }

    /// Get a connection into the active set, retrying up to `max_retry_times`.
    pub(crate) async fn acquire(&self) -> Result<Arc<Connection>> {
        let mut last_err = None;

        for attempt in 1..=self.inner.config.max_retry_times {
            match self.try_acquire().await {
                Ok(conn) => return Ok(conn),
                Err(Error::PoolClosed) => return Err(Error::PoolClosed),
                Err(e) => {
                    debug!("Attempt {} to get a connection failed: {}", attempt, e);
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or(Error::CapacityExceeded {
            max_size: self.inner.config.max_conn_pool_size,
        }))
    }

    async fn try_acquire(&self) -> Result<Arc<Connection>> {
        let max_size = self.inner.config.max_conn_pool_size;

        loop {
            let (next, expired) = {
                let mut state = self.inner.state.lock();
                if state.closed {
                    return Err(Error::PoolClosed);
                }
                let expired = state.take_expired(self.inner.config.idle_time());
                (state.next_acquisition(max_size), expired)
            };
            close_all(expired).await;

            match next? {
                Acquisition::Validate(conn) => {
                    if conn.ping().await {
                        return Ok(conn);
                    }
                    warn!(
                        "Evicting dead idle connection {} to {}",
                        conn.id(),
                        conn.address()
                    );
                    self.discard(&conn).await;
                }
                Acquisition::Open(endpoint, addr) => return self.open_active(endpoint, addr).await,
            }
        }
    }

    /// Fill a reserved slot with a new connection to `endpoint`.
    async fn open_active(&self, endpoint: EndpointId, addr: SocketAddr) -> Result<Arc<Connection>> {
        let opened = Connection::open(
            self.inner.connector.as_ref(),
            endpoint,
            addr,
            self.inner.config.timeout(),
        )
        .await;

        let conn = match opened {
            Ok(conn) => Arc::new(conn),
            Err(e) => {
                let mut state = self.inner.state.lock();
                state.opening -= 1;
                state.balancer.decrease_load(endpoint);
                state.balancer.mark_unavailable(endpoint);
                return Err(e);
            }
        };

        let admitted = {
            let mut state = self.inner.state.lock();
            state.opening -= 1;
            state.balancer.mark_available(endpoint);
            if state.closed {
                state.balancer.decrease_load(endpoint);
                false
            } else {
                state.active.insert(conn.id(), conn.clone());
                true
            }
        };

        if !admitted {
            conn.close().await;
            return Err(Error::PoolClosed);
        }
        Ok(conn)
    }

    /// Drop a connection from the active set and close it.
    async fn discard(&self, conn: &Arc<Connection>) {
        {
            let mut state = self.inner.state.lock();
            if state.active.remove(&conn.id()).is_some() {
                state.balancer.decrease_load(conn.endpoint());
            }
        }
        conn.close().await;
    }

    /// Move a connection from the active set back to the idle set.
    ///
    /// Releasing a connection that is not active is a no-op.
    pub(crate) fn release_connection(&self, conn: &Arc<Connection>) {
        let mut state = self.inner.state.lock();
        if state.active.remove(&conn.id()).is_none() {
            return;
        }
        state.balancer.decrease_load(conn.endpoint());
        state.idle.push_back(IdleConnection::new(conn.clone()));
    }

    /// Get a replacement for a connection that failed at the transport level.
    ///
    /// The broken connection is closed and leaves the pool only once the
    /// replacement is secured, so a failed reconnect keeps it bound.
    pub(crate) async fn replace_connection(&self, broken: &Arc<Connection>) -> Result<Arc<Connection>> {
        self.inner
            .state
            .lock()
            .balancer
            .mark_unavailable(broken.endpoint());

        let replacement = self.acquire().await?;
        self.discard(broken).await;
        Ok(replacement)
    }

    /// Close every connection. All later pool operations fail.
    pub async fn close(&self) -> Result<()> {
        let connections = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Ok(());
            }
            state.closed = true;

            let mut connections: Vec<_> = state.idle.drain(..).map(|entry| entry.conn).collect();
            let active: Vec<_> = state.active.drain().map(|(_, conn)| conn).collect();
            for conn in &active {
                state.balancer.decrease_load(conn.endpoint());
            }
            connections.extend(active);
            connections
        };

        if let Some(handle) = self.inner.maintenance.lock().take() {
            handle.abort();
        }

        let count = connections.len();
        close_all(connections).await;
        info!("Connection pool closed, {} connections dropped", count);
        Ok(())
    }

    /// Probe every endpoint and record which ones accept connections.
    pub async fn update_servers_status(&self) {
        let endpoints: Vec<(EndpointId, SocketAddr)> = {
            let state = self.inner.state.lock();
            state
                .balancer
                .registry()
                .iter()
                .map(|(id, e)| (id, e.socket_addr))
                .collect()
        };

        let mut probes = JoinSet::new();
        for (id, addr) in endpoints {
            let connector = self.inner.connector.clone();
            let timeout = self.inner.config.timeout();
            probes.spawn(async move {
                match connector.open(addr, timeout).await {
                    Ok(transport) => {
                        transport.close().await;
                        (id, true)
                    }
                    Err(e) => {
                        debug!("Health probe to {} failed: {}", addr, e);
                        (id, false)
                    }
                }
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => warn!("Health probe task failed: {}", e),
            }
        }

        let mut state = self.inner.state.lock();
        for (id, healthy) in results {
            if healthy {
                state.balancer.mark_available(id);
            } else {
                state.balancer.mark_unavailable(id);
            }
        }
    }

    /// Close idle connections that outlived `idle_time`. Returns how many.
    pub async fn evict_expired(&self) -> usize {
        let expired = self
            .inner
            .state
            .lock()
            .take_expired(self.inner.config.idle_time());
        let count = expired.len();
        close_all(expired).await;
        count
    }

    /// Get the number of connections bound to sessions.
    pub fn active_conn_count(&self) -> usize {
        self.inner.state.lock().active.len()
    }

    /// Get the number of connections waiting for a session.
    pub fn idle_conn_count(&self) -> usize {
        self.inner.state.lock().idle.len()
    }

    /// Look up where a connection sits, if the pool still holds it.
    pub fn slot_of(&self, id: ConnectionId) -> Option<ConnectionSlot> {
        let state = self.inner.state.lock();
        if state.active.contains_key(&id) {
            Some(ConnectionSlot::Active)
        } else if state.idle.iter().any(|entry| entry.conn.id() == id) {
            Some(ConnectionSlot::Idle)
        } else {
            None
        }
    }

    /// Get current pool statistics.
    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        PoolStats {
            idle: state.idle.len(),
            active: state.active.len(),
            opening: state.opening,
            endpoints: state
                .balancer
                .registry()
                .iter()
                .map(|(_, e)| EndpointStatus {
                    address: e.address.clone(),
                    socket_addr: e.socket_addr,
                    available: e.is_available(),
                    load: e.load(),
                })
                .collect(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Get the pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ConnectionPool")
            .field("idle", &state.idle.len())
            .field("active", &state.active.len())
            .field("opening", &state.opening)
            .field("closed", &state.closed)
            .finish()
    }
}

async fn close_all(connections: Vec<Arc<Connection>>) {
    for conn in connections {
        conn.close().await;
    }
}

/// Periodically probe endpoints and evict expired idle connections until
/// the pool is closed or dropped.
fn spawn_maintenance(weak: Weak<PoolInner>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks = IntervalStream::new(interval);

        while ticks.next().await.is_some() {
            let Some(inner) = weak.upgrade() else {
                break;
            };
            let pool = ConnectionPool { inner };
            if pool.is_closed() {
                break;
            }

            pool.update_servers_status().await;
            let evicted = pool.evict_expired().await;
            if evicted > 0 {
                debug!("Evicted {} expired idle connections", evicted);
            }
        }
    })
}
