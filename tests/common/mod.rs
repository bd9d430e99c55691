//! In-memory graph server used by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use graph_ha::{
    AuthReply, ConnectionPool, Connector, Error, ErrorCode, HostAddress, PoolConfig, Response,
    Result, Transport,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const USER: &str = "root";
pub const PASSWORD: &str = "nebula";

#[derive(Default)]
struct ServerState {
    opened: AtomicUsize,
    closed: AtomicUsize,
    executed: AtomicUsize,
    next_session: AtomicI64,
    denied: AtomicBool,
    refused: Mutex<HashSet<SocketAddr>>,
    links: Mutex<Vec<Arc<Link>>>,
}

struct Link {
    addr: SocketAddr,
    alive: AtomicBool,
}

/// A fake cluster. Clones share state, so a test can keep one handle and
/// give another to the pool.
#[derive(Clone, Default)]
pub struct MockCluster {
    state: Arc<ServerState>,
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse new connections to an address.
    pub fn refuse(&self, addr: SocketAddr) {
        self.state.refused.lock().insert(addr);
    }

    /// Accept new connections to an address again.
    pub fn accept(&self, addr: SocketAddr) {
        self.state.refused.lock().remove(&addr);
    }

    /// Break every transport opened so far.
    pub fn kill_all(&self) {
        for link in self.state.links.lock().iter() {
            link.alive.store(false, Ordering::SeqCst);
        }
    }

    /// Break every transport opened so far to one address.
    pub fn kill(&self, addr: SocketAddr) {
        for link in self.state.links.lock().iter() {
            if link.addr == addr {
                link.alive.store(false, Ordering::SeqCst);
            }
        }
    }

    /// Answer every statement with a permission-denied RPC status.
    pub fn deny_statements(&self, denied: bool) {
        self.state.denied.store(denied, Ordering::SeqCst);
    }

    pub fn opened(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }

    pub fn executed(&self) -> usize {
        self.state.executed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockCluster {
    async fn open(
        &self,
        addr: SocketAddr,
        _timeout: Option<Duration>,
    ) -> Result<Box<dyn Transport>> {
        if self.state.refused.lock().contains(&addr) {
            return Err(Error::Transport(format!("connection refused: {}", addr)));
        }

        let link = Arc::new(Link {
            addr,
            alive: AtomicBool::new(true),
        });
        self.state.links.lock().push(link.clone());
        self.state.opened.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(MockTransport {
            state: self.state.clone(),
            link,
        }))
    }
}

struct MockTransport {
    state: Arc<ServerState>,
    link: Arc<Link>,
}

impl MockTransport {
    fn check_alive(&self) -> Result<()> {
        if self.link.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::Transport("end of file".to_string()))
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn authenticate(&self, username: &str, password: &str) -> Result<AuthReply> {
        self.check_alive()?;

        if username == USER && password == PASSWORD {
            Ok(AuthReply {
                session_id: self.state.next_session.fetch_add(1, Ordering::SeqCst) + 1,
                error_code: ErrorCode::Succeeded as i32,
                error_msg: String::new(),
            })
        } else {
            Ok(AuthReply {
                session_id: 0,
                error_code: ErrorCode::BadUsernamePassword as i32,
                error_msg: "Bad username/password".to_string(),
            })
        }
    }

    async fn execute(&self, session_id: i64, stmt: &str) -> Result<Response> {
        self.check_alive()?;
        self.state.executed.fetch_add(1, Ordering::SeqCst);

        if self.state.denied.load(Ordering::SeqCst) {
            return Err(tonic::Status::permission_denied("statement not allowed").into());
        }

        if session_id == 0 {
            return Ok(Response {
                error_code: ErrorCode::SessionInvalid as i32,
                error_msg: "Session not existed!".to_string(),
                ..Response::empty()
            });
        }
        if stmt.starts_with("BAD") {
            return Ok(Response {
                error_code: ErrorCode::SyntaxError as i32,
                error_msg: format!("syntax error near `{}'", stmt),
                ..Response::empty()
            });
        }

        Ok(Response {
            columns: vec!["server".to_string()],
            rows: vec![vec![prost_types::Any {
                type_url: "type.googleapis.com/google.protobuf.StringValue".to_string(),
                value: self.link.addr.to_string().into_bytes(),
            }]],
            space_name: String::new(),
            ..Response::empty()
        })
    }

    async fn signout(&self, _session_id: i64) -> Result<()> {
        self.check_alive()
    }

    async fn close(&self) {
        self.link.alive.store(false, Ordering::SeqCst);
        self.state.closed.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn host(port: u16) -> HostAddress {
    HostAddress::new("127.0.0.1", port)
}

pub fn socket(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

pub async fn pool(cluster: &MockCluster, ports: &[u16], config: PoolConfig) -> ConnectionPool {
    let addresses: Vec<HostAddress> = ports.iter().map(|p| host(*p)).collect();
    ConnectionPool::init(&addresses, config, cluster.clone())
        .await
        .expect("pool init")
}
