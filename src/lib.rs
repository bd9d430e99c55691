//! Graph HA - connection pool and session manager for graph server clusters
//!
//! This crate keeps a bounded set of connections to a cluster of graph
//! query servers, picks the least loaded healthy server for new
//! connections, and moves sessions to a new connection transparently when
//! the old one dies mid-query.
//!
//! # Example
//!
//! ```no_run
//! use graph_ha::{ConnectionPool, HostAddress, PoolConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = ConnectionPool::connect(
//!         &[HostAddress::new("127.0.0.1", 9669)],
//!         PoolConfig::default(),
//!     )
//!     .await?;
//!
//!     let session = pool.get_session("root", "nebula").await?;
//!     let result = session.execute("SHOW SPACES").await?;
//!     println!("{:?}", result.columns);
//!
//!     session.release().await?;
//!     pool.close().await?;
//!     Ok(())
//! }
//! ```

pub mod balancer;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod pool;
pub mod registry;
pub mod session;
pub mod transport;

pub use balancer::{LeastLoaded, LoadBalancer, RoundRobin, SelectionPolicy};
pub use client::{GrpcConnector, GrpcTransport};
pub use config::{PoolConfig, SelectionStrategy};
pub use connection::{Connection, ConnectionId, ConnectionState};
pub use error::{Error, ErrorKind, Result};
pub use pool::{ConnectionPool, ConnectionSlot, EndpointStatus, PoolStats};
pub use proto::ErrorCode;
pub use registry::{EndpointId, HostAddress, HostEndpoint, HostRegistry};
pub use session::Session;
pub use transport::{AuthReply, Connector, Response, Transport};

/// Generated protobuf types
pub mod proto {
    tonic::include_proto!("graph.v1");
}
