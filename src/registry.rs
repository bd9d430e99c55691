//! Registry of graph server endpoints.

use crate::error::{Error, Result};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use tracing::{debug, warn};
use url::Url;

/// A configured server address, as given by the user.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostAddress {
    pub host: String,
    pub port: u16,
}

impl HostAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for HostAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for HostAddress {
    type Err = Error;

    /// Parse `host:port`, with IPv6 hosts in brackets.
    fn from_str(s: &str) -> Result<Self> {
        let parsed = Url::parse(&format!("graph://{}", s.trim()))?;

        let host = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::InvalidParameter(format!("missing host in {:?}", s)))?;
        let port = parsed
            .port()
            .ok_or_else(|| Error::InvalidParameter(format!("missing port in {:?}", s)))?;

        Ok(Self {
            host: host.trim_start_matches('[').trim_end_matches(']').to_string(),
            port,
        })
    }
}

/// Index of an endpoint in registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId(pub(crate) usize);

impl EndpointId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// A resolved endpoint with its cached health and current load.
#[derive(Debug, Clone)]
pub struct HostEndpoint {
    /// Address as configured
    pub address: HostAddress,
    /// Resolved network address
    pub socket_addr: SocketAddr,
    pub(crate) available: bool,
    pub(crate) load: usize,
}

impl HostEndpoint {
    fn new(address: HostAddress, socket_addr: SocketAddr) -> Self {
        Self {
            address,
            socket_addr,
            available: true,
            load: 0,
        }
    }

    /// Result of the last health observation.
    pub fn is_available(&self) -> bool {
        self.available
    }

    /// Number of sessions currently bound to this endpoint.
    pub fn load(&self) -> usize {
        self.load
    }
}

/// Resolved endpoints in registration order plus a round-robin cursor.
#[derive(Debug, Default)]
pub struct HostRegistry {
    endpoints: Vec<HostEndpoint>,
    cursor: usize,
}

impl HostRegistry {
    /// Resolve every address to a numeric endpoint.
    ///
    /// Fails if any host resolves to nothing. Addresses that resolve to an
    /// already registered endpoint are skipped.
    pub async fn register(addresses: &[HostAddress]) -> Result<Self> {
        let mut registry = Self::default();

        for address in addresses {
            let resolved = tokio::net::lookup_host((address.host.as_str(), address.port))
                .await
                .map_err(|e| Error::AddressResolution {
                    host: address.to_string(),
                    reason: e.to_string(),
                })?;
            let socket_addr = pick_address(address, resolved)?;

            if registry.position(socket_addr).is_some() {
                warn!("Skipping duplicate address {} ({})", address, socket_addr);
                continue;
            }

            debug!("Resolved {} to {}", address, socket_addr);
            registry.insert(address.clone(), socket_addr);
        }

        Ok(registry)
    }

    /// Build a registry from already resolved endpoints.
    pub fn from_resolved(endpoints: impl IntoIterator<Item = (HostAddress, SocketAddr)>) -> Self {
        let mut registry = Self::default();
        for (address, socket_addr) in endpoints {
            if registry.position(socket_addr).is_none() {
                registry.insert(address, socket_addr);
            }
        }
        registry
    }

    fn insert(&mut self, address: HostAddress, socket_addr: SocketAddr) {
        self.endpoints.push(HostEndpoint::new(address, socket_addr));
    }

    fn position(&self, socket_addr: SocketAddr) -> Option<EndpointId> {
        self.endpoints
            .iter()
            .position(|e| e.socket_addr == socket_addr)
            .map(EndpointId)
    }

    /// Mark an endpoint as healthy.
    pub fn mark_available(&mut self, id: EndpointId) {
        if let Some(endpoint) = self.endpoints.get_mut(id.0) {
            endpoint.available = true;
        }
    }

    /// Mark an endpoint as unhealthy until the next successful observation.
    pub fn mark_unavailable(&mut self, id: EndpointId) {
        if let Some(endpoint) = self.endpoints.get_mut(id.0) {
            if endpoint.available {
                warn!("Marking {} unavailable", endpoint.address);
            }
            endpoint.available = false;
        }
    }

    /// Next endpoint in round-robin order, regardless of availability.
    pub fn next(&mut self) -> Option<EndpointId> {
        if self.endpoints.is_empty() {
            return None;
        }
        if self.cursor >= self.endpoints.len() {
            self.cursor = 0;
        }
        let id = EndpointId(self.cursor);
        self.cursor += 1;
        Some(id)
    }

    pub fn get(&self, id: EndpointId) -> Option<&HostEndpoint> {
        self.endpoints.get(id.0)
    }

    pub(crate) fn get_mut(&mut self, id: EndpointId) -> Option<&mut HostEndpoint> {
        self.endpoints.get_mut(id.0)
    }

    /// All endpoints with their ids, in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (EndpointId, &HostEndpoint)> {
        self.endpoints
            .iter()
            .enumerate()
            .map(|(i, e)| (EndpointId(i), e))
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

/// Prefer an IPv4 address and fall back to IPv6.
fn pick_address(
    address: &HostAddress,
    resolved: impl IntoIterator<Item = SocketAddr>,
) -> Result<SocketAddr> {
    let mut fallback = None;
    for candidate in resolved {
        if candidate.is_ipv4() {
            return Ok(candidate);
        }
        fallback.get_or_insert(candidate);
    }
    fallback.ok_or_else(|| Error::AddressResolution {
        host: address.to_string(),
        reason: "no usable address found".to_string(),
    })
}
