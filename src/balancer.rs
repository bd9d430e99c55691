//! Endpoint selection for new connections.

use crate::config::SelectionStrategy;
use crate::registry::{EndpointId, HostEndpoint, HostRegistry};
use std::fmt;

/// Trait for endpoint selection strategies.
pub trait SelectionPolicy: Send + Sync + fmt::Debug {
    /// Pick an available endpoint, or `None` if no endpoint is available.
    fn select(&self, registry: &mut HostRegistry) -> Option<EndpointId>;
}

/// Available endpoint with the lowest load; ties go to the earliest registered.
#[derive(Debug, Default, Clone, Copy)]
pub struct LeastLoaded;

impl SelectionPolicy for LeastLoaded {
    fn select(&self, registry: &mut HostRegistry) -> Option<EndpointId> {
        registry
            .iter()
            .filter(|(_, e)| e.is_available())
            .min_by_key(|(_, e)| e.load())
            .map(|(id, _)| id)
    }
}

/// Next available endpoint after the registry cursor.
#[derive(Debug, Default, Clone, Copy)]
pub struct RoundRobin;

impl SelectionPolicy for RoundRobin {
    fn select(&self, registry: &mut HostRegistry) -> Option<EndpointId> {
        for _ in 0..registry.len() {
            let id = registry.next()?;
            if registry.get(id).is_some_and(HostEndpoint::is_available) {
                return Some(id);
            }
        }
        None
    }
}

impl SelectionStrategy {
    pub fn policy(self) -> Box<dyn SelectionPolicy> {
        match self {
            SelectionStrategy::LeastLoaded => Box::new(LeastLoaded),
            SelectionStrategy::RoundRobin => Box::new(RoundRobin),
        }
    }
}

/// Per-endpoint health and load bookkeeping.
///
/// Not synchronized on its own: the pool keeps it behind the same lock as
/// its idle and active sets, so a selection and the load increment that
/// follows it happen as one step.
#[derive(Debug)]
pub struct LoadBalancer {
    registry: HostRegistry,
    policy: Box<dyn SelectionPolicy>,
}

impl LoadBalancer {
    pub fn new(registry: HostRegistry, policy: Box<dyn SelectionPolicy>) -> Self {
        Self { registry, policy }
    }

    /// Select the endpoint for a new connection and count it as loaded.
    ///
    /// Falls back to plain round-robin when no endpoint is marked available,
    /// since the flags may be stale.
    pub fn select_host(&mut self) -> Option<EndpointId> {
        let id = self
            .policy
            .select(&mut self.registry)
            .or_else(|| self.registry.next())?;
        self.increase_load(id);
        Some(id)
    }

    pub fn increase_load(&mut self, id: EndpointId) {
        if let Some(endpoint) = self.registry.get_mut(id) {
            endpoint.load += 1;
        }
    }

    pub fn decrease_load(&mut self, id: EndpointId) {
        if let Some(endpoint) = self.registry.get_mut(id) {
            endpoint.load = endpoint.load.saturating_sub(1);
        }
    }

    pub fn mark_available(&mut self, id: EndpointId) {
        self.registry.mark_available(id);
    }

    pub fn mark_unavailable(&mut self, id: EndpointId) {
        self.registry.mark_unavailable(id);
    }

    /// Next endpoint in round-robin order, used to spread initial connections.
    pub fn next_round_robin(&mut self) -> Option<EndpointId> {
        self.registry.next()
    }

    pub fn registry(&self) -> &HostRegistry {
        &self.registry
    }
}
