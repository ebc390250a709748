//! Strategies to decide in which order the nodes of a cluster are dialed.
use crate::amqp::configuration::BrokerEndpoint;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Orders (and optionally filters) the configured endpoints into the list of candidates
/// the [`ConnectionFactory`](crate::amqp::ConnectionFactory) will try, in order, when it needs
/// a new connection.
///
/// Implementations are shared across connection roles and must be safe to call concurrently.
pub trait HostSelectionStrategy: Send + Sync + 'static {
    fn select_candidates(&self, endpoints: &[BrokerEndpoint]) -> Vec<BrokerEndpoint>;
}

/// Rotates the starting node on every call, spreading connections across the cluster.
///
/// All nodes are always returned: if the first candidate is down the next ones are tried.
#[derive(Debug, Default)]
pub struct RoundRobin {
    next: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HostSelectionStrategy for RoundRobin {
    fn select_candidates(&self, endpoints: &[BrokerEndpoint]) -> Vec<BrokerEndpoint> {
        if endpoints.is_empty() {
            return Vec::new();
        }
        let start = self.next.fetch_add(1, Ordering::Relaxed) % endpoints.len();
        endpoints[start..]
            .iter()
            .chain(endpoints[..start].iter())
            .cloned()
            .collect()
    }
}

/// Always dials nodes by ascending [`BrokerEndpoint::priority`].
///
/// Endpoints without a priority come last; ties keep their configured order.
#[derive(Debug, Default, Clone, Copy)]
pub struct FixedPriority;

impl HostSelectionStrategy for FixedPriority {
    fn select_candidates(&self, endpoints: &[BrokerEndpoint]) -> Vec<BrokerEndpoint> {
        let mut candidates = endpoints.to_vec();
        candidates.sort_by_key(|e| e.priority.unwrap_or(u32::MAX));
        candidates
    }
}
