use crate::{
    amqp::ManageConnections,
    topology::{administration, RoutingTopology},
};
use anyhow::Context;
use lapin::options::QueuePurgeOptions;
use std::sync::Arc;

/// Creates and maintains queues over the administration connection.
///
/// Every operation uses its own short-lived channel.
#[derive(Clone)]
pub struct QueueCreator {
    connections: Arc<dyn ManageConnections>,
    topology: Arc<dyn RoutingTopology>,
}

impl QueueCreator {
    pub fn new(connections: Arc<dyn ManageConnections>, topology: Arc<dyn RoutingTopology>) -> Self {
        Self {
            connections,
            topology,
        }
    }

    /// Declare `queue_name` and its bindings, if they do not exist yet.
    #[tracing::instrument(name = "rabbitmq_create_queue", skip(self))]
    pub async fn create_queue_if_necessary(&self, queue_name: &str) -> Result<(), anyhow::Error> {
        let channel = administration::open(self.connections.as_ref()).await?;
        let outcome = self
            .topology
            .declare_queue_and_bindings(&channel, queue_name)
            .await
            .with_context(|| format!("Failed to declare queue `{queue_name}`"));
        administration::close(channel).await;
        outcome
    }

    /// Drop every ready message in `queue_name`, returning how many were dropped.
    #[tracing::instrument(name = "rabbitmq_purge_queue", skip(self))]
    pub async fn purge(&self, queue_name: &str) -> Result<u32, anyhow::Error> {
        let channel = administration::open(self.connections.as_ref()).await?;
        let outcome = channel
            .queue_purge(queue_name, QueuePurgeOptions::default())
            .await
            .with_context(|| format!("Failed to purge queue `{queue_name}`"));
        administration::close(channel).await;
        outcome
    }
}
