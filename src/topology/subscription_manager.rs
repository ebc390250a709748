use crate::{
    amqp::ManageConnections,
    topology::{administration, RoutingTopology},
};
use anyhow::Context;
use std::sync::Arc;

/// Subscribes the endpoint's input queue to event types.
///
/// Subscriptions are broker bindings: they outlive the process and are shared by every
/// instance consuming from the same queue.
#[derive(Clone)]
pub struct SubscriptionManager {
    connections: Arc<dyn ManageConnections>,
    topology: Arc<dyn RoutingTopology>,
    endpoint_queue_name: String,
}

impl SubscriptionManager {
    pub fn new(
        connections: Arc<dyn ManageConnections>,
        topology: Arc<dyn RoutingTopology>,
        endpoint_queue_name: impl Into<String>,
    ) -> Self {
        Self {
            connections,
            topology,
            endpoint_queue_name: endpoint_queue_name.into(),
        }
    }

    pub fn endpoint_queue_name(&self) -> &str {
        &self.endpoint_queue_name
    }

    /// Route events of `event_type` to the endpoint queue. Subscribing twice is a no-op.
    #[tracing::instrument(name = "rabbitmq_subscribe", skip(self), fields(queue_name = %self.endpoint_queue_name))]
    pub async fn subscribe(&self, event_type: &str) -> Result<(), anyhow::Error> {
        let channel = administration::open(self.connections.as_ref()).await?;
        let outcome = self
            .topology
            .setup_subscription(&channel, event_type, &self.endpoint_queue_name)
            .await
            .with_context(|| format!("Failed to subscribe to `{event_type}`"));
        administration::close(channel).await;
        outcome
    }

    /// Stop routing events of `event_type` to the endpoint queue.
    ///
    /// Events already in the queue are left untouched.
    #[tracing::instrument(name = "rabbitmq_unsubscribe", skip(self), fields(queue_name = %self.endpoint_queue_name))]
    pub async fn unsubscribe(&self, event_type: &str) -> Result<(), anyhow::Error> {
        let channel = administration::open(self.connections.as_ref()).await?;
        let outcome = self
            .topology
            .teardown_subscription(&channel, event_type, &self.endpoint_queue_name)
            .await
            .with_context(|| format!("Failed to unsubscribe from `{event_type}`"));
        administration::close(channel).await;
        outcome
    }
}
