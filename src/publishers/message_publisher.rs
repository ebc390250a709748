use crate::{
    message::TransportMessage,
    pool::ChannelProvider,
    publishers::message_sender::{default_send_timeout, outgoing_properties, MessageSenderError},
    topology::RoutingTopology,
};
use std::{sync::Arc, time::Duration};

/// Publishes events to every queue subscribed to their type.
///
/// Where an event goes is up to the [`RoutingTopology`], see
/// [`SubscriptionManager`](crate::topology::SubscriptionManager) for the subscriber side.
/// An event nobody subscribed to is dropped by the broker: it is not an error.
///
/// Channels are picked like for [`MessageSender`](super::MessageSender): the scope's channel
/// when there is one, a pooled one otherwise.
#[derive(Clone)]
pub struct MessagePublisher {
    channel_provider: ChannelProvider,
    topology: Arc<dyn RoutingTopology>,
    durable_messages: bool,
    timeout: Duration,
}

impl MessagePublisher {
    /// Events are durable and the publish timeout is the default one of
    /// [`MessageSenderBuilder::send_timeout`](super::MessageSenderBuilder::send_timeout).
    pub fn new(channel_provider: ChannelProvider, topology: Arc<dyn RoutingTopology>) -> Self {
        let timeout = default_send_timeout(&channel_provider);
        Self {
            channel_provider,
            topology,
            durable_messages: true,
            timeout,
        }
    }

    /// Publish every event non-persistent when `false`, whatever its `recoverable` flag.
    #[must_use]
    pub fn durable_messages(mut self, durable_messages: bool) -> Self {
        self.durable_messages = durable_messages;
        self
    }

    /// Bounds the whole publish, including the wait for a channel and for the confirmation.
    #[must_use]
    pub fn publish_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Publish `message` as an event of `event_type`.
    #[tracing::instrument(name = "publish_event", skip(self, message), fields(message_id = %message.id))]
    pub async fn publish(
        &self,
        message: &TransportMessage,
        event_type: &str,
    ) -> Result<(), MessageSenderError> {
        let properties = outgoing_properties(message.to_amqp_properties(), self.durable_messages);
        let publish = async {
            let mut channel = self
                .channel_provider
                .acquire()
                .await
                .map_err(MessageSenderError::Channel)?;
            let target = self
                .topology
                .prepare_publish(channel.raw(), event_type)
                .await
                .map_err(MessageSenderError::Topology)?;
            channel
                .broadcast(&target.exchange, &target.routing_key, &message.body, properties)
                .await
                .map_err(MessageSenderError::from)
        };

        tokio::time::timeout(self.timeout, publish)
            .await
            .map_err(|_| MessageSenderError::Timeout(self.timeout))?
    }
}
