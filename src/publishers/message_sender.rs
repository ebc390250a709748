use crate::{
    amqp::ChannelError,
    message::TransportMessage,
    pool::{ChannelProvider, PublishError, PublishNotConfirmed},
    topology::{PublishTarget, RoutingTopology},
};
use lapin::BasicProperties;
use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tracing::warn;

const NON_PERSISTENT: u8 = 1;

/// Added to the confirmation wait to get the default bound of a send: waiting for a channel
/// must not eat into the time the broker is given to confirm.
const SEND_TIMEOUT_MARGIN: Duration = Duration::from_secs(10);

/// Sends [`TransportMessage`]s to a destination queue.
///
/// # Channels
///
/// Within a [`ChannelProvider::scope`], every send goes through the scope's channel: a message
/// handler sending messages while processing a delivery uses a single channel for all of them.
/// Outside of a scope, a channel is checked out of the pool for each send.
///
/// # Fault tolerance
///
/// A broken channel is discarded by the pool and a broken connection is replaced on the next
/// checkout. A failed send is not retried.
///
/// # How do I build a `MessageSender`?
///
/// The starting point is [`MessageSender::builder`].
#[derive(Clone)]
pub struct MessageSender {
    channel_provider: ChannelProvider,
    topology: Arc<dyn RoutingTopology>,
    /// Set as `reply-to` on messages that do not carry one.
    callback_queue: Option<String>,
    /// When `false`, every message is sent non-persistent.
    durable_messages: bool,
    timeout: Duration,
}

impl MessageSender {
    /// Start building a [`MessageSender`].
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::sync::Arc;
    /// use warren::amqp::configuration::ConnectionConfiguration;
    /// use warren::amqp::{ConnectionFactory, ConnectionManager};
    /// use warren::pool::ChannelProvider;
    /// use warren::publishers::MessageSender;
    /// use warren::topology::DirectRoutingTopology;
    ///
    /// pub fn get_sender() -> Result<MessageSender, anyhow::Error> {
    ///     let configuration = Arc::new(ConnectionConfiguration::default());
    ///     let factory = ConnectionFactory::new(configuration.clone())?;
    ///     let connections = Arc::new(ConnectionManager::new(factory));
    ///     let channel_provider = ChannelProvider::new(connections, &configuration)?;
    ///
    ///     Ok(MessageSender::builder(channel_provider, Arc::new(DirectRoutingTopology::durable()))
    ///         .callback_queue("my-service.replies")
    ///         .send_timeout(std::time::Duration::from_secs(3))
    ///         .build())
    /// }
    /// ```
    pub fn builder(
        channel_provider: ChannelProvider,
        topology: Arc<dyn RoutingTopology>,
    ) -> MessageSenderBuilder {
        MessageSenderBuilder::new(channel_provider, topology)
    }

    /// Send `message` to the queue behind `destination`.
    ///
    /// With publisher confirms enabled, returns once the broker confirmed the message.
    #[tracing::instrument(name = "send_message", skip(self, message), fields(message_id = %message.id))]
    pub async fn send(
        &self,
        message: &TransportMessage,
        destination: &str,
    ) -> Result<(), MessageSenderError> {
        let target = self.topology.resolve(destination);
        let properties = self.inject_amqp_properties(message.to_amqp_properties());
        let properties = outgoing_properties(properties, self.durable_messages);

        tokio::time::timeout(self.timeout, self.publish(&target, &message.body, properties))
            .await
            .map_err(|_| MessageSenderError::Timeout(self.timeout))?
    }

    async fn publish(
        &self,
        target: &PublishTarget,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), MessageSenderError> {
        let mut channel = self
            .channel_provider
            .acquire()
            .await
            .map_err(MessageSenderError::Channel)?;
        channel
            .publish(&target.exchange, &target.routing_key, payload, properties)
            .await
            .map_err(Into::into)
    }

    fn inject_amqp_properties(&self, properties: BasicProperties) -> BasicProperties {
        let has_reply_to = properties.reply_to().is_some();
        match &self.callback_queue {
            Some(callback_queue) if !has_reply_to => {
                properties.with_reply_to(callback_queue.as_str().into())
            }
            _ => properties,
        }
    }
}

/// Stamp the send time, unless already set, and force transient delivery when messages are not
/// durable.
pub(super) fn outgoing_properties(
    properties: BasicProperties,
    durable_messages: bool,
) -> BasicProperties {
    let properties = match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(now) => {
            let timestamp = properties.timestamp().unwrap_or(now.as_secs());
            properties.with_timestamp(timestamp)
        }
        Err(_) => {
            warn!("System time is before 1970");
            properties
        }
    };
    if durable_messages {
        properties
    } else {
        properties.with_delivery_mode(NON_PERSISTENT)
    }
}

/// The confirmation wait plus a margin for getting hold of a channel.
pub(super) fn default_send_timeout(channel_provider: &ChannelProvider) -> Duration {
    channel_provider.max_wait_for_confirms().unwrap_or_default() + SEND_TIMEOUT_MARGIN
}

/// Error returned when trying to send a message using [`MessageSender`] or to publish an event
/// using [`MessagePublisher`](super::MessagePublisher).
#[derive(thiserror::Error, Debug)]
pub enum MessageSenderError {
    #[error("Failed to get a channel to publish on")]
    Channel(#[source] ChannelError),
    #[error("Failed to declare the exchange the event is published on")]
    Topology(#[source] anyhow::Error),
    #[error("Generic error encountered when interacting with the RabbitMq broker")]
    GenericError(#[source] lapin::Error),
    #[error(transparent)]
    NotConfirmed(PublishNotConfirmed),
    #[error("The message was not sent within {0:?}")]
    Timeout(Duration),
}

impl From<PublishError> for MessageSenderError {
    fn from(e: PublishError) -> Self {
        match e {
            PublishError::NotConfirmed(e) => Self::NotConfirmed(e),
            PublishError::Channel(e) => Self::GenericError(e),
        }
    }
}

/// A builder for [`MessageSender`].
///
/// Use [`MessageSender::builder`] as entrypoint.
pub struct MessageSenderBuilder {
    channel_provider: ChannelProvider,
    topology: Arc<dyn RoutingTopology>,
    callback_queue: Option<String>,
    durable_messages: bool,
    timeout: Option<Duration>,
}

impl MessageSenderBuilder {
    fn new(channel_provider: ChannelProvider, topology: Arc<dyn RoutingTopology>) -> Self {
        Self {
            channel_provider,
            topology,
            callback_queue: None,
            durable_messages: true,
            timeout: None,
        }
    }

    /// Where replies to the messages sent should go.
    #[must_use]
    pub fn callback_queue(mut self, callback_queue: impl Into<String>) -> Self {
        self.callback_queue = Some(callback_queue.into());
        self
    }

    /// Send every message non-persistent when `false`, whatever its `recoverable` flag.
    /// Defaults to `true`, see [`ConnectionConfiguration::durable_messages`].
    ///
    /// [`ConnectionConfiguration::durable_messages`]: crate::amqp::configuration::ConnectionConfiguration::durable_messages
    #[must_use]
    pub fn durable_messages(mut self, durable_messages: bool) -> Self {
        self.durable_messages = durable_messages;
        self
    }

    /// Bounds the whole send, including the wait for a channel and for the confirmation.
    ///
    /// Defaults to the confirmation wait of the channel provider plus 10 seconds, so that a
    /// missing confirmation surfaces as [`PublishNotConfirmed::Timeout`]. A shorter timeout
    /// takes precedence over the confirmation wait.
    #[must_use]
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Finalise the builder and get an instance of [`MessageSender`].
    pub fn build(self) -> MessageSender {
        let timeout = self
            .timeout
            .unwrap_or_else(|| default_send_timeout(&self.channel_provider));
        MessageSender {
            channel_provider: self.channel_provider,
            topology: self.topology,
            callback_queue: self.callback_queue,
            durable_messages: self.durable_messages,
            timeout,
        }
    }
}
