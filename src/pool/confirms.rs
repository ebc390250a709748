use crate::pool::error::{PublishError, PublishNotConfirmed};
use lapin::{
    options::BasicPublishOptions, publisher_confirm::Confirmation, BasicProperties, Channel,
};
use std::{collections::BTreeSet, time::Duration};

/// Reply Code 312 - NO_ROUTE
/// See https://www.rabbitmq.com/amqp-0-9-1-reference.html
const NO_ROUTE: u16 = 312;

/// Publishes awaiting a confirmation from the broker, keyed by a local sequence number.
///
/// Sequence numbers start at 1 and are never reused by the same channel.
#[derive(Debug, Default)]
pub(crate) struct ConfirmTracker {
    last_sequence: u64,
    pending: BTreeSet<u64>,
}

impl ConfirmTracker {
    pub(crate) fn register(&mut self) -> PendingConfirm<'_> {
        self.last_sequence += 1;
        let sequence = self.last_sequence;
        self.pending.insert(sequence);
        PendingConfirm {
            tracker: self,
            sequence,
        }
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Removes its entry from the tracker when dropped, whatever the outcome of the publish:
/// ack, nack, timeout or the publishing future being cancelled.
pub(crate) struct PendingConfirm<'a> {
    tracker: &'a mut ConfirmTracker,
    sequence: u64,
}

impl PendingConfirm<'_> {
    pub(crate) fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl Drop for PendingConfirm<'_> {
    fn drop(&mut self) {
        self.tracker.pending.remove(&self.sequence);
    }
}

/// A channel dedicated to publishing.
///
/// Publishing requires `&mut self`: a channel has a single writer at any point in time.
/// When publisher confirms are enabled every publish waits for the broker's ack,
/// up to `max_wait_for_confirms`.
pub struct PublishChannel {
    channel: Channel,
    confirms: Option<ConfirmTracker>,
    max_wait_for_confirms: Duration,
}

impl PublishChannel {
    /// `channel` must already be in confirm mode if `use_publisher_confirms` is `true`.
    pub(crate) fn new(
        channel: Channel,
        use_publisher_confirms: bool,
        max_wait_for_confirms: Duration,
    ) -> Self {
        Self {
            channel,
            confirms: use_publisher_confirms.then(ConfirmTracker::default),
            max_wait_for_confirms,
        }
    }

    /// Get access to the underlying raw channel
    pub fn raw(&self) -> &Channel {
        &self.channel
    }

    pub fn id(&self) -> u16 {
        self.channel.id()
    }

    pub fn confirms_enabled(&self) -> bool {
        self.confirms.is_some()
    }

    /// Publishes still waiting for the broker's confirmation.
    pub fn pending_confirms(&self) -> usize {
        self.confirms.as_ref().map_or(0, ConfirmTracker::pending)
    }

    pub fn is_healthy(&self) -> bool {
        self.channel.status().connected()
    }

    /// Publish a payload on an exchange.
    ///
    /// With publisher confirms enabled the message is published as mandatory: a message that
    /// cannot be routed to any queue fails with [`PublishNotConfirmed::Unroutable`].
    pub async fn publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), PublishError> {
        let mandatory = self.confirms.is_some();
        self.basic_publish(exchange, routing_key, payload, properties, mandatory)
            .await
    }

    /// Publish a payload that may legitimately reach no queue, e.g. an event nobody
    /// subscribed to.
    ///
    /// The broker silently drops unroutable messages and still confirms them.
    pub async fn broadcast(
        &mut self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), PublishError> {
        self.basic_publish(exchange, routing_key, payload, properties, false)
            .await
    }

    #[tracing::instrument(level = "debug", skip(self, payload, properties), fields(channel_id = self.channel.id()))]
    async fn basic_publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: BasicProperties,
        mandatory: bool,
    ) -> Result<(), PublishError> {
        let options = BasicPublishOptions {
            // This flag tells the server how to react if the message cannot be routed to a queue.
            // If this flag is `true`, the server will return an unroutable message with a Return method.
            // If this flag is `false`, the server silently drops the message.
            mandatory,
            // The immediate flag was dropped in RabbitMQ 3.0 - see https://www.rabbitmq.com/blog/2012/11/19/breaking-things-with-rabbitmq-3-0/
            // Setting `true` will cause a not-supported error
            immediate: false,
        };
        let max_wait = self.max_wait_for_confirms;

        let Some(tracker) = self.confirms.as_mut() else {
            self.channel
                .basic_publish(exchange, routing_key, options, payload, properties)
                .await?
                .await?;
            return Ok(());
        };

        let pending = tracker.register();
        let sequence = pending.sequence();
        let confirm = self
            .channel
            .basic_publish(exchange, routing_key, options, payload, properties)
            .await?;
        let confirmation = tokio::time::timeout(max_wait, confirm)
            .await
            .map_err(|_| PublishNotConfirmed::Timeout {
                sequence,
                waited: max_wait,
            })??;
        drop(pending);

        match confirmation {
            Confirmation::Ack(Some(returned)) if returned.reply_code == NO_ROUTE => {
                Err(PublishNotConfirmed::Unroutable { sequence, returned }.into())
            }
            Confirmation::Ack(_) | Confirmation::NotRequested => Ok(()),
            Confirmation::Nack(returned) => {
                Err(PublishNotConfirmed::Nack { sequence, returned }.into())
            }
        }
    }
}
