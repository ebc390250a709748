use crate::{
    amqp::{ChannelError, ManageConnections},
    consumers::processing::MessageProcessing,
    message::TransportMessage,
};
use amq_protocol_types::FieldTable;
use arc_swap::ArcSwap;
use futures_util::StreamExt;
use lapin::{
    message::Delivery,
    options::{BasicCancelOptions, BasicConsumeOptions, BasicQosOptions},
    Channel, Consumer,
};
use std::{fmt, sync::Arc, time::Duration};
use tokio::{sync::watch, task::JoinHandle};
use uuid::Uuid;

/// Which queue list a consumer was started for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Primary,
    Secondary,
}

impl fmt::Display for SlotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Secondary => write!(f, "secondary"),
        }
    }
}

/// A snapshot of a running consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotInfo {
    pub queue_name: String,
    pub kind: SlotKind,
    /// The channel currently used. Changes when the consumer recovers from a channel failure.
    pub channel_id: u16,
    pub consumer_tag: String,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct SlotSettings {
    pub(crate) prefetch_count: u16,
    pub(crate) retry_delay: Duration,
}

/// One consumer with its own channel, processing one delivery at a time.
pub(crate) struct ConsumerSlot {
    queue_name: String,
    kind: SlotKind,
    consumer_tag: String,
    channel: Arc<ArcSwap<Channel>>,
    task: JoinHandle<()>,
}

impl ConsumerSlot {
    /// Open a channel, subscribe to `queue_name` and start processing deliveries in the
    /// background until `shutdown` flips.
    #[tracing::instrument(name = "consumer_slot_start", skip(connections, processing, shutdown))]
    pub(crate) async fn start(
        connections: Arc<dyn ManageConnections>,
        queue_name: String,
        kind: SlotKind,
        settings: SlotSettings,
        processing: Arc<MessageProcessing>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self, ChannelError> {
        let consumer_tag = Uuid::new_v4().to_string();
        let (channel, consumer) =
            subscribe(connections.as_ref(), &queue_name, &consumer_tag, settings).await?;
        let channel = Arc::new(ArcSwap::from_pointee(channel));

        let worker = SlotWorker {
            connections,
            queue_name: queue_name.clone(),
            consumer_tag: consumer_tag.clone(),
            settings,
            processing,
            channel: Arc::clone(&channel),
        };
        let task = tokio::spawn(worker.run(consumer, shutdown));

        Ok(Self {
            queue_name,
            kind,
            consumer_tag,
            channel,
            task,
        })
    }

    pub(crate) fn info(&self) -> SlotInfo {
        SlotInfo {
            queue_name: self.queue_name.clone(),
            kind: self.kind,
            channel_id: self.channel.load().id(),
            consumer_tag: self.consumer_tag.clone(),
        }
    }

    /// Wait for the in-flight message, if any, and for the worker to close its channel.
    ///
    /// The shutdown signal must have been sent already. Past `drain_timeout` the message is
    /// abandoned: closing the channel hands it back to the broker.
    pub(crate) async fn stop(self, drain_timeout: Option<Duration>) {
        let Self {
            queue_name,
            mut task,
            channel,
            ..
        } = self;
        let drained = match drain_timeout {
            None => Some((&mut task).await),
            Some(limit) => tokio::time::timeout(limit, &mut task).await.ok(),
        };
        match drained {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                tracing::error!(%queue_name, "Consumer task failed: {}", e);
                close(&channel.load_full(), "Consumer stopped").await;
            }
            None => {
                tracing::warn!(%queue_name, "Consumer did not drain in time, abandoning its message");
                task.abort();
                close(&channel.load_full(), "Consumer stopped").await;
            }
        }
    }
}

/// The state moved into the background task of a [`ConsumerSlot`].
struct SlotWorker {
    connections: Arc<dyn ManageConnections>,
    queue_name: String,
    consumer_tag: String,
    settings: SlotSettings,
    processing: Arc<MessageProcessing>,
    channel: Arc<ArcSwap<Channel>>,
}

impl SlotWorker {
    /// Consume until shutdown is requested or the strategy is dropped, then close the channel.
    ///
    /// Closing the channel hands prefetched messages back to the broker.
    #[tracing::instrument(skip_all, name = "consumer_run", fields(queue_name = %self.queue_name))]
    async fn run(self, consumer: Consumer, shutdown: watch::Receiver<bool>) {
        self.consume(consumer, shutdown).await;
        close(&self.channel.load_full(), "Consumer stopped").await;
    }

    async fn consume(&self, mut consumer: Consumer, mut shutdown: watch::Receiver<bool>) {
        'consume: loop {
            if *shutdown.borrow() {
                break 'consume;
            }
            tokio::select! {
                // Prefer shutting down over pulling another delivery.
                biased;

                _ = shutdown.changed() => {
                    tracing::debug!("Consumer received shutdown signal");
                    let channel = self.channel.load_full();
                    if let Err(e) = channel
                        .basic_cancel(&self.consumer_tag, BasicCancelOptions::default())
                        .await
                    {
                        tracing::debug!("Failed to cancel consumer: {}", e);
                    }
                    break 'consume;
                }

                event = consumer.next() => {
                    let failure = match event {
                        Some(Ok(delivery)) => {
                            self.process(delivery).await;
                            continue 'consume;
                        }
                        Some(Err(e)) => e.to_string(),
                        None => "the subscription was cancelled".to_string(),
                    };
                    tracing::warn!("Consumer channel failed: {}", failure);
                    match self.resubscribe(&mut shutdown).await {
                        Some(fresh) => consumer = fresh,
                        None => break 'consume,
                    }
                }
            }
        }
    }

    async fn process(&self, delivery: Delivery) {
        let Delivery {
            data,
            properties,
            acker,
            redelivered,
            ..
        } = delivery;
        let message = TransportMessage::from_amqp(&properties, data);
        tracing::trace!(message_id = %message.id, redelivered, "Received message");
        self.processing.process(message, &acker).await;
    }

    /// Replace the broken channel, retrying every `retry_delay` until it succeeds or shutdown is
    /// requested.
    async fn resubscribe(&self, shutdown: &mut watch::Receiver<bool>) -> Option<Consumer> {
        close(&self.channel.load_full(), "Resubscribing").await;
        loop {
            if *shutdown.borrow() {
                return None;
            }
            tokio::select! {
                biased;
                _ = shutdown.changed() => return None,
                _ = tokio::time::sleep(self.settings.retry_delay) => {}
            }
            match subscribe(
                self.connections.as_ref(),
                &self.queue_name,
                &self.consumer_tag,
                self.settings,
            )
            .await
            {
                Ok((channel, consumer)) => {
                    tracing::info!(channel_id = channel.id(), "Consumer resubscribed");
                    self.channel.store(Arc::new(channel));
                    return Some(consumer);
                }
                Err(e) => tracing::warn!(
                    "Failed to resubscribe, retrying in {:?}: {:#}",
                    self.settings.retry_delay,
                    anyhow::Error::from(e)
                ),
            }
        }
    }
}

async fn subscribe(
    connections: &dyn ManageConnections,
    queue_name: &str,
    consumer_tag: &str,
    settings: SlotSettings,
) -> Result<(Channel, Consumer), ChannelError> {
    let channel = connections.create_consume_channel().await?;
    channel
        .basic_qos(settings.prefetch_count, BasicQosOptions { global: false })
        .await?;
    let consumer = channel
        .basic_consume(
            queue_name,
            consumer_tag,
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await?;
    Ok((channel, consumer))
}

async fn close(channel: &Channel, reason: &str) {
    if channel.status().connected() {
        if let Err(e) = channel.close(200, reason).await {
            tracing::debug!("Failed to close consumer channel: {}", e);
        }
    }
}
