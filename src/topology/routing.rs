use crate::amqp::configuration::ConnectionConfiguration;
use amq_protocol_types::{AMQPValue, FieldTable};
use lapin::{
    options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions},
    Channel, ExchangeKind,
};

/// The topic exchange every broker comes with.
const AMQ_TOPIC: &str = "amq.topic";

/// The exchange and routing key a message is published with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishTarget {
    pub exchange: String,
    pub routing_key: String,
}

/// Declares the broker objects a queue relies on and resolves destinations for publishers.
///
/// Publishers and consumers must share the same topology: a message published to the target
/// resolved for a destination must end up in the queue declared for that destination, and an
/// event published for an event type must end up in every queue subscribed to it.
#[async_trait::async_trait]
pub trait RoutingTopology: Send + Sync + 'static {
    /// Ensure `queue_name` exists along with everything needed to route messages to it.
    ///
    /// Must be idempotent.
    async fn declare_queue_and_bindings(
        &self,
        channel: &Channel,
        queue_name: &str,
    ) -> Result<(), anyhow::Error>;

    fn resolve(&self, destination: &str) -> PublishTarget;

    /// Where events of `event_type` are published, declaring whatever the target relies on.
    async fn prepare_publish(
        &self,
        channel: &Channel,
        event_type: &str,
    ) -> Result<PublishTarget, anyhow::Error>;

    /// Route events of `event_type` to `queue_name`. Must be idempotent.
    async fn setup_subscription(
        &self,
        channel: &Channel,
        event_type: &str,
        queue_name: &str,
    ) -> Result<(), anyhow::Error>;

    /// Stop routing events of `event_type` to `queue_name`.
    async fn teardown_subscription(
        &self,
        channel: &Channel,
        event_type: &str,
        queue_name: &str,
    ) -> Result<(), anyhow::Error>;
}

/// assert it's object safe
type _CHECK = Box<dyn RoutingTopology>;

/// Queues receive messages straight from the default exchange, using their name as routing key.
#[derive(Debug, Clone, Copy)]
pub struct DirectRoutingTopology {
    durable: bool,
}

impl DirectRoutingTopology {
    /// Queues survive a broker restart.
    pub fn durable() -> Self {
        Self { durable: true }
    }

    pub fn transient() -> Self {
        Self { durable: false }
    }

    /// Queues are durable when messages are.
    pub fn from_configuration(configuration: &ConnectionConfiguration) -> Self {
        Self {
            durable: configuration.durable_messages,
        }
    }
}

#[async_trait::async_trait]
impl RoutingTopology for DirectRoutingTopology {
    async fn declare_queue_and_bindings(
        &self,
        channel: &Channel,
        queue_name: &str,
    ) -> Result<(), anyhow::Error> {
        declare_queue(channel, queue_name, self.durable, FieldTable::default()).await
    }

    fn resolve(&self, destination: &str) -> PublishTarget {
        PublishTarget {
            exchange: String::new(),
            routing_key: destination.to_owned(),
        }
    }

    /// Events go through `amq.topic`, the event type being the routing key.
    async fn prepare_publish(
        &self,
        _channel: &Channel,
        event_type: &str,
    ) -> Result<PublishTarget, anyhow::Error> {
        Ok(topic_target(event_type))
    }

    async fn setup_subscription(
        &self,
        channel: &Channel,
        event_type: &str,
        queue_name: &str,
    ) -> Result<(), anyhow::Error> {
        bind(channel, AMQ_TOPIC, queue_name, event_type).await
    }

    async fn teardown_subscription(
        &self,
        channel: &Channel,
        event_type: &str,
        queue_name: &str,
    ) -> Result<(), anyhow::Error> {
        unbind(channel, AMQ_TOPIC, queue_name, event_type).await
    }
}

fn topic_target(event_type: &str) -> PublishTarget {
    PublishTarget {
        exchange: AMQ_TOPIC.to_owned(),
        routing_key: event_type.to_owned(),
    }
}

/// Queues are bound to a shared exchange, using their name as routing key.
///
/// Every event type gets a fanout exchange named after it: subscribing binds the queue to it and
/// publishing an event declares it if needed.
///
/// With dead-lettering enabled, every queue gets a `<queue_name>.deadletter` queue, bound to the
/// fanout exchange of the same name, where rejected messages end up.
/// Queue arguments are immutable: enabling dead-lettering on an existing queue requires rolling
/// a new queue.
#[derive(Debug, Clone)]
pub struct ExchangeRoutingTopology {
    exchange: String,
    kind: ExchangeKind,
    durable: bool,
    dead_letter: bool,
}

impl ExchangeRoutingTopology {
    pub fn durable(exchange: impl Into<String>, kind: ExchangeKind) -> Self {
        Self {
            exchange: exchange.into(),
            kind,
            durable: true,
            dead_letter: false,
        }
    }

    pub fn transient(exchange: impl Into<String>, kind: ExchangeKind) -> Self {
        Self {
            durable: false,
            ..Self::durable(exchange, kind)
        }
    }

    #[must_use]
    pub fn with_dead_letter_queues(mut self) -> Self {
        self.dead_letter = true;
        self
    }
}

#[async_trait::async_trait]
impl RoutingTopology for ExchangeRoutingTopology {
    async fn declare_queue_and_bindings(
        &self,
        channel: &Channel,
        queue_name: &str,
    ) -> Result<(), anyhow::Error> {
        let mut queue_args = FieldTable::default();
        if self.dead_letter {
            let dead_letter = format!("{queue_name}.deadletter");
            declare_exchange(channel, &dead_letter, ExchangeKind::Fanout, self.durable).await?;
            declare_queue(channel, &dead_letter, self.durable, FieldTable::default()).await?;
            bind(channel, &dead_letter, &dead_letter, "").await?;
            queue_args.insert(
                "x-dead-letter-exchange".into(),
                AMQPValue::LongString(dead_letter.into()),
            );
        }

        declare_exchange(channel, &self.exchange, self.kind.clone(), self.durable).await?;
        declare_queue(channel, queue_name, self.durable, queue_args).await?;
        bind(channel, &self.exchange, queue_name, queue_name).await
    }

    fn resolve(&self, destination: &str) -> PublishTarget {
        PublishTarget {
            exchange: self.exchange.clone(),
            routing_key: destination.to_owned(),
        }
    }

    async fn prepare_publish(
        &self,
        channel: &Channel,
        event_type: &str,
    ) -> Result<PublishTarget, anyhow::Error> {
        declare_exchange(channel, event_type, ExchangeKind::Fanout, self.durable).await?;
        Ok(fanout_target(event_type))
    }

    async fn setup_subscription(
        &self,
        channel: &Channel,
        event_type: &str,
        queue_name: &str,
    ) -> Result<(), anyhow::Error> {
        declare_exchange(channel, event_type, ExchangeKind::Fanout, self.durable).await?;
        bind(channel, event_type, queue_name, "").await
    }

    async fn teardown_subscription(
        &self,
        channel: &Channel,
        event_type: &str,
        queue_name: &str,
    ) -> Result<(), anyhow::Error> {
        unbind(channel, event_type, queue_name, "").await
    }
}

fn fanout_target(event_type: &str) -> PublishTarget {
    PublishTarget {
        exchange: event_type.to_owned(),
        routing_key: String::new(),
    }
}

async fn declare_queue(
    channel: &Channel,
    queue_name: &str,
    durable: bool,
    queue_args: FieldTable,
) -> Result<(), anyhow::Error> {
    channel
        .queue_declare(
            queue_name,
            QueueDeclareOptions {
                passive: false,
                durable,
                exclusive: false,
                auto_delete: false,
                nowait: false,
            },
            queue_args,
        )
        .await?;
    Ok(())
}

async fn declare_exchange(
    channel: &Channel,
    exchange_name: &str,
    kind: ExchangeKind,
    durable: bool,
) -> Result<(), anyhow::Error> {
    channel
        .exchange_declare(
            exchange_name,
            kind,
            ExchangeDeclareOptions {
                passive: false,
                durable,
                auto_delete: false,
                internal: false,
                nowait: false,
            },
            FieldTable::default(),
        )
        .await?;
    Ok(())
}

async fn bind(
    channel: &Channel,
    exchange_name: &str,
    queue_name: &str,
    routing_key: &str,
) -> Result<(), anyhow::Error> {
    channel
        .queue_bind(
            queue_name,
            exchange_name,
            routing_key,
            QueueBindOptions { nowait: false },
            FieldTable::default(),
        )
        .await?;
    Ok(())
}

async fn unbind(
    channel: &Channel,
    exchange_name: &str,
    queue_name: &str,
    routing_key: &str,
) -> Result<(), anyhow::Error> {
    channel
        .queue_unbind(queue_name, exchange_name, routing_key, FieldTable::default())
        .await?;
    Ok(())
}
