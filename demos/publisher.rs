use std::sync::Arc;
use warren::amqp::{configuration::ConnectionConfiguration, ConnectionFactory, ConnectionManager};
use warren::amqp::ManageConnections;
use warren::pool::ChannelProvider;
use warren::publishers::MessageSender;
use warren::topology::{DirectRoutingTopology, QueueCreator};
use warren::TransportMessage;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // We are using the out-of-the-box parameters for the default RabbitMq Docker image,
    // with publisher confirms turned on.
    let configuration = Arc::new(ConnectionConfiguration {
        use_publisher_confirms: true,
        ..Default::default()
    });

    // The connection manager opens one connection per role (administration, publish, consume)
    // the first time it is asked for one, and replaces it if it breaks.
    let connections = Arc::new(ConnectionManager::new(ConnectionFactory::new(
        configuration.clone(),
    )?));

    // Publishers and consumers must agree on where messages go.
    // With the direct topology each queue is addressed by name through the default exchange.
    let topology = Arc::new(DirectRoutingTopology::durable());
    QueueCreator::new(connections.clone(), topology.clone())
        .create_queue_if_necessary("hello")
        .await?;

    // Channels are cheaper than connections: publishers check them out of a pool sharing the
    // publish connection.
    let channel_provider = ChannelProvider::new(connections.clone(), &configuration)?;
    let sender = MessageSender::builder(channel_provider.clone(), topology)
        .send_timeout(std::time::Duration::from_secs(3))
        .build();

    let message = TransportMessage::new("Hello world!").with_header("sent-by", "demo");
    sender.send(&message, "hello").await?;

    // Several sends in a unit of work can share a single channel.
    channel_provider
        .scope(async {
            for i in 0..3 {
                let message = TransportMessage::new(format!("Hello again #{i}"));
                sender.send(&message, "hello").await?;
            }
            Ok::<_, warren::publishers::MessageSenderError>(())
        })
        .await??;

    // Publisher confirms are on and no queue is named like this: the broker returns the
    // message and the send fails.
    assert!(sender
        .send(&TransportMessage::new("Lost"), "nobody-listens-here")
        .await
        .is_err());

    connections.dispose().await;
    Ok(())
}
