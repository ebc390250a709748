use std::sync::Arc;
use std::time::Duration;
use warren::amqp::{configuration::ConnectionConfiguration, ConnectionFactory, ConnectionManager};
use warren::amqp::ManageConnections;
use warren::consumers::{DequeueStrategy, SecondaryReceiveSettings, TransactionSettings};
use warren::topology::{DirectRoutingTopology, QueueCreator};
use warren::TransportMessage;

async fn handle(message: TransportMessage) -> Result<bool, anyhow::Error> {
    let body = String::from_utf8_lossy(&message.body);
    println!("Received message {}: {}", message.id, body);
    // Returning `false` (or an error) nacks the message and reports it to the error callback.
    Ok(!body.contains("poison"))
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    // The out-of-the-box parameters for the default RabbitMq Docker image.
    // Each consumer prefetches up to `prefetch_count` messages and processes them one at a time.
    let configuration = Arc::new(ConnectionConfiguration::default());
    let connections = Arc::new(ConnectionManager::new(ConnectionFactory::new(
        configuration.clone(),
    )?));

    let creator = QueueCreator::new(connections.clone(), Arc::new(DirectRoutingTopology::durable()));
    creator.create_queue_if_necessary("hello").await?;
    creator.create_queue_if_necessary("hello.legacy").await?;

    let mut strategy = DequeueStrategy::new(connections.clone(), &configuration)
        // Keep draining the queue we are migrating away from.
        .with_secondary_receive(|queue_name| {
            SecondaryReceiveSettings::enabled([format!("{queue_name}.legacy")], 1)
        })
        .with_drain_timeout(Duration::from_secs(10));

    // Failed messages are requeued; handlers get 30 seconds before being abandoned.
    strategy.init("hello", TransactionSettings::default(), handle, |body, failure| {
        eprintln!(
            "Could not process `{}`: {}",
            String::from_utf8_lossy(body),
            failure
        );
    })?;

    // Four consumers on `hello`, one on `hello.legacy`.
    strategy.start(4).await?;
    for slot in strategy.slots() {
        println!(
            "Consuming from {} ({}) on channel {}",
            slot.queue_name, slot.kind, slot.channel_id
        );
    }

    tokio::signal::ctrl_c().await?;

    strategy.stop().await;
    connections.dispose().await;
    Ok(())
}
