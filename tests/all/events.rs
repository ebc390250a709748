use crate::helpers::{get_configuration, get_connection_manager, init_forwarding, temp_queue};
use lapin::ExchangeKind;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use warren::amqp::ManageConnections;
use warren::consumers::{DequeueStrategy, TransactionSettings};
use warren::pool::ChannelProvider;
use warren::publishers::MessagePublisher;
use warren::topology::{
    DirectRoutingTopology, ExchangeRoutingTopology, RoutingTopology, SubscriptionManager,
};
use warren::TransportMessage;

fn event_type() -> String {
    format!("OrderPlaced.{}", Uuid::new_v4())
}

fn get_publisher(
    connections: Arc<dyn ManageConnections>,
    topology: Arc<dyn RoutingTopology>,
) -> MessagePublisher {
    let provider = ChannelProvider::new(connections, &get_configuration()).unwrap();
    MessagePublisher::new(provider, topology).publish_timeout(Duration::from_secs(5))
}

async fn subscriptions_route_events_until_unsubscribed(topology: Arc<dyn RoutingTopology>) {
    let connections = get_connection_manager();
    let queue_name = temp_queue(connections.clone()).await;
    let event_type = event_type();
    let subscriptions =
        SubscriptionManager::new(connections.clone(), topology.clone(), &queue_name);
    let publisher = get_publisher(connections.clone(), topology);
    let mut strategy = DequeueStrategy::new(connections.clone(), &get_configuration());
    let mut received = init_forwarding(&mut strategy, &queue_name, TransactionSettings::default());
    strategy.start(1).await.unwrap();

    subscriptions.subscribe(&event_type).await.unwrap();
    subscriptions.subscribe(&event_type).await.unwrap();
    let event = TransportMessage::new("placed").with_message_type(&event_type);
    publisher.publish(&event, &event_type).await.unwrap();
    assert_eq!(received.wait_for_message().await, event);
    // Subscribing twice does not deliver twice.
    assert_eq!(
        received.try_wait_for_message(Duration::from_secs(1)).await,
        None
    );

    subscriptions.unsubscribe(&event_type).await.unwrap();
    publisher
        .publish(&TransportMessage::new("unheard"), &event_type)
        .await
        .unwrap();
    assert_eq!(
        received.try_wait_for_message(Duration::from_secs(1)).await,
        None
    );

    strategy.stop().await;
    connections.dispose().await;
}

#[tokio::test]
#[ignore = "requires a RabbitMQ broker on localhost:5672"]
async fn events_reach_subscribers_through_their_own_exchange() {
    subscriptions_route_events_until_unsubscribed(Arc::new(ExchangeRoutingTopology::transient(
        Uuid::new_v4().to_string(),
        ExchangeKind::Direct,
    )))
    .await;
}

#[tokio::test]
#[ignore = "requires a RabbitMQ broker on localhost:5672"]
async fn events_reach_subscribers_through_the_topic_exchange() {
    subscriptions_route_events_until_unsubscribed(Arc::new(DirectRoutingTopology::transient()))
        .await;
}

#[tokio::test]
#[ignore = "requires a RabbitMQ broker on localhost:5672"]
async fn events_without_subscribers_are_published_successfully() {
    let connections = get_connection_manager();
    let topology = Arc::new(ExchangeRoutingTopology::transient(
        Uuid::new_v4().to_string(),
        ExchangeKind::Direct,
    ));
    let publisher = get_publisher(connections.clone(), topology);

    publisher
        .publish(&TransportMessage::new("nobody listens"), &event_type())
        .await
        .unwrap();

    connections.dispose().await;
}

#[tokio::test]
#[ignore = "requires a RabbitMQ broker on localhost:5672"]
async fn every_subscribed_queue_gets_its_own_copy() {
    let connections = get_connection_manager();
    let topology: Arc<dyn RoutingTopology> = Arc::new(ExchangeRoutingTopology::transient(
        Uuid::new_v4().to_string(),
        ExchangeKind::Direct,
    ));
    let event_type = event_type();
    let publisher = get_publisher(connections.clone(), topology.clone());

    let mut strategies = Vec::new();
    let mut receivers = Vec::new();
    for _ in 0..2 {
        let queue_name = temp_queue(connections.clone()).await;
        SubscriptionManager::new(connections.clone(), topology.clone(), &queue_name)
            .subscribe(&event_type)
            .await
            .unwrap();
        let mut strategy = DequeueStrategy::new(connections.clone(), &get_configuration());
        receivers.push(init_forwarding(
            &mut strategy,
            &queue_name,
            TransactionSettings::default(),
        ));
        strategy.start(1).await.unwrap();
        strategies.push(strategy);
    }

    let event = TransportMessage::new("fan out");
    publisher.publish(&event, &event_type).await.unwrap();
    for received in &mut receivers {
        assert_eq!(received.wait_for_message().await, event);
    }

    for mut strategy in strategies {
        strategy.stop().await;
    }
    connections.dispose().await;
}
