use crate::helpers::{
    get_configuration, get_connection_manager, get_sender, init_forwarding, queue_state,
    temp_queue,
};
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use warren::amqp::configuration::ConnectionConfiguration;
use warren::amqp::ManageConnections;
use warren::consumers::{
    DequeueStrategy, SecondaryReceiveSettings, SlotKind, TransactionSettings,
};
use warren::TransportMessage;

#[tokio::test]
#[ignore = "requires a RabbitMQ broker on localhost:5672"]
async fn every_consumer_gets_its_own_channel() {
    let connections = get_connection_manager();
    let queue_name = temp_queue(connections.clone()).await;
    let mut strategy = DequeueStrategy::new(connections.clone(), &get_configuration());
    let _received = init_forwarding(&mut strategy, &queue_name, TransactionSettings::default());

    strategy.start(4).await.unwrap();

    let slots = strategy.slots();
    assert_eq!(slots.len(), 4);
    let channels: HashSet<u16> = slots.iter().map(|s| s.channel_id).collect();
    assert_eq!(channels.len(), 4);
    assert!(slots.iter().all(|s| s.kind == SlotKind::Primary));
    strategy.stop().await;
    connections.dispose().await;
}

#[tokio::test]
#[ignore = "requires a RabbitMQ broker on localhost:5672"]
async fn a_sent_message_is_received_unchanged_and_acked() {
    let connections = get_connection_manager();
    let queue_name = temp_queue(connections.clone()).await;
    let sender = get_sender(connections.clone());
    let mut strategy = DequeueStrategy::new(connections.clone(), &get_configuration());
    let mut received = init_forwarding(&mut strategy, &queue_name, TransactionSettings::default());
    strategy.start(1).await.unwrap();

    let message = TransportMessage::new("hello")
        .with_header("origin", "tests")
        .with_correlation_id("correlation");
    sender.send(&message, &queue_name).await.unwrap();

    assert_eq!(received.wait_for_message().await, message);
    strategy.stop().await;

    // Acked: nothing left in the queue.
    let (ready, _) = queue_state(&*connections, &queue_name).await;
    assert_eq!(ready, 0);
    connections.dispose().await;
}

#[tokio::test]
#[ignore = "requires a RabbitMQ broker on localhost:5672"]
async fn waiting_for_a_message_returns_it_once() {
    let connections = get_connection_manager();
    let queue_name = temp_queue(connections.clone()).await;
    let sender = get_sender(connections.clone());
    let mut strategy = DequeueStrategy::new(connections.clone(), &get_configuration());
    let mut received = init_forwarding(&mut strategy, &queue_name, TransactionSettings::default());
    strategy.start(1).await.unwrap();

    let message = TransportMessage::new("only once");
    sender.send(&message, &queue_name).await.unwrap();

    assert_eq!(
        received.try_wait_for_message(Duration::from_secs(1)).await,
        Some(message)
    );
    assert_eq!(
        received.try_wait_for_message(Duration::from_secs(1)).await,
        None
    );
    strategy.stop().await;
    connections.dispose().await;
}

#[tokio::test]
#[ignore = "requires a RabbitMQ broker on localhost:5672"]
async fn failures_are_reported_once_and_consumption_continues() {
    let connections = get_connection_manager();
    let queue_name = temp_queue(connections.clone()).await;
    let sender = get_sender(connections.clone());
    let mut strategy = DequeueStrategy::new(connections.clone(), &get_configuration());
    let mut received = init_forwarding(
        &mut strategy,
        &queue_name,
        TransactionSettings::non_transactional(),
    );
    strategy.start(1).await.unwrap();

    sender
        .send(&TransportMessage::new("fail"), &queue_name)
        .await
        .unwrap();
    sender
        .send(&TransportMessage::new("ok"), &queue_name)
        .await
        .unwrap();

    assert_eq!(received.wait_for_message().await.body, b"fail");
    let (body, _) = received.wait_for_failure().await;
    assert_eq!(body, b"fail");
    assert_eq!(received.wait_for_message().await.body, b"ok");

    // Not transactional: the failed message is dropped, not redelivered.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(received.messages.try_recv().is_err());
    assert!(received.failures.try_recv().is_err());

    strategy.stop().await;
    connections.dispose().await;
}

#[tokio::test]
#[ignore = "requires a RabbitMQ broker on localhost:5672"]
async fn transactional_failures_are_redelivered() {
    let connections = get_connection_manager();
    let queue_name = temp_queue(connections.clone()).await;
    let sender = get_sender(connections.clone());
    let mut strategy = DequeueStrategy::new(connections.clone(), &get_configuration());
    let mut received = init_forwarding(&mut strategy, &queue_name, TransactionSettings::default());
    strategy.start(1).await.unwrap();

    sender
        .send(&TransportMessage::new("fail"), &queue_name)
        .await
        .unwrap();

    let first = received.wait_for_message().await;
    let second = received.wait_for_message().await;
    assert_eq!(first.id, second.id);

    strategy.stop().await;
    connections.dispose().await;
}

#[tokio::test]
#[ignore = "requires a RabbitMQ broker on localhost:5672"]
async fn a_stopped_strategy_can_be_started_again() {
    let connections = get_connection_manager();
    let queue_name = temp_queue(connections.clone()).await;
    let sender = get_sender(connections.clone());
    let mut strategy = DequeueStrategy::new(connections.clone(), &get_configuration());
    let mut received = init_forwarding(&mut strategy, &queue_name, TransactionSettings::default());

    strategy.start(2).await.unwrap();
    let before: HashSet<String> = strategy.slots().into_iter().map(|s| s.consumer_tag).collect();
    strategy.stop().await;
    strategy.stop().await;
    assert!(strategy.slots().is_empty());

    strategy.start(2).await.unwrap();
    let after: HashSet<String> = strategy.slots().into_iter().map(|s| s.consumer_tag).collect();
    assert!(before.is_disjoint(&after));

    let message = TransportMessage::new("after restart");
    sender.send(&message, &queue_name).await.unwrap();
    assert_eq!(received.wait_for_message().await, message);

    strategy.stop().await;
    connections.dispose().await;
}

#[tokio::test]
#[ignore = "requires a RabbitMQ broker on localhost:5672"]
async fn secondary_queues_get_their_own_consumers() {
    let connections = get_connection_manager();
    let queue_name = temp_queue(connections.clone()).await;
    let secondary_queue = temp_queue(connections.clone()).await;
    let sender = get_sender(connections.clone());
    let mut strategy = {
        let secondary_queue = secondary_queue.clone();
        DequeueStrategy::new(connections.clone(), &get_configuration()).with_secondary_receive(
            move |_| SecondaryReceiveSettings::enabled([secondary_queue.clone()], 2),
        )
    };
    let mut received = init_forwarding(&mut strategy, &queue_name, TransactionSettings::default());

    strategy.start(1).await.unwrap();

    let slots = strategy.slots();
    assert_eq!(slots.len(), 3);
    let secondary: Vec<_> = slots
        .iter()
        .filter(|s| s.kind == SlotKind::Secondary)
        .collect();
    assert_eq!(secondary.len(), 2);
    assert!(secondary.iter().all(|s| s.queue_name == secondary_queue));

    let message = TransportMessage::new("to the secondary queue");
    sender.send(&message, &secondary_queue).await.unwrap();
    assert_eq!(received.wait_for_message().await, message);

    strategy.stop().await;
    connections.dispose().await;
}

#[tokio::test]
#[ignore = "requires a RabbitMQ broker on localhost:5672"]
async fn stop_waits_for_in_flight_messages() {
    let connections = get_connection_manager();
    let queue_name = temp_queue(connections.clone()).await;
    let sender = get_sender(connections.clone());
    let (started_sender, mut started) = tokio::sync::mpsc::unbounded_channel();
    let (completed_sender, mut completed) = tokio::sync::mpsc::unbounded_channel();
    let mut strategy = DequeueStrategy::new(connections.clone(), &get_configuration());
    strategy
        .init(
            &queue_name,
            TransactionSettings::default(),
            move |message: TransportMessage| {
                let started = started_sender.clone();
                let completed = completed_sender.clone();
                async move {
                    started.send(())?;
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    completed.send(message.id)?;
                    Ok::<_, anyhow::Error>(true)
                }
            },
            |_: &[u8], _: &warren::consumers::MessageProcessingFailure| {},
        )
        .unwrap();
    strategy.start(1).await.unwrap();

    sender
        .send(&TransportMessage::new("slow"), &queue_name)
        .await
        .unwrap();
    tokio::time::timeout(Duration::from_secs(5), started.recv())
        .await
        .unwrap();
    strategy.stop().await;

    assert!(completed.try_recv().is_ok());
    connections.dispose().await;
}

#[tokio::test]
#[ignore = "requires a RabbitMQ broker on localhost:5672"]
async fn starting_on_a_missing_queue_fails_without_leaving_consumers_behind() {
    let connections = get_connection_manager();
    let mut strategy = DequeueStrategy::new(connections.clone(), &get_configuration());
    let _received = init_forwarding(
        &mut strategy,
        "this-queue-does-not-exist",
        TransactionSettings::default(),
    );

    assert!(strategy.start(2).await.is_err());
    assert!(!strategy.is_running());
    connections.dispose().await;
}

#[tokio::test]
#[ignore = "requires a RabbitMQ broker on localhost:5672"]
async fn consumers_resubscribe_after_losing_their_connection() {
    let connections = get_connection_manager();
    let queue_name = temp_queue(connections.clone()).await;
    let sender = get_sender(connections.clone());
    let mut strategy = DequeueStrategy::new(connections.clone(), &get_configuration());
    let mut received = init_forwarding(&mut strategy, &queue_name, TransactionSettings::default());
    strategy.start(2).await.unwrap();

    let consume_connection = connections.get_consume_connection().await.unwrap();
    consume_connection
        .close(320, "Connection forced")
        .await
        .unwrap();

    let message = TransportMessage::new("after the failure");
    sender.send(&message, &queue_name).await.unwrap();

    // Resubscription happens after `retry_delay_seconds`.
    assert_eq!(
        received.try_wait_for_message(Duration::from_secs(10)).await,
        Some(message)
    );
    assert!(received.failures.try_recv().is_err());
    assert!(strategy.is_running());
    assert_eq!(strategy.slots().len(), 2);
    let (_, consumers) = queue_state(&*connections, &queue_name).await;
    assert_eq!(consumers, 2);

    strategy.stop().await;
    connections.dispose().await;
}

#[tokio::test]
#[ignore = "requires a RabbitMQ broker on localhost:5672"]
async fn stop_abandons_messages_still_in_flight_after_the_drain_timeout() {
    let connections = get_connection_manager();
    let queue_name = temp_queue(connections.clone()).await;
    let sender = get_sender(connections.clone());
    let (started_sender, mut started) = mpsc::unbounded_channel();
    let (completed_sender, mut completed) = mpsc::unbounded_channel();
    let mut strategy = DequeueStrategy::new(connections.clone(), &get_configuration())
        .with_drain_timeout(Duration::from_millis(100));
    strategy
        .init(
            &queue_name,
            TransactionSettings::default(),
            move |message: TransportMessage| {
                let started = started_sender.clone();
                let completed = completed_sender.clone();
                async move {
                    started.send(message.id.clone())?;
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    completed.send(message.id)?;
                    Ok::<_, anyhow::Error>(true)
                }
            },
            |_: &[u8], _: &warren::consumers::MessageProcessingFailure| {},
        )
        .unwrap();
    strategy.start(1).await.unwrap();

    sender
        .send(&TransportMessage::new("slow"), &queue_name)
        .await
        .unwrap();
    let first = tokio::time::timeout(Duration::from_secs(5), started.recv())
        .await
        .unwrap()
        .unwrap();
    let stopping = Instant::now();
    strategy.stop().await;
    assert!(stopping.elapsed() < Duration::from_secs(1));
    assert!(completed.try_recv().is_err());

    // The abandoned message went back to the queue.
    strategy.start(1).await.unwrap();
    let redelivered = tokio::time::timeout(Duration::from_secs(5), started.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(redelivered, first);
    let processed = tokio::time::timeout(Duration::from_secs(5), completed.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(processed, first);

    strategy.stop().await;
    connections.dispose().await;
}

#[tokio::test]
#[ignore = "requires a RabbitMQ broker on localhost:5672"]
async fn dropping_a_running_strategy_hands_prefetched_messages_back() {
    let connections = get_connection_manager();
    let queue_name = temp_queue(connections.clone()).await;
    let sender = get_sender(connections.clone());
    let configuration = ConnectionConfiguration {
        prefetch_count: 5,
        ..get_configuration()
    };
    let (started_sender, mut started) = mpsc::unbounded_channel();
    let mut strategy = DequeueStrategy::new(connections.clone(), &configuration);
    strategy
        .init(
            &queue_name,
            TransactionSettings::default(),
            move |_: TransportMessage| {
                let started = started_sender.clone();
                async move {
                    started.send(())?;
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    Ok::<_, anyhow::Error>(true)
                }
            },
            |_: &[u8], _: &warren::consumers::MessageProcessingFailure| {},
        )
        .unwrap();
    strategy.start(1).await.unwrap();

    for _ in 0..3 {
        sender
            .send(&TransportMessage::new("prefetched"), &queue_name)
            .await
            .unwrap();
    }
    tokio::time::timeout(Duration::from_secs(5), started.recv())
        .await
        .unwrap()
        .unwrap();
    drop(strategy);

    // The in-flight message is acked, the two prefetched ones are ready again.
    tokio::time::sleep(Duration::from_secs(2)).await;
    let (ready, consumers) = queue_state(&*connections, &queue_name).await;
    assert_eq!(ready, 2);
    assert_eq!(consumers, 0);
    assert!(started.try_recv().is_err());
    connections.dispose().await;
}
