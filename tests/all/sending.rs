use crate::helpers::{get_configuration, get_connection_manager, get_sender, temp_queue};
use amq_protocol_types::{AMQPValue, FieldTable};
use lapin::options::QueueDeclareOptions;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use warren::amqp::ManageConnections;
use warren::pool::{
    ChannelManager, ChannelPool, ChannelProvider, PublishError, PublishNotConfirmed,
};
use warren::publishers::{MessageSender, MessageSenderError};
use warren::topology::DirectRoutingTopology;
use warren::TransportMessage;

/// A pool whose channels give up on confirmations almost immediately.
fn impatient_pool(connections: Arc<dyn ManageConnections>) -> ChannelPool {
    let manager =
        ChannelManager::new(connections).with_publisher_confirmations(Duration::from_nanos(1));
    ChannelPool::builder(manager).build().unwrap()
}

#[tokio::test]
#[ignore = "requires a RabbitMQ broker on localhost:5672"]
async fn unroutable_messages_are_not_confirmed() {
    let connections = get_connection_manager();
    let sender = get_sender(connections.clone());

    let outcome = sender
        .send(&TransportMessage::new("lost"), "no-queue-has-this-name")
        .await;

    assert!(matches!(
        outcome,
        Err(MessageSenderError::NotConfirmed(
            PublishNotConfirmed::Unroutable { .. }
        ))
    ));
    connections.dispose().await;
}

#[tokio::test]
#[ignore = "requires a RabbitMQ broker on localhost:5672"]
async fn confirmed_publishes_leave_nothing_pending() {
    let connections = get_connection_manager();
    let queue_name = temp_queue(connections.clone()).await;
    let provider = ChannelProvider::new(connections.clone(), &get_configuration()).unwrap();

    let mut channel = provider.get_new_publish_channel().await.unwrap();
    assert!(channel.confirms_enabled());
    for _ in 0..10 {
        let message = TransportMessage::new("confirmed");
        channel
            .publish("", &queue_name, &message.body, message.to_amqp_properties())
            .await
            .unwrap();
    }

    assert_eq!(channel.pending_confirms(), 0);
    connections.dispose().await;
}

#[tokio::test]
#[ignore = "requires a RabbitMQ broker on localhost:5672"]
async fn sends_within_a_scope_share_the_scope_channel() {
    let connections = get_connection_manager();
    let queue_name = temp_queue(connections.clone()).await;
    let provider = ChannelProvider::new(connections.clone(), &get_configuration()).unwrap();
    let sender = MessageSender::builder(
        provider.clone(),
        Arc::new(DirectRoutingTopology::transient()),
    )
    .build();

    let channel_ids = provider
        .scope(async {
            assert_eq!(provider.status().size, 1);
            let scoped = provider.try_get_publish_channel().unwrap().id();
            sender
                .send(&TransportMessage::new("first"), &queue_name)
                .await
                .unwrap();
            sender
                .send(&TransportMessage::new("second"), &queue_name)
                .await
                .unwrap();
            let still_scoped = provider.try_get_publish_channel().unwrap().id();
            (scoped, still_scoped)
        })
        .await
        .unwrap();

    assert_eq!(channel_ids.0, channel_ids.1);
    assert!(provider.try_get_publish_channel().is_none());
    // Had a send checked a channel out of the pool, a second one would have been opened.
    assert_eq!(provider.status().size, 1);
    assert_eq!(provider.status().available, 1);
    connections.dispose().await;
}

#[tokio::test]
#[ignore = "requires a RabbitMQ broker on localhost:5672"]
async fn late_confirmations_fail_the_publish_and_leave_nothing_pending() {
    let connections = get_connection_manager();
    let queue_name = temp_queue(connections.clone()).await;
    let pool = impatient_pool(connections.clone());

    let mut channel = pool.get().await.unwrap();
    let message = TransportMessage::new("too late");
    let outcome = channel
        .publish("", &queue_name, &message.body, message.to_amqp_properties())
        .await;

    assert!(matches!(
        outcome,
        Err(PublishError::NotConfirmed(PublishNotConfirmed::Timeout { .. }))
    ));
    assert_eq!(channel.pending_confirms(), 0);
    connections.dispose().await;
}

#[tokio::test]
#[ignore = "requires a RabbitMQ broker on localhost:5672"]
async fn a_late_confirmation_reaches_the_sender_as_not_confirmed() {
    let connections = get_connection_manager();
    let queue_name = temp_queue(connections.clone()).await;
    let provider = ChannelProvider::from_pool(impatient_pool(connections.clone()));
    let sender =
        MessageSender::builder(provider, Arc::new(DirectRoutingTopology::transient())).build();

    let outcome = sender
        .send(&TransportMessage::new("too late"), &queue_name)
        .await;

    assert!(matches!(
        outcome,
        Err(MessageSenderError::NotConfirmed(
            PublishNotConfirmed::Timeout { .. }
        ))
    ));
    connections.dispose().await;
}

#[tokio::test]
#[ignore = "requires a RabbitMQ broker on localhost:5672"]
async fn nacked_publishes_fail_and_leave_nothing_pending() {
    let connections = get_connection_manager();
    // A queue that is always full and rejects new messages: the broker nacks them.
    let queue_name = Uuid::new_v4().to_string();
    let mut arguments = FieldTable::default();
    arguments.insert("x-max-length".into(), AMQPValue::LongInt(0));
    arguments.insert(
        "x-overflow".into(),
        AMQPValue::LongString("reject-publish".into()),
    );
    let administration = connections.get_administration_connection().await.unwrap();
    let admin_channel = administration.create_channel().await.unwrap();
    admin_channel
        .queue_declare(
            &queue_name,
            QueueDeclareOptions {
                auto_delete: true,
                ..Default::default()
            },
            arguments,
        )
        .await
        .unwrap();
    let provider = ChannelProvider::new(connections.clone(), &get_configuration()).unwrap();

    let mut channel = provider.get_new_publish_channel().await.unwrap();
    let message = TransportMessage::new("rejected");
    let outcome = channel
        .publish("", &queue_name, &message.body, message.to_amqp_properties())
        .await;

    assert!(matches!(
        outcome,
        Err(PublishError::NotConfirmed(PublishNotConfirmed::Nack { .. }))
    ));
    assert_eq!(channel.pending_confirms(), 0);
    connections.dispose().await;
}
