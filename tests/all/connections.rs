use crate::helpers::get_connection_manager;
use futures_util::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use warren::amqp::{ConnectionRole, ManageConnections};

#[tokio::test]
#[ignore = "requires a RabbitMQ broker on localhost:5672"]
async fn concurrent_requests_share_a_single_connection_per_role() {
    let manager = get_connection_manager();

    let connections = join_all((0..20).map(|_| manager.get_publish_connection())).await;

    let first = connections[0].as_ref().unwrap();
    for connection in &connections {
        assert!(Arc::ptr_eq(first, connection.as_ref().unwrap()));
    }
    manager.dispose().await;
}

#[tokio::test]
#[ignore = "requires a RabbitMQ broker on localhost:5672"]
async fn each_role_gets_its_own_connection() {
    let manager = get_connection_manager();

    let mut connections = Vec::new();
    for role in ConnectionRole::ALL {
        connections.push(manager.get_connection(role).await.unwrap());
    }

    assert!(!Arc::ptr_eq(&connections[0], &connections[1]));
    assert!(!Arc::ptr_eq(&connections[1], &connections[2]));
    assert!(!Arc::ptr_eq(&connections[0], &connections[2]));
    manager.dispose().await;
}

#[tokio::test]
#[ignore = "requires a RabbitMQ broker on localhost:5672"]
async fn consume_channels_are_never_shared() {
    let manager = get_connection_manager();

    let mut ids = HashSet::new();
    for _ in 0..5 {
        let channel = manager.create_consume_channel().await.unwrap();
        assert!(ids.insert(channel.id()));
    }
    manager.dispose().await;
}

#[tokio::test]
#[ignore = "requires a RabbitMQ broker on localhost:5672"]
async fn a_closed_connection_is_replaced_on_the_next_request() {
    let manager = get_connection_manager();
    let connection = manager.get_consume_connection().await.unwrap();

    connection.close(200, "Simulated failure").await.unwrap();
    let replacement = manager.get_consume_connection().await.unwrap();

    assert!(!Arc::ptr_eq(&connection, &replacement));
    assert!(replacement.status().connected());
    manager.dispose().await;
}

#[tokio::test]
#[ignore = "requires a RabbitMQ broker on localhost:5672"]
async fn dispose_closes_every_connection() {
    let manager = get_connection_manager();
    let connection = manager.get_administration_connection().await.unwrap();

    manager.dispose().await;
    manager.dispose().await;

    assert!(!connection.status().connected());
    assert!(manager.get_administration_connection().await.is_err());
}
