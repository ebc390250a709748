//! Scenarios against a live broker.
//!
//! They expect RabbitMq with default credentials on `localhost:5672`, e.g.
//! `docker run -p 5672:5672 rabbitmq:3`, and run with `cargo test -- --ignored`.
mod connections;
mod dequeue;
mod events;
mod sending;
