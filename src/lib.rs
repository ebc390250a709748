//! `warren` is the transport layer of a message bus, built on top of [`lapin`],
//! to send and receive messages through RabbitMQ.
//!
//! - [`amqp`]: connections to the cluster, one per [`ConnectionRole`](amqp::ConnectionRole),
//!   created by a [`ConnectionFactory`](amqp::ConnectionFactory) and owned by a
//!   [`ConnectionManager`](amqp::ConnectionManager);
//! - [`pool`]: publish channels, pooled and optionally bound to a unit of work;
//! - [`publishers`]: [`MessageSender`](publishers::MessageSender) sends [`TransportMessage`]s;
//! - [`consumers`]: [`DequeueStrategy`](consumers::DequeueStrategy) receives them;
//! - [`topology`]: the queues and exchanges both sides agree on.
//!
//! ## Examples
//!
//! Check the `demos` directory to see the library in action.
pub mod amqp;
pub mod consumers;
pub mod pool;
pub mod publishers;
pub mod topology;

mod message;

pub use message::TransportMessage;
