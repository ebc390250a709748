//! Facilities to send messages to RabbitMq queues and to publish events to their subscribers.
//! Check out [`MessageSender`] and [`MessagePublisher`] as starting points.
mod message_publisher;
mod message_sender;

pub use message_publisher::MessagePublisher;
pub use message_sender::{MessageSender, MessageSenderBuilder, MessageSenderError};
