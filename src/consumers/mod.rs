//! Consume messages from RabbitMq queues.
//!
//! [`DequeueStrategy`] is the entrypoint: it runs a fixed number of consumers on an input
//! queue, each with its own channel, and hands every message to a [`MessageHandler`].
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use warren::amqp::{configuration::ConnectionConfiguration, ConnectionFactory, ConnectionManager};
//! use warren::consumers::{DequeueStrategy, TransactionSettings};
//! use warren::TransportMessage;
//!
//! async fn handle(message: TransportMessage) -> Result<bool, anyhow::Error> {
//!     println!("Received {}", message.id);
//!     Ok(true)
//! }
//!
//! # async fn example() -> Result<(), anyhow::Error> {
//! let configuration = Arc::new(ConnectionConfiguration::default());
//! let connections = Arc::new(ConnectionManager::new(ConnectionFactory::new(configuration.clone())?));
//!
//! let mut strategy = DequeueStrategy::new(connections, &configuration);
//! strategy.init("orders", TransactionSettings::default(), handle, |body, failure| {
//!     eprintln!("Failed to process a message of {} bytes: {}", body.len(), failure);
//! })?;
//! strategy.start(4).await?;
//! // ...
//! strategy.stop().await;
//! # Ok(())
//! # }
//! ```
mod dequeue_strategy;
mod error;
mod handler;
mod processing;
mod secondary;
mod slot;
mod transaction;

pub use dequeue_strategy::DequeueStrategy;
pub use error::{DequeueError, MessageProcessingFailure};
pub use handler::MessageHandler;
pub use processing::ErrorCallback;
pub use secondary::{no_secondary_receive, SecondaryReceivePolicy, SecondaryReceiveSettings};
pub use slot::{SlotInfo, SlotKind};
pub use transaction::{IsolationLevel, TransactionSettings};
