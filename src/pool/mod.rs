//! Provides publish channels, pooled using [`deadpool`].
//!
//! This module provides three key guarantees:
//! - A channel is used by a single publisher at a time.
//! - Broken channels are disposed of and new ones are created on-demand.
//! - With publisher confirms enabled, every publish waits (for a bounded amount of time) for the
//!   broker to acknowledge it.
//!
//! ```rust
//! use std::sync::Arc;
//! use warren::amqp::configuration::ConnectionConfiguration;
//! use warren::amqp::{ConnectionFactory, ConnectionManager};
//! use warren::pool::ChannelProvider;
//!
//! // Function for asyncness.
//! async fn example() -> anyhow::Result<()> {
//!     let configuration = Arc::new(ConnectionConfiguration::default());
//!     let connections = Arc::new(ConnectionManager::new(ConnectionFactory::new(
//!         configuration.clone(),
//!     )?));
//!     let provider = ChannelProvider::new(connections, &configuration)?;
//!
//!     // get a Channel from the pool.
//!     let mut channel = provider.get_new_publish_channel().await?;
//!     channel
//!         .publish("", "a-queue", b"Hello world!", Default::default())
//!         .await?;
//!     Ok(())
//! }
//! ```

mod channel;
mod confirms;
mod error;
mod provider;

pub use channel::{ChannelManager, ChannelPool, PooledPublishChannel};
pub use confirms::PublishChannel;
pub use error::{PublishError, PublishNotConfirmed};
pub use provider::{ChannelProvider, PublishChannelGuard, ScopedPublishChannel};
