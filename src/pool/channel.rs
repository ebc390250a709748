//! Implements [`Manager`] for [`PublishChannel`].
use crate::amqp::{ChannelError, ManageConnections};
use crate::pool::confirms::PublishChannel;
use deadpool::managed::{self, Manager};
use lapin::{options::ConfirmSelectOptions, ChannelState};
use std::{sync::Arc, time::Duration};

/// `ChannelPool` pools [`PublishChannel`]s opened on the publish connection.
pub type ChannelPool = deadpool::managed::Pool<ChannelManager>;

/// A [`PublishChannel`] checked out of a [`ChannelPool`].
///
/// It goes back to the pool when dropped. Broken channels are discarded the next time they are
/// checked out.
pub type PooledPublishChannel = deadpool::managed::Object<ChannelManager>;

/// `ChannelManager` implements [Manager] to manage a pool of [`PublishChannel`]s.
///
/// Every channel is opened on the publish connection of the underlying [`ManageConnections`]:
/// when that connection breaks, the next channel creation transparently opens a new one.
pub struct ChannelManager {
    connections: Arc<dyn ManageConnections>,
    pub(crate) publisher_confirms: bool,
    pub(crate) max_wait_for_confirms: Duration,
}

impl ChannelManager {
    /// Construct `ChannelManager` for [`PublishChannel`]s.
    ///
    /// By default, publisher confirmations are disabled; opt in using
    /// [`ChannelManager::with_publisher_confirmations`].
    pub fn new(connections: Arc<dyn ManageConnections>) -> Self {
        Self {
            connections,
            publisher_confirms: false,
            max_wait_for_confirms: Duration::from_secs(30),
        }
    }

    /// Enable publisher confirmations, waiting at most `max_wait` for each of them.
    #[must_use]
    pub fn with_publisher_confirmations(mut self, max_wait: Duration) -> Self {
        self.publisher_confirms = true;
        self.max_wait_for_confirms = max_wait;
        self
    }
}

#[async_trait::async_trait]
impl Manager for ChannelManager {
    type Type = PublishChannel;
    type Error = ChannelError;

    #[tracing::instrument(name = "rabbitmq_create_publish_channel", skip(self))]
    async fn create(&self) -> Result<PublishChannel, ChannelError> {
        let connection = self.connections.get_publish_connection().await?;
        let channel = connection.create_channel().await?;
        if self.publisher_confirms {
            // See https://www.rabbitmq.com/amqp-0-9-1-reference.html#confirm.select.nowait
            channel
                .confirm_select(ConfirmSelectOptions { nowait: false })
                .await?;
        }
        Ok(PublishChannel::new(
            channel,
            self.publisher_confirms,
            self.max_wait_for_confirms,
        ))
    }

    async fn recycle(&self, obj: &mut PublishChannel) -> managed::RecycleResult<ChannelError> {
        match obj.raw().status().state() {
            ChannelState::Connected => Ok(()),
            state => Err(managed::RecycleError::Message(format!(
                "Channel is not in an healthy state {state:?}",
            ))),
        }
    }
}
