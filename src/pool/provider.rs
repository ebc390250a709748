#![allow(clippy::declare_interior_mutable_const)] // silence tokio::task_local warning

use crate::amqp::{configuration::ConnectionConfiguration, ChannelError, ManageConnections};
use crate::pool::{
    channel::{ChannelManager, ChannelPool, PooledPublishChannel},
    confirms::PublishChannel,
};
use deadpool::managed::Status;
use std::{
    future::Future,
    ops::{Deref, DerefMut},
    sync::Arc,
    time::Duration,
};
use tokio::sync::{Mutex, OwnedMutexGuard};

tokio::task_local! {
    /// The publish channel bound to the current task by [`ChannelProvider::scope`].
    static SCOPED_PUBLISH_CHANNEL: Arc<Mutex<PooledPublishChannel>>;
}

/// A publish channel bound to the current scope, exclusively held until dropped.
pub type ScopedPublishChannel = OwnedMutexGuard<PooledPublishChannel>;

/// The channel a publisher was handed by [`ChannelProvider::acquire`].
pub enum PublishChannelGuard {
    /// The channel of the enclosing [`ChannelProvider::scope`].
    Scoped(ScopedPublishChannel),
    /// Checked out of the pool for this publish only.
    Pooled(PooledPublishChannel),
}

impl Deref for PublishChannelGuard {
    type Target = PublishChannel;

    fn deref(&self) -> &PublishChannel {
        match self {
            Self::Scoped(channel) => channel,
            Self::Pooled(channel) => channel,
        }
    }
}

impl DerefMut for PublishChannelGuard {
    fn deref_mut(&mut self) -> &mut PublishChannel {
        match self {
            Self::Scoped(channel) => channel,
            Self::Pooled(channel) => channel,
        }
    }
}

/// Supplies channels to publishers.
///
/// Channels come from a [`ChannelPool`]: each one is used by a single publisher at a time
/// and returned to the pool afterwards.
///
/// A unit of work that publishes several messages can pin a single channel for its whole
/// duration with [`ChannelProvider::scope`]; [`ChannelProvider::try_get_publish_channel`]
/// then returns it to every publisher running inside the scope.
#[derive(Clone)]
pub struct ChannelProvider {
    pool: ChannelPool,
}

impl ChannelProvider {
    /// Build a provider whose pool opens channels on the publish connection of `connections`,
    /// with publisher confirms configured as in `configuration`.
    pub fn new(
        connections: Arc<dyn ManageConnections>,
        configuration: &ConnectionConfiguration,
    ) -> Result<Self, anyhow::Error> {
        let mut manager = ChannelManager::new(connections);
        if configuration.use_publisher_confirms {
            manager =
                manager.with_publisher_confirmations(configuration.max_wait_time_for_confirms());
        }
        Ok(Self::from_pool(ChannelPool::builder(manager).build()?))
    }

    pub fn from_pool(pool: ChannelPool) -> Self {
        Self { pool }
    }

    pub fn use_publisher_confirms(&self) -> bool {
        self.pool.manager().publisher_confirms
    }

    /// How long a publish waits for its confirmation, if confirms are enabled.
    pub fn max_wait_for_confirms(&self) -> Option<Duration> {
        let manager = self.pool.manager();
        manager
            .publisher_confirms
            .then_some(manager.max_wait_for_confirms)
    }

    /// Channels currently opened by the pool, and how many of them are idle.
    pub fn status(&self) -> Status {
        self.pool.status()
    }

    /// Return the channel bound to the current scope, if there is one and nobody else in the
    /// scope is using it.
    ///
    /// It never opens a channel.
    pub fn try_get_publish_channel(&self) -> Option<ScopedPublishChannel> {
        SCOPED_PUBLISH_CHANNEL
            .try_with(Arc::clone)
            .ok()?
            .try_lock_owned()
            .ok()
    }

    /// Check out a channel from the pool, opening a new one if none is idle.
    pub async fn get_new_publish_channel(&self) -> Result<PooledPublishChannel, ChannelError> {
        Ok(self.pool.get().await?)
    }

    /// The scope's channel when there is one, otherwise a channel checked out of the pool.
    pub async fn acquire(&self) -> Result<PublishChannelGuard, ChannelError> {
        match self.try_get_publish_channel() {
            Some(channel) => Ok(PublishChannelGuard::Scoped(channel)),
            None => Ok(PublishChannelGuard::Pooled(
                self.get_new_publish_channel().await?,
            )),
        }
    }

    /// Run `future` with a publish channel bound to its scope.
    ///
    /// The channel is checked out before `future` starts and goes back to the pool when it
    /// completes.
    pub async fn scope<F: Future>(&self, future: F) -> Result<F::Output, ChannelError> {
        let channel = self.get_new_publish_channel().await?;
        Ok(SCOPED_PUBLISH_CHANNEL
            .scope(Arc::new(Mutex::new(channel)), future)
            .await)
    }
}
