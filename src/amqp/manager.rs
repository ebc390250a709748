use crate::amqp::{
    error::{ChannelError, ConnectionFailure},
    factory::{ConnectionFactory, ConnectionRole},
};
use arc_swap::ArcSwapOption;
use lapin::{Channel, Connection};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::Mutex;

/// Hands out the connections used by publishers and consumers.
///
/// [`ConnectionManager`] is the default implementation. Provide your own to control how
/// connections are created and shared - e.g. to share connections with other parts of
/// your application.
#[async_trait::async_trait]
pub trait ManageConnections: Send + Sync + 'static {
    /// Return the live connection for `role`.
    async fn get_connection(&self, role: ConnectionRole)
        -> Result<Arc<Connection>, ConnectionFailure>;

    /// Close every connection. Must be idempotent.
    async fn dispose(&self);

    async fn get_administration_connection(&self) -> Result<Arc<Connection>, ConnectionFailure> {
        self.get_connection(ConnectionRole::Administration).await
    }

    async fn get_publish_connection(&self) -> Result<Arc<Connection>, ConnectionFailure> {
        self.get_connection(ConnectionRole::Publish).await
    }

    async fn get_consume_connection(&self) -> Result<Arc<Connection>, ConnectionFailure> {
        self.get_connection(ConnectionRole::Consume).await
    }

    /// Open a fresh channel on the consume connection, for the exclusive use of one consumer.
    async fn create_consume_channel(&self) -> Result<Channel, ChannelError> {
        let connection = self.get_consume_connection().await?;
        Ok(connection.create_channel().await?)
    }
}

/// Owns one connection per [`ConnectionRole`], created lazily on first use.
///
/// # Sharing
///
/// Reading a healthy connection is lock-free. Creation is serialised per role: concurrent
/// callers asking for a connection that does not exist yet wait for a single connection
/// attempt instead of each opening their own.
///
/// # Broken connections
///
/// A connection that is no longer connected is replaced on the next request for its role.
/// Channels opened on the broken connection are not migrated: their owners observe the
/// failure on their next operation and are expected to open a new channel.
pub struct ConnectionManager {
    factory: ConnectionFactory,
    administration: ManagedConnection,
    publish: ManagedConnection,
    consume: ManagedConnection,
    disposed: AtomicBool,
}

/// A single role's connection cell.
struct ManagedConnection {
    role: ConnectionRole,
    current: ArcSwapOption<Connection>,
    /// Held while a connection for this role is being created or closed.
    creation: Mutex<()>,
}

impl ManagedConnection {
    fn new(role: ConnectionRole) -> Self {
        Self {
            role,
            current: ArcSwapOption::empty(),
            creation: Mutex::new(()),
        }
    }

    fn healthy(&self) -> Option<Arc<Connection>> {
        self.current
            .load_full()
            .filter(|connection| connection.status().connected())
    }
}

impl ConnectionManager {
    /// No connection is opened until one is requested.
    pub fn new(factory: ConnectionFactory) -> Self {
        Self {
            factory,
            administration: ManagedConnection::new(ConnectionRole::Administration),
            publish: ManagedConnection::new(ConnectionRole::Publish),
            consume: ManagedConnection::new(ConnectionRole::Consume),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn factory(&self) -> &ConnectionFactory {
        &self.factory
    }

    fn managed(&self, role: ConnectionRole) -> &ManagedConnection {
        match role {
            ConnectionRole::Administration => &self.administration,
            ConnectionRole::Publish => &self.publish,
            ConnectionRole::Consume => &self.consume,
        }
    }

    #[tracing::instrument(name = "rabbitmq_replace_connection", skip(self, managed), fields(role = %managed.role))]
    async fn create_or_replace(
        &self,
        managed: &ManagedConnection,
    ) -> Result<Arc<Connection>, ConnectionFailure> {
        let _creation = managed.creation.lock().await;
        if self.disposed.load(Ordering::Acquire) {
            return Err(ConnectionFailure::Disposed);
        }

        // Someone else may have created the connection while we were waiting for the lock.
        let stale = managed.current.load_full();
        if let Some(connection) = stale.as_ref().filter(|c| c.status().connected()) {
            return Ok(Arc::clone(connection));
        }

        let fresh = Arc::new(self.factory.create_connection(managed.role).await?);
        let previous = managed
            .current
            .compare_and_swap(&stale, Some(Arc::clone(&fresh)));
        debug_assert!(same_connection(&previous, &stale));

        if let Some(stale) = stale {
            tracing::warn!(role = %managed.role, "Replacing a broken RabbitMQ connection");
            tokio::spawn(async move {
                if let Err(e) = stale.close(320, "Connection replaced").await {
                    tracing::debug!("Failed to close a broken RabbitMQ connection: {}", e);
                }
            });
        }
        Ok(fresh)
    }
}

fn same_connection(a: &Option<Arc<Connection>>, b: &Option<Arc<Connection>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

#[async_trait::async_trait]
impl ManageConnections for ConnectionManager {
    async fn get_connection(
        &self,
        role: ConnectionRole,
    ) -> Result<Arc<Connection>, ConnectionFailure> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(ConnectionFailure::Disposed);
        }
        let managed = self.managed(role);
        match managed.healthy() {
            Some(connection) => Ok(connection),
            None => self.create_or_replace(managed).await,
        }
    }

    #[tracing::instrument(name = "rabbitmq_dispose_connections", skip(self))]
    async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        for role in ConnectionRole::ALL {
            let managed = self.managed(role);
            let _creation = managed.creation.lock().await;
            if let Some(connection) = managed.current.swap(None) {
                if connection.status().connected() {
                    if let Err(e) = connection.close(200, "Connection manager disposed").await {
                        tracing::warn!(%role, "Failed to close RabbitMQ connection: {}", e);
                    }
                }
            }
        }
        tracing::info!("RabbitMQ connections closed");
    }
}
