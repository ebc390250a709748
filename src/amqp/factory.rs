use crate::amqp::{
    configuration::{BrokerEndpoint, ConnectionConfiguration},
    error::{ConnectionFailure, FailedAttempt},
    host_selection::{HostSelectionStrategy, RoundRobin},
};
use amq_protocol_types::AMQPValue;
use anyhow::Context;
use lapin::{
    tcp::{AMQPUriTcpExt, NativeTlsConnector},
    uri::{AMQPScheme, AMQPUri},
    ConnectionProperties,
};
use std::{fmt, sync::Arc, time::Duration};
use tokio::time::timeout;
use tracing::warn;

/// The purpose a connection is used for.
///
/// Each role gets its own physical connection so that, for example, a slow consumer cannot
/// starve publishers of network bandwidth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionRole {
    Administration,
    Publish,
    Consume,
}

impl ConnectionRole {
    pub const ALL: [ConnectionRole; 3] = [Self::Administration, Self::Publish, Self::Consume];
}

impl fmt::Display for ConnectionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Administration => write!(f, "administration"),
            Self::Publish => write!(f, "publish"),
            Self::Consume => write!(f, "consume"),
        }
    }
}

#[derive(Clone)]
/// Creates physical connections to a RabbitMq cluster.
///
/// Candidates are tried in the order given by the [`HostSelectionStrategy`]: the factory fails
/// only after every candidate rejected the connection. It does not retry nor back off, that is
/// up to the caller.
pub struct ConnectionFactory {
    configuration: Arc<ConnectionConfiguration>,
    host_selection: Arc<dyn HostSelectionStrategy>,
    /// The timeout observed when trying to connect to a single node.
    connection_timeout: Duration,
    /// TLS configuration for the connections.
    /// If `None`, connections will not be encrypted.
    tls: Option<Arc<Tls>>,
}

struct Tls {
    connector: NativeTlsConnector,
    /// Expected CN on the server certificate. Defaults to the host being dialed.
    domain_name: Option<String>,
}

impl ConnectionFactory {
    /// Create a new connection factory using the [`RoundRobin`] host selection strategy.
    pub fn new(configuration: Arc<ConnectionConfiguration>) -> Result<Self, anyhow::Error> {
        Self::with_host_selection(configuration, Arc::new(RoundRobin::new()))
    }

    /// Create a new connection factory with a custom host selection strategy.
    ///
    /// If the connection timeout is left unspecified in `configuration`, it will be defaulted
    /// to 10 seconds.
    pub fn with_host_selection(
        configuration: Arc<ConnectionConfiguration>,
        host_selection: Arc<dyn HostSelectionStrategy>,
    ) -> Result<Self, anyhow::Error> {
        configuration.validate()?;
        let tls = configuration
            .tls
            .as_ref()
            .map::<Result<Tls, anyhow::Error>, _>(|tls_settings| {
                let mut connector_builder = NativeTlsConnector::builder();
                if let Some(certificate) = tls_settings.ca_certificate_chain()? {
                    connector_builder.add_root_certificate(certificate);
                }
                let connector = connector_builder
                    .build()
                    .context("Failed to build the TLS connector for RabbitMQ.")?;
                Ok(Tls {
                    connector,
                    domain_name: tls_settings.domain.clone(),
                })
            })
            .transpose()?;
        Ok(Self {
            connection_timeout: configuration.connection_timeout(),
            configuration,
            host_selection,
            tls: tls.map(Arc::new),
        })
    }

    /// Replaces the TLS connector, along with the expected domain name for the certificate.
    pub fn set_tls_connector(&mut self, connector: NativeTlsConnector, domain_name: Option<String>) {
        self.tls = Some(Arc::new(Tls {
            connector,
            domain_name,
        }));
    }

    pub fn configuration(&self) -> &Arc<ConnectionConfiguration> {
        &self.configuration
    }

    /// Create a new connection for `role`, trying every candidate endpoint in turn.
    #[tracing::instrument(name = "rabbitmq_connect", skip(self))]
    pub async fn create_connection(
        &self,
        role: ConnectionRole,
    ) -> Result<lapin::Connection, ConnectionFailure> {
        let candidates = self
            .host_selection
            .select_candidates(&self.configuration.hosts);
        if candidates.is_empty() {
            return Err(ConnectionFailure::NoCandidates);
        }

        let mut attempts = Vec::with_capacity(candidates.len());
        for endpoint in candidates {
            match self.connect(&endpoint, role).await {
                Ok(connection) => {
                    tracing::debug!(%endpoint, %role, "Connected to RabbitMQ");
                    // Register a callback to log connection errors.
                    connection.on_error(move |e| {
                        warn!(%role, "RabbitMQ broken connection: {:?}", e);
                    });
                    return Ok(connection);
                }
                Err(error) => {
                    warn!(%endpoint, %role, "Failed to connect to RabbitMQ: {:#}", error);
                    attempts.push(FailedAttempt { endpoint, error });
                }
            }
        }
        Err(ConnectionFailure::NoReachableEndpoint { attempts })
    }

    async fn connect(
        &self,
        endpoint: &BrokerEndpoint,
        role: ConnectionRole,
    ) -> Result<lapin::Connection, anyhow::Error> {
        let mut properties =
            ConnectionProperties::default().with_executor(tokio_executor_trait::Tokio::current());
        properties.client_properties.insert(
            "connection_name".into(),
            AMQPValue::LongString(format!("{} ({role})", self.configuration.client_name).into()),
        );
        let uri = self.configuration.amqp_uri(endpoint);
        let connection = timeout(self.connection_timeout, async {
            match &self.tls {
                None => connect_without_tls(uri, properties).await,
                Some(tls) => connect_with_tls(uri, properties, Arc::clone(tls)).await,
            }
        })
        .await
        .map_err(|_| {
            anyhow::anyhow!(
                "Timed out after {:?} while trying to connect",
                self.connection_timeout
            )
        })??;
        Ok(connection)
    }
}

/// Establish a new unencrypted connection to a RabbitMq broker.
async fn connect_without_tls(
    uri: AMQPUri,
    properties: ConnectionProperties,
) -> Result<lapin::Connection, lapin::Error> {
    lapin::Connection::connect_uri(uri, properties).await
}

/// Establish a new TLS connection to a RabbitMq broker.
async fn connect_with_tls(
    uri: AMQPUri,
    properties: ConnectionProperties,
    tls_configuration: Arc<Tls>,
) -> Result<lapin::Connection, lapin::Error> {
    let domain_name = tls_configuration
        .domain_name
        .clone()
        .unwrap_or_else(|| uri.authority.host.clone());
    lapin::Connection::connector(
        uri,
        Box::new(move |uri| {
            // First establish a plain TCP connection using the AMQP protocol
            let mut amqp_uri = uri.clone();
            amqp_uri.scheme = AMQPScheme::AMQP;
            amqp_uri
                .connect()
                // Then perform a TLS handshake with custom settings
                // including customisation of the expected domain for the server certificate
                .and_then(|tcp| tcp.into_native_tls(&tls_configuration.connector, &domain_name))
        }),
        properties,
    )
    .await
}
