use crate::amqp::convenience::amqp_value_as_str;
use amq_protocol_types::{AMQPValue, FieldTable};
use lapin::BasicProperties;
use std::{collections::BTreeMap, time::Duration};
use uuid::Uuid;

/// Delivery mode: Non-persistent (1) or persistent (2).
const NON_PERSISTENT: u8 = 1;
const PERSISTENT: u8 = 2;

/// A message as seen by the application, independently of how it travels on the wire.
///
/// Everything but the body is carried in the AMQP basic properties: a message sent with
/// [`MessageSender`](crate::publishers::MessageSender) is received unchanged by the
/// [`DequeueStrategy`](crate::consumers::DequeueStrategy) callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportMessage {
    /// Unique identifier, mapped to the AMQP `message-id`.
    pub id: String,
    /// The payload, opaque to the transport.
    pub body: Vec<u8>,
    /// String headers. Headers of other AMQP types are ignored on receive.
    pub headers: BTreeMap<String, String>,
    pub correlation_id: Option<String>,
    /// Where replies should be sent.
    pub reply_to: Option<String>,
    /// Mapped to the AMQP `type` property.
    pub message_type: Option<String>,
    /// Persist the message on the broker's disk.
    pub recoverable: bool,
    /// Discard the message if it has not been consumed within this time.
    ///
    /// Carried with millisecond precision.
    pub time_to_be_received: Option<Duration>,
}

impl TransportMessage {
    /// A new recoverable message with a random identifier.
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            body: body.into(),
            headers: BTreeMap::new(),
            correlation_id: None,
            reply_to: None,
            message_type: None,
            recoverable: true,
            time_to_be_received: None,
        }
    }

    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    #[must_use]
    pub fn with_message_type(mut self, message_type: impl Into<String>) -> Self {
        self.message_type = Some(message_type.into());
        self
    }

    #[must_use]
    pub fn with_recoverable(mut self, recoverable: bool) -> Self {
        self.recoverable = recoverable;
        self
    }

    #[must_use]
    pub fn with_time_to_be_received(mut self, ttl: Duration) -> Self {
        self.time_to_be_received = Some(ttl);
        self
    }

    /// Rebuild a message from what was received from the broker.
    ///
    /// A message without `message-id` gets a random one.
    pub fn from_amqp(properties: &BasicProperties, body: Vec<u8>) -> Self {
        let id = match properties.message_id() {
            Some(id) => id.as_str().to_owned(),
            None => {
                let id = Uuid::new_v4().to_string();
                tracing::warn!(message_id = %id, "Received a message without id, generated one");
                id
            }
        };
        let headers = properties
            .headers()
            .as_ref()
            .map(|headers| {
                headers
                    .inner()
                    .iter()
                    .filter_map(|(k, v)| Some((k.as_str().to_owned(), amqp_value_as_str(v)?.into_owned())))
                    .collect()
            })
            .unwrap_or_default();
        Self {
            id,
            body,
            headers,
            correlation_id: properties.correlation_id().as_ref().map(|s| s.as_str().to_owned()),
            reply_to: properties.reply_to().as_ref().map(|s| s.as_str().to_owned()),
            message_type: properties.kind().as_ref().map(|s| s.as_str().to_owned()),
            recoverable: *properties.delivery_mode() != Some(NON_PERSISTENT),
            time_to_be_received: properties
                .expiration()
                .as_ref()
                .and_then(|ms| ms.as_str().parse().ok())
                .map(Duration::from_millis),
        }
    }

    /// The AMQP properties carrying everything but the body.
    pub fn to_amqp_properties(&self) -> BasicProperties {
        let mut properties = BasicProperties::default()
            .with_message_id(self.id.clone().into())
            .with_delivery_mode(if self.recoverable {
                PERSISTENT
            } else {
                NON_PERSISTENT
            });
        if !self.headers.is_empty() {
            let mut headers = FieldTable::default();
            for (key, value) in &self.headers {
                headers.insert(
                    key.as_str().into(),
                    AMQPValue::LongString(value.as_str().into()),
                );
            }
            properties = properties.with_headers(headers);
        }
        if let Some(correlation_id) = &self.correlation_id {
            properties = properties.with_correlation_id(correlation_id.as_str().into());
        }
        if let Some(reply_to) = &self.reply_to {
            properties = properties.with_reply_to(reply_to.as_str().into());
        }
        if let Some(message_type) = &self.message_type {
            properties = properties.with_type(message_type.as_str().into());
        }
        if let Some(ttl) = self.time_to_be_received {
            properties = properties.with_expiration(ttl.as_millis().to_string().into());
        }
        properties
    }
}
