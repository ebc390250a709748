use crate::amqp::configuration::ConfigurationError;
use serde::{Deserialize, Deserializer};
use serde_aux::field_attributes::deserialize_number_from_string;
use std::{fmt, time::Duration};

/// How the processing of a single message is scoped.
///
/// RabbitMq has no transactions spanning a delivery and the work done by the handler: the
/// settings below control the acknowledgement of failed messages and whether the handler runs
/// within a bounded scope.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransactionSettings {
    /// Failed messages are requeued when `true`, dropped (or dead-lettered, if the queue is
    /// configured to do so) when `false`.
    pub is_transactional: bool,
    /// The time a handler is given to process a message when it runs in a transaction scope.
    #[serde(deserialize_with = "seconds")]
    pub transaction_timeout: Duration,
    pub isolation_level: IsolationLevel,
    /// RabbitMq cannot enlist in a distributed transaction.
    /// A distributed scope is handled exactly like a local one.
    pub use_distributed_transactions: bool,
    /// Run the handler in a scope bounded by `transaction_timeout`.
    pub wrap_handlers_in_transaction_scope: bool,
}

impl Default for TransactionSettings {
    fn default() -> Self {
        Self {
            is_transactional: true,
            transaction_timeout: Duration::from_secs(30),
            isolation_level: IsolationLevel::default(),
            use_distributed_transactions: false,
            wrap_handlers_in_transaction_scope: true,
        }
    }
}

impl TransactionSettings {
    /// Failed messages are dropped and handlers run unbounded.
    pub fn non_transactional() -> Self {
        Self {
            is_transactional: false,
            wrap_handlers_in_transaction_scope: false,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.scope() != TransactionScope::None && self.transaction_timeout.is_zero() {
            return Err(ConfigurationError::ZeroTransactionTimeout);
        }
        Ok(())
    }

    pub(crate) fn scope(&self) -> TransactionScope {
        if !self.is_transactional || !self.wrap_handlers_in_transaction_scope {
            TransactionScope::None
        } else if self.use_distributed_transactions {
            TransactionScope::Distributed
        } else {
            TransactionScope::Local
        }
    }

    /// The deadline for a single handler invocation, if any.
    pub(crate) fn handler_timeout(&self) -> Option<Duration> {
        match self.scope() {
            TransactionScope::None => None,
            TransactionScope::Local | TransactionScope::Distributed => {
                Some(self.transaction_timeout)
            }
        }
    }
}

/// Carried for handlers that open their own transactions against other resources.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum IsolationLevel {
    Serializable,
    RepeatableRead,
    #[default]
    ReadCommitted,
    ReadUncommitted,
    Snapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransactionScope {
    None,
    Local,
    Distributed,
}

impl fmt::Display for TransactionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Local => write!(f, "local"),
            Self::Distributed => write!(f, "distributed"),
        }
    }
}

/// Timeouts are written as a number of seconds in configuration files.
fn seconds<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    deserialize_number_from_string::<u64, D>(deserializer).map(Duration::from_secs)
}
