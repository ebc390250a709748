use crate::amqp::{configuration::ConfigurationError, ChannelError};
use std::time::Duration;

/// Misuse of the [`DequeueStrategy`](crate::consumers::DequeueStrategy) lifecycle, or failure
/// to start consuming.
#[derive(thiserror::Error, Debug)]
pub enum DequeueError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("The dequeue strategy has already been initialized")]
    AlreadyInitialized,
    #[error("The dequeue strategy must be initialized before being started")]
    NotInitialized,
    #[error("The dequeue strategy is already running")]
    AlreadyRunning,
    #[error("Failed to start consuming from `{queue}`")]
    Subscription {
        queue: String,
        #[source]
        source: ChannelError,
    },
}

/// Why a message was not processed.
///
/// Handed to the error callback together with the message body.
#[derive(thiserror::Error, Debug)]
pub enum MessageProcessingFailure {
    #[error("The message handler reported the message as not processed")]
    Rejected,
    #[error("The message handler failed")]
    Failed(#[source] anyhow::Error),
    #[error("The message handler panicked: {0}")]
    Panicked(String),
    #[error("The message handler did not complete within {0:?}")]
    TimedOut(Duration),
}
