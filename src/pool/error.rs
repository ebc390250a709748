use crate::amqp::ChannelError;
use lapin::message::BasicReturnMessage;
use std::time::Duration;

/// The broker did not confirm a publish.
///
/// The publish is not retried: the caller decides whether to try again.
#[derive(thiserror::Error, Debug)]
pub enum PublishNotConfirmed {
    #[error("The RabbitMq broker nacked message #{sequence}: {returned:?}")]
    Nack {
        sequence: u64,
        returned: Option<Box<BasicReturnMessage>>,
    },
    #[error("No confirmation was received for message #{sequence} within {waited:?}")]
    Timeout { sequence: u64, waited: Duration },
    #[error("Message #{sequence} could not be routed: {returned:?}")]
    Unroutable {
        sequence: u64,
        returned: Box<BasicReturnMessage>,
    },
}

/// Error returned when publishing on a [`PublishChannel`](super::PublishChannel).
#[derive(thiserror::Error, Debug)]
pub enum PublishError {
    #[error(transparent)]
    NotConfirmed(#[from] PublishNotConfirmed),
    #[error("Generic error encountered when publishing to the RabbitMq broker")]
    Channel(#[from] lapin::Error),
}

impl From<deadpool::managed::PoolError<ChannelError>> for ChannelError {
    fn from(err: deadpool::managed::PoolError<ChannelError>) -> Self {
        match err {
            deadpool::managed::PoolError::Backend(e) => e,
            err => Self::Pool(anyhow::anyhow!("{err}")),
        }
    }
}
