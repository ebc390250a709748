use crate::amqp::configuration::BrokerEndpoint;
use std::fmt;

/// No connection could be established.
///
/// Fatal to the operation in progress but not to the process: the next connection request
/// starts again from the first candidate.
#[derive(thiserror::Error, Debug)]
pub enum ConnectionFailure {
    #[error("The host selection strategy returned no candidate endpoints")]
    NoCandidates,
    #[error("None of the candidate RabbitMq endpoints accepted a connection: {}", FailedAttempts(.attempts))]
    NoReachableEndpoint { attempts: Vec<FailedAttempt> },
    #[error("The connection manager has been disposed")]
    Disposed,
}

/// A single rejected connection attempt.
#[derive(Debug)]
pub struct FailedAttempt {
    pub endpoint: BrokerEndpoint,
    pub error: anyhow::Error,
}

struct FailedAttempts<'a>(&'a [FailedAttempt]);

impl fmt::Display for FailedAttempts<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, attempt) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{} ({:#})", attempt.endpoint, attempt.error)?;
        }
        Ok(())
    }
}

/// A channel could not be opened or broke while in use.
#[derive(thiserror::Error, Debug)]
pub enum ChannelError {
    #[error(transparent)]
    Connection(#[from] ConnectionFailure),
    #[error("The RabbitMq channel failed")]
    Broken(#[from] lapin::Error),
    #[error("Failed to check out a publish channel from the pool")]
    Pool(#[source] anyhow::Error),
}
