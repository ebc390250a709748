//! Helpers for connecting to a cluster of RabbitMq brokers.

pub mod configuration;
pub mod convenience;
mod error;
mod factory;
mod host_selection;
mod manager;

pub use error::{ChannelError, ConnectionFailure, FailedAttempt};
pub use factory::{ConnectionFactory, ConnectionRole};
pub use host_selection::{FixedPriority, HostSelectionStrategy, RoundRobin};
pub use manager::{ConnectionManager, ManageConnections};

pub use lapin::{Channel, Connection};

pub use lapin::{options, types, BasicProperties};
