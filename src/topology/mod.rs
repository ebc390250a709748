//! Where messages go: the broker objects a queue relies on, how a destination maps onto an
//! exchange and a routing key, and how events reach their subscribers.
//!
//! ```
//! use warren::topology::{DirectRoutingTopology, ExchangeRoutingTopology, RoutingTopology};
//! use lapin::ExchangeKind;
//!
//! // Publish straight to queues through the default exchange.
//! let direct = DirectRoutingTopology::durable();
//! assert_eq!(direct.resolve("orders").routing_key, "orders");
//!
//! // Publish to a shared exchange, each queue bound with its own name as routing key.
//! let exchange = ExchangeRoutingTopology::durable("billing", ExchangeKind::Direct)
//!     .with_dead_letter_queues();
//! assert_eq!(exchange.resolve("invoices").exchange, "billing");
//! ```
mod administration;
mod queue_creator;
mod routing;
mod subscription_manager;

pub use queue_creator::QueueCreator;
pub use routing::{DirectRoutingTopology, ExchangeRoutingTopology, PublishTarget, RoutingTopology};
pub use subscription_manager::SubscriptionManager;
