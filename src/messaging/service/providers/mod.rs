//! Broker provider implementations

mod in_memory;
mod rabbitmq;

pub use in_memory::{InMemoryBroker, InMemoryChannel, InMemoryConnection, PublishedMessage};
pub use rabbitmq::{RabbitMqChannel, RabbitMqConnection, RabbitMqConnector};
