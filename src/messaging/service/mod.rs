//! # Broker Service Abstraction
//!
//! Provider-agnostic broker layer with enum dispatch.
//!
//! ```text
//! BrokerProvider (enum)
//!   ├── RabbitMq(RabbitMqConnector)   <- lapin, AMQP 0.9.1
//!   └── InMemory(InMemoryBroker)      <- tests and development
//! ```
//!
//! Each provider implements [`BrokerConnectionOps`] and [`BrokerChannelOps`];
//! the enums in `provider` forward to them without vtables.

mod provider;
pub mod providers;
mod traits;
mod types;

pub use provider::{BrokerChannel, BrokerConnection, BrokerProvider};
pub use providers::{InMemoryBroker, PublishedMessage, RabbitMqConnector};
pub use traits::{BrokerChannelOps, BrokerConnectionOps};
pub use types::{
    dead_letter_exchange, dead_letter_queue, topic_matches, Delivery, DeliveryStream,
    OutboundMessage,
};

pub use super::errors::MessagingError;
