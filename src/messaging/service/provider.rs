//! # Broker Provider Enums
//!
//! Enum dispatch over the broker providers, avoiding trait objects.
//!
//! ```text
//! BrokerProvider      -> connect()        -> BrokerConnection
//! BrokerConnection    -> create_channel() -> BrokerChannel
//! BrokerChannel       -> declare / publish / consume / ack / nack
//! ```

use super::providers::{
    InMemoryBroker, InMemoryChannel, InMemoryConnection, RabbitMqChannel, RabbitMqConnection,
    RabbitMqConnector,
};
use super::traits::{BrokerChannelOps, BrokerConnectionOps};
use super::types::{DeliveryStream, OutboundMessage};
use super::MessagingError;

/// Where broker connections come from
#[derive(Debug, Clone)]
pub enum BrokerProvider {
    /// RabbitMQ via lapin
    RabbitMq(RabbitMqConnector),
    /// Process-local broker for tests
    InMemory(InMemoryBroker),
}

impl BrokerProvider {
    /// Provider name for logging
    pub fn provider_name(&self) -> &'static str {
        match self {
            Self::RabbitMq(_) => "rabbitmq",
            Self::InMemory(_) => "in_memory",
        }
    }

    /// Endpoint description without credentials
    pub fn endpoint(&self) -> &str {
        match self {
            Self::RabbitMq(connector) => connector.endpoint(),
            Self::InMemory(_) => "memory://",
        }
    }

    /// A single connection attempt; retries belong to `ConnectionManager`
    pub async fn connect(&self) -> Result<BrokerConnection, MessagingError> {
        match self {
            Self::RabbitMq(connector) => connector.connect().await.map(BrokerConnection::RabbitMq),
            Self::InMemory(broker) => broker.connect().await.map(BrokerConnection::InMemory),
        }
    }
}

/// An open broker connection
#[derive(Debug)]
pub enum BrokerConnection {
    RabbitMq(RabbitMqConnection),
    InMemory(InMemoryConnection),
}

impl BrokerConnection {
    pub async fn create_channel(&self) -> Result<BrokerChannel, MessagingError> {
        match self {
            Self::RabbitMq(c) => c.create_channel().await.map(BrokerChannel::RabbitMq),
            Self::InMemory(c) => c.create_channel().await.map(BrokerChannel::InMemory),
        }
    }

    pub fn is_connected(&self) -> bool {
        match self {
            Self::RabbitMq(c) => c.is_connected(),
            Self::InMemory(c) => c.is_connected(),
        }
    }

    pub async fn close(&self) -> Result<(), MessagingError> {
        match self {
            Self::RabbitMq(c) => c.close().await,
            Self::InMemory(c) => c.close().await,
        }
    }
}

/// A channel on a broker connection
#[derive(Debug)]
pub enum BrokerChannel {
    RabbitMq(RabbitMqChannel),
    InMemory(InMemoryChannel),
}

impl BrokerChannel {
    pub async fn declare_topic_exchange(&self, exchange: &str) -> Result<(), MessagingError> {
        match self {
            Self::RabbitMq(c) => c.declare_topic_exchange(exchange).await,
            Self::InMemory(c) => c.declare_topic_exchange(exchange).await,
        }
    }

    pub async fn declare_queue(
        &self,
        queue_name: &str,
        dead_letter: bool,
    ) -> Result<(), MessagingError> {
        match self {
            Self::RabbitMq(c) => c.declare_queue(queue_name, dead_letter).await,
            Self::InMemory(c) => c.declare_queue(queue_name, dead_letter).await,
        }
    }

    pub async fn bind_queue(
        &self,
        queue_name: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), MessagingError> {
        match self {
            Self::RabbitMq(c) => c.bind_queue(queue_name, exchange, routing_key).await,
            Self::InMemory(c) => c.bind_queue(queue_name, exchange, routing_key).await,
        }
    }

    pub async fn set_prefetch(&self, prefetch_count: u16) -> Result<(), MessagingError> {
        match self {
            Self::RabbitMq(c) => c.set_prefetch(prefetch_count).await,
            Self::InMemory(c) => c.set_prefetch(prefetch_count).await,
        }
    }

    pub async fn publish(&self, message: OutboundMessage) -> Result<(), MessagingError> {
        match self {
            Self::RabbitMq(c) => c.publish(message).await,
            Self::InMemory(c) => c.publish(message).await,
        }
    }

    pub async fn consume(
        &self,
        queue_name: &str,
        consumer_tag: &str,
    ) -> Result<DeliveryStream, MessagingError> {
        match self {
            Self::RabbitMq(c) => c.consume(queue_name, consumer_tag).await,
            Self::InMemory(c) => c.consume(queue_name, consumer_tag).await,
        }
    }

    pub async fn ack(&self, delivery_tag: u64) -> Result<(), MessagingError> {
        match self {
            Self::RabbitMq(c) => c.ack(delivery_tag).await,
            Self::InMemory(c) => c.ack(delivery_tag).await,
        }
    }

    pub async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), MessagingError> {
        match self {
            Self::RabbitMq(c) => c.nack(delivery_tag, requeue).await,
            Self::InMemory(c) => c.nack(delivery_tag, requeue).await,
        }
    }

    pub async fn close(&self) -> Result<(), MessagingError> {
        match self {
            Self::RabbitMq(c) => c.close().await,
            Self::InMemory(c) => c.close().await,
        }
    }
}
