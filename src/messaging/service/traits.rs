//! Broker operations every provider implements.
//!
//! The split mirrors AMQP: a connection hands out channels, and all topology,
//! publish and consume work happens on a channel.

use async_trait::async_trait;

use super::types::{DeliveryStream, OutboundMessage};
use super::MessagingError;

/// Operations on an open broker connection
#[async_trait]
pub trait BrokerConnectionOps: Send + Sync {
    type Channel: BrokerChannelOps;

    async fn create_channel(&self) -> Result<Self::Channel, MessagingError>;

    /// False once the broker dropped the connection or it was closed locally
    fn is_connected(&self) -> bool;

    async fn close(&self) -> Result<(), MessagingError>;
}

/// Operations on a broker channel
#[async_trait]
pub trait BrokerChannelOps: Send + Sync {
    /// Declare a durable topic exchange; idempotent
    async fn declare_topic_exchange(&self, exchange: &str) -> Result<(), MessagingError>;

    /// Declare a durable queue; idempotent.
    ///
    /// With `dead_letter` set, the queue gets a `<queue>_dlx` direct exchange
    /// and a bound `<queue>_dlq` queue, and rejected messages route there.
    async fn declare_queue(&self, queue_name: &str, dead_letter: bool)
        -> Result<(), MessagingError>;

    async fn bind_queue(
        &self,
        queue_name: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), MessagingError>;

    /// Limit unacknowledged deliveries in flight on this channel
    async fn set_prefetch(&self, prefetch_count: u16) -> Result<(), MessagingError>;

    async fn publish(&self, message: OutboundMessage) -> Result<(), MessagingError>;

    async fn consume(
        &self,
        queue_name: &str,
        consumer_tag: &str,
    ) -> Result<DeliveryStream, MessagingError>;

    async fn ack(&self, delivery_tag: u64) -> Result<(), MessagingError>;

    /// Reject a delivery; without `requeue` it goes to the dead-letter exchange
    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), MessagingError>;

    async fn close(&self) -> Result<(), MessagingError>;
}
