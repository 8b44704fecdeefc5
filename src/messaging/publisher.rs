//! # Event Publisher
//!
//! Publishes envelopes to the events exchange. Each call opens its own
//! connection through the [`ConnectionManager`], declares the exchange,
//! publishes one persistent message and closes everything again.

use std::sync::Arc;

use tracing::{error, warn};

use super::connection::ConnectionManager;
use super::envelope::{EventData, EventEnvelope};
use super::service::{BrokerConnection, OutboundMessage};
use super::MessagingError;
use crate::logging::log_event_published;

#[derive(Debug, Clone)]
pub struct EventPublisher {
    connections: Arc<ConnectionManager>,
    exchange: String,
}

impl EventPublisher {
    pub fn new(connections: Arc<ConnectionManager>, exchange: impl Into<String>) -> Self {
        Self {
            connections,
            exchange: exchange.into(),
        }
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Wrap `data` in a fresh envelope and publish it with `event_type` as routing key
    pub async fn publish(
        &self,
        event_type: &str,
        data: EventData,
    ) -> Result<EventEnvelope, MessagingError> {
        let envelope = EventEnvelope::new(event_type, data);
        self.publish_envelope(&envelope).await?;
        Ok(envelope)
    }

    /// Publish an existing envelope unchanged
    pub async fn publish_envelope(&self, envelope: &EventEnvelope) -> Result<(), MessagingError> {
        let body = envelope.encode()?;
        let connection = self.connections.connect().await?;

        let result = self.publish_on(&connection, envelope, body).await;
        if let Err(e) = connection.close().await {
            warn!(error = %e, "Failed to close publisher connection");
        }

        match &result {
            Ok(()) => log_event_published(
                &self.exchange,
                &envelope.event_type,
                envelope.task_id_or_unknown(),
                &envelope.message_id,
            ),
            Err(e) => error!(
                exchange = %self.exchange,
                event_type = %envelope.event_type,
                task_id = %envelope.task_id_or_unknown(),
                error = %e,
                "Failed to publish event"
            ),
        }
        result
    }

    async fn publish_on(
        &self,
        connection: &BrokerConnection,
        envelope: &EventEnvelope,
        body: Vec<u8>,
    ) -> Result<(), MessagingError> {
        let channel = connection.create_channel().await?;
        channel.declare_topic_exchange(&self.exchange).await?;
        channel
            .publish(
                OutboundMessage::new(&self.exchange, &envelope.event_type, body)
                    .with_message_id(&envelope.message_id),
            )
            .await?;
        if let Err(e) = channel.close().await {
            warn!(error = %e, "Failed to close publisher channel");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::connection::RetryPolicy;
    use crate::messaging::envelope::task_data;
    use crate::messaging::service::{BrokerProvider, InMemoryBroker};
    use std::time::Duration;

    fn publisher(broker: &InMemoryBroker) -> EventPublisher {
        let manager = ConnectionManager::new(
            BrokerProvider::InMemory(broker.clone()),
            RetryPolicy::new(3, Duration::from_millis(5)),
        );
        EventPublisher::new(Arc::new(manager), "events")
    }

    #[tokio::test]
    async fn test_publish_uses_event_type_as_routing_key() {
        let broker = InMemoryBroker::new();
        let envelope = publisher(&broker)
            .publish("video.downloaded", task_data("t1", "u1"))
            .await
            .unwrap();

        let published = broker.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].exchange, "events");
        assert_eq!(published[0].routing_key, "video.downloaded");
        assert_eq!(EventEnvelope::decode(&published[0].body).unwrap(), envelope);
    }

    #[tokio::test]
    async fn test_each_publish_opens_its_own_connection() {
        let broker = InMemoryBroker::new();
        let publisher = publisher(&broker);
        publisher.publish("task.created", task_data("t1", "u1")).await.unwrap();
        publisher.publish("task.created", task_data("t2", "u1")).await.unwrap();
        assert_eq!(broker.connect_attempts(), 2);
    }

    #[tokio::test]
    async fn test_publish_fails_when_broker_unreachable() {
        let broker = InMemoryBroker::new();
        broker.refuse_next_connects(3);
        let err = publisher(&broker)
            .publish("task.created", task_data("t1", "u1"))
            .await
            .unwrap_err();
        assert!(matches!(err, MessagingError::ConnectionExhausted { attempts: 3, .. }));
        assert!(broker.published().is_empty());
    }
}
