//! # RabbitMQ Provider
//!
//! AMQP 0.9.1 implementation of the broker traits using the `lapin` crate.
//!
//! - **Durable topology**: exchanges and queues survive broker restarts
//! - **Persistent messages**: published with delivery mode 2
//! - **Dead letter exchanges**: `nack(requeue = false)` routes to `<queue>_dlq`
//! - **Prefetch control**: `basic_qos` bounds unacked deliveries per consumer

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
    BasicQosOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable, LongString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use tracing::debug;

use crate::config::BrokerConfig;
use crate::constants::RETRY_COUNT_HEADER;
use crate::messaging::service::traits::{BrokerChannelOps, BrokerConnectionOps};
use crate::messaging::service::types::{
    dead_letter_exchange, dead_letter_queue, Delivery, DeliveryStream, OutboundMessage,
};
use crate::messaging::MessagingError;

/// Connection parameters for a RabbitMQ broker
#[derive(Clone)]
pub struct RabbitMqConnector {
    config: BrokerConfig,
    redacted_uri: String,
}

impl std::fmt::Debug for RabbitMqConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RabbitMqConnector")
            .field("endpoint", &self.redacted_uri)
            .field("connection_name", &self.config.connection_name)
            .finish()
    }
}

impl RabbitMqConnector {
    pub fn new(config: &BrokerConfig) -> Self {
        Self {
            config: config.clone(),
            redacted_uri: config.redacted_uri(),
        }
    }

    /// Connection URI with credentials stripped, for log lines
    pub fn endpoint(&self) -> &str {
        &self.redacted_uri
    }

    /// Single connection attempt
    pub async fn connect(&self) -> Result<RabbitMqConnection, MessagingError> {
        let uri = self
            .config
            .amqp_uri()
            .map_err(|e| MessagingError::connection(e.to_string()))?;
        let properties = ConnectionProperties::default()
            .with_connection_name(self.config.connection_name.clone().into());

        let connection = Connection::connect_uri(uri, properties)
            .await
            .map_err(|e| MessagingError::connection(format!("RabbitMQ connection failed: {e}")))?;

        Ok(RabbitMqConnection { connection })
    }
}

#[derive(Debug)]
pub struct RabbitMqConnection {
    connection: Connection,
}

#[async_trait]
impl BrokerConnectionOps for RabbitMqConnection {
    type Channel = RabbitMqChannel;

    async fn create_channel(&self) -> Result<RabbitMqChannel, MessagingError> {
        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(|e| MessagingError::channel(format!("RabbitMQ channel creation failed: {e}")))?;
        Ok(RabbitMqChannel { channel })
    }

    fn is_connected(&self) -> bool {
        self.connection.status().connected()
    }

    async fn close(&self) -> Result<(), MessagingError> {
        if !self.is_connected() {
            return Ok(());
        }
        self.connection.close(200, "OK").await.map_err(MessagingError::from)
    }
}

#[derive(Debug)]
pub struct RabbitMqChannel {
    channel: Channel,
}

impl RabbitMqChannel {
    /// DLX (direct) + DLQ bound with the original queue name as routing key
    async fn setup_dead_letter(&self, queue_name: &str) -> Result<(), MessagingError> {
        let dlx_name = dead_letter_exchange(queue_name);
        let dlq_name = dead_letter_queue(queue_name);

        self.channel
            .exchange_declare(
                &dlx_name,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| MessagingError::topology(&dlx_name, e.to_string()))?;

        self.channel
            .queue_declare(
                &dlq_name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| MessagingError::topology(&dlq_name, e.to_string()))?;

        self.channel
            .queue_bind(
                &dlq_name,
                &dlx_name,
                queue_name,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| MessagingError::topology(&dlq_name, e.to_string()))?;

        debug!(queue = %queue_name, dlx = %dlx_name, dlq = %dlq_name, "Dead letter topology declared");
        Ok(())
    }
}

fn retry_count_of(properties: &BasicProperties) -> u32 {
    let Some(headers) = properties.headers() else {
        return 0;
    };
    headers
        .inner()
        .iter()
        .find(|(key, _)| key.as_str() == RETRY_COUNT_HEADER)
        .and_then(|(_, value)| match value {
            AMQPValue::LongUInt(n) => Some(*n),
            AMQPValue::LongInt(n) => u32::try_from(*n).ok(),
            AMQPValue::LongLongInt(n) => u32::try_from(*n).ok(),
            AMQPValue::ShortUInt(n) => Some(u32::from(*n)),
            _ => None,
        })
        .unwrap_or(0)
}

#[async_trait]
impl BrokerChannelOps for RabbitMqChannel {
    async fn declare_topic_exchange(&self, exchange: &str) -> Result<(), MessagingError> {
        self.channel
            .exchange_declare(
                exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| MessagingError::topology(exchange, e.to_string()))
    }

    async fn declare_queue(
        &self,
        queue_name: &str,
        dead_letter: bool,
    ) -> Result<(), MessagingError> {
        let mut args = FieldTable::default();
        if dead_letter {
            self.setup_dead_letter(queue_name).await?;
            args.insert(
                "x-dead-letter-exchange".into(),
                AMQPValue::LongString(LongString::from(dead_letter_exchange(queue_name))),
            );
            args.insert(
                "x-dead-letter-routing-key".into(),
                AMQPValue::LongString(LongString::from(queue_name.to_string())),
            );
        }

        self.channel
            .queue_declare(
                queue_name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                args,
            )
            .await
            .map(|_| ())
            .map_err(|e| MessagingError::topology(queue_name, e.to_string()))
    }

    async fn bind_queue(
        &self,
        queue_name: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), MessagingError> {
        self.channel
            .queue_bind(
                queue_name,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                MessagingError::topology(queue_name, format!("bind to {exchange}/{routing_key}: {e}"))
            })
    }

    async fn set_prefetch(&self, prefetch_count: u16) -> Result<(), MessagingError> {
        self.channel
            .basic_qos(prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|e| MessagingError::channel(format!("Failed to set QoS: {e}")))
    }

    async fn publish(&self, message: OutboundMessage) -> Result<(), MessagingError> {
        let mut properties = BasicProperties::default()
            .with_delivery_mode(2)
            .with_content_type("application/json".into());
        if let Some(message_id) = &message.message_id {
            properties = properties.with_message_id(message_id.as_str().into());
        }
        if message.retry_count > 0 {
            let mut headers = FieldTable::default();
            headers.insert(
                RETRY_COUNT_HEADER.into(),
                AMQPValue::LongUInt(message.retry_count),
            );
            properties = properties.with_headers(headers);
        }

        self.channel
            .basic_publish(
                &message.exchange,
                &message.routing_key,
                BasicPublishOptions::default(),
                &message.body,
                properties,
            )
            .await
            .map_err(|e| MessagingError::publish(&message.exchange, e.to_string()))?
            .await
            .map_err(|e| MessagingError::publish(&message.exchange, e.to_string()))?;
        Ok(())
    }

    async fn consume(
        &self,
        queue_name: &str,
        consumer_tag: &str,
    ) -> Result<DeliveryStream, MessagingError> {
        let consumer = self
            .channel
            .basic_consume(
                queue_name,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| MessagingError::consume(queue_name, e.to_string()))?;

        let queue_name = queue_name.to_string();
        let deliveries = consumer.map(move |item| {
            item.map(|delivery| Delivery {
                delivery_tag: delivery.delivery_tag,
                routing_key: delivery.routing_key.as_str().to_string(),
                redelivered: delivery.redelivered,
                retry_count: retry_count_of(&delivery.properties),
                body: delivery.data,
            })
            .map_err(|e| MessagingError::consume(&queue_name, e.to_string()))
        });
        Ok(deliveries.boxed())
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), MessagingError> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| MessagingError::ack(delivery_tag, e.to_string()))
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), MessagingError> {
        self.channel
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    requeue,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| MessagingError::nack(delivery_tag, e.to_string()))
    }

    async fn close(&self) -> Result<(), MessagingError> {
        if !self.channel.status().connected() {
            return Ok(());
        }
        self.channel.close(200, "OK").await.map_err(MessagingError::from)
    }
}
