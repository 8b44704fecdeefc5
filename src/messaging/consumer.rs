//! # Event Consumer
//!
//! Runs one queue consumer: declares the queue and its bindings on the
//! events exchange, sets prefetch, and feeds every delivery through an
//! [`EventHandler`].
//!
//! ## Delivery outcomes
//!
//! - Handler applied or skipped the event: ack
//! - Body is not a valid envelope: ack and drop
//! - Handler failed or panicked: decided by [`FailurePolicy`]
//!
//! With `RetryThenDeadLetter` a failed message is republished to its own
//! queue (default exchange) with `x-retry-count` incremented, then the
//! original is acked. Once the count reaches `max_retries` the message is
//! nacked without requeue and lands in `<queue>_dlq`.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::{FutureExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

use super::connection::ConnectionManager;
use super::envelope::EventEnvelope;
use super::service::{BrokerChannel, BrokerConnection, Delivery, DeliveryStream, OutboundMessage};
use super::MessagingError;
use crate::config::ConsumerSettings;
use crate::constants::EVENTS_EXCHANGE;
use crate::error::{PipelineError, PipelineResult};
use crate::logging::{log_event_failed, log_event_processed, log_event_received};

/// What to do with a message whose handler failed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Acknowledge anyway; the message is gone
    AckAlways,
    /// Republish up to `max_retries` times, then dead-letter
    #[default]
    RetryThenDeadLetter,
}

/// Why a handler chose not to act on an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Event type is not part of the tracked workflow
    UntrackedEventType,
    /// Required payload field absent or not a non-empty string
    MissingField(&'static str),
    /// Event type this handler was not bound for
    NotSubscribed,
}

/// Successful handler result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventDisposition {
    Processed,
    Skipped(SkipReason),
}

/// Processing logic behind a queue consumer
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, envelope: &EventEnvelope) -> PipelineResult<EventDisposition>;
}

/// What happened to one delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Acked,
    Retried { attempt: u32 },
    DeadLettered,
}

/// Queue consumer configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerConfig {
    pub queue_name: String,
    pub exchange: String,
    /// Routing keys bound from the exchange to the queue
    pub bindings: Vec<String>,
    pub prefetch_count: u16,
    pub failure_policy: FailurePolicy,
    pub max_retries: u32,
}

impl ConsumerConfig {
    pub fn new(queue_name: impl Into<String>, bindings: Vec<String>) -> Self {
        let settings = ConsumerSettings::default();
        Self {
            queue_name: queue_name.into(),
            exchange: EVENTS_EXCHANGE.to_string(),
            bindings,
            prefetch_count: settings.prefetch_count,
            failure_policy: settings.failure_policy,
            max_retries: settings.max_retries,
        }
    }

    /// Apply the shared consumer settings
    pub fn with_settings(mut self, settings: &ConsumerSettings) -> Self {
        self.prefetch_count = settings.prefetch_count;
        self.failure_policy = settings.failure_policy;
        self.max_retries = settings.max_retries;
        self
    }

    pub fn with_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = exchange.into();
        self
    }

    pub fn with_failure_policy(mut self, failure_policy: FailurePolicy, max_retries: u32) -> Self {
        self.failure_policy = failure_policy;
        self.max_retries = max_retries;
        self
    }

    pub fn validate(&self) -> PipelineResult<()> {
        if self.queue_name.trim().is_empty() {
            return Err(PipelineError::ConfigurationError(
                "queue_name cannot be empty".to_string(),
            ));
        }
        if self.exchange.trim().is_empty() {
            return Err(PipelineError::ConfigurationError(
                "exchange cannot be empty".to_string(),
            ));
        }
        if self.bindings.is_empty() {
            return Err(PipelineError::ConfigurationError(format!(
                "queue {} needs at least one binding",
                self.queue_name
            )));
        }
        if self.prefetch_count == 0 {
            return Err(PipelineError::ConfigurationError(
                "prefetch_count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Counters for consumer observability
#[derive(Debug, Default)]
pub struct ConsumerStats {
    pub received: AtomicU64,
    pub processed: AtomicU64,
    pub skipped: AtomicU64,
    pub failed: AtomicU64,
    pub malformed: AtomicU64,
    pub retried: AtomicU64,
    pub dead_lettered: AtomicU64,
}

impl ConsumerStats {
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn malformed(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }

    pub fn retried(&self) -> u64 {
        self.retried.load(Ordering::Relaxed)
    }

    pub fn dead_lettered(&self) -> u64 {
        self.dead_lettered.load(Ordering::Relaxed)
    }
}

/// Consumes one durable queue until shutdown or connection loss
#[derive(Debug)]
pub struct EventConsumer {
    connections: Arc<ConnectionManager>,
    config: ConsumerConfig,
    stats: Arc<ConsumerStats>,
}

impl EventConsumer {
    pub fn new(connections: Arc<ConnectionManager>, config: ConsumerConfig) -> PipelineResult<Self> {
        config.validate()?;
        Ok(Self {
            connections,
            config,
            stats: Arc::new(ConsumerStats::default()),
        })
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    pub fn stats(&self) -> Arc<ConsumerStats> {
        Arc::clone(&self.stats)
    }

    /// Consume until `shutdown` fires.
    ///
    /// Returns `Ok(())` after a requested shutdown and `Err` when the
    /// connection could not be opened or was lost; the caller decides
    /// whether to run again.
    #[instrument(skip_all, fields(queue = %self.config.queue_name))]
    pub async fn run<H>(
        &self,
        handler: &H,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), MessagingError>
    where
        H: EventHandler + ?Sized,
    {
        // Shutdown also interrupts connect retries and topology setup
        let (connection, channel, mut deliveries) = tokio::select! {
            _ = shutdown.recv() => {
                info!(queue = %self.config.queue_name, "Shutdown requested before consumer was ready");
                return Ok(());
            }
            opened = self.open() => opened?,
        };

        info!(
            queue = %self.config.queue_name,
            exchange = %self.config.exchange,
            bindings = ?self.config.bindings,
            prefetch = self.config.prefetch_count,
            failure_policy = ?self.config.failure_policy,
            "Consumer listening"
        );

        let result = loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!(queue = %self.config.queue_name, "Shutdown requested, stopping consumer");
                    break Ok(());
                }
                next = deliveries.next() => match next {
                    Some(Ok(delivery)) => {
                        if let Err(e) = self.process_delivery(&channel, handler, delivery).await {
                            break Err(e);
                        }
                    }
                    Some(Err(e)) => break Err(e),
                    None => break Err(MessagingError::closed("delivery stream ended")),
                },
            }
        };

        drop(deliveries);
        if let Err(e) = channel.close().await {
            debug!(error = %e, "Channel close after consumer loop failed");
        }
        if let Err(e) = connection.close().await {
            debug!(error = %e, "Connection close after consumer loop failed");
        }

        if let Err(e) = &result {
            error!(queue = %self.config.queue_name, error = %e, "Consumer loop ended with error");
        }
        result
    }

    /// Connect, declare topology, set prefetch and start consuming
    async fn open(
        &self,
    ) -> Result<(BrokerConnection, BrokerChannel, DeliveryStream), MessagingError> {
        let connection = self.connections.connect().await?;
        let channel = connection.create_channel().await?;
        self.declare_topology(&channel).await?;
        channel.set_prefetch(self.config.prefetch_count).await?;

        let consumer_tag = format!("{}-{}", self.config.queue_name, uuid::Uuid::new_v4());
        let deliveries = channel.consume(&self.config.queue_name, &consumer_tag).await?;
        Ok((connection, channel, deliveries))
    }

    /// Durable exchange, durable queue with dead-lettering, one binding per key
    async fn declare_topology(&self, channel: &BrokerChannel) -> Result<(), MessagingError> {
        channel.declare_topic_exchange(&self.config.exchange).await?;
        channel.declare_queue(&self.config.queue_name, true).await?;
        for routing_key in &self.config.bindings {
            channel
                .bind_queue(&self.config.queue_name, &self.config.exchange, routing_key)
                .await?;
        }
        Ok(())
    }

    /// Run one delivery through the handler and settle it.
    ///
    /// Only broker errors are returned; handler failures are settled here.
    pub async fn process_delivery<H>(
        &self,
        channel: &BrokerChannel,
        handler: &H,
        delivery: Delivery,
    ) -> Result<DeliveryOutcome, MessagingError>
    where
        H: EventHandler + ?Sized,
    {
        self.stats.received.fetch_add(1, Ordering::Relaxed);
        let queue = self.config.queue_name.as_str();

        let envelope = match EventEnvelope::decode(&delivery.body) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    queue = %queue,
                    delivery_tag = delivery.delivery_tag,
                    error = %e,
                    "Dropping malformed message"
                );
                channel.ack(delivery.delivery_tag).await?;
                return Ok(DeliveryOutcome::Acked);
            }
        };

        let task_id = envelope.task_id_or_unknown().to_string();
        log_event_received(queue, &envelope.event_type, &task_id, &envelope.message_id);

        let started = Instant::now();
        let outcome = AssertUnwindSafe(handler.handle(&envelope))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(PipelineError::Internal("event handler panicked".to_string())));

        match outcome {
            Ok(EventDisposition::Processed) => {
                self.stats.processed.fetch_add(1, Ordering::Relaxed);
                log_event_processed(
                    queue,
                    &envelope.event_type,
                    &task_id,
                    started.elapsed().as_millis() as u64,
                );
                channel.ack(delivery.delivery_tag).await?;
                Ok(DeliveryOutcome::Acked)
            }
            Ok(EventDisposition::Skipped(reason)) => {
                self.stats.skipped.fetch_add(1, Ordering::Relaxed);
                debug!(
                    queue = %queue,
                    event_type = %envelope.event_type,
                    task_id = %task_id,
                    reason = ?reason,
                    "Event skipped"
                );
                channel.ack(delivery.delivery_tag).await?;
                Ok(DeliveryOutcome::Acked)
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                log_event_failed(queue, &envelope.event_type, &task_id, &e.to_string());
                self.settle_failure(channel, &delivery, &envelope).await
            }
        }
    }

    async fn settle_failure(
        &self,
        channel: &BrokerChannel,
        delivery: &Delivery,
        envelope: &EventEnvelope,
    ) -> Result<DeliveryOutcome, MessagingError> {
        let queue = self.config.queue_name.as_str();
        match self.config.failure_policy {
            FailurePolicy::AckAlways => {
                warn!(
                    queue = %queue,
                    event_type = %envelope.event_type,
                    message_id = %envelope.message_id,
                    "Acknowledging failed message, its effect is lost"
                );
                channel.ack(delivery.delivery_tag).await?;
                Ok(DeliveryOutcome::Acked)
            }
            FailurePolicy::RetryThenDeadLetter if delivery.retry_count < self.config.max_retries => {
                let attempt = delivery.retry_count + 1;
                channel
                    .publish(
                        OutboundMessage::new("", queue, delivery.body.clone())
                            .with_message_id(&envelope.message_id)
                            .with_retry_count(attempt),
                    )
                    .await?;
                channel.ack(delivery.delivery_tag).await?;
                self.stats.retried.fetch_add(1, Ordering::Relaxed);
                warn!(
                    queue = %queue,
                    event_type = %envelope.event_type,
                    attempt,
                    max_retries = self.config.max_retries,
                    "Failed message requeued for retry"
                );
                Ok(DeliveryOutcome::Retried { attempt })
            }
            FailurePolicy::RetryThenDeadLetter => {
                channel.nack(delivery.delivery_tag, false).await?;
                self.stats.dead_lettered.fetch_add(1, Ordering::Relaxed);
                error!(
                    queue = %queue,
                    event_type = %envelope.event_type,
                    message_id = %envelope.message_id,
                    retries = delivery.retry_count,
                    "Retries exhausted, message dead-lettered"
                );
                Ok(DeliveryOutcome::DeadLettered)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::connection::RetryPolicy;
    use crate::messaging::envelope::task_data;
    use crate::messaging::service::{BrokerProvider, InMemoryBroker};
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    struct CountingHandler {
        calls: AtomicU32,
        fail: bool,
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        async fn handle(&self, _envelope: &EventEnvelope) -> PipelineResult<EventDisposition> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(PipelineError::DatabaseError("database unavailable".to_string()))
            } else {
                Ok(EventDisposition::Processed)
            }
        }
    }

    struct PanickingHandler;

    #[async_trait]
    impl EventHandler for PanickingHandler {
        async fn handle(&self, _envelope: &EventEnvelope) -> PipelineResult<EventDisposition> {
            panic!("handler bug");
        }
    }

    async fn setup(
        policy: FailurePolicy,
        max_retries: u32,
    ) -> (InMemoryBroker, EventConsumer, BrokerChannel) {
        let broker = InMemoryBroker::new();
        let connections = Arc::new(ConnectionManager::new(
            BrokerProvider::InMemory(broker.clone()),
            RetryPolicy::new(1, Duration::from_millis(1)),
        ));
        let config = ConsumerConfig::new("q", vec!["#".to_string()])
            .with_failure_policy(policy, max_retries);
        let consumer = EventConsumer::new(Arc::clone(&connections), config).unwrap();

        let connection = connections.connect().await.unwrap();
        let channel = connection.create_channel().await.unwrap();
        consumer.declare_topology(&channel).await.unwrap();
        (broker, consumer, channel)
    }

    async fn deliver(channel: &BrokerChannel, body: Vec<u8>) -> Delivery {
        channel
            .publish(OutboundMessage::new("events", "video.downloaded", body))
            .await
            .unwrap();
        let mut deliveries = channel.consume("q", "test").await.unwrap();
        deliveries.next().await.unwrap().unwrap()
    }

    fn event_body() -> Vec<u8> {
        EventEnvelope::new("video.downloaded", task_data("t1", "u1"))
            .encode()
            .unwrap()
    }

    #[test]
    fn test_config_validation() {
        assert!(ConsumerConfig::new("q", vec!["a.b".into()]).validate().is_ok());
        assert!(ConsumerConfig::new("", vec!["a.b".into()]).validate().is_err());
        assert!(ConsumerConfig::new("q", vec![]).validate().is_err());
    }

    #[test]
    fn test_failure_policy_serde_names() {
        let policy: FailurePolicy = serde_json::from_str("\"ack_always\"").unwrap();
        assert_eq!(policy, FailurePolicy::AckAlways);
        assert_eq!(FailurePolicy::default(), FailurePolicy::RetryThenDeadLetter);
    }

    #[tokio::test]
    async fn test_malformed_message_is_acked_without_handler() {
        let (broker, consumer, channel) = setup(FailurePolicy::RetryThenDeadLetter, 3).await;
        let handler = CountingHandler {
            calls: AtomicU32::new(0),
            fail: false,
        };
        let delivery = deliver(&channel, b"{not json".to_vec()).await;

        let outcome = consumer.process_delivery(&channel, &handler, delivery).await.unwrap();
        assert_eq!(outcome, DeliveryOutcome::Acked);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
        assert_eq!(consumer.stats().malformed(), 1);
        assert_eq!(broker.acked_count("q"), 1);
    }

    #[tokio::test]
    async fn test_failed_message_is_republished_with_retry_count() {
        let (broker, consumer, channel) = setup(FailurePolicy::RetryThenDeadLetter, 3).await;
        let handler = CountingHandler {
            calls: AtomicU32::new(0),
            fail: true,
        };
        let delivery = deliver(&channel, event_body()).await;

        let outcome = consumer.process_delivery(&channel, &handler, delivery).await.unwrap();
        assert_eq!(outcome, DeliveryOutcome::Retried { attempt: 1 });
        assert_eq!(broker.queue_depth("q"), 1);
        let retried = broker.published().pop().unwrap();
        assert_eq!(retried.exchange, "");
        assert_eq!(retried.routing_key, "q");
        assert_eq!(retried.retry_count, 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_dead_letter() {
        let (broker, consumer, channel) = setup(FailurePolicy::RetryThenDeadLetter, 0).await;
        let handler = CountingHandler {
            calls: AtomicU32::new(0),
            fail: true,
        };
        let delivery = deliver(&channel, event_body()).await;

        let outcome = consumer.process_delivery(&channel, &handler, delivery).await.unwrap();
        assert_eq!(outcome, DeliveryOutcome::DeadLettered);
        assert_eq!(broker.queue_depth("q"), 0);
        assert_eq!(broker.queue_depth("q_dlq"), 1);
        assert_eq!(consumer.stats().dead_lettered(), 1);
    }

    #[tokio::test]
    async fn test_ack_always_drops_failed_message() {
        let (broker, consumer, channel) = setup(FailurePolicy::AckAlways, 3).await;
        let handler = CountingHandler {
            calls: AtomicU32::new(0),
            fail: true,
        };
        let delivery = deliver(&channel, event_body()).await;

        let outcome = consumer.process_delivery(&channel, &handler, delivery).await.unwrap();
        assert_eq!(outcome, DeliveryOutcome::Acked);
        assert_eq!(broker.queue_depth("q"), 0);
        assert_eq!(broker.queue_depth("q_dlq"), 0);
        assert_eq!(consumer.stats().failed(), 1);
    }

    #[tokio::test]
    async fn test_handler_panic_counts_as_failure() {
        let (broker, consumer, channel) = setup(FailurePolicy::RetryThenDeadLetter, 0).await;
        let delivery = deliver(&channel, event_body()).await;

        let outcome = consumer
            .process_delivery(&channel, &PanickingHandler, delivery)
            .await
            .unwrap();
        assert_eq!(outcome, DeliveryOutcome::DeadLettered);
        assert_eq!(broker.queue_depth("q_dlq"), 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (broker, consumer, channel) = setup(FailurePolicy::RetryThenDeadLetter, 3).await;
        let handler = Arc::new(CountingHandler {
            calls: AtomicU32::new(0),
            fail: false,
        });
        let consumer = Arc::new(consumer);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let task = {
            let consumer = Arc::clone(&consumer);
            let handler = Arc::clone(&handler);
            tokio::spawn(async move { consumer.run(handler.as_ref(), shutdown_rx).await })
        };

        channel
            .publish(OutboundMessage::new("events", "video.downloaded", event_body()))
            .await
            .unwrap();
        for _ in 0..100 {
            if handler.calls.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);

        shutdown_tx.send(()).unwrap();
        assert!(task.await.unwrap().is_ok());
        assert_eq!(broker.acked_count("q"), 1);
    }
}
