//! # In-Memory Broker
//!
//! Process-local AMQP look-alike for tests and development.
//!
//! ## Features
//!
//! - **Topic routing**: exchanges, durable queues and `*`/`#` bindings
//! - **Acknowledgement**: deliveries stay unacked until `ack`/`nack`; unacked
//!   deliveries return to the head of the queue when their channel closes
//! - **Prefetch**: per-channel cap on unacked deliveries
//! - **Dead lettering**: `nack(requeue = false)` routes to `<queue>_dlq`
//! - **Fault injection**: refused connects and dropped connections
//!
//! Consumers are woken through a `tokio::sync::watch` version counter bumped
//! on every state change.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::messaging::service::traits::{BrokerChannelOps, BrokerConnectionOps};
use crate::messaging::service::types::{
    dead_letter_exchange, dead_letter_queue, topic_matches, Delivery, DeliveryStream,
    OutboundMessage,
};
use crate::messaging::MessagingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExchangeType {
    Topic,
    Direct,
}

#[derive(Debug, Clone)]
struct Binding {
    exchange: String,
    queue_name: String,
    routing_key: String,
}

#[derive(Debug, Clone)]
struct StoredMessage {
    routing_key: String,
    body: Vec<u8>,
    retry_count: u32,
    redelivered: bool,
}

#[derive(Debug)]
struct InFlight {
    channel_id: u64,
    message: StoredMessage,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<StoredMessage>,
    unacked: HashMap<u64, InFlight>,
    dead_letter_exchange: Option<String>,
    total_acked: u64,
    total_dropped: u64,
}

#[derive(Debug, Default)]
struct BrokerState {
    exchanges: HashMap<String, ExchangeType>,
    bindings: Vec<Binding>,
    queues: HashMap<String, QueueState>,
    published: Vec<PublishedMessage>,
}

/// Record of an accepted publish, for assertions
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
    pub retry_count: u32,
}

#[derive(Debug)]
struct BrokerInner {
    state: Mutex<BrokerState>,
    changes: watch::Sender<u64>,
    generation: AtomicU64,
    next_delivery_tag: AtomicU64,
    next_channel_id: AtomicU64,
    connect_attempts: AtomicU32,
    refused_connects: AtomicU32,
}

/// Shared in-memory broker; clones refer to the same broker
#[derive(Debug, Clone)]
pub struct InMemoryBroker {
    inner: Arc<BrokerInner>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            inner: Arc::new(BrokerInner {
                state: Mutex::new(BrokerState::default()),
                changes,
                generation: AtomicU64::new(0),
                next_delivery_tag: AtomicU64::new(1),
                next_channel_id: AtomicU64::new(1),
                connect_attempts: AtomicU32::new(0),
                refused_connects: AtomicU32::new(0),
            }),
        }
    }

    /// Single connection attempt
    pub async fn connect(&self) -> Result<InMemoryConnection, MessagingError> {
        self.inner.connect_attempts.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .inner
            .refused_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(MessagingError::connection("connection refused"));
        }

        Ok(InMemoryConnection {
            broker: self.clone(),
            generation: self.inner.generation.load(Ordering::SeqCst),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Refuse the next `count` connection attempts
    pub fn refuse_next_connects(&self, count: u32) {
        self.inner.refused_connects.store(count, Ordering::SeqCst);
    }

    /// Connection attempts seen so far, refused ones included
    pub fn connect_attempts(&self) -> u32 {
        self.inner.connect_attempts.load(Ordering::SeqCst)
    }

    /// Drop every open connection, as a broker restart would.
    ///
    /// Unacked deliveries return to their queues; consumer streams fail.
    pub fn disconnect_all(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        {
            let mut state = self.inner.state.lock();
            for queue in state.queues.values_mut() {
                requeue_in_flight(queue, |_| true);
            }
        }
        self.notify();
    }

    /// Messages ready for delivery on `queue_name`
    pub fn queue_depth(&self, queue_name: &str) -> usize {
        self.inner
            .state
            .lock()
            .queues
            .get(queue_name)
            .map(|queue| queue.ready.len())
            .unwrap_or(0)
    }

    /// Deliveries handed out on `queue_name` and not yet settled
    pub fn unacked_count(&self, queue_name: &str) -> usize {
        self.inner
            .state
            .lock()
            .queues
            .get(queue_name)
            .map(|queue| queue.unacked.len())
            .unwrap_or(0)
    }

    pub fn acked_count(&self, queue_name: &str) -> u64 {
        self.inner
            .state
            .lock()
            .queues
            .get(queue_name)
            .map(|queue| queue.total_acked)
            .unwrap_or(0)
    }

    pub fn queue_exists(&self, queue_name: &str) -> bool {
        self.inner.state.lock().queues.contains_key(queue_name)
    }

    /// Routing keys bound from `exchange` to `queue_name`
    pub fn bindings_for(&self, queue_name: &str, exchange: &str) -> Vec<String> {
        self.inner
            .state
            .lock()
            .bindings
            .iter()
            .filter(|binding| binding.queue_name == queue_name && binding.exchange == exchange)
            .map(|binding| binding.routing_key.clone())
            .collect()
    }

    /// Every message accepted by `publish`, in order
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.inner.state.lock().published.clone()
    }

    /// Remove and return the bodies of all ready messages on `queue_name`
    pub fn drain_queue(&self, queue_name: &str) -> Vec<Vec<u8>> {
        let mut state = self.inner.state.lock();
        state
            .queues
            .get_mut(queue_name)
            .map(|queue| queue.ready.drain(..).map(|message| message.body).collect())
            .unwrap_or_default()
    }

    fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    fn notify(&self) {
        self.inner.changes.send_modify(|version| *version = version.wrapping_add(1));
    }

    fn declare_exchange(&self, exchange: &str, kind: ExchangeType) -> Result<(), MessagingError> {
        let mut state = self.inner.state.lock();
        match state.exchanges.get(exchange) {
            Some(existing) if *existing != kind => Err(MessagingError::topology(
                exchange,
                format!("exchange already declared as {existing:?}"),
            )),
            Some(_) => Ok(()),
            None => {
                state.exchanges.insert(exchange.to_string(), kind);
                Ok(())
            }
        }
    }

    fn declare_queue(&self, queue_name: &str, dead_letter: bool) -> Result<(), MessagingError> {
        if dead_letter {
            let dlx = dead_letter_exchange(queue_name);
            let dlq = dead_letter_queue(queue_name);
            self.declare_exchange(&dlx, ExchangeType::Direct)?;
            self.declare_queue(&dlq, false)?;
            self.bind(&dlq, &dlx, queue_name)?;
        }

        let mut state = self.inner.state.lock();
        let queue = state.queues.entry(queue_name.to_string()).or_default();
        if dead_letter {
            queue.dead_letter_exchange = Some(dead_letter_exchange(queue_name));
        }
        Ok(())
    }

    fn bind(&self, queue_name: &str, exchange: &str, routing_key: &str) -> Result<(), MessagingError> {
        let mut state = self.inner.state.lock();
        if !state.exchanges.contains_key(exchange) {
            return Err(MessagingError::topology(exchange, "no such exchange"));
        }
        if !state.queues.contains_key(queue_name) {
            return Err(MessagingError::topology(queue_name, "no such queue"));
        }
        let exists = state.bindings.iter().any(|binding| {
            binding.queue_name == queue_name
                && binding.exchange == exchange
                && binding.routing_key == routing_key
        });
        if !exists {
            state.bindings.push(Binding {
                exchange: exchange.to_string(),
                queue_name: queue_name.to_string(),
                routing_key: routing_key.to_string(),
            });
        }
        Ok(())
    }

    fn publish(&self, message: OutboundMessage) -> Result<(), MessagingError> {
        {
            let mut state = self.inner.state.lock();
            let stored = StoredMessage {
                routing_key: message.routing_key.clone(),
                body: message.body.clone(),
                retry_count: message.retry_count,
                redelivered: false,
            };
            route(&mut state, &message.exchange, stored)?;
            state.published.push(PublishedMessage {
                exchange: message.exchange,
                routing_key: message.routing_key,
                body: message.body,
                retry_count: message.retry_count,
            });
        }
        self.notify();
        Ok(())
    }

    fn take_next(&self, queue_name: &str, channel_id: u64, prefetch: u16) -> Option<Delivery> {
        let mut state = self.inner.state.lock();
        let queue = state.queues.get_mut(queue_name)?;
        if prefetch > 0 {
            let in_flight = queue
                .unacked
                .values()
                .filter(|flight| flight.channel_id == channel_id)
                .count();
            if in_flight >= usize::from(prefetch) {
                return None;
            }
        }
        let message = queue.ready.pop_front()?;
        let delivery_tag = self.inner.next_delivery_tag.fetch_add(1, Ordering::SeqCst);
        let delivery = Delivery {
            delivery_tag,
            routing_key: message.routing_key.clone(),
            body: message.body.clone(),
            redelivered: message.redelivered,
            retry_count: message.retry_count,
        };
        queue.unacked.insert(
            delivery_tag,
            InFlight {
                channel_id,
                message,
            },
        );
        Some(delivery)
    }

    fn settle(&self, delivery_tag: u64, outcome: Settlement) -> Result<(), MessagingError> {
        {
            let mut state = self.inner.state.lock();
            let found = state.queues.iter_mut().find_map(|(name, queue)| {
                queue
                    .unacked
                    .remove(&delivery_tag)
                    .map(|flight| (name.clone(), flight.message, queue.dead_letter_exchange.clone()))
            });
            let Some((queue_name, message, dlx)) = found else {
                return Err(match outcome {
                    Settlement::Ack => MessagingError::ack(delivery_tag, "unknown delivery tag"),
                    _ => MessagingError::nack(delivery_tag, "unknown delivery tag"),
                });
            };

            match outcome {
                Settlement::Ack => {
                    if let Some(queue) = state.queues.get_mut(&queue_name) {
                        queue.total_acked += 1;
                    }
                }
                Settlement::Requeue => {
                    if let Some(queue) = state.queues.get_mut(&queue_name) {
                        queue.ready.push_front(StoredMessage {
                            redelivered: true,
                            ..message
                        });
                    }
                }
                Settlement::Reject => match dlx {
                    Some(dlx) => {
                        let dead = StoredMessage {
                            routing_key: queue_name.clone(),
                            redelivered: false,
                            ..message
                        };
                        route(&mut state, &dlx, dead)?;
                    }
                    None => {
                        if let Some(queue) = state.queues.get_mut(&queue_name) {
                            queue.total_dropped += 1;
                        }
                    }
                },
            }
        }
        self.notify();
        Ok(())
    }

    fn release_channel(&self, channel_id: u64) {
        {
            let mut state = self.inner.state.lock();
            for queue in state.queues.values_mut() {
                requeue_in_flight(queue, |flight| flight.channel_id == channel_id);
            }
        }
        self.notify();
    }
}

#[derive(Debug, Clone, Copy)]
enum Settlement {
    Ack,
    Requeue,
    Reject,
}

fn requeue_in_flight(queue: &mut QueueState, mut owned: impl FnMut(&InFlight) -> bool) {
    let mut tags: Vec<u64> = queue
        .unacked
        .iter()
        .filter(|(_, flight)| owned(flight))
        .map(|(tag, _)| *tag)
        .collect();
    // Restore original order at the head of the queue
    tags.sort_unstable_by(|a, b| b.cmp(a));
    for tag in tags {
        if let Some(flight) = queue.unacked.remove(&tag) {
            queue.ready.push_front(StoredMessage {
                redelivered: true,
                ..flight.message
            });
        }
    }
}

/// Deliver to every queue the exchange routes `message` to. Unroutable
/// messages are dropped, as AMQP does without the mandatory flag.
fn route(
    state: &mut BrokerState,
    exchange: &str,
    message: StoredMessage,
) -> Result<(), MessagingError> {
    let targets: Vec<String> = if exchange.is_empty() {
        // Default exchange: routing key names the queue
        vec![message.routing_key.clone()]
    } else {
        let kind = state
            .exchanges
            .get(exchange)
            .copied()
            .ok_or_else(|| MessagingError::publish(exchange, "no such exchange"))?;
        let mut seen = HashSet::new();
        state
            .bindings
            .iter()
            .filter(|binding| binding.exchange == exchange)
            .filter(|binding| match kind {
                ExchangeType::Topic => topic_matches(&binding.routing_key, &message.routing_key),
                ExchangeType::Direct => binding.routing_key == message.routing_key,
            })
            .filter(|binding| seen.insert(binding.queue_name.clone()))
            .map(|binding| binding.queue_name.clone())
            .collect()
    };

    for queue_name in targets {
        if let Some(queue) = state.queues.get_mut(&queue_name) {
            queue.ready.push_back(message.clone());
        }
    }
    Ok(())
}

/// Connection to an [`InMemoryBroker`]
#[derive(Debug)]
pub struct InMemoryConnection {
    broker: InMemoryBroker,
    generation: u64,
    closed: Arc<AtomicBool>,
}

impl InMemoryConnection {
    fn check_open(&self) -> Result<(), MessagingError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(MessagingError::closed("connection is closed"))
        }
    }
}

#[async_trait]
impl BrokerConnectionOps for InMemoryConnection {
    type Channel = InMemoryChannel;

    async fn create_channel(&self) -> Result<InMemoryChannel, MessagingError> {
        self.check_open()?;
        Ok(InMemoryChannel {
            broker: self.broker.clone(),
            id: self.broker.inner.next_channel_id.fetch_add(1, Ordering::SeqCst),
            generation: self.generation,
            connection_closed: Arc::clone(&self.closed),
            closed: Arc::new(AtomicBool::new(false)),
            prefetch: Arc::new(AtomicU16::new(0)),
        })
    }

    fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.broker.generation() == self.generation
    }

    async fn close(&self) -> Result<(), MessagingError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.broker.notify();
        }
        Ok(())
    }
}

/// Channel on an [`InMemoryConnection`]
#[derive(Debug)]
pub struct InMemoryChannel {
    broker: InMemoryBroker,
    id: u64,
    generation: u64,
    connection_closed: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    prefetch: Arc<AtomicU16>,
}

impl InMemoryChannel {
    fn check_open(&self) -> Result<(), MessagingError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(MessagingError::closed("channel is closed"));
        }
        if self.connection_closed.load(Ordering::SeqCst)
            || self.broker.generation() != self.generation
        {
            return Err(MessagingError::closed("connection is closed"));
        }
        Ok(())
    }
}

struct ConsumeState {
    broker: InMemoryBroker,
    queue_name: String,
    channel_id: u64,
    generation: u64,
    connection_closed: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    prefetch: Arc<AtomicU16>,
    changes: watch::Receiver<u64>,
    finished: bool,
}

impl ConsumeState {
    async fn next_delivery(&mut self) -> Option<Result<Delivery, MessagingError>> {
        loop {
            self.changes.borrow_and_update();

            if self.closed.load(Ordering::SeqCst) {
                return None;
            }
            if self.connection_closed.load(Ordering::SeqCst)
                || self.broker.generation() != self.generation
            {
                return Some(Err(MessagingError::closed("connection lost")));
            }

            let prefetch = self.prefetch.load(Ordering::SeqCst);
            if let Some(delivery) = self.broker.take_next(&self.queue_name, self.channel_id, prefetch)
            {
                return Some(Ok(delivery));
            }

            if self.changes.changed().await.is_err() {
                return None;
            }
        }
    }
}

#[async_trait]
impl BrokerChannelOps for InMemoryChannel {
    async fn declare_topic_exchange(&self, exchange: &str) -> Result<(), MessagingError> {
        self.check_open()?;
        self.broker.declare_exchange(exchange, ExchangeType::Topic)
    }

    async fn declare_queue(
        &self,
        queue_name: &str,
        dead_letter: bool,
    ) -> Result<(), MessagingError> {
        self.check_open()?;
        self.broker.declare_queue(queue_name, dead_letter)
    }

    async fn bind_queue(
        &self,
        queue_name: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), MessagingError> {
        self.check_open()?;
        self.broker.bind(queue_name, exchange, routing_key)
    }

    async fn set_prefetch(&self, prefetch_count: u16) -> Result<(), MessagingError> {
        self.check_open()?;
        self.prefetch.store(prefetch_count, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(&self, message: OutboundMessage) -> Result<(), MessagingError> {
        self.check_open()?;
        self.broker.publish(message)
    }

    async fn consume(
        &self,
        queue_name: &str,
        _consumer_tag: &str,
    ) -> Result<DeliveryStream, MessagingError> {
        self.check_open()?;
        if !self.broker.queue_exists(queue_name) {
            return Err(MessagingError::consume(queue_name, "no such queue"));
        }

        let state = ConsumeState {
            broker: self.broker.clone(),
            queue_name: queue_name.to_string(),
            channel_id: self.id,
            generation: self.generation,
            connection_closed: Arc::clone(&self.connection_closed),
            closed: Arc::clone(&self.closed),
            prefetch: Arc::clone(&self.prefetch),
            changes: self.broker.inner.changes.subscribe(),
            finished: false,
        };

        let deliveries = futures::stream::unfold(state, |mut state| async move {
            if state.finished {
                return None;
            }
            let item = state.next_delivery().await?;
            if item.is_err() {
                state.finished = true;
            }
            Some((item, state))
        });
        Ok(deliveries.boxed())
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), MessagingError> {
        self.check_open()?;
        self.broker.settle(delivery_tag, Settlement::Ack)
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), MessagingError> {
        self.check_open()?;
        let outcome = if requeue {
            Settlement::Requeue
        } else {
            Settlement::Reject
        };
        self.broker.settle(delivery_tag, outcome)
    }

    async fn close(&self) -> Result<(), MessagingError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.broker.release_channel(self.id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn open_channel(broker: &InMemoryBroker) -> (InMemoryConnection, InMemoryChannel) {
        let connection = broker.connect().await.unwrap();
        let channel = connection.create_channel().await.unwrap();
        (connection, channel)
    }

    async fn declare_bound_queue(channel: &InMemoryChannel, queue: &str, key: &str) {
        channel.declare_topic_exchange("events").await.unwrap();
        channel.declare_queue(queue, true).await.unwrap();
        channel.bind_queue(queue, "events", key).await.unwrap();
    }

    #[tokio::test]
    async fn test_topic_routing_respects_bindings() {
        let broker = InMemoryBroker::new();
        let (_connection, channel) = open_channel(&broker).await;
        declare_bound_queue(&channel, "videos", "video.#").await;
        declare_bound_queue(&channel, "models", "model.*.completed").await;

        for key in ["video.downloaded", "model.training.completed", "task.created"] {
            channel
                .publish(OutboundMessage::new("events", key, key.as_bytes().to_vec()))
                .await
                .unwrap();
        }

        assert_eq!(broker.queue_depth("videos"), 1);
        assert_eq!(broker.queue_depth("models"), 1);
        assert_eq!(broker.published().len(), 3);
    }

    #[tokio::test]
    async fn test_publish_to_undeclared_exchange_fails() {
        let broker = InMemoryBroker::new();
        let (_connection, channel) = open_channel(&broker).await;
        let err = channel
            .publish(OutboundMessage::new("nowhere", "a.b", vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, MessagingError::Publish { .. }));
    }

    #[tokio::test]
    async fn test_default_exchange_routes_by_queue_name() {
        let broker = InMemoryBroker::new();
        let (_connection, channel) = open_channel(&broker).await;
        channel.declare_queue("direct", false).await.unwrap();
        channel
            .publish(OutboundMessage::new("", "direct", b"x".to_vec()).with_retry_count(2))
            .await
            .unwrap();

        let mut deliveries = channel.consume("direct", "t").await.unwrap();
        let delivery = deliveries.next().await.unwrap().unwrap();
        assert_eq!(delivery.retry_count, 2);
        assert_eq!(delivery.body, b"x".to_vec());
    }

    #[tokio::test]
    async fn test_prefetch_limits_unacked_deliveries() {
        let broker = InMemoryBroker::new();
        let (_connection, channel) = open_channel(&broker).await;
        declare_bound_queue(&channel, "q", "#").await;
        channel.set_prefetch(1).await.unwrap();
        for n in 0..2 {
            channel
                .publish(OutboundMessage::new("events", "a.b", vec![n]))
                .await
                .unwrap();
        }

        let mut deliveries = channel.consume("q", "t").await.unwrap();
        let first = deliveries.next().await.unwrap().unwrap();
        let blocked = tokio::time::timeout(Duration::from_millis(50), deliveries.next()).await;
        assert!(blocked.is_err(), "second delivery must wait for the ack");

        channel.ack(first.delivery_tag).await.unwrap();
        let second = deliveries.next().await.unwrap().unwrap();
        assert_eq!(second.body, vec![1]);
        assert_eq!(broker.acked_count("q"), 1);
    }

    #[tokio::test]
    async fn test_reject_routes_to_dead_letter_queue() {
        let broker = InMemoryBroker::new();
        let (_connection, channel) = open_channel(&broker).await;
        declare_bound_queue(&channel, "q", "#").await;
        channel
            .publish(OutboundMessage::new("events", "a.b", b"poison".to_vec()))
            .await
            .unwrap();

        let mut deliveries = channel.consume("q", "t").await.unwrap();
        let delivery = deliveries.next().await.unwrap().unwrap();
        channel.nack(delivery.delivery_tag, false).await.unwrap();

        assert_eq!(broker.queue_depth("q"), 0);
        assert_eq!(broker.drain_queue("q_dlq"), vec![b"poison".to_vec()]);
    }

    #[tokio::test]
    async fn test_requeue_marks_redelivered() {
        let broker = InMemoryBroker::new();
        let (_connection, channel) = open_channel(&broker).await;
        declare_bound_queue(&channel, "q", "#").await;
        channel
            .publish(OutboundMessage::new("events", "a.b", vec![]))
            .await
            .unwrap();

        let mut deliveries = channel.consume("q", "t").await.unwrap();
        let first = deliveries.next().await.unwrap().unwrap();
        assert!(!first.redelivered);
        channel.nack(first.delivery_tag, true).await.unwrap();
        let again = deliveries.next().await.unwrap().unwrap();
        assert!(again.redelivered);
    }

    #[tokio::test]
    async fn test_disconnect_fails_streams_and_requeues() {
        let broker = InMemoryBroker::new();
        let (connection, channel) = open_channel(&broker).await;
        declare_bound_queue(&channel, "q", "#").await;
        channel
            .publish(OutboundMessage::new("events", "a.b", vec![]))
            .await
            .unwrap();

        let mut deliveries = channel.consume("q", "t").await.unwrap();
        let _unacked = deliveries.next().await.unwrap().unwrap();
        broker.disconnect_all();

        assert!(deliveries.next().await.unwrap().is_err());
        assert!(deliveries.next().await.is_none());
        assert!(!connection.is_connected());
        assert_eq!(broker.queue_depth("q"), 1);
        assert_eq!(broker.unacked_count("q"), 0);
    }

    #[tokio::test]
    async fn test_closing_channel_ends_stream() {
        let broker = InMemoryBroker::new();
        let (_connection, channel) = open_channel(&broker).await;
        declare_bound_queue(&channel, "q", "#").await;
        let mut deliveries = channel.consume("q", "t").await.unwrap();
        channel.close().await.unwrap();
        assert!(deliveries.next().await.is_none());
    }

    #[tokio::test]
    async fn test_refused_connects_are_counted() {
        let broker = InMemoryBroker::new();
        broker.refuse_next_connects(2);
        assert!(broker.connect().await.is_err());
        assert!(broker.connect().await.is_err());
        assert!(broker.connect().await.is_ok());
        assert_eq!(broker.connect_attempts(), 3);
    }
}
