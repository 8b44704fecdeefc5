//! # Messaging
//!
//! Event bus plumbing over a topic exchange: the JSON envelope, broker
//! providers, connection management with bounded retry, the publisher and
//! the queue consumer loop.

pub mod connection;
pub mod consumer;
pub mod envelope;
pub mod errors;
pub mod publisher;
pub mod service;

pub use connection::{ConnectionManager, RetryPolicy};
pub use consumer::{
    ConsumerConfig, ConsumerStats, DeliveryOutcome, EventConsumer, EventDisposition,
    EventHandler, FailurePolicy, SkipReason,
};
pub use envelope::{task_data, EventData, EventEnvelope, TASK_ID_FIELD, USER_ID_FIELD};
pub use errors::MessagingError;
pub use publisher::EventPublisher;
pub use service::{BrokerProvider, InMemoryBroker};
