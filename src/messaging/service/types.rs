//! Provider-neutral message and topology types.

use futures::stream::BoxStream;

use super::MessagingError;

/// Stream of deliveries from a `basic_consume`-style subscription.
///
/// The stream yields `Err` when the underlying channel or connection dies and
/// ends (`None`) when the channel was closed deliberately.
pub type DeliveryStream = BoxStream<'static, Result<Delivery, MessagingError>>;

/// A message handed to a consumer, pending acknowledgement
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Channel-scoped tag used to ack or nack this delivery
    pub delivery_tag: u64,
    pub routing_key: String,
    pub body: Vec<u8>,
    /// Set by the broker when the message was delivered before and not acked
    pub redelivered: bool,
    /// Application-level retry counter carried in the `x-retry-count` header
    pub retry_count: u32,
}

/// A message to publish
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
    pub message_id: Option<String>,
    /// Written as the `x-retry-count` header when non-zero
    pub retry_count: u32,
}

impl OutboundMessage {
    /// Persistent JSON message for `exchange` with `routing_key`
    pub fn new(
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        body: Vec<u8>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            body,
            message_id: None,
            retry_count: 0,
        }
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }
}

/// Name of the dead-letter exchange attached to `queue_name`
pub fn dead_letter_exchange(queue_name: &str) -> String {
    format!("{queue_name}_dlx")
}

/// Name of the dead-letter queue attached to `queue_name`
pub fn dead_letter_queue(queue_name: &str) -> String {
    format!("{queue_name}_dlq")
}

/// AMQP topic matching: `*` matches exactly one word, `#` matches zero or more.
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    match_words(&pattern, &key)
}

fn match_words(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => (0..=key.len()).any(|skip| match_words(rest, &key[skip..])),
        Some((&"*", rest)) => !key.is_empty() && match_words(rest, &key[1..]),
        Some((word, rest)) => key
            .split_first()
            .is_some_and(|(head, tail)| head == word && match_words(rest, tail)),
    }
}
