//! # Messaging Error Types
//!
//! Structured errors for broker connections, topology, publishing and
//! consumption. Helper constructors keep call sites short.

use thiserror::Error;

/// Broker-level error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MessagingError {
    #[error("Broker connection error: {message}")]
    Connection { message: String },

    #[error("Broker unreachable after {attempts} attempts: {message}")]
    ConnectionExhausted { attempts: u32, message: String },

    #[error("Channel error: {message}")]
    Channel { message: String },

    #[error("Topology declaration failed for {target}: {message}")]
    Topology { target: String, message: String },

    #[error("Publish to {exchange} failed: {message}")]
    Publish { exchange: String, message: String },

    #[error("Consume from {queue_name} failed: {message}")]
    Consume { queue_name: String, message: String },

    #[error("Acknowledgement failed: {operation}: {message}")]
    Ack { operation: String, message: String },

    #[error("Message serialization error: {message}")]
    MessageSerialization { message: String },

    #[error("Message deserialization error: {message}")]
    MessageDeserialization { message: String },

    #[error("Broker resource closed: {message}")]
    Closed { message: String },
}

impl MessagingError {
    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create an error for a connect loop that ran out of attempts
    pub fn connection_exhausted(attempts: u32, message: impl Into<String>) -> Self {
        Self::ConnectionExhausted {
            attempts,
            message: message.into(),
        }
    }

    /// Create a channel error
    pub fn channel(message: impl Into<String>) -> Self {
        Self::Channel {
            message: message.into(),
        }
    }

    /// Create a topology (exchange/queue/binding) error
    pub fn topology(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Topology {
            target: target.into(),
            message: message.into(),
        }
    }

    /// Create a publish error
    pub fn publish(exchange: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Publish {
            exchange: exchange.into(),
            message: message.into(),
        }
    }

    /// Create a consume error
    pub fn consume(queue_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Consume {
            queue_name: queue_name.into(),
            message: message.into(),
        }
    }

    /// Create an ack error
    pub fn ack(delivery_tag: u64, message: impl Into<String>) -> Self {
        Self::Ack {
            operation: format!("ack(delivery_tag={delivery_tag})"),
            message: message.into(),
        }
    }

    /// Create a nack error
    pub fn nack(delivery_tag: u64, message: impl Into<String>) -> Self {
        Self::Ack {
            operation: format!("nack(delivery_tag={delivery_tag})"),
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::MessageSerialization {
            message: message.into(),
        }
    }

    /// Create a deserialization error
    pub fn deserialization(message: impl Into<String>) -> Self {
        Self::MessageDeserialization {
            message: message.into(),
        }
    }

    /// Create a closed-resource error
    pub fn closed(message: impl Into<String>) -> Self {
        Self::Closed {
            message: message.into(),
        }
    }

    /// Connection-level failures surface to the process supervisor; the rest
    /// are contained within the consumer loop.
    pub fn is_connection_level(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::ConnectionExhausted { .. } | Self::Closed { .. }
        )
    }
}

impl From<serde_json::Error> for MessagingError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_syntax() || err.is_eof() || err.is_data() {
            MessagingError::deserialization(err.to_string())
        } else {
            MessagingError::serialization(err.to_string())
        }
    }
}

impl From<lapin::Error> for MessagingError {
    fn from(err: lapin::Error) -> Self {
        match err {
            lapin::Error::InvalidChannelState(_) | lapin::Error::InvalidConnectionState(_) => {
                MessagingError::closed(err.to_string())
            }
            lapin::Error::IOError(_) => MessagingError::connection(err.to_string()),
            _ => MessagingError::channel(err.to_string()),
        }
    }
}
