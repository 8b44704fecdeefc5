//! # Broker Connection Management
//!
//! Opens broker connections with a bounded retry loop. Every attempt is
//! logged; once the attempts are exhausted the last error is returned as
//! [`MessagingError::ConnectionExhausted`] and the caller decides what to do.

use std::future::Future;
use std::time::Duration;

use tracing::{error, info, warn};

use super::service::{BrokerConnection, BrokerProvider, RabbitMqConnector};
use super::MessagingError;
use crate::config::BrokerConfig;

/// Bounded retry with a fixed delay between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Run `operation` until it succeeds or the attempts run out.
    ///
    /// Returns the number of attempts made alongside the last error.
    pub async fn run<T, E, F, Fut>(&self, what: &str, mut operation: F) -> Result<T, (u32, E)>
    where
        E: std::fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= max_attempts => {
                    error!(
                        operation = what,
                        attempt,
                        max_attempts,
                        error = %e,
                        "Giving up after final attempt"
                    );
                    return Err((attempt, e));
                }
                Err(e) => {
                    warn!(
                        operation = what,
                        attempt,
                        max_attempts,
                        retry_in_ms = self.delay.as_millis() as u64,
                        error = %e,
                        "Attempt failed, retrying"
                    );
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Hands out broker connections, retrying transient connect failures
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    provider: BrokerProvider,
    retry_policy: RetryPolicy,
}

impl ConnectionManager {
    pub fn new(provider: BrokerProvider, retry_policy: RetryPolicy) -> Self {
        Self {
            provider,
            retry_policy,
        }
    }

    /// RabbitMQ connection manager from broker configuration
    pub fn from_config(config: &BrokerConfig) -> Self {
        Self::new(
            BrokerProvider::RabbitMq(RabbitMqConnector::new(config)),
            config.retry_policy(),
        )
    }

    pub fn provider(&self) -> &BrokerProvider {
        &self.provider
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy
    }

    /// Open a connection, retrying up to the policy's attempt limit
    pub async fn connect(&self) -> Result<BrokerConnection, MessagingError> {
        let provider = &self.provider;
        let endpoint = provider.endpoint();
        let max_attempts = self.retry_policy.max_attempts.max(1);

        let result = self
            .retry_policy
            .run("broker", |attempt| async move {
                info!(
                    provider = provider.provider_name(),
                    endpoint,
                    attempt,
                    max_attempts,
                    "Connecting to message broker"
                );
                provider.connect().await
            })
            .await;

        match result {
            Ok(connection) => {
                info!(
                    provider = provider.provider_name(),
                    endpoint, "Connected to message broker"
                );
                Ok(connection)
            }
            Err((attempts, e)) => Err(MessagingError::connection_exhausted(attempts, e.to_string())),
        }
    }
}
