//! Shared harness for integration tests: an in-memory broker and store
//! wired into a running [`PipelineSystem`].

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use pipeline_core::config::PipelineConfig;
use pipeline_core::messaging::{BrokerProvider, InMemoryBroker};
use pipeline_core::orchestration::PipelineSystem;
use pipeline_core::store::InMemoryTaskStore;

pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TestPipeline {
    pub broker: InMemoryBroker,
    pub store: Arc<InMemoryTaskStore>,
    pub system: PipelineSystem,
}

/// Defaults with every delay shrunk for tests
pub fn test_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.broker.connect_retry_delay_seconds = 0;
    config.tracker.restart_delay_seconds = 0;
    config
}

impl TestPipeline {
    pub async fn start() -> Self {
        Self::start_with(test_config()).await
    }

    /// Bootstrap and wait until the tracker queue is bound
    pub async fn start_with(config: PipelineConfig) -> Self {
        let broker = InMemoryBroker::new();
        let store = Arc::new(InMemoryTaskStore::new());
        let system = PipelineSystem::bootstrap_with(
            config,
            store.clone(),
            BrokerProvider::InMemory(broker.clone()),
        )
        .expect("bootstrap");

        let expected = system.registry().tracked_event_types().len();
        wait_for_bindings(&broker, "task_tracker", expected).await;
        Self {
            broker,
            store,
            system,
        }
    }
}

/// Poll `check` until it returns true or the timeout expires
pub async fn wait_until<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
    loop {
        if check().await {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub async fn wait_for_bindings(broker: &InMemoryBroker, queue: &str, count: usize) {
    wait_until(&format!("{count} bindings on {queue}"), move || async move {
        broker.bindings_for(queue, "events").len() >= count
    })
    .await;
}
