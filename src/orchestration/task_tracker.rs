//! # Task Tracker
//!
//! Owns the one consumer that feeds every tracked workflow event into the
//! [`TaskEventProcessor`], and answers status queries straight from the
//! store without going through the consumer.
//!
//! ## Lifecycle
//!
//! Construct once in the composition root, then call [`TaskTracker::start`].
//! Starting is guarded by an atomic flag: a second call while running is a
//! no-op that returns `false`.
//!
//! The background loop is supervised. When the consumer ends with an error
//! (connection lost, connect retries exhausted) the tracker waits
//! `restart_delay` and runs it again, until [`TaskTracker::stop`] is called.
//!
//! ## Scale-out
//!
//! Every tracker instance in a deployment binds the same durable queue, so
//! the broker hands each message to exactly one of them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::event_processor::TaskEventProcessor;
use super::status::{build_status_report, TaskStatusReport};
use crate::config::PipelineConfig;
use crate::error::PipelineResult;
use crate::messaging::{
    ConnectionManager, ConsumerConfig, ConsumerStats, EventConsumer, EventDisposition,
    EventEnvelope,
};
use crate::store::TaskStateStore;
use crate::workflow::WorkflowRegistry;

pub struct TaskTracker {
    store: Arc<dyn TaskStateStore>,
    registry: Arc<WorkflowRegistry>,
    processor: Arc<TaskEventProcessor>,
    consumer: Arc<EventConsumer>,
    restart_delay: Duration,
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for TaskTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskTracker")
            .field("queue", &self.consumer.config().queue_name)
            .field("store", &self.store.store_name())
            .field("running", &self.is_running())
            .finish()
    }
}

impl TaskTracker {
    /// Build a tracker bound to every event the registry knows
    pub fn new(
        store: Arc<dyn TaskStateStore>,
        registry: Arc<WorkflowRegistry>,
        connections: Arc<ConnectionManager>,
        config: &PipelineConfig,
    ) -> PipelineResult<Self> {
        let bindings = registry
            .tracked_event_types()
            .into_iter()
            .map(str::to_string)
            .collect();
        let consumer_config = ConsumerConfig::new(&config.tracker.queue_name, bindings)
            .with_exchange(&config.broker.exchange)
            .with_settings(&config.consumer);
        let consumer = EventConsumer::new(connections, consumer_config)?;
        let processor = TaskEventProcessor::new(Arc::clone(&store), Arc::clone(&registry));
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            store,
            registry,
            processor: Arc::new(processor),
            consumer: Arc::new(consumer),
            restart_delay: config.tracker.restart_delay(),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            handle: Mutex::new(None),
        })
    }

    /// Spawn the supervised consumer loop; `false` if already running
    pub fn start(&self) -> bool {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            info!("Task tracker already running");
            return false;
        }

        let consumer = Arc::clone(&self.consumer);
        let processor = Arc::clone(&self.processor);
        let running = Arc::clone(&self.running);
        let shutdown_tx = self.shutdown_tx.clone();
        let restart_delay = self.restart_delay;

        let handle = tokio::spawn(async move {
            supervise(consumer, processor, running, shutdown_tx, restart_delay).await;
        });
        *self.handle.lock() = Some(handle);

        info!(
            queue = %self.consumer.config().queue_name,
            store = self.store.store_name(),
            "🚀 Task tracker started"
        );
        true
    }

    /// Stop the loop and wait for it to finish
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if self.shutdown_tx.send(()).is_err() {
            debug!("Task tracker loop already exited before shutdown signal");
        }

        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Task tracker loop panicked");
            }
        }
        info!("🛑 Task tracker stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Apply one event directly, bypassing the broker
    pub async fn on_event(&self, envelope: &EventEnvelope) -> PipelineResult<EventDisposition> {
        self.processor.on_event(envelope).await
    }

    /// Current status of a task, `None` if no event for it was processed yet
    pub async fn get_status(&self, task_id: &str) -> PipelineResult<Option<TaskStatusReport>> {
        let Some(task) = self.store.find_task(task_id).await? else {
            return Ok(None);
        };
        let steps = self.store.task_steps(task_id).await?;
        Ok(Some(build_status_report(&self.registry, &task, &steps)))
    }

    pub fn consumer_stats(&self) -> Arc<ConsumerStats> {
        self.consumer.stats()
    }

    pub fn queue_name(&self) -> &str {
        &self.consumer.config().queue_name
    }
}

impl Drop for TaskTracker {
    fn drop(&mut self) {
        if self.running.swap(false, Ordering::SeqCst) && self.shutdown_tx.send(()).is_err() {
            debug!("Task tracker dropped after its loop had already exited");
        }
    }
}

async fn supervise(
    consumer: Arc<EventConsumer>,
    processor: Arc<TaskEventProcessor>,
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
    restart_delay: Duration,
) {
    let mut restarts: u64 = 0;
    loop {
        // Subscribe before reading the flag so a concurrent stop is never missed
        let shutdown = shutdown_tx.subscribe();
        if !running.load(Ordering::SeqCst) {
            break;
        }

        match consumer.run(processor.as_ref(), shutdown).await {
            Ok(()) => break,
            Err(e) => {
                restarts += 1;
                warn!(
                    error = %e,
                    restarts,
                    delay_ms = restart_delay.as_millis() as u64,
                    "⚠️ Task tracker consumer failed, restarting"
                );
            }
        }

        let mut shutdown = shutdown_tx.subscribe();
        if !running.load(Ordering::SeqCst) {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(restart_delay) => {}
            _ = shutdown.recv() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::events;
    use crate::messaging::{task_data, BrokerProvider, InMemoryBroker, RetryPolicy};
    use crate::models::TaskStatus;
    use crate::store::InMemoryTaskStore;

    fn tracker(broker: &InMemoryBroker) -> TaskTracker {
        tracker_with_retry(broker, RetryPolicy::new(2, Duration::from_millis(5)))
    }

    fn tracker_with_retry(broker: &InMemoryBroker, retry_policy: RetryPolicy) -> TaskTracker {
        let connections = Arc::new(ConnectionManager::new(
            BrokerProvider::InMemory(broker.clone()),
            retry_policy,
        ));
        let mut config = PipelineConfig::default();
        config.tracker.restart_delay_seconds = 0;
        TaskTracker::new(
            Arc::new(InMemoryTaskStore::new()),
            Arc::new(WorkflowRegistry::standard()),
            connections,
            &config,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let broker = InMemoryBroker::new();
        let tracker = tracker(&broker);
        assert!(tracker.start());
        assert!(!tracker.start());
        assert!(tracker.is_running());

        tracker.stop().await;
        assert!(!tracker.is_running());
        // stop twice is harmless
        tracker.stop().await;
    }

    #[tokio::test]
    async fn test_stop_interrupts_connect_retries() {
        let broker = InMemoryBroker::new();
        broker.refuse_next_connects(10);
        let tracker = tracker_with_retry(&broker, RetryPolicy::new(10, Duration::from_secs(5)));
        assert!(tracker.start());

        for _ in 0..200 {
            if broker.connect_attempts() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(broker.connect_attempts(), 1);

        tokio::time::timeout(Duration::from_secs(1), tracker.stop())
            .await
            .expect("stop should not wait for the retry delay");
        assert!(!tracker.is_running());
        assert_eq!(broker.connect_attempts(), 1);
    }

    #[tokio::test]
    async fn test_direct_event_and_status() {
        let broker = InMemoryBroker::new();
        let tracker = tracker(&broker);
        assert_eq!(tracker.get_status("t1").await.unwrap(), None);

        tracker
            .on_event(&EventEnvelope::new(
                events::VIDEO_DOWNLOAD_REQUESTED,
                task_data("t1", "u1"),
            ))
            .await
            .unwrap();

        let status = tracker.get_status("t1").await.unwrap().unwrap();
        assert_eq!(status.status, TaskStatus::Processing);
        assert_eq!(status.user_id, "u1");
        assert_eq!(status.steps.len(), 1);
    }

    #[tokio::test]
    async fn test_binds_every_tracked_event() {
        let broker = InMemoryBroker::new();
        let tracker = tracker(&broker);
        tracker.start();

        let registry = WorkflowRegistry::standard();
        for _ in 0..200 {
            if broker.queue_exists("task_tracker")
                && broker.bindings_for("task_tracker", "events").len()
                    == registry.tracked_event_types().len()
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let bindings = broker.bindings_for("task_tracker", "events");
        for event_type in registry.tracked_event_types() {
            assert!(bindings.iter().any(|b| b == event_type), "{event_type}");
        }
        tracker.stop().await;
    }
}
