//! Workflow chain worker.
//!
//! Listens on `workflow_worker` for every step's completion event and
//! publishes the request for the following step with the same payload.
//! The last completion is followed by `task.completed`.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::constants::WORKFLOW_WORKER_QUEUE;
use crate::error::PipelineResult;
use crate::messaging::envelope::TASK_ID_FIELD;
use crate::messaging::{
    ConnectionManager, ConsumerConfig, ConsumerStats, EventConsumer, EventDisposition,
    EventEnvelope, EventHandler, EventPublisher, MessagingError, SkipReason,
};
use crate::workflow::WorkflowRegistry;

#[derive(Debug)]
pub struct WorkflowAdvancer {
    registry: Arc<WorkflowRegistry>,
    publisher: EventPublisher,
    consumer: EventConsumer,
}

impl WorkflowAdvancer {
    pub fn new(
        registry: Arc<WorkflowRegistry>,
        connections: Arc<ConnectionManager>,
        config: &PipelineConfig,
    ) -> PipelineResult<Self> {
        let bindings = registry
            .completion_events()
            .into_iter()
            .map(str::to_string)
            .collect();
        let consumer_config = ConsumerConfig::new(WORKFLOW_WORKER_QUEUE, bindings)
            .with_exchange(&config.broker.exchange)
            .with_settings(&config.consumer);

        Ok(Self {
            registry,
            publisher: EventPublisher::new(Arc::clone(&connections), &config.broker.exchange),
            consumer: EventConsumer::new(connections, consumer_config)?,
        })
    }

    pub fn stats(&self) -> Arc<ConsumerStats> {
        self.consumer.stats()
    }

    pub async fn run(&self, shutdown: broadcast::Receiver<()>) -> Result<(), MessagingError> {
        info!(queue = WORKFLOW_WORKER_QUEUE, "Workflow advancer starting");
        self.consumer.run(self, shutdown).await
    }
}

#[async_trait]
impl EventHandler for WorkflowAdvancer {
    async fn handle(&self, envelope: &EventEnvelope) -> PipelineResult<EventDisposition> {
        let Some(next_event) = self.registry.next_event_after(&envelope.event_type) else {
            return Ok(EventDisposition::Skipped(SkipReason::NotSubscribed));
        };
        if envelope.task_id().is_none() {
            warn!(event_type = %envelope.event_type, "Completion event without task_id, not advancing");
            return Ok(EventDisposition::Skipped(SkipReason::MissingField(
                TASK_ID_FIELD,
            )));
        }

        self.publisher
            .publish(next_event, envelope.data.clone())
            .await?;
        info!(
            task_id = %envelope.task_id_or_unknown(),
            from = %envelope.event_type,
            to = next_event,
            "Workflow advanced"
        );
        Ok(EventDisposition::Processed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::events;
    use crate::messaging::{task_data, BrokerProvider, InMemoryBroker, RetryPolicy};
    use std::time::Duration;

    fn advancer(broker: &InMemoryBroker) -> WorkflowAdvancer {
        let connections = Arc::new(ConnectionManager::new(
            BrokerProvider::InMemory(broker.clone()),
            RetryPolicy::new(1, Duration::from_millis(1)),
        ));
        WorkflowAdvancer::new(
            Arc::new(WorkflowRegistry::standard()),
            connections,
            &PipelineConfig::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_completion_requests_next_step() {
        let broker = InMemoryBroker::new();
        let advancer = advancer(&broker);
        let done = EventEnvelope::new(events::VIDEO_DOWNLOADED, task_data("t1", "u1"));

        assert_eq!(advancer.handle(&done).await.unwrap(), EventDisposition::Processed);
        let published = broker.published();
        assert_eq!(
            published[0].routing_key,
            events::VIDEO_FRAMES_EXTRACTION_REQUESTED
        );
        let next = EventEnvelope::decode(&published[0].body).unwrap();
        assert_eq!(next.data, done.data);
        assert_ne!(next.message_id, done.message_id);
    }

    #[tokio::test]
    async fn test_last_completion_completes_task() {
        let broker = InMemoryBroker::new();
        let advancer = advancer(&broker);
        let done = EventEnvelope::new(events::MODEL_INFERENCE_COMPLETED, task_data("t1", "u1"));
        advancer.handle(&done).await.unwrap();
        assert_eq!(broker.published()[0].routing_key, events::TASK_COMPLETED);
    }

    #[tokio::test]
    async fn test_request_events_do_not_advance() {
        let broker = InMemoryBroker::new();
        let advancer = advancer(&broker);
        let request = EventEnvelope::new(events::LABELING_CREATED, task_data("t1", "u1"));
        assert_eq!(
            advancer.handle(&request).await.unwrap(),
            EventDisposition::Skipped(SkipReason::NotSubscribed)
        );
        assert!(broker.published().is_empty());
    }
}
