//! Stage worker: consume a step's request event, process, publish completion.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};

use super::processor::StageProcessor;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::messaging::envelope::{TASK_ID_FIELD, USER_ID_FIELD};
use crate::messaging::{
    ConnectionManager, ConsumerConfig, ConsumerStats, EventConsumer, EventData,
    EventDisposition, EventEnvelope, EventHandler, EventPublisher, MessagingError, SkipReason,
};
use crate::workflow::{StepDefinition, WorkflowRegistry, WorkflowStep};

/// Durable queue of a step's worker
pub fn stage_queue_name(step: WorkflowStep) -> String {
    format!("{}_worker", step.as_str())
}

pub struct StageWorker<P> {
    definition: StepDefinition,
    processor: P,
    publisher: EventPublisher,
    consumer: EventConsumer,
}

impl<P> std::fmt::Debug for StageWorker<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageWorker")
            .field("step", &self.definition.step)
            .field("queue", &self.consumer.config().queue_name)
            .finish()
    }
}

impl<P: StageProcessor> StageWorker<P> {
    pub fn new(
        step: WorkflowStep,
        processor: P,
        registry: &WorkflowRegistry,
        connections: Arc<ConnectionManager>,
        config: &PipelineConfig,
    ) -> PipelineResult<Self> {
        let definition = *registry.definition(step).ok_or_else(|| {
            PipelineError::ValidationError(format!("step {step} is not part of the workflow"))
        })?;
        let consumer_config = ConsumerConfig::new(
            stage_queue_name(step),
            vec![definition.request_event.to_string()],
        )
        .with_exchange(&config.broker.exchange)
        .with_settings(&config.consumer);

        Ok(Self {
            definition,
            processor,
            publisher: EventPublisher::new(Arc::clone(&connections), &config.broker.exchange),
            consumer: EventConsumer::new(connections, consumer_config)?,
        })
    }

    pub fn step(&self) -> WorkflowStep {
        self.definition.step
    }

    pub fn queue_name(&self) -> &str {
        &self.consumer.config().queue_name
    }

    pub fn stats(&self) -> Arc<ConsumerStats> {
        self.consumer.stats()
    }

    /// Consume until `shutdown` fires or the connection is lost
    pub async fn run(&self, shutdown: broadcast::Receiver<()>) -> Result<(), MessagingError> {
        info!(
            step = %self.definition.step,
            request_event = self.definition.request_event,
            "Stage worker starting"
        );
        self.consumer.run(self, shutdown).await
    }
}

/// Request payload with the processor's output layered on top.
///
/// The identity fields always come from the request.
fn completion_data(request: &EventData, output: EventData, task_id: &str, user_id: &str) -> EventData {
    let mut data = request.clone();
    data.extend(output);
    data.insert(TASK_ID_FIELD.to_string(), Value::from(task_id));
    data.insert(USER_ID_FIELD.to_string(), Value::from(user_id));
    data
}

#[async_trait]
impl<P: StageProcessor> EventHandler for StageWorker<P> {
    #[instrument(skip_all, fields(step = %self.definition.step, task_id = %envelope.task_id_or_unknown()))]
    async fn handle(&self, envelope: &EventEnvelope) -> PipelineResult<EventDisposition> {
        if envelope.event_type != self.definition.request_event {
            return Ok(EventDisposition::Skipped(SkipReason::NotSubscribed));
        }
        let (Some(task_id), Some(user_id)) = (envelope.task_id(), envelope.user_id()) else {
            let field = if envelope.task_id().is_none() {
                TASK_ID_FIELD
            } else {
                USER_ID_FIELD
            };
            warn!(event_type = %envelope.event_type, field, "Stage request missing required field");
            return Ok(EventDisposition::Skipped(SkipReason::MissingField(field)));
        };

        let output = self.processor.process(&envelope.data).await?;
        let data = completion_data(&envelope.data, output, task_id, user_id);
        self.publisher
            .publish(self.definition.completion_event, data)
            .await?;
        Ok(EventDisposition::Processed)
    }
}
