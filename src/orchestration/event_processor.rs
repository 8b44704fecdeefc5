//! # Task Event Processor
//!
//! Turns one tracked event into one state transition.
//!
//! ## Algorithm
//!
//! 1. Map `event_type` to its workflow step; untracked events are skipped
//! 2. Require non-empty `task_id` and `user_id`; events lacking either are skipped
//! 3. Build a [`StepObservation`] and hand it to the [`TaskStateStore`],
//!    which creates missing rows and applies the transition atomically
//!
//! Skips never touch the store. Store errors propagate so the consumer's
//! failure policy can retry the message.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, instrument, warn};

use crate::error::PipelineResult;
use crate::messaging::envelope::{TASK_ID_FIELD, USER_ID_FIELD};
use crate::messaging::{EventDisposition, EventEnvelope, EventHandler, SkipReason};
use crate::models::StepObservation;
use crate::store::TaskStateStore;
use crate::workflow::WorkflowRegistry;

#[derive(Clone)]
pub struct TaskEventProcessor {
    store: Arc<dyn TaskStateStore>,
    registry: Arc<WorkflowRegistry>,
}

impl std::fmt::Debug for TaskEventProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskEventProcessor")
            .field("store", &self.store.store_name())
            .finish()
    }
}

impl TaskEventProcessor {
    pub fn new(store: Arc<dyn TaskStateStore>, registry: Arc<WorkflowRegistry>) -> Self {
        Self { store, registry }
    }

    pub fn registry(&self) -> &WorkflowRegistry {
        &self.registry
    }

    /// Reduce an envelope to the transition input, or say why it is ignored
    pub fn observation_for(
        &self,
        envelope: &EventEnvelope,
        observed_at: DateTime<Utc>,
    ) -> Result<StepObservation, SkipReason> {
        let step = self
            .registry
            .step_of(&envelope.event_type)
            .ok_or(SkipReason::UntrackedEventType)?;
        let task_id = envelope
            .task_id()
            .ok_or(SkipReason::MissingField(TASK_ID_FIELD))?;
        let user_id = envelope
            .user_id()
            .ok_or(SkipReason::MissingField(USER_ID_FIELD))?;

        Ok(StepObservation {
            task_id: task_id.to_string(),
            user_id: user_id.to_string(),
            step,
            completes_step: self.registry.is_completion_event(&envelope.event_type),
            is_last_step: self.registry.is_last_step(step),
            observed_at,
        })
    }

    /// Apply one event to the task state store
    #[instrument(skip_all, fields(event_type = %envelope.event_type, task_id = %envelope.task_id_or_unknown()))]
    pub async fn on_event(&self, envelope: &EventEnvelope) -> PipelineResult<EventDisposition> {
        let observation = match self.observation_for(envelope, Utc::now()) {
            Ok(observation) => observation,
            Err(reason) => {
                match &reason {
                    SkipReason::MissingField(field) => warn!(
                        event_type = %envelope.event_type,
                        message_id = %envelope.message_id,
                        field = *field,
                        "Tracked event missing required field, dropping"
                    ),
                    _ => debug!(
                        event_type = %envelope.event_type,
                        "Event not part of the tracked workflow"
                    ),
                }
                return Ok(EventDisposition::Skipped(reason));
            }
        };

        let (task, step) = self.store.record_observation(&observation).await?;
        debug!(
            task_id = %task.task_id,
            step = %step.step,
            step_status = %step.status,
            task_status = %task.status,
            "Task state updated"
        );
        Ok(EventDisposition::Processed)
    }
}

#[async_trait]
impl EventHandler for TaskEventProcessor {
    async fn handle(&self, envelope: &EventEnvelope) -> PipelineResult<EventDisposition> {
        self.on_event(envelope).await
    }
}
