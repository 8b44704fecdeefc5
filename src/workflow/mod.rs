//! # Workflow Registry
//!
//! Static mapping between event types and the pipeline steps they belong to.
//!
//! Each step owns exactly two event types: a *request* event that a
//! producer publishes to ask for the step, and a *completion* event the
//! stage worker publishes when it finished. The registry is built once at
//! process start and only read afterwards; share it behind an `Arc`.
//!
//! Nominal durations are weights for progress/ETA estimation only. They are
//! never used as timeouts.

mod steps;

pub use steps::WorkflowStep;

use std::collections::HashMap;

use crate::constants::events;

/// Role an event type plays for its step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventRole {
    Request,
    Completion,
}

/// Static description of one workflow step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepDefinition {
    pub step: WorkflowStep,
    pub request_event: &'static str,
    pub completion_event: &'static str,
    pub nominal_duration_seconds: u64,
}

const STANDARD_WORKFLOW: [StepDefinition; 6] = [
    StepDefinition {
        step: WorkflowStep::VideoDownload,
        request_event: events::VIDEO_DOWNLOAD_REQUESTED,
        completion_event: events::VIDEO_DOWNLOADED,
        nominal_duration_seconds: 60,
    },
    StepDefinition {
        step: WorkflowStep::FrameExtraction,
        request_event: events::VIDEO_FRAMES_EXTRACTION_REQUESTED,
        completion_event: events::VIDEO_FRAMES_EXTRACTED,
        nominal_duration_seconds: 120,
    },
    StepDefinition {
        step: WorkflowStep::Labeling,
        request_event: events::LABELING_CREATED,
        completion_event: events::LABELING_COMPLETED,
        nominal_duration_seconds: 300,
    },
    StepDefinition {
        step: WorkflowStep::ModelTraining,
        request_event: events::MODEL_TRAINING_REQUESTED,
        completion_event: events::MODEL_TRAINING_COMPLETED,
        nominal_duration_seconds: 600,
    },
    StepDefinition {
        step: WorkflowStep::ModelDeployment,
        request_event: events::MODEL_DEPLOYMENT_REQUESTED,
        completion_event: events::MODEL_DEPLOYMENT_COMPLETED,
        nominal_duration_seconds: 120,
    },
    StepDefinition {
        step: WorkflowStep::Inference,
        request_event: events::MODEL_INFERENCE_REQUESTED,
        completion_event: events::MODEL_INFERENCE_COMPLETED,
        nominal_duration_seconds: 30,
    },
];

/// Immutable lookup tables for the tracked workflow
#[derive(Debug, Clone)]
pub struct WorkflowRegistry {
    definitions: Vec<StepDefinition>,
    event_index: HashMap<&'static str, (WorkflowStep, EventRole)>,
}

impl Default for WorkflowRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl WorkflowRegistry {
    /// The standard six-step media pipeline
    pub fn standard() -> Self {
        Self::from_definitions(STANDARD_WORKFLOW.to_vec())
    }

    /// Standard workflow with some nominal durations replaced
    pub fn with_nominal_durations(overrides: &HashMap<WorkflowStep, u64>) -> Self {
        let definitions = STANDARD_WORKFLOW
            .iter()
            .map(|definition| StepDefinition {
                nominal_duration_seconds: overrides
                    .get(&definition.step)
                    .copied()
                    .unwrap_or(definition.nominal_duration_seconds),
                ..*definition
            })
            .collect();
        Self::from_definitions(definitions)
    }

    fn from_definitions(definitions: Vec<StepDefinition>) -> Self {
        let mut event_index = HashMap::with_capacity(definitions.len() * 2);
        for definition in &definitions {
            event_index.insert(
                definition.request_event,
                (definition.step, EventRole::Request),
            );
            event_index.insert(
                definition.completion_event,
                (definition.step, EventRole::Completion),
            );
        }
        Self {
            definitions,
            event_index,
        }
    }

    /// Step an event type belongs to; `None` for events outside the tracked workflow
    pub fn step_of(&self, event_type: &str) -> Option<WorkflowStep> {
        self.event_index.get(event_type).map(|(step, _)| *step)
    }

    /// Role of an event type within its step
    pub fn role_of(&self, event_type: &str) -> Option<EventRole> {
        self.event_index.get(event_type).map(|(_, role)| *role)
    }

    /// True only for the one "completed" event of each step
    pub fn is_completion_event(&self, event_type: &str) -> bool {
        self.role_of(event_type) == Some(EventRole::Completion)
    }

    /// The fixed step sequence
    pub fn ordered_steps(&self) -> impl Iterator<Item = WorkflowStep> + '_ {
        self.definitions.iter().map(|definition| definition.step)
    }

    /// Nominal duration of a step in seconds
    pub fn nominal_duration(&self, step: WorkflowStep) -> u64 {
        self.definition(step)
            .map(|definition| definition.nominal_duration_seconds)
            .unwrap_or_default()
    }

    /// Sum of all nominal durations
    pub fn total_nominal_duration(&self) -> u64 {
        self.definitions
            .iter()
            .map(|definition| definition.nominal_duration_seconds)
            .sum()
    }

    pub fn definition(&self, step: WorkflowStep) -> Option<&StepDefinition> {
        self.definitions
            .iter()
            .find(|definition| definition.step == step)
    }

    pub fn last_step(&self) -> Option<WorkflowStep> {
        self.definitions.last().map(|definition| definition.step)
    }

    pub fn is_last_step(&self, step: WorkflowStep) -> bool {
        self.last_step() == Some(step)
    }

    /// Every event type the tracker binds to
    pub fn tracked_event_types(&self) -> Vec<&'static str> {
        self.definitions
            .iter()
            .flat_map(|definition| [definition.request_event, definition.completion_event])
            .collect()
    }

    /// Completion events, in workflow order
    pub fn completion_events(&self) -> Vec<&'static str> {
        self.definitions
            .iter()
            .map(|definition| definition.completion_event)
            .collect()
    }

    /// Event that continues the chain after a completion event.
    ///
    /// The last step's completion is followed by `task.completed`.
    pub fn next_event_after(&self, event_type: &str) -> Option<&'static str> {
        let position = self
            .definitions
            .iter()
            .position(|definition| definition.completion_event == event_type)?;
        match self.definitions.get(position + 1) {
            Some(next) => Some(next.request_event),
            None => Some(events::TASK_COMPLETED),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_tracked_event_maps_to_a_step() {
        let registry = WorkflowRegistry::standard();
        let tracked = registry.tracked_event_types();
        assert_eq!(tracked.len(), 12);
        for event_type in tracked {
            assert!(registry.step_of(event_type).is_some(), "{event_type}");
        }
    }

    #[test]
    fn test_untracked_events_have_no_step() {
        let registry = WorkflowRegistry::standard();
        assert_eq!(registry.step_of(events::TASK_CREATED), None);
        assert_eq!(registry.step_of(events::TASK_FAILED), None);
        assert_eq!(registry.step_of("video.exploded"), None);
        assert!(!registry.is_completion_event(events::TASK_COMPLETED));
    }

    #[test]
    fn test_exactly_one_completion_event_per_step() {
        let registry = WorkflowRegistry::standard();
        for step in registry.ordered_steps() {
            let completions = registry
                .tracked_event_types()
                .into_iter()
                .filter(|event| {
                    registry.step_of(event) == Some(step) && registry.is_completion_event(event)
                })
                .count();
            assert_eq!(completions, 1, "{step}");
        }
    }

    #[test]
    fn test_ordered_steps_match_pipeline() {
        let registry = WorkflowRegistry::standard();
        let steps: Vec<_> = registry.ordered_steps().collect();
        assert_eq!(steps, WorkflowStep::ALL.to_vec());
        assert!(registry.is_last_step(WorkflowStep::Inference));
        assert!(!registry.is_last_step(WorkflowStep::ModelDeployment));
    }

    #[test]
    fn test_nominal_durations_and_overrides() {
        let registry = WorkflowRegistry::standard();
        assert_eq!(registry.nominal_duration(WorkflowStep::ModelTraining), 600);
        assert_eq!(registry.total_nominal_duration(), 1230);

        let overrides = HashMap::from([(WorkflowStep::Labeling, 3600)]);
        let registry = WorkflowRegistry::with_nominal_durations(&overrides);
        assert_eq!(registry.nominal_duration(WorkflowStep::Labeling), 3600);
        assert_eq!(registry.nominal_duration(WorkflowStep::VideoDownload), 60);
    }

    #[test]
    fn test_chain_follows_workflow_order() {
        let registry = WorkflowRegistry::standard();
        assert_eq!(
            registry.next_event_after(events::VIDEO_DOWNLOADED),
            Some(events::VIDEO_FRAMES_EXTRACTION_REQUESTED)
        );
        assert_eq!(
            registry.next_event_after(events::VIDEO_FRAMES_EXTRACTED),
            Some(events::LABELING_CREATED)
        );
        assert_eq!(
            registry.next_event_after(events::MODEL_INFERENCE_COMPLETED),
            Some(events::TASK_COMPLETED)
        );
        assert_eq!(registry.next_event_after(events::VIDEO_DOWNLOAD_REQUESTED), None);
    }
}
