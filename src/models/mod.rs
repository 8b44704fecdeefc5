//! # Models
//!
//! Persistent task state and the pure transition functions that advance it.
//! Both stores apply [`Task::observe`] and [`TaskStep::observe`] inside their
//! own atomicity boundary, so the transition rules live in one place.

pub mod task;
pub mod task_step;

pub use task::{Task, TaskStatus};
pub use task_step::{StepStatus, TaskStep};

pub(crate) use task::TaskRow;
pub(crate) use task_step::TaskStepRow;

use chrono::{DateTime, Utc};

use crate::workflow::WorkflowStep;

/// A tracked event reduced to what the state transition needs
#[derive(Debug, Clone, PartialEq)]
pub struct StepObservation {
    pub task_id: String,
    pub user_id: String,
    pub step: WorkflowStep,
    /// The event is the step's completion event
    pub completes_step: bool,
    /// The step is the last in the workflow
    pub is_last_step: bool,
    pub observed_at: DateTime<Utc>,
}

impl StepObservation {
    /// Completion of the final step completes the task
    pub fn completes_workflow(&self) -> bool {
        self.completes_step && self.is_last_step
    }
}
