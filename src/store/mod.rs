//! # Task State Persistence
//!
//! [`TaskStateStore`] is the seam between the tracker and its database.
//! Implementations must apply one observation atomically: the task row and
//! the step row change together or not at all, and concurrent observations
//! for the same task are serialized.

mod in_memory;
mod postgres;

pub use in_memory::{InMemoryTaskStore, TaskSnapshot};
pub use postgres::PgTaskStore;

use async_trait::async_trait;

use crate::error::PipelineResult;
use crate::models::{StepObservation, Task, TaskStep};

#[async_trait]
pub trait TaskStateStore: Send + Sync {
    /// Apply one observation, creating the task and step rows on demand.
    ///
    /// Returns the task and step as committed.
    async fn record_observation(
        &self,
        observation: &StepObservation,
    ) -> PipelineResult<(Task, TaskStep)>;

    async fn find_task(&self, task_id: &str) -> PipelineResult<Option<Task>>;

    /// Step rows of a task, in workflow order
    async fn task_steps(&self, task_id: &str) -> PipelineResult<Vec<TaskStep>>;

    /// Backend name for logging
    fn store_name(&self) -> &'static str;
}
