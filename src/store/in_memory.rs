//! Process-local task store for tests and single-process development.
//!
//! A single `parking_lot::Mutex` guards all tasks, which makes every
//! observation atomic and serializes observations per task.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::TaskStateStore;
use crate::error::{PipelineError, PipelineResult};
use crate::models::{StepObservation, Task, TaskStep};
use crate::workflow::WorkflowStep;

#[derive(Debug, Clone, PartialEq)]
struct TaskEntry {
    task: Task,
    steps: BTreeMap<WorkflowStep, TaskStep>,
}

/// Task store snapshot: task plus its steps in workflow order
pub type TaskSnapshot = BTreeMap<String, (Task, Vec<TaskStep>)>;

#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: Mutex<HashMap<String, TaskEntry>>,
    failing_writes: AtomicU32,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` writes with a database error
    pub fn fail_next_writes(&self, count: u32) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    pub fn task_count(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Copy of every task and step
    pub fn snapshot(&self) -> TaskSnapshot {
        self.tasks
            .lock()
            .iter()
            .map(|(task_id, entry)| {
                (
                    task_id.clone(),
                    (entry.task.clone(), entry.steps.values().cloned().collect()),
                )
            })
            .collect()
    }
}

#[async_trait]
impl TaskStateStore for InMemoryTaskStore {
    async fn record_observation(
        &self,
        observation: &StepObservation,
    ) -> PipelineResult<(Task, TaskStep)> {
        let injected_failure = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected_failure {
            return Err(PipelineError::DatabaseError(
                "injected write failure".to_string(),
            ));
        }

        let mut tasks = self.tasks.lock();
        let existing = tasks.remove(&observation.task_id);
        let (existing_task, mut steps) = match existing {
            Some(entry) => (Some(entry.task), entry.steps),
            None => (None, BTreeMap::new()),
        };

        let task = Task::observe(existing_task, observation);
        let step = TaskStep::observe(steps.remove(&observation.step), observation);
        steps.insert(observation.step, step.clone());
        tasks.insert(
            observation.task_id.clone(),
            TaskEntry {
                task: task.clone(),
                steps,
            },
        );
        Ok((task, step))
    }

    async fn find_task(&self, task_id: &str) -> PipelineResult<Option<Task>> {
        Ok(self.tasks.lock().get(task_id).map(|entry| entry.task.clone()))
    }

    async fn task_steps(&self, task_id: &str) -> PipelineResult<Vec<TaskStep>> {
        Ok(self
            .tasks
            .lock()
            .get(task_id)
            .map(|entry| entry.steps.values().cloned().collect())
            .unwrap_or_default())
    }

    fn store_name(&self) -> &'static str {
        "in_memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{StepStatus, TaskStatus};
    use chrono::Utc;

    fn observation(task_id: &str, step: WorkflowStep, completes_step: bool) -> StepObservation {
        StepObservation {
            task_id: task_id.to_string(),
            user_id: "u1".to_string(),
            step,
            completes_step,
            is_last_step: step == WorkflowStep::Inference,
            observed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_creates_task_and_step_on_first_observation() {
        let store = InMemoryTaskStore::new();
        let (task, step) = store
            .record_observation(&observation("t1", WorkflowStep::VideoDownload, false))
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Processing);
        assert_eq!(step.status, StepStatus::Processing);
        assert_eq!(store.task_count(), 1);
        assert_eq!(store.task_steps("t1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_steps_come_back_in_workflow_order() {
        let store = InMemoryTaskStore::new();
        for step in [WorkflowStep::Labeling, WorkflowStep::VideoDownload] {
            store
                .record_observation(&observation("t1", step, true))
                .await
                .unwrap();
        }
        let steps: Vec<_> = store
            .task_steps("t1")
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.step)
            .collect();
        assert_eq!(steps, vec![WorkflowStep::VideoDownload, WorkflowStep::Labeling]);
    }

    #[tokio::test]
    async fn test_injected_failure_leaves_state_untouched() {
        let store = InMemoryTaskStore::new();
        store.fail_next_writes(1);
        let result = store
            .record_observation(&observation("t1", WorkflowStep::VideoDownload, false))
            .await;
        assert!(matches!(result, Err(PipelineError::DatabaseError(_))));
        assert_eq!(store.task_count(), 0);

        assert!(store
            .record_observation(&observation("t1", WorkflowStep::VideoDownload, false))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_unknown_task_reads_empty() {
        let store = InMemoryTaskStore::new();
        assert_eq!(store.find_task("nope").await.unwrap(), None);
        assert!(store.task_steps("nope").await.unwrap().is_empty());
    }
}
