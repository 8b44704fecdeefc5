//! # Task Step Model
//!
//! Progress of one workflow step within one task. Maps to the `task_steps`
//! table, unique on `(task_id, step_name)`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::StepObservation;
use crate::error::PipelineError;
use crate::workflow::WorkflowStep;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid step status: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStep {
    pub task_id: String,
    pub step: WorkflowStep,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskStep {
    pub fn is_completed(&self) -> bool {
        self.status == StepStatus::Completed
    }

    /// Step state after one event for this step.
    ///
    /// `started_at` is set by the first event seen. A completion event marks
    /// the step completed and stamps `finished_at` once; any other event
    /// marks it processing unless it already completed. Completed steps never
    /// regress, so redelivered and out-of-order events are harmless.
    pub fn observe(existing: Option<TaskStep>, observation: &StepObservation) -> TaskStep {
        let mut step = existing.unwrap_or_else(|| TaskStep {
            task_id: observation.task_id.clone(),
            step: observation.step,
            status: StepStatus::Pending,
            started_at: None,
            finished_at: None,
        });

        if step.started_at.is_none() {
            step.started_at = Some(observation.observed_at);
        }

        if step.is_completed() {
            return step;
        }

        if observation.completes_step {
            step.status = StepStatus::Completed;
            step.finished_at = step.finished_at.or(Some(observation.observed_at));
        } else {
            step.status = StepStatus::Processing;
        }
        step
    }
}

/// Row shape of the `task_steps` table
#[derive(Debug, Clone, FromRow)]
pub(crate) struct TaskStepRow {
    pub task_id: String,
    pub step_name: String,
    pub status: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TryFrom<TaskStepRow> for TaskStep {
    type Error = PipelineError;

    fn try_from(row: TaskStepRow) -> Result<Self, Self::Error> {
        Ok(Self {
            step: row.step_name.parse().map_err(PipelineError::DatabaseError)?,
            status: row.status.parse().map_err(PipelineError::DatabaseError)?,
            task_id: row.task_id,
            started_at: row.started_at,
            finished_at: row.finished_at,
        })
    }
}
