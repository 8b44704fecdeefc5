//! # Task Model
//!
//! One pipeline run, identified by a caller-supplied `task_id`.
//!
//! ## Database Schema
//!
//! Maps to the `tasks` table:
//! - `task_id`: Primary key (TEXT), supplied by the producer
//! - `user_id`: Owner (TEXT)
//! - `status`: `created` | `processing` | `completed` | `failed`
//! - `created_at` / `updated_at`: TIMESTAMPTZ
//!
//! Rows are created lazily by the first tracked event that names the task.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::StepObservation;
use crate::error::PipelineError;

/// Task lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Row exists, no step activity recorded yet
    Created,
    /// At least one step has been observed
    Processing,
    /// The last workflow step completed
    Completed,
    /// Marked failed by an operator or producer; the tracker never sets it
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// No event moves a task out of this status
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid task status: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub user_id: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(task_id: impl Into<String>, user_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            task_id: task_id.into(),
            user_id: user_id.into(),
            status: TaskStatus::Created,
            created_at: now,
            updated_at: now,
        }
    }

    /// Task state after one tracked event.
    ///
    /// A missing task is created from the observation. Completion of the last
    /// step completes the task; any other event leaves it processing. A
    /// completed task never changes status again, and `user_id` is never
    /// rewritten once set.
    pub fn observe(existing: Option<Task>, observation: &StepObservation) -> Task {
        let mut task = existing.unwrap_or_else(|| {
            Task::new(
                observation.task_id.clone(),
                observation.user_id.clone(),
                observation.observed_at,
            )
        });

        if !task.status.is_terminal() {
            task.status = if observation.completes_workflow() {
                TaskStatus::Completed
            } else {
                TaskStatus::Processing
            };
        }
        task.updated_at = task.updated_at.max(observation.observed_at);
        task
    }
}

/// Row shape of the `tasks` table
#[derive(Debug, Clone, FromRow)]
pub(crate) struct TaskRow {
    pub task_id: String,
    pub user_id: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<TaskRow> for Task {
    type Error = PipelineError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        Ok(Self {
            status: row.status.parse().map_err(PipelineError::DatabaseError)?,
            task_id: row.task_id,
            user_id: row.user_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
