//! # Task Status
//!
//! Progress and ETA are coarse linear estimates over nominal step
//! durations. Elapsed time is not tracked; only which steps completed.
//!
//! With `T` the sum of all nominal durations, `C` the sum over completed
//! steps and `h` half the current step's duration:
//!
//! - `progress = (C + h) / T`
//! - `remaining = (T - C) - h`, truncated to whole seconds
//!
//! The current step is derived, never stored: the first step in workflow
//! order that has not completed. A completed task reports full progress.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{StepStatus, Task, TaskStatus, TaskStep};
use crate::workflow::{WorkflowRegistry, WorkflowStep};

/// Progress of one task through the workflow
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressEstimate {
    /// Fraction in `[0, 1]`
    pub progress: f64,
    pub current_step: Option<WorkflowStep>,
    pub estimated_time_remaining_seconds: u64,
}

impl ProgressEstimate {
    pub fn compute(
        registry: &WorkflowRegistry,
        task_status: TaskStatus,
        completed: &HashSet<WorkflowStep>,
    ) -> Self {
        let current_step = registry
            .ordered_steps()
            .find(|step| !completed.contains(step));

        if task_status == TaskStatus::Completed || current_step.is_none() {
            return Self {
                progress: 1.0,
                current_step: None,
                estimated_time_remaining_seconds: 0,
            };
        }

        let total = registry.total_nominal_duration() as f64;
        let completed_seconds: u64 = registry
            .ordered_steps()
            .filter(|step| completed.contains(step))
            .map(|step| registry.nominal_duration(step))
            .sum();
        let half_current = current_step
            .map(|step| registry.nominal_duration(step) as f64 / 2.0)
            .unwrap_or_default();

        let progress = if total > 0.0 {
            ((completed_seconds as f64 + half_current) / total).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let remaining = (total - completed_seconds as f64 - half_current).max(0.0);

        Self {
            progress,
            current_step,
            estimated_time_remaining_seconds: remaining as u64,
        }
    }
}

/// Per-step line of a status report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    pub step: WorkflowStep,
    pub display_name: String,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&TaskStep> for StepReport {
    fn from(step: &TaskStep) -> Self {
        Self {
            step: step.step,
            display_name: step.step.display_name().to_string(),
            status: step.status,
            started_at: step.started_at,
            finished_at: step.finished_at,
        }
    }
}

/// Answer to a status query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatusReport {
    pub task_id: String,
    pub user_id: String,
    pub status: TaskStatus,
    pub progress: f64,
    pub current_step: Option<WorkflowStep>,
    pub estimated_time_remaining_seconds: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub steps: Vec<StepReport>,
}

/// Combine a task and its steps into a report
pub fn build_status_report(
    registry: &WorkflowRegistry,
    task: &Task,
    steps: &[TaskStep],
) -> TaskStatusReport {
    let completed: HashSet<WorkflowStep> = steps
        .iter()
        .filter(|step| step.is_completed())
        .map(|step| step.step)
        .collect();
    let estimate = ProgressEstimate::compute(registry, task.status, &completed);

    let mut step_reports: Vec<StepReport> = steps.iter().map(StepReport::from).collect();
    step_reports.sort_by_key(|report| report.step);

    TaskStatusReport {
        task_id: task.task_id.clone(),
        user_id: task.user_id.clone(),
        status: task.status,
        progress: estimate.progress,
        current_step: estimate.current_step,
        estimated_time_remaining_seconds: estimate.estimated_time_remaining_seconds,
        created_at: task.created_at,
        updated_at: task.updated_at,
        steps: step_reports,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn completed_prefix(n: usize) -> HashSet<WorkflowStep> {
        WorkflowStep::ALL.into_iter().take(n).collect()
    }

    #[test]
    fn test_nothing_completed() {
        let registry = WorkflowRegistry::standard();
        let estimate =
            ProgressEstimate::compute(&registry, TaskStatus::Processing, &HashSet::new());
        assert_eq!(estimate.current_step, Some(WorkflowStep::VideoDownload));
        assert!((estimate.progress - 30.0 / 1230.0).abs() < 1e-9);
        assert_eq!(estimate.estimated_time_remaining_seconds, 1200);
    }

    #[test]
    fn test_midway() {
        let registry = WorkflowRegistry::standard();
        // download + extraction done, labeling current
        let estimate =
            ProgressEstimate::compute(&registry, TaskStatus::Processing, &completed_prefix(2));
        assert_eq!(estimate.current_step, Some(WorkflowStep::Labeling));
        assert!((estimate.progress - 330.0 / 1230.0).abs() < 1e-9);
        assert_eq!(estimate.estimated_time_remaining_seconds, 900);
    }

    #[test]
    fn test_remaining_seconds_truncate() {
        let mut overrides = std::collections::HashMap::new();
        overrides.insert(WorkflowStep::VideoDownload, 61);
        let registry = WorkflowRegistry::with_nominal_durations(&overrides);
        let estimate =
            ProgressEstimate::compute(&registry, TaskStatus::Processing, &HashSet::new());
        // 1231 - 30.5
        assert_eq!(estimate.estimated_time_remaining_seconds, 1200);
    }

    #[test]
    fn test_current_step_is_first_gap_when_out_of_order() {
        let registry = WorkflowRegistry::standard();
        let completed: HashSet<_> = [WorkflowStep::VideoDownload, WorkflowStep::Labeling]
            .into_iter()
            .collect();
        let estimate = ProgressEstimate::compute(&registry, TaskStatus::Processing, &completed);
        assert_eq!(estimate.current_step, Some(WorkflowStep::FrameExtraction));
        assert!((estimate.progress - 420.0 / 1230.0).abs() < 1e-9);
    }

    #[test]
    fn test_completed_task_reports_full_progress() {
        let registry = WorkflowRegistry::standard();
        let estimate =
            ProgressEstimate::compute(&registry, TaskStatus::Completed, &completed_prefix(6));
        assert_eq!(estimate.progress, 1.0);
        assert_eq!(estimate.current_step, None);
        assert_eq!(estimate.estimated_time_remaining_seconds, 0);
    }

    #[test]
    fn test_report_orders_steps_and_labels_them() {
        let registry = WorkflowRegistry::standard();
        let now = Utc::now();
        let task = Task::new("t1", "u1", now);
        let step = |step, status| TaskStep {
            task_id: "t1".to_string(),
            step,
            status,
            started_at: Some(now),
            finished_at: None,
        };
        let steps = vec![
            step(WorkflowStep::FrameExtraction, StepStatus::Processing),
            step(WorkflowStep::VideoDownload, StepStatus::Completed),
        ];

        let report = build_status_report(&registry, &task, &steps);
        assert_eq!(report.steps[0].step, WorkflowStep::VideoDownload);
        assert_eq!(report.steps[0].display_name, "Video download");
        assert_eq!(report.current_step, Some(WorkflowStep::FrameExtraction));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["current_step"], "frame_extraction");
        assert_eq!(json["status"], "created");
    }

    proptest! {
        #[test]
        fn prop_progress_increases_along_workflow(
            durations in proptest::collection::vec(1u64..10_000, 6)
        ) {
            let overrides = WorkflowStep::ALL.into_iter().zip(durations).collect();
            let registry = WorkflowRegistry::with_nominal_durations(&overrides);

            let mut previous = -1.0;
            for n in 0..=WorkflowStep::ALL.len() {
                let status = if n == WorkflowStep::ALL.len() {
                    TaskStatus::Completed
                } else {
                    TaskStatus::Processing
                };
                let estimate = ProgressEstimate::compute(&registry, status, &completed_prefix(n));
                prop_assert!(estimate.progress > previous);
                prop_assert!((0.0..=1.0).contains(&estimate.progress));
                previous = estimate.progress;
            }
        }
    }
}
