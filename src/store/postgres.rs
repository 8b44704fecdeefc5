//! PostgreSQL task store.
//!
//! Each observation runs in one transaction: the task row is created if
//! missing and then locked with `SELECT ... FOR UPDATE`, which serializes
//! concurrent observations of the same task across tracker instances.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;

use super::TaskStateStore;
use crate::error::PipelineResult;
use crate::models::{StepObservation, Task, TaskRow, TaskStatus, TaskStep, TaskStepRow};

#[derive(Debug, Clone)]
pub struct PgTaskStore {
    pool: PgPool,
}

impl PgTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TaskStateStore for PgTaskStore {
    async fn record_observation(
        &self,
        observation: &StepObservation,
    ) -> PipelineResult<(Task, TaskStep)> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO tasks (task_id, user_id, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $4)
            ON CONFLICT (task_id) DO NOTHING
            "#,
        )
        .bind(&observation.task_id)
        .bind(&observation.user_id)
        .bind(TaskStatus::Created.as_str())
        .bind(observation.observed_at)
        .execute(&mut *tx)
        .await?;

        let task_row = sqlx::query_as::<_, TaskRow>(
            r#"
            SELECT task_id, user_id, status, created_at, updated_at
            FROM tasks
            WHERE task_id = $1
            FOR UPDATE
            "#,
        )
        .bind(&observation.task_id)
        .fetch_one(&mut *tx)
        .await?;

        let step_row = sqlx::query_as::<_, TaskStepRow>(
            r#"
            SELECT task_id, step_name, status, started_at, finished_at
            FROM task_steps
            WHERE task_id = $1 AND step_name = $2
            "#,
        )
        .bind(&observation.task_id)
        .bind(observation.step.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let task = Task::observe(Some(Task::try_from(task_row)?), observation);
        let step = TaskStep::observe(step_row.map(TaskStep::try_from).transpose()?, observation);

        sqlx::query(
            r#"
            UPDATE tasks
            SET status = $2, updated_at = $3
            WHERE task_id = $1
            "#,
        )
        .bind(&task.task_id)
        .bind(task.status.as_str())
        .bind(task.updated_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO task_steps (task_id, step_name, status, started_at, finished_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (task_id, step_name) DO UPDATE
            SET status = EXCLUDED.status,
                started_at = EXCLUDED.started_at,
                finished_at = EXCLUDED.finished_at
            "#,
        )
        .bind(&step.task_id)
        .bind(step.step.as_str())
        .bind(step.status.as_str())
        .bind(step.started_at)
        .bind(step.finished_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(
            task_id = %task.task_id,
            step = %step.step,
            step_status = %step.status,
            task_status = %task.status,
            "Observation committed"
        );
        Ok((task, step))
    }

    async fn find_task(&self, task_id: &str) -> PipelineResult<Option<Task>> {
        let row = sqlx::query_as::<_, TaskRow>(
            r#"
            SELECT task_id, user_id, status, created_at, updated_at
            FROM tasks
            WHERE task_id = $1
            "#,
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Task::try_from).transpose()
    }

    async fn task_steps(&self, task_id: &str) -> PipelineResult<Vec<TaskStep>> {
        let rows = sqlx::query_as::<_, TaskStepRow>(
            r#"
            SELECT task_id, step_name, status, started_at, finished_at
            FROM task_steps
            WHERE task_id = $1
            "#,
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;

        let mut steps = rows
            .into_iter()
            .map(TaskStep::try_from)
            .collect::<PipelineResult<Vec<_>>>()?;
        steps.sort_by_key(|step| step.step);
        Ok(steps)
    }

    fn store_name(&self) -> &'static str {
        "postgres"
    }
}
