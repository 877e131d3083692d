use crate::error::CoreError;
use crate::models::{
    InsertOutcome, MaterializationFailure, MaterializationReport, Task, TaskInstance, TaskRow,
};
use crate::recurrence::{DateWindow, MaterializationManager};
use crate::repository::tasks::fetch_task;
use crate::repository::{MaterializationRepository, SqliteRepository};
use crate::timezone;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use sqlx::SqliteConnection;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[async_trait]
impl MaterializationRepository for SqliteRepository {
    async fn try_insert_instance(
        &self,
        task_id: Uuid,
        date: NaiveDate,
    ) -> Result<InsertOutcome, CoreError> {
        let mut conn = self.pool().acquire().await?;
        let task = fetch_task(&mut conn, task_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("task {task_id}")))?;
        insert_instance(&mut conn, &task, date).await
    }

    async fn ensure_instance(&self, task_id: Uuid, date: NaiveDate) -> Result<TaskInstance, CoreError> {
        Ok(self.try_insert_instance(task_id, date).await?.into_instance())
    }

    async fn materialize_window(
        &self,
        task_id: Uuid,
        window: DateWindow,
    ) -> Result<MaterializationReport, CoreError> {
        let mut conn = self.pool().acquire().await?;
        let task = fetch_task(&mut conn, task_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("task {task_id}")))?;
        if !task.is_recurring {
            return Err(CoreError::Validation(format!("task {task_id} is not recurring")));
        }
        materialize_in(&mut conn, self.materialization_manager(), &task, window).await
    }

    async fn refresh_materialization(&self, owner_id: Uuid) -> Result<MaterializationReport, CoreError> {
        let rows: Vec<TaskRow> =
            sqlx::query_as(
                "SELECT * FROM tasks WHERE owner_id = $1 AND is_recurring = 1 AND deleted_at IS NULL",
            )
                .bind(owner_id)
                .fetch_all(self.pool())
                .await?;

        let mut conn = self.pool().acquire().await?;
        let mut report = MaterializationReport::default();
        for row in rows {
            let task = Task::try_from(row)?;
            let today = timezone::today_in(&task.tz()?);
            if let Some(window) = self.materialization_manager().window_for(&task, today) {
                let task_report =
                    materialize_in(&mut conn, self.materialization_manager(), &task, window).await?;
                report.merge(task_report);
            }
        }

        info!(
            %owner_id,
            created = report.created,
            existing = report.existing,
            failed = report.failures.len(),
            "materialization refreshed"
        );
        Ok(report)
    }
}

/// Insert the instance for (task, date) unless one exists.
///
/// The unique (task_id, occurrence_date) constraint decides races: the loser
/// gets the winner's row back as `AlreadyExists`. Tasks that are not
/// recurring (including ones disabled or deleted concurrently) get no new rows.
pub(crate) async fn insert_instance(
    conn: &mut SqliteConnection,
    task: &Task,
    date: NaiveDate,
) -> Result<InsertOutcome, CoreError> {
    let now = Utc::now();
    let inserted: Result<Option<TaskInstance>, sqlx::Error> = sqlx::query_as(
        r#"INSERT INTO task_instances (
            id, task_id, occurrence_date, state, scheduled_at, completed_at, created_at, updated_at
        )
        SELECT $1, $2, $3, 'pending', $4, NULL, $5, $5
        WHERE EXISTS (SELECT 1 FROM tasks WHERE id = $2 AND is_recurring = 1 AND deleted_at IS NULL)
        ON CONFLICT (task_id, occurrence_date) DO NOTHING
        RETURNING *"#,
    )
    .bind(Uuid::now_v7())
    .bind(task.id)
    .bind(date)
    .bind(task.scheduled_at_for(date)?)
    .bind(now)
    .fetch_optional(&mut *conn)
    .await;

    match inserted {
        Ok(Some(instance)) => return Ok(InsertOutcome::Inserted(instance)),
        Ok(None) => {}
        Err(sqlx::Error::Database(err)) if err.is_unique_violation() => {}
        Err(err) => return Err(err.into()),
    }

    match fetch_instance_for_date(conn, task.id, date).await? {
        Some(existing) => {
            debug!(task_id = %task.id, %date, "instance already materialized");
            Ok(InsertOutcome::AlreadyExists(existing))
        }
        None => Err(CoreError::Validation(format!(
            "task {} is not recurring",
            task.id
        ))),
    }
}

/// Ensure an instance for every occurrence in `window`. A failing date is
/// logged and reported without stopping the rest.
pub(crate) async fn materialize_in(
    conn: &mut SqliteConnection,
    manager: &MaterializationManager,
    task: &Task,
    window: DateWindow,
) -> Result<MaterializationReport, CoreError> {
    let dates = manager.occurrences(task, window)?;
    let mut report = MaterializationReport::default();

    for date in dates {
        match insert_instance(conn, task, date).await {
            Ok(outcome) => report.record(outcome),
            Err(err) => {
                warn!(task_id = %task.id, %date, error = %err, "failed to materialize occurrence");
                report.failures.push(MaterializationFailure {
                    date,
                    error: err.to_string(),
                });
            }
        }
    }

    debug!(
        task_id = %task.id,
        from = %window.start(),
        to = %window.end(),
        created = report.created,
        existing = report.existing,
        "materialized window"
    );
    Ok(report)
}

pub(crate) async fn fetch_instance_for_date(
    conn: &mut SqliteConnection,
    task_id: Uuid,
    date: NaiveDate,
) -> Result<Option<TaskInstance>, CoreError> {
    let instance = sqlx::query_as(
        "SELECT * FROM task_instances WHERE task_id = $1 AND occurrence_date = $2",
    )
    .bind(task_id)
    .bind(date)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(instance)
}
