use crate::error::CoreError;
use crate::lifecycle::{RecurrenceChange, Transition};
use crate::models::{
    InstanceState, MaterializationReport, NewTaskData, OrphanReport, Task, TaskDeletion,
    TaskPriority, TaskRow, TaskUpdate, UpdateTaskData,
};
use crate::recurrence::RecurrenceRule;
use crate::repository::{materialization, orphans, short_id_pattern, SqliteRepository};
use crate::timezone;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqliteConnection;
use tracing::{debug, info};
use uuid::Uuid;

pub const DEFAULT_DURATION_MINUTES: i64 = 30;
pub const MAX_DURATION_MINUTES: i64 = 24 * 60;

#[async_trait]
impl super::TaskRepository for SqliteRepository {
    async fn add_task(&self, owner_id: Uuid, data: NewTaskData) -> Result<Task, CoreError> {
        let title = validate_title(&data.title)?;
        let timezone_name = data.timezone.unwrap_or_else(|| "UTC".to_string());
        let tz = timezone::parse_timezone(&timezone_name)?;
        let duration_minutes =
            validate_duration(data.duration_minutes.unwrap_or(DEFAULT_DURATION_MINUTES))?;
        let recurrence_rule = data.recurrence.map(RecurrenceRule::try_from).transpose()?;
        let is_recurring = recurrence_rule.is_some();

        if is_recurring && data.due_date.is_some() {
            return Err(CoreError::Validation(
                "a due date only applies to one-off tasks".to_string(),
            ));
        }
        if !is_recurring && data.recurrence_start.is_some() {
            return Err(CoreError::Validation(
                "a recurrence start needs a recurrence rule".to_string(),
            ));
        }

        let today = timezone::today_in(&tz);
        let now = Utc::now();
        let task = Task {
            id: Uuid::now_v7(),
            owner_id,
            domain_id: data.domain_id,
            title,
            priority: data.priority.unwrap_or(TaskPriority::None),
            duration_minutes,
            timezone: timezone_name,
            due_date: data.due_date,
            completed_at: None,
            recurrence_rule,
            recurrence_start: is_recurring.then(|| data.recurrence_start.unwrap_or(today)),
            is_recurring,
            created_at: now,
            updated_at: now,
        };

        let mut tx = self.pool().begin().await?;
        if let Some(domain_id) = task.domain_id {
            ensure_domain_owned(&mut tx, owner_id, domain_id).await?;
        }
        insert_task(&mut tx, &task).await?;

        if let Some(window) = self.materialization_manager().window_for(&task, today) {
            let report =
                materialization::materialize_in(&mut tx, self.materialization_manager(), &task, window)
                    .await?;
            info!(task_id = %task.id, created = report.created, "materialized initial instances");
        }
        tx.commit().await?;

        debug!(task_id = %task.id, recurring = task.is_recurring, "task created");
        Ok(task)
    }

    async fn find_task_by_id(&self, id: Uuid) -> Result<Option<Task>, CoreError> {
        let row: Option<TaskRow> = sqlx::query_as("SELECT * FROM tasks WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.map(Task::try_from).transpose()
    }

    async fn find_owned_task(&self, owner_id: Uuid, id: Uuid) -> Result<Task, CoreError> {
        let mut conn = self.pool().acquire().await?;
        fetch_owned_task(&mut conn, owner_id, id).await
    }

    async fn find_tasks_by_short_id_prefix(
        &self,
        owner_id: Uuid,
        short_id: &str,
    ) -> Result<Vec<Task>, CoreError> {
        let rows: Vec<TaskRow> =
            sqlx::query_as("SELECT * FROM tasks WHERE owner_id = $1 AND deleted_at IS NULL AND lower(hex(id)) LIKE $2")
                .bind(owner_id)
                .bind(short_id_pattern(short_id))
                .fetch_all(self.pool())
                .await?;
        rows.into_iter().map(Task::try_from).collect()
    }

    async fn find_tasks(&self, owner_id: Uuid) -> Result<Vec<Task>, CoreError> {
        let rows: Vec<TaskRow> =
            sqlx::query_as(
                "SELECT * FROM tasks WHERE owner_id = $1 AND deleted_at IS NULL ORDER BY created_at, id",
            )
                .bind(owner_id)
                .fetch_all(self.pool())
                .await?;
        rows.into_iter().map(Task::try_from).collect()
    }

    async fn update_task(
        &self,
        owner_id: Uuid,
        id: Uuid,
        data: UpdateTaskData,
    ) -> Result<TaskUpdate, CoreError> {
        let mut tx = self.pool().begin().await?;

        let before = fetch_owned_task(&mut tx, owner_id, id).await?;
        let after = apply_update(&before, data)?;
        if after.domain_id != before.domain_id {
            if let Some(domain_id) = after.domain_id {
                ensure_domain_owned(&mut tx, owner_id, domain_id).await?;
            }
        }
        write_task(&mut tx, &after).await?;

        let change = RecurrenceChange::classify(&before, &after);
        let mut orphans = OrphanReport::default();
        let mut materialized = MaterializationReport::default();
        match &change {
            RecurrenceChange::None => {}
            RecurrenceChange::Disabled => {
                orphans = orphans::disabled_in_tx(&mut tx, after.id).await?;
            }
            RecurrenceChange::Enabled => {
                materialized = self.rematerialize_in_tx(&mut tx, &after).await?;
            }
            RecurrenceChange::RuleChanged { old, new } => {
                orphans = orphans::rule_changed_in_tx(&mut tx, &after, old, new).await?;
                materialized = self.rematerialize_in_tx(&mut tx, &after).await?;
            }
        }
        tx.commit().await?;

        info!(
            task_id = %after.id,
            edit = ?change.edit(),
            removed = orphans.deleted_instance_ids.len(),
            created = materialized.created,
            "task updated"
        );
        Ok(TaskUpdate {
            task: after,
            edit: change.edit(),
            orphans,
            materialized,
        })
    }

    async fn delete_task(&self, owner_id: Uuid, id: Uuid) -> Result<TaskDeletion, CoreError> {
        let mut tx = self.pool().begin().await?;
        fetch_owned_task(&mut tx, owner_id, id).await?;

        let instance_ids: Vec<(Uuid,)> =
            sqlx::query_as("SELECT id FROM task_instances WHERE task_id = $1")
                .bind(id)
                .fetch_all(&mut *tx)
                .await?;

        let now = Utc::now();
        sqlx::query("UPDATE tasks SET deleted_at = $1, updated_at = $1 WHERE id = $2")
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        debug!(task_id = %id, instances = instance_ids.len(), "task marked deleted");
        Ok(TaskDeletion {
            task_id: id,
            instance_ids: instance_ids.into_iter().map(|(id,)| id).collect(),
        })
    }

    async fn restore_task(&self, owner_id: Uuid, id: Uuid) -> Result<Task, CoreError> {
        let mut conn = self.pool().acquire().await?;
        let owner: Option<(Uuid,)> = sqlx::query_as("SELECT owner_id FROM tasks WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        match owner {
            None => return Err(CoreError::NotFound(format!("task {id}"))),
            Some((owner,)) if owner != owner_id => {
                return Err(CoreError::OwnershipViolation(format!("task {id}")))
            }
            Some(_) => {}
        }

        let result = sqlx::query(
            "UPDATE tasks SET deleted_at = NULL, updated_at = $1 WHERE id = $2 AND deleted_at IS NOT NULL",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&mut *conn)
        .await?;
        if result.rows_affected() > 0 {
            debug!(task_id = %id, "task restored");
        }
        fetch_owned_task(&mut conn, owner_id, id).await
    }

    async fn purge_task(&self, owner_id: Uuid, id: Uuid) -> Result<bool, CoreError> {
        // Instances go with the task by cascade
        let result = sqlx::query(
            "DELETE FROM tasks WHERE id = $1 AND owner_id = $2 AND deleted_at IS NOT NULL",
        )
        .bind(id)
        .bind(owner_id)
        .execute(self.pool())
        .await?;
        let purged = result.rows_affected() > 0;
        if purged {
            info!(task_id = %id, "task purged");
        }
        Ok(purged)
    }

    async fn complete_task(&self, owner_id: Uuid, id: Uuid) -> Result<Task, CoreError> {
        self.set_task_completion(owner_id, id, Transition::Complete).await
    }

    async fn reopen_task(&self, owner_id: Uuid, id: Uuid) -> Result<Task, CoreError> {
        self.set_task_completion(owner_id, id, Transition::Reopen).await
    }
}

impl SqliteRepository {
    pub(crate) async fn rematerialize_in_tx(
        &self,
        conn: &mut SqliteConnection,
        task: &Task,
    ) -> Result<MaterializationReport, CoreError> {
        let today = timezone::today_in(&task.tz()?);
        match self.materialization_manager().window_for(task, today) {
            Some(window) => {
                materialization::materialize_in(conn, self.materialization_manager(), task, window)
                    .await
            }
            None => Ok(MaterializationReport::default()),
        }
    }

    async fn set_task_completion(
        &self,
        owner_id: Uuid,
        id: Uuid,
        transition: Transition,
    ) -> Result<Task, CoreError> {
        let mut conn = self.pool().acquire().await?;
        let task = fetch_owned_task(&mut conn, owner_id, id).await?;
        if task.is_recurring {
            return Err(CoreError::Validation(
                "recurring tasks are completed per instance".to_string(),
            ));
        }

        let state = task_state(&task);
        let next = state.apply(transition)?;
        let completed_at = (next == InstanceState::Completed).then(Utc::now);

        // Guarded on the prior state so two racing requests can't both apply
        let result = sqlx::query(
            r#"UPDATE tasks SET completed_at = $1, updated_at = $2
            WHERE id = $3 AND is_recurring = 0 AND deleted_at IS NULL AND (completed_at IS NULL) = $4"#,
        )
        .bind(completed_at)
        .bind(Utc::now())
        .bind(id)
        .bind(state == InstanceState::Pending)
        .execute(&mut *conn)
        .await?;

        let current = fetch_owned_task(&mut conn, owner_id, id).await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::InvalidTransition {
                from: task_state(&current),
                transition,
            });
        }
        Ok(current)
    }
}

fn task_state(task: &Task) -> InstanceState {
    if task.completed_at.is_some() {
        InstanceState::Completed
    } else {
        InstanceState::Pending
    }
}

fn validate_title(title: &str) -> Result<String, CoreError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(CoreError::Validation("title cannot be empty".to_string()));
    }
    Ok(title.to_string())
}

fn validate_duration(minutes: i64) -> Result<i64, CoreError> {
    if !(1..=MAX_DURATION_MINUTES).contains(&minutes) {
        return Err(CoreError::Validation(format!(
            "duration must be between 1 and {MAX_DURATION_MINUTES} minutes, got {minutes}"
        )));
    }
    Ok(minutes)
}

/// The task as it looks after `data` is applied to `before`.
fn apply_update(before: &Task, data: UpdateTaskData) -> Result<Task, CoreError> {
    let mut task = before.clone();

    if let Some(title) = data.title {
        task.title = validate_title(&title)?;
    }
    if let Some(domain_id) = data.domain_id {
        task.domain_id = domain_id;
    }
    if let Some(priority) = data.priority {
        task.priority = priority;
    }
    if let Some(minutes) = data.duration_minutes {
        task.duration_minutes = validate_duration(minutes)?;
    }
    if let Some(name) = data.timezone {
        timezone::validate_timezone(&name)?;
        task.timezone = name;
    }
    if let Some(input) = data.recurrence {
        task.recurrence_rule = Some(RecurrenceRule::try_from(input)?);
        task.is_recurring = true;
    }
    if let Some(start) = data.recurrence_start {
        task.recurrence_start = Some(start);
    }
    if let Some(flag) = data.is_recurring {
        task.is_recurring = flag;
    }

    if task.is_recurring {
        if task.recurrence_rule.is_none() {
            return Err(CoreError::Validation(
                "cannot enable recurrence without a rule".to_string(),
            ));
        }
        if matches!(data.due_date, Some(Some(_))) {
            return Err(CoreError::Validation(
                "a due date only applies to one-off tasks".to_string(),
            ));
        }
        if task.recurrence_start.is_none() {
            task.recurrence_start = Some(timezone::today_in(&task.tz()?));
        }
        task.due_date = None;
        task.completed_at = None;
    } else if let Some(due_date) = data.due_date {
        task.due_date = due_date;
    }

    task.updated_at = Utc::now();
    Ok(task)
}

/// Tasks marked deleted read as missing.
pub(crate) async fn fetch_task(
    conn: &mut SqliteConnection,
    id: Uuid,
) -> Result<Option<Task>, CoreError> {
    let row: Option<TaskRow> = sqlx::query_as("SELECT * FROM tasks WHERE id = $1 AND deleted_at IS NULL")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    row.map(Task::try_from).transpose()
}

pub(crate) async fn fetch_owned_task(
    conn: &mut SqliteConnection,
    owner_id: Uuid,
    id: Uuid,
) -> Result<Task, CoreError> {
    let task = fetch_task(conn, id)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("task {id}")))?;
    if task.owner_id != owner_id {
        return Err(CoreError::OwnershipViolation(format!("task {id}")));
    }
    Ok(task)
}

async fn ensure_domain_owned(
    conn: &mut SqliteConnection,
    owner_id: Uuid,
    domain_id: Uuid,
) -> Result<(), CoreError> {
    let owner: Option<(Uuid,)> = sqlx::query_as("SELECT owner_id FROM domains WHERE id = $1")
        .bind(domain_id)
        .fetch_optional(&mut *conn)
        .await?;
    match owner {
        None => Err(CoreError::NotFound(format!("domain {domain_id}"))),
        Some((owner,)) if owner != owner_id => {
            Err(CoreError::OwnershipViolation(format!("domain {domain_id}")))
        }
        Some(_) => Ok(()),
    }
}

fn rule_json(task: &Task) -> Result<Option<String>, CoreError> {
    Ok(task
        .recurrence_rule
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?)
}

async fn insert_task(conn: &mut SqliteConnection, task: &Task) -> Result<(), CoreError> {
    sqlx::query(
        r#"INSERT INTO tasks (
            id, owner_id, domain_id, title, priority, duration_minutes, timezone, due_date,
            completed_at, recurrence_rule, recurrence_start, is_recurring, created_at, updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)"#,
    )
    .bind(task.id)
    .bind(task.owner_id)
    .bind(task.domain_id)
    .bind(&task.title)
    .bind(&task.priority)
    .bind(task.duration_minutes)
    .bind(&task.timezone)
    .bind(task.due_date)
    .bind(task.completed_at)
    .bind(rule_json(task)?)
    .bind(task.recurrence_start)
    .bind(task.is_recurring)
    .bind(task.created_at)
    .bind(task.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn write_task(conn: &mut SqliteConnection, task: &Task) -> Result<(), CoreError> {
    sqlx::query(
        r#"UPDATE tasks SET
            domain_id = $1, title = $2, priority = $3, duration_minutes = $4, timezone = $5,
            due_date = $6, completed_at = $7, recurrence_rule = $8, recurrence_start = $9,
            is_recurring = $10, updated_at = $11
        WHERE id = $12"#,
    )
    .bind(task.domain_id)
    .bind(&task.title)
    .bind(&task.priority)
    .bind(task.duration_minutes)
    .bind(&task.timezone)
    .bind(task.due_date)
    .bind(task.completed_at)
    .bind(rule_json(task)?)
    .bind(task.recurrence_start)
    .bind(task.is_recurring)
    .bind(task.updated_at)
    .bind(task.id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}
