use crate::error::CoreError;
use crate::lifecycle::Transition;
use crate::models::{
    BatchCompletion, BatchRejection, InstanceDetails, InstanceState, RejectionReason, TaskInstance,
};
use crate::repository::{short_id_pattern, SqliteRepository};
use crate::timezone;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use sqlx::SqliteConnection;
use std::collections::HashSet;
use tracing::debug;
use uuid::Uuid;

const DETAILS_SELECT: &str = r#"SELECT i.id, i.task_id, t.title, t.priority, i.occurrence_date,
    i.state, i.scheduled_at, i.completed_at
    FROM task_instances i
    JOIN tasks t ON t.id = i.task_id AND t.deleted_at IS NULL"#;

#[async_trait]
impl super::InstanceRepository for SqliteRepository {
    async fn find_instance_by_id(&self, id: Uuid) -> Result<Option<TaskInstance>, CoreError> {
        let mut conn = self.pool().acquire().await?;
        fetch_instance(&mut conn, id).await
    }

    async fn find_owned_instance(&self, owner_id: Uuid, id: Uuid) -> Result<TaskInstance, CoreError> {
        let mut conn = self.pool().acquire().await?;
        fetch_owned_instance(&mut conn, owner_id, id).await
    }

    async fn find_instances_for_task(&self, task_id: Uuid) -> Result<Vec<TaskInstance>, CoreError> {
        let instances = sqlx::query_as(
            "SELECT * FROM task_instances WHERE task_id = $1 ORDER BY occurrence_date",
        )
        .bind(task_id)
        .fetch_all(self.pool())
        .await?;
        Ok(instances)
    }

    async fn find_instances_by_short_id_prefix(
        &self,
        owner_id: Uuid,
        short_id: &str,
    ) -> Result<Vec<InstanceDetails>, CoreError> {
        let sql = format!("{DETAILS_SELECT} WHERE t.owner_id = $1 AND lower(hex(i.id)) LIKE $2");
        let instances = sqlx::query_as(&sql)
            .bind(owner_id)
            .bind(short_id_pattern(short_id))
            .fetch_all(self.pool())
            .await?;
        Ok(instances)
    }

    async fn list_instances(
        &self,
        owner_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
        tz: Tz,
    ) -> Result<Vec<InstanceDetails>, CoreError> {
        if from > to {
            return Err(CoreError::Validation(format!("{from} is after {to}")));
        }
        let (start, end) = timezone::local_range_utc(from, to, &tz);

        // Timed instances match on their instant in the caller's zone;
        // untimed ones on their calendar date.
        let sql = format!(
            r#"{DETAILS_SELECT}
            WHERE t.owner_id = $1 AND (
                (i.scheduled_at IS NOT NULL AND i.scheduled_at >= $2 AND i.scheduled_at < $3)
                OR (i.scheduled_at IS NULL AND i.occurrence_date BETWEEN $4 AND $5)
            )
            ORDER BY i.occurrence_date, i.scheduled_at, t.title"#
        );
        let instances = sqlx::query_as(&sql)
            .bind(owner_id)
            .bind(start)
            .bind(end)
            .bind(from)
            .bind(to)
            .fetch_all(self.pool())
            .await?;
        Ok(instances)
    }

    async fn transition_instance(
        &self,
        owner_id: Uuid,
        id: Uuid,
        transition: Transition,
    ) -> Result<TaskInstance, CoreError> {
        let mut conn = self.pool().acquire().await?;
        let instance = fetch_owned_instance(&mut conn, owner_id, id).await?;
        apply_transition(&mut conn, instance, transition).await
    }

    async fn batch_complete(&self, owner_id: Uuid, ids: &[Uuid]) -> Result<BatchCompletion, CoreError> {
        let mut conn = self.pool().acquire().await?;
        let mut seen = HashSet::new();
        let mut result = BatchCompletion::default();

        for &id in ids {
            if !seen.insert(id) {
                continue;
            }
            let attempt = match fetch_owned_instance(&mut conn, owner_id, id).await {
                Ok(instance) => apply_transition(&mut conn, instance, Transition::Complete).await,
                Err(err) => Err(err),
            };
            let reason = match attempt {
                Ok(instance) => {
                    result.completed.push(instance);
                    continue;
                }
                Err(CoreError::NotFound(_)) => RejectionReason::NotFound,
                Err(CoreError::OwnershipViolation(_)) => RejectionReason::NotOwned,
                Err(CoreError::InvalidTransition { from, .. }) => RejectionReason::InvalidTransition(from),
                Err(err) => return Err(err),
            };
            debug!(instance_id = %id, ?reason, "batch completion rejected");
            result.rejected.push(BatchRejection {
                instance_id: id,
                reason,
            });
        }
        Ok(result)
    }
}

pub(crate) async fn fetch_instance(
    conn: &mut SqliteConnection,
    id: Uuid,
) -> Result<Option<TaskInstance>, CoreError> {
    let instance = sqlx::query_as("SELECT * FROM task_instances WHERE id = $1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(instance)
}

pub(crate) async fn fetch_owned_instance(
    conn: &mut SqliteConnection,
    owner_id: Uuid,
    id: Uuid,
) -> Result<TaskInstance, CoreError> {
    let instance = fetch_instance(conn, id)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("instance {id}")))?;

    let owner: Option<(Uuid,)> = sqlx::query_as("SELECT owner_id FROM tasks WHERE id = $1 AND deleted_at IS NULL")
        .bind(instance.task_id)
        .fetch_optional(&mut *conn)
        .await?;
    match owner {
        Some((owner,)) if owner == owner_id => Ok(instance),
        Some(_) => Err(CoreError::OwnershipViolation(format!("instance {id}"))),
        None => Err(CoreError::NotFound(format!("instance {id}"))),
    }
}

/// Compare-and-set write of the next state. A concurrent writer that got
/// there first turns this into `InvalidTransition` from the state it left.
async fn apply_transition(
    conn: &mut SqliteConnection,
    instance: TaskInstance,
    transition: Transition,
) -> Result<TaskInstance, CoreError> {
    let next = instance.state.apply(transition)?;
    let now = Utc::now();
    let completed_at = (next == InstanceState::Completed).then_some(now);

    let result = sqlx::query(
        r#"UPDATE task_instances SET state = $1, completed_at = $2, updated_at = $3
        WHERE id = $4 AND state = $5"#,
    )
    .bind(next)
    .bind(completed_at)
    .bind(now)
    .bind(instance.id)
    .bind(instance.state)
    .execute(&mut *conn)
    .await?;

    let current = fetch_instance(conn, instance.id)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("instance {}", instance.id)))?;
    if result.rows_affected() == 0 {
        return Err(CoreError::InvalidTransition {
            from: current.state,
            transition,
        });
    }

    debug!(instance_id = %current.id, %transition, state = %current.state, "instance transitioned");
    Ok(current)
}
