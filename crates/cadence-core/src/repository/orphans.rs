use crate::error::CoreError;
use crate::models::{InstanceState, OrphanReport, Task, TaskInstance};
use crate::recurrence::{DateWindow, RecurrenceRule, RuleEvaluator, MAX_WINDOW_DAYS};
use crate::repository::tasks::fetch_task;
use crate::repository::SqliteRepository;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::SqliteConnection;
use std::collections::HashSet;
use tracing::{debug, info};
use uuid::Uuid;

#[async_trait]
impl super::OrphanRepository for SqliteRepository {
    async fn on_recurrence_disabled(&self, task_id: Uuid) -> Result<OrphanReport, CoreError> {
        let mut tx = self.pool().begin().await?;
        let report = disabled_in_tx(&mut tx, task_id).await?;
        tx.commit().await?;
        Ok(report)
    }

    async fn on_rule_changed(
        &self,
        task_id: Uuid,
        old_rule: &RecurrenceRule,
        new_rule: &RecurrenceRule,
    ) -> Result<OrphanReport, CoreError> {
        let mut tx = self.pool().begin().await?;
        let mut task = fetch_task(&mut tx, task_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("task {task_id}")))?;
        // The stored row may still carry the old rule
        task.recurrence_rule = Some(new_rule.clone());

        let report = rule_changed_in_tx(&mut tx, &task, old_rule, new_rule).await?;
        let materialized = self.rematerialize_in_tx(&mut tx, &task).await?;
        tx.commit().await?;

        debug!(%task_id, created = materialized.created, "rematerialized after rule change");
        Ok(report)
    }
}

/// Delete every pending instance of the task; completed and skipped ones stay.
pub(crate) async fn disabled_in_tx(
    conn: &mut SqliteConnection,
    task_id: Uuid,
) -> Result<OrphanReport, CoreError> {
    let instances = instances_of(conn, task_id).await?;
    let (pending, kept): (Vec<_>, Vec<_>) = instances
        .into_iter()
        .partition(|instance| instance.state == InstanceState::Pending);

    let deleted = delete_pending(conn, pending.iter().map(|i| i.id)).await?;
    info!(%task_id, removed = deleted.len(), retained = kept.len(), "recurrence disabled");
    Ok(OrphanReport {
        deleted_instance_ids: deleted,
        retained: kept.len(),
    })
}

/// Delete pending instances whose dates `new_rule` (anchored at the task's
/// start date) no longer produces, and re-derive the scheduled time of the
/// pending instances that remain from `new_rule`'s anchor time.
pub(crate) async fn rule_changed_in_tx(
    conn: &mut SqliteConnection,
    task: &Task,
    old_rule: &RecurrenceRule,
    new_rule: &RecurrenceRule,
) -> Result<OrphanReport, CoreError> {
    let start = task
        .recurrence_start
        .ok_or_else(|| CoreError::Validation(format!("task {} has no recurrence start", task.id)))?;

    let instances = instances_of(conn, task.id).await?;
    let (pending, kept): (Vec<_>, Vec<_>) = instances
        .into_iter()
        .partition(|instance| instance.state == InstanceState::Pending);

    let mut still_valid = HashSet::new();
    if let (Some(first), Some(last)) = (pending.first(), pending.last()) {
        let evaluator = RuleEvaluator::new(new_rule, start);
        let mut cursor = first.occurrence_date;
        // Evaluations are capped at MAX_WINDOW_DAYS, so walk long spans in chunks
        while cursor <= last.occurrence_date {
            let end = last
                .occurrence_date
                .min(cursor + Duration::days(MAX_WINDOW_DAYS - 1));
            still_valid.extend(evaluator.occurrences(DateWindow::new(cursor, end)?)?);
            cursor = end + Duration::days(1);
        }
    }

    let (survivors, orphans): (Vec<_>, Vec<_>) = pending
        .into_iter()
        .partition(|instance| still_valid.contains(&instance.occurrence_date));
    let deleted = delete_pending(conn, orphans.iter().map(|i| i.id)).await?;

    let target = Task {
        recurrence_rule: Some(new_rule.clone()),
        ..task.clone()
    };
    let now = Utc::now();
    for instance in &survivors {
        let scheduled_at = target.scheduled_at_for(instance.occurrence_date)?;
        if scheduled_at != instance.scheduled_at {
            sqlx::query(
                "UPDATE task_instances SET scheduled_at = $1, updated_at = $2 WHERE id = $3 AND state = 'pending'",
            )
            .bind(scheduled_at)
            .bind(now)
            .bind(instance.id)
            .execute(&mut *conn)
            .await?;
        }
    }

    info!(
        task_id = %task.id,
        from = %old_rule.describe(),
        to = %new_rule.describe(),
        removed = deleted.len(),
        kept_pending = survivors.len(),
        "recurrence rule changed"
    );
    Ok(OrphanReport {
        deleted_instance_ids: deleted,
        retained: kept.len(),
    })
}

async fn instances_of(
    conn: &mut SqliteConnection,
    task_id: Uuid,
) -> Result<Vec<TaskInstance>, CoreError> {
    let instances = sqlx::query_as(
        "SELECT * FROM task_instances WHERE task_id = $1 ORDER BY occurrence_date",
    )
    .bind(task_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(instances)
}

/// Deletes only rows still pending; an instance completed in the meantime survives.
async fn delete_pending(
    conn: &mut SqliteConnection,
    ids: impl Iterator<Item = Uuid>,
) -> Result<Vec<Uuid>, CoreError> {
    let mut deleted = Vec::new();
    for id in ids {
        let result = sqlx::query("DELETE FROM task_instances WHERE id = $1 AND state = 'pending'")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        if result.rows_affected() > 0 {
            deleted.push(id);
        } else {
            debug!(instance_id = %id, "instance left pending state before cleanup");
        }
    }
    Ok(deleted)
}
