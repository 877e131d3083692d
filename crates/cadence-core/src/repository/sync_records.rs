use crate::error::CoreError;
use crate::models::{SyncEntity, SyncRecord};
use crate::repository::SqliteRepository;
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

#[async_trait]
impl super::SyncRecordRepository for SqliteRepository {
    async fn find_sync_record(&self, entity: SyncEntity) -> Result<Option<SyncRecord>, CoreError> {
        let record = sqlx::query_as(
            "SELECT * FROM sync_records WHERE entity_kind = $1 AND entity_id = $2",
        )
        .bind(entity.kind)
        .bind(entity.id)
        .fetch_optional(self.pool())
        .await?;
        Ok(record)
    }

    async fn find_sync_records(&self, owner_id: Uuid) -> Result<Vec<SyncRecord>, CoreError> {
        let records = sqlx::query_as(
            "SELECT * FROM sync_records WHERE owner_id = $1 ORDER BY entity_kind, entity_id",
        )
        .bind(owner_id)
        .fetch_all(self.pool())
        .await?;
        Ok(records)
    }

    async fn record_synced(
        &self,
        owner_id: Uuid,
        entity: SyncEntity,
        remote_event_id: &str,
        content_hash: &str,
    ) -> Result<SyncRecord, CoreError> {
        let record = sqlx::query_as(
            r#"INSERT INTO sync_records (
                entity_kind, entity_id, owner_id, remote_event_id, content_hash,
                last_synced_at, last_error, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, NULL, $6)
            ON CONFLICT (entity_kind, entity_id) DO UPDATE SET
                remote_event_id = excluded.remote_event_id,
                content_hash = excluded.content_hash,
                last_synced_at = excluded.last_synced_at,
                last_error = NULL,
                updated_at = excluded.updated_at
            RETURNING *"#,
        )
        .bind(entity.kind)
        .bind(entity.id)
        .bind(owner_id)
        .bind(remote_event_id)
        .bind(content_hash)
        .bind(Utc::now())
        .fetch_one(self.pool())
        .await?;
        Ok(record)
    }

    async fn record_sync_failure(
        &self,
        owner_id: Uuid,
        entity: SyncEntity,
        error: &str,
    ) -> Result<(), CoreError> {
        sqlx::query(
            r#"INSERT INTO sync_records (
                entity_kind, entity_id, owner_id, remote_event_id, content_hash,
                last_synced_at, last_error, updated_at
            ) VALUES ($1, $2, $3, NULL, NULL, NULL, $4, $5)
            ON CONFLICT (entity_kind, entity_id) DO UPDATE SET
                content_hash = NULL,
                last_error = excluded.last_error,
                updated_at = excluded.updated_at"#,
        )
        .bind(entity.kind)
        .bind(entity.id)
        .bind(owner_id)
        .bind(error)
        .bind(Utc::now())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn delete_sync_record(&self, entity: SyncEntity) -> Result<(), CoreError> {
        sqlx::query("DELETE FROM sync_records WHERE entity_kind = $1 AND entity_id = $2")
            .bind(entity.kind)
            .bind(entity.id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    async fn clear_sync_records(&self, owner_id: Uuid) -> Result<u64, CoreError> {
        let result = sqlx::query("DELETE FROM sync_records WHERE owner_id = $1")
            .bind(owner_id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected())
    }

    async fn find_syncable_entities(&self, owner_id: Uuid) -> Result<Vec<SyncEntity>, CoreError> {
        let tasks: Vec<(Uuid,)> =
            sqlx::query_as("SELECT id FROM tasks WHERE owner_id = $1 ORDER BY created_at, id")
                .bind(owner_id)
                .fetch_all(self.pool())
                .await?;
        let instances: Vec<(Uuid,)> = sqlx::query_as(
            r#"SELECT i.id FROM task_instances i
            JOIN tasks t ON t.id = i.task_id
            WHERE t.owner_id = $1
            ORDER BY i.occurrence_date, i.id"#,
        )
        .bind(owner_id)
        .fetch_all(self.pool())
        .await?;

        let mut entities: Vec<SyncEntity> = tasks.into_iter().map(|(id,)| SyncEntity::task(id)).collect();
        entities.extend(instances.into_iter().map(|(id,)| SyncEntity::instance(id)));
        Ok(entities)
    }
}
