use crate::error::CoreError;
use crate::models::Domain;
use crate::repository::{DomainRepository, SqliteRepository};
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

#[async_trait]
impl DomainRepository for SqliteRepository {
    async fn add_domain(&self, owner_id: Uuid, name: String) -> Result<Domain, CoreError> {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(CoreError::Validation("domain name cannot be empty".to_string()));
        }
        if self.find_domain_by_name(owner_id, &name).await?.is_some() {
            return Err(CoreError::Validation(format!("domain '{name}' already exists")));
        }

        let domain = sqlx::query_as(
            r#"INSERT INTO domains (id, owner_id, name, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, owner_id, name, created_at
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(owner_id)
        .bind(name)
        .bind(Utc::now())
        .fetch_one(self.pool())
        .await?;

        Ok(domain)
    }

    async fn find_domain_by_name(&self, owner_id: Uuid, name: &str) -> Result<Option<Domain>, CoreError> {
        let domain = sqlx::query_as("SELECT * FROM domains WHERE owner_id = $1 AND name = $2")
            .bind(owner_id)
            .bind(name)
            .fetch_optional(self.pool())
            .await?;
        Ok(domain)
    }

    async fn find_domains(&self, owner_id: Uuid) -> Result<Vec<Domain>, CoreError> {
        let domains = sqlx::query_as("SELECT * FROM domains WHERE owner_id = $1 ORDER BY name")
            .bind(owner_id)
            .fetch_all(self.pool())
            .await?;
        Ok(domains)
    }

    async fn delete_domain(&self, owner_id: Uuid, name: String) -> Result<(), CoreError> {
        let domain = self
            .find_domain_by_name(owner_id, &name)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("domain '{name}'")))?;

        let task_count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tasks WHERE domain_id = $1 AND deleted_at IS NULL")
            .bind(domain.id)
            .fetch_one(self.pool())
            .await?;

        if task_count.0 > 0 {
            return Err(CoreError::Validation(format!(
                "Cannot delete domain '{}' because it has {} associated task(s). Delete or move the tasks first.",
                name, task_count.0
            )));
        }

        sqlx::query("DELETE FROM domains WHERE id = $1")
            .bind(domain.id)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}
