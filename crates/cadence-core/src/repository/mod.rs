use crate::db::DbPool;
use crate::error::CoreError;
use crate::lifecycle::Transition;
use crate::models::{
    BatchCompletion, Domain, InsertOutcome, InstanceDetails, MaterializationReport, NewTaskData,
    OrphanReport, SyncEntity, SyncRecord, Task, TaskDeletion, TaskInstance, TaskUpdate,
    UpdateTaskData,
};
use crate::recurrence::{DateWindow, MaterializationManager, RecurrenceRule};
use async_trait::async_trait;
use chrono::NaiveDate;
use chrono_tz::Tz;
use uuid::Uuid;

pub mod domains;
pub mod instances;
pub mod materialization;
pub mod orphans;
pub mod sync_records;
pub mod tasks;

// Traits are defined here and implemented in the module of the same domain

/// Domain-specific trait for task operations
#[async_trait]
pub trait TaskRepository {
    /// Creates the task and, if it recurs, its first horizon of instances in one transaction.
    async fn add_task(&self, owner_id: Uuid, data: NewTaskData) -> Result<Task, CoreError>;
    /// Also finds tasks whose deletion can still be undone; every other lookup hides them.
    async fn find_task_by_id(&self, id: Uuid) -> Result<Option<Task>, CoreError>;
    async fn find_owned_task(&self, owner_id: Uuid, id: Uuid) -> Result<Task, CoreError>;
    async fn find_tasks_by_short_id_prefix(&self, owner_id: Uuid, short_id: &str) -> Result<Vec<Task>, CoreError>;
    async fn find_tasks(&self, owner_id: Uuid) -> Result<Vec<Task>, CoreError>;
    /// Applies the edit, then reconciles instances against the new recurrence in the same transaction.
    async fn update_task(&self, owner_id: Uuid, id: Uuid, data: UpdateTaskData) -> Result<TaskUpdate, CoreError>;
    /// Marks the task deleted. Rows stay until `purge_task`, so `restore_task` can bring it back.
    async fn delete_task(&self, owner_id: Uuid, id: Uuid) -> Result<TaskDeletion, CoreError>;
    async fn restore_task(&self, owner_id: Uuid, id: Uuid) -> Result<Task, CoreError>;
    /// Removes a task marked deleted, with its instances. False when there was nothing to purge.
    async fn purge_task(&self, owner_id: Uuid, id: Uuid) -> Result<bool, CoreError>;
    /// One-off tasks only.
    async fn complete_task(&self, owner_id: Uuid, id: Uuid) -> Result<Task, CoreError>;
    async fn reopen_task(&self, owner_id: Uuid, id: Uuid) -> Result<Task, CoreError>;
}

/// Domain-specific trait for domain (task grouping) operations
#[async_trait]
pub trait DomainRepository {
    async fn add_domain(&self, owner_id: Uuid, name: String) -> Result<Domain, CoreError>;
    async fn find_domain_by_name(&self, owner_id: Uuid, name: &str) -> Result<Option<Domain>, CoreError>;
    async fn find_domains(&self, owner_id: Uuid) -> Result<Vec<Domain>, CoreError>;
    async fn delete_domain(&self, owner_id: Uuid, name: String) -> Result<(), CoreError>;
}

/// Domain-specific trait for materialization operations
#[async_trait]
pub trait MaterializationRepository {
    /// Explicit insert attempt; a lost race yields `AlreadyExists` with the winner's row.
    async fn try_insert_instance(&self, task_id: Uuid, date: NaiveDate) -> Result<InsertOutcome, CoreError>;
    /// Idempotent: returns the one instance for (task, date), creating it if needed.
    async fn ensure_instance(&self, task_id: Uuid, date: NaiveDate) -> Result<TaskInstance, CoreError>;
    async fn materialize_window(&self, task_id: Uuid, window: DateWindow) -> Result<MaterializationReport, CoreError>;
    /// Rolls every recurring task of the owner forward to its horizon.
    async fn refresh_materialization(&self, owner_id: Uuid) -> Result<MaterializationReport, CoreError>;
}

/// Domain-specific trait for instance lifecycle operations
#[async_trait]
pub trait InstanceRepository {
    async fn find_instance_by_id(&self, id: Uuid) -> Result<Option<TaskInstance>, CoreError>;
    async fn find_owned_instance(&self, owner_id: Uuid, id: Uuid) -> Result<TaskInstance, CoreError>;
    async fn find_instances_for_task(&self, task_id: Uuid) -> Result<Vec<TaskInstance>, CoreError>;
    async fn find_instances_by_short_id_prefix(&self, owner_id: Uuid, short_id: &str) -> Result<Vec<InstanceDetails>, CoreError>;
    /// Instances whose local day in `tz` falls inside `from..=to`.
    async fn list_instances(&self, owner_id: Uuid, from: NaiveDate, to: NaiveDate, tz: Tz) -> Result<Vec<InstanceDetails>, CoreError>;
    async fn transition_instance(&self, owner_id: Uuid, id: Uuid, transition: Transition) -> Result<TaskInstance, CoreError>;
    async fn batch_complete(&self, owner_id: Uuid, ids: &[Uuid]) -> Result<BatchCompletion, CoreError>;
}

/// Domain-specific trait for orphan cleanup after recurrence edits
#[async_trait]
pub trait OrphanRepository {
    async fn on_recurrence_disabled(&self, task_id: Uuid) -> Result<OrphanReport, CoreError>;
    async fn on_rule_changed(&self, task_id: Uuid, old_rule: &RecurrenceRule, new_rule: &RecurrenceRule) -> Result<OrphanReport, CoreError>;
}

/// Domain-specific trait for calendar sync bookkeeping
#[async_trait]
pub trait SyncRecordRepository {
    async fn find_sync_record(&self, entity: SyncEntity) -> Result<Option<SyncRecord>, CoreError>;
    async fn find_sync_records(&self, owner_id: Uuid) -> Result<Vec<SyncRecord>, CoreError>;
    async fn record_synced(&self, owner_id: Uuid, entity: SyncEntity, remote_event_id: &str, content_hash: &str) -> Result<SyncRecord, CoreError>;
    /// Marks the entity unsynced; the remote id is kept so a later sync can update or delete it.
    async fn record_sync_failure(&self, owner_id: Uuid, entity: SyncEntity, error: &str) -> Result<(), CoreError>;
    async fn delete_sync_record(&self, entity: SyncEntity) -> Result<(), CoreError>;
    async fn clear_sync_records(&self, owner_id: Uuid) -> Result<u64, CoreError>;
    /// Every task and instance of the owner, including ones awaiting purge.
    async fn find_syncable_entities(&self, owner_id: Uuid) -> Result<Vec<SyncEntity>, CoreError>;
}

/// Main repository trait that composes all domain traits
pub trait Repository:
    TaskRepository
    + DomainRepository
    + MaterializationRepository
    + InstanceRepository
    + OrphanRepository
    + SyncRecordRepository
{
}

/// SQLite implementation of the repository pattern
pub struct SqliteRepository {
    pool: DbPool,
    materialization_manager: MaterializationManager,
}

impl SqliteRepository {
    pub fn new(pool: DbPool, materialization_manager: MaterializationManager) -> Self {
        Self {
            pool,
            materialization_manager,
        }
    }

    /// Get a reference to the database pool for internal use across modules
    pub(crate) fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn materialization_manager(&self) -> &MaterializationManager {
        &self.materialization_manager
    }
}

impl Repository for SqliteRepository {}

/// `LIKE` pattern matching ids whose hex form starts with `short_id`.
pub(crate) fn short_id_pattern(short_id: &str) -> String {
    let mut pattern: String = short_id
        .chars()
        .filter(|c| c.is_ascii_hexdigit())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    pattern.push('%');
    pattern
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_id_pattern_ignores_dashes_and_case() {
        assert_eq!(short_id_pattern("01ABCD"), "01abcd%");
        assert_eq!(short_id_pattern("0190a1b2-c3"), "0190a1b2c3%");
        assert_eq!(short_id_pattern("a_%b"), "ab%");
    }
}
