//! Owner-scoped entry point used by front ends.
//!
//! Every state change is written to the database and answered right away;
//! the matching calendar push waits out a grace window so it can be undone,
//! then runs on the background dispatcher. A deleted task is only hidden
//! during its window; the rows and remote events go when the window closes.

use crate::calendar::CalendarClient;
use crate::dispatch::{BackgroundDispatcher, DispatchConfig, GraceWindows, PendingAction, PendingChange};
use crate::error::CoreError;
use crate::lifecycle::Transition;
use crate::models::{
    BatchCompletion, Domain, EntityKind, InstanceDetails, MaterializationReport, NewTaskData,
    SyncEntity, Task, TaskDeletion, TaskInstance, TaskUpdate, UpdateTaskData,
};
use crate::repository::{
    DomainRepository, InstanceRepository, MaterializationRepository, SqliteRepository,
    TaskRepository,
};
use crate::sync::{SyncOperation, SyncReconciler};
use chrono::NaiveDate;
use chrono_tz::Tz;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Answer to a full resync request. The work itself runs in the background.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResyncStatus {
    Scheduled,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UndoOutcome {
    /// The pending change was cancelled and its inverse applied
    Undone(PendingChange),
    NothingToUndo,
}

pub struct TaskService {
    repo: Arc<SqliteRepository>,
    reconciler: Arc<SyncReconciler>,
    dispatcher: BackgroundDispatcher,
    grace: GraceWindows,
}

impl TaskService {
    pub fn new(repo: Arc<SqliteRepository>, calendar: Arc<dyn CalendarClient>, config: DispatchConfig) -> Self {
        let reconciler = Arc::new(SyncReconciler::new(Arc::clone(&repo), calendar));
        let grace = GraceWindows::new(config.grace_period());
        let dispatcher = BackgroundDispatcher::new(Arc::clone(&reconciler), config);
        Self {
            repo,
            reconciler,
            dispatcher,
            grace,
        }
    }

    pub fn repository(&self) -> &SqliteRepository {
        &self.repo
    }

    pub fn reconciler(&self) -> &SyncReconciler {
        &self.reconciler
    }

    pub fn dispatcher(&self) -> &BackgroundDispatcher {
        &self.dispatcher
    }

    pub fn grace_windows(&self) -> &GraceWindows {
        &self.grace
    }

    // Tasks

    pub async fn create_task(&self, owner_id: Uuid, data: NewTaskData) -> Result<Task, CoreError> {
        let task = self.repo.add_task(owner_id, data).await?;
        self.dispatcher.dispatch(SyncOperation::Task {
            owner_id,
            task_id: task.id,
        });
        Ok(task)
    }

    pub async fn update_task(&self, owner_id: Uuid, id: Uuid, data: UpdateTaskData) -> Result<TaskUpdate, CoreError> {
        let update = self.repo.update_task(owner_id, id, data).await?;

        let removed: Vec<SyncEntity> = update
            .orphans
            .deleted_instance_ids
            .iter()
            .map(|instance_id| SyncEntity::instance(*instance_id))
            .collect();
        if !removed.is_empty() {
            for entity in &removed {
                self.grace.take(entity.id).await;
            }
            self.dispatcher.dispatch(SyncOperation::RemoveRemote {
                owner_id,
                entities: removed,
            });
        }
        self.dispatcher.dispatch(SyncOperation::Task { owner_id, task_id: id });
        Ok(update)
    }

    /// Hide the task now; purge it and its remote events once the grace
    /// window passes, unless the deletion is undone first.
    pub async fn delete_task(&self, owner_id: Uuid, id: Uuid) -> Result<TaskDeletion, CoreError> {
        let deletion = self.repo.delete_task(owner_id, id).await?;

        // The purge supersedes any instance push still waiting
        for instance_id in &deletion.instance_ids {
            self.grace.take(*instance_id).await;
        }
        let change = PendingChange {
            entity: SyncEntity::task(id),
            action: PendingAction::Delete,
        };
        let purge = SyncOperation::PurgeTask {
            owner_id,
            task_id: id,
            entities: deletion.entities(),
        };
        self.grace.schedule(change, purge, &self.dispatcher).await;
        Ok(deletion)
    }

    pub async fn get_task(&self, owner_id: Uuid, id: Uuid) -> Result<Task, CoreError> {
        self.repo.find_owned_task(owner_id, id).await
    }

    pub async fn list_tasks(&self, owner_id: Uuid) -> Result<Vec<Task>, CoreError> {
        self.repo.find_tasks(owner_id).await
    }

    pub async fn list_instances(
        &self,
        owner_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
        tz: Tz,
    ) -> Result<Vec<InstanceDetails>, CoreError> {
        self.repo.list_instances(owner_id, from, to, tz).await
    }

    pub async fn complete_task(&self, owner_id: Uuid, id: Uuid) -> Result<Task, CoreError> {
        let task = self.repo.complete_task(owner_id, id).await?;
        self.defer_task(owner_id, id, Transition::Complete).await;
        Ok(task)
    }

    pub async fn reopen_task(&self, owner_id: Uuid, id: Uuid) -> Result<Task, CoreError> {
        let task = self.repo.reopen_task(owner_id, id).await?;
        self.defer_task(owner_id, id, Transition::Reopen).await;
        Ok(task)
    }

    // Instance lifecycle

    pub async fn complete_instance(&self, owner_id: Uuid, id: Uuid) -> Result<TaskInstance, CoreError> {
        self.transition(owner_id, id, Transition::Complete).await
    }

    pub async fn reopen_instance(&self, owner_id: Uuid, id: Uuid) -> Result<TaskInstance, CoreError> {
        self.transition(owner_id, id, Transition::Reopen).await
    }

    pub async fn skip_instance(&self, owner_id: Uuid, id: Uuid) -> Result<TaskInstance, CoreError> {
        self.transition(owner_id, id, Transition::Skip).await
    }

    pub async fn unskip_instance(&self, owner_id: Uuid, id: Uuid) -> Result<TaskInstance, CoreError> {
        self.transition(owner_id, id, Transition::Unskip).await
    }

    pub async fn batch_complete(&self, owner_id: Uuid, ids: &[Uuid]) -> Result<BatchCompletion, CoreError> {
        let batch = self.repo.batch_complete(owner_id, ids).await?;
        for instance in &batch.completed {
            self.defer_instance(owner_id, instance.id, Transition::Complete).await;
        }
        Ok(batch)
    }

    /// Revert the change still pending for this entity. Other entities'
    /// pending changes are untouched.
    pub async fn undo(&self, owner_id: Uuid, entity_id: Uuid) -> Result<UndoOutcome, CoreError> {
        // Ownership first, so nobody can cancel another owner's window
        let kind = match self.repo.find_owned_instance(owner_id, entity_id).await {
            Ok(_) => EntityKind::Instance,
            Err(CoreError::NotFound(_)) => {
                self.ensure_task_owned(owner_id, entity_id).await?;
                EntityKind::Task
            }
            Err(err) => return Err(err),
        };

        let Some(change) = self.grace.take(entity_id).await else {
            debug!(%entity_id, "nothing to undo");
            return Ok(UndoOutcome::NothingToUndo);
        };

        let reverted = match (change.action, kind) {
            (PendingAction::Delete, _) => self.repo.restore_task(owner_id, entity_id).await.map(|_| ()),
            (PendingAction::Transition(transition), EntityKind::Instance) => self
                .repo
                .transition_instance(owner_id, entity_id, transition.inverse())
                .await
                .map(|_| ()),
            (PendingAction::Transition(transition), EntityKind::Task) => match transition.inverse() {
                Transition::Complete => self.repo.complete_task(owner_id, entity_id).await.map(|_| ()),
                _ => self.repo.reopen_task(owner_id, entity_id).await.map(|_| ()),
            },
        };

        // Either way the remote side must catch up with whatever is stored now
        self.dispatcher.dispatch(sync_op(owner_id, change.entity));
        reverted?;

        info!(entity = %change.entity, undone = %change.action, "change undone");
        Ok(UndoOutcome::Undone(change))
    }

    // Maintenance

    pub async fn refresh(&self, owner_id: Uuid) -> Result<MaterializationReport, CoreError> {
        let report = self.repo.refresh_materialization(owner_id).await?;
        if report.created > 0 {
            self.dispatcher.dispatch(SyncOperation::Owner { owner_id });
        }
        Ok(report)
    }

    pub fn request_full_resync(&self, owner_id: Uuid) -> ResyncStatus {
        info!(%owner_id, "full resync requested");
        self.dispatcher.dispatch(SyncOperation::FullResync { owner_id });
        ResyncStatus::Scheduled
    }

    /// Push every pending change now and wait for background work to finish.
    pub async fn shutdown(&self) {
        self.grace.flush().await;
        self.dispatcher.drain().await;
        let stats = self.dispatcher.stats();
        debug!(
            dispatched = stats.dispatched,
            succeeded = stats.succeeded,
            failed = stats.failed,
            "dispatcher drained"
        );
    }

    // Domains

    pub async fn add_domain(&self, owner_id: Uuid, name: String) -> Result<Domain, CoreError> {
        self.repo.add_domain(owner_id, name).await
    }

    pub async fn list_domains(&self, owner_id: Uuid) -> Result<Vec<Domain>, CoreError> {
        self.repo.find_domains(owner_id).await
    }

    pub async fn delete_domain(&self, owner_id: Uuid, name: String) -> Result<(), CoreError> {
        self.repo.delete_domain(owner_id, name).await
    }

    async fn transition(&self, owner_id: Uuid, id: Uuid, transition: Transition) -> Result<TaskInstance, CoreError> {
        let instance = self.repo.transition_instance(owner_id, id, transition).await?;
        self.defer_instance(owner_id, id, transition).await;
        Ok(instance)
    }

    async fn defer_instance(&self, owner_id: Uuid, id: Uuid, transition: Transition) {
        self.defer(owner_id, SyncEntity::instance(id), transition).await;
    }

    async fn defer_task(&self, owner_id: Uuid, id: Uuid, transition: Transition) {
        self.defer(owner_id, SyncEntity::task(id), transition).await;
    }

    /// Tasks awaiting purge count, so a deletion can be undone.
    async fn ensure_task_owned(&self, owner_id: Uuid, id: Uuid) -> Result<(), CoreError> {
        match self.repo.find_task_by_id(id).await? {
            None => Err(CoreError::NotFound(format!("task {id}"))),
            Some(task) if task.owner_id != owner_id => Err(CoreError::OwnershipViolation(format!("task {id}"))),
            Some(_) => Ok(()),
        }
    }

    async fn defer(&self, owner_id: Uuid, entity: SyncEntity, transition: Transition) {
        let change = PendingChange {
            entity,
            action: PendingAction::Transition(transition),
        };
        self.grace
            .schedule(change, sync_op(owner_id, entity), &self.dispatcher)
            .await;
    }
}

fn sync_op(owner_id: Uuid, entity: SyncEntity) -> SyncOperation {
    match entity.kind {
        EntityKind::Instance => SyncOperation::Instance {
            owner_id,
            instance_id: entity.id,
        },
        EntityKind::Task => SyncOperation::Task {
            owner_id,
            task_id: entity.id,
        },
    }
}
