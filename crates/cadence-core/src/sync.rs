//! Reconciles local tasks and instances with the remote calendar.
//!
//! Every entity that should be visible remotely maps to exactly one remote
//! event, tracked by a [`SyncRecord`]. Incremental passes trust the stored
//! content hash; only a full resync rebuilds the remote side from scratch.

use crate::calendar::{CalendarClient, CalendarError, EventStart, RemoteEvent};
use crate::error::CoreError;
use crate::models::{EntityKind, InstanceState, SyncEntity, SyncRecord, Task, TaskInstance};
use crate::repository::{InstanceRepository, SqliteRepository, SyncRecordRepository, TaskRepository};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Created,
    Updated,
    Unchanged,
    Deleted,
    Failed(CalendarError),
}

/// Work the background dispatcher can run against the calendar.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOperation {
    Instance { owner_id: Uuid, instance_id: Uuid },
    /// The task's own event plus one per instance
    Task { owner_id: Uuid, task_id: Uuid },
    /// Entities deleted locally whose remote events must go
    RemoveRemote { owner_id: Uuid, entities: Vec<SyncEntity> },
    /// Make a task deletion final: drop its rows, then its remote events
    PurgeTask {
        owner_id: Uuid,
        task_id: Uuid,
        entities: Vec<SyncEntity>,
    },
    Owner { owner_id: Uuid },
    FullResync { owner_id: Uuid },
}

impl SyncOperation {
    pub fn owner_id(&self) -> Uuid {
        match self {
            SyncOperation::Instance { owner_id, .. }
            | SyncOperation::Task { owner_id, .. }
            | SyncOperation::RemoveRemote { owner_id, .. }
            | SyncOperation::PurgeTask { owner_id, .. }
            | SyncOperation::Owner { owner_id }
            | SyncOperation::FullResync { owner_id } => *owner_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SyncOperation::Instance { .. } => "instance",
            SyncOperation::Task { .. } => "task",
            SyncOperation::RemoveRemote { .. } => "remove",
            SyncOperation::PurgeTask { .. } => "purge",
            SyncOperation::Owner { .. } => "owner",
            SyncOperation::FullResync { .. } => "full-resync",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub outcomes: Vec<(SyncEntity, SyncOutcome)>,
    /// Set when a credential or calendar failure stopped the pass early
    pub aborted: Option<CalendarError>,
}

impl SyncReport {
    /// Records the outcome; returns true when the pass must stop.
    fn push(&mut self, entity: SyncEntity, outcome: SyncOutcome) -> bool {
        let fatal = match &outcome {
            SyncOutcome::Failed(err) if err.is_fatal() => Some(err.clone()),
            _ => None,
        };
        self.outcomes.push((entity, outcome));
        if let Some(err) = fatal {
            self.aborted = Some(err);
            return true;
        }
        false
    }

    pub fn outcome_for(&self, entity: SyncEntity) -> Option<&SyncOutcome> {
        self.outcomes
            .iter()
            .find(|(e, _)| *e == entity)
            .map(|(_, outcome)| outcome)
    }

    pub fn count(&self, wanted: fn(&SyncOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, outcome)| wanted(outcome)).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&SyncEntity, &CalendarError)> {
        self.outcomes.iter().filter_map(|(entity, outcome)| match outcome {
            SyncOutcome::Failed(err) => Some((entity, err)),
            _ => None,
        })
    }

    /// True when something failed that a later attempt could fix.
    pub fn needs_retry(&self) -> bool {
        self.aborted.is_none() && self.failures().any(|(_, err)| err.is_retryable())
    }
}

/// Hash over everything that shapes the remote copy of an entity.
pub fn content_hash(event: &RemoteEvent) -> String {
    let mut hasher = Sha256::new();
    hasher.update(event.title.as_bytes());
    hasher.update([0u8]);
    match &event.start {
        EventStart::AllDay(date) => hasher.update(format!("date:{date}")),
        EventStart::At(at) => hasher.update(format!("at:{}", at.to_rfc3339())),
    }
    hasher.update([0u8]);
    hasher.update(event.duration_minutes.to_le_bytes());
    hasher.update([u8::from(event.completed)]);
    format!("{:x}", hasher.finalize())
}

/// Remote shape of an instance. Skipped instances have none.
pub fn instance_event(task: &Task, instance: &TaskInstance) -> Option<RemoteEvent> {
    if instance.state == InstanceState::Skipped {
        return None;
    }
    let start = match instance.scheduled_at {
        Some(at) => EventStart::At(at),
        None => EventStart::AllDay(instance.occurrence_date),
    };
    Some(RemoteEvent {
        external_id: SyncEntity::instance(instance.id).external_id(),
        title: task.title.clone(),
        start,
        duration_minutes: task.duration_minutes,
        completed: instance.state == InstanceState::Completed,
    })
}

/// Remote shape of a one-off task: an all-day event on its due date.
/// Recurring tasks are represented by their instances instead.
pub fn task_event(task: &Task) -> Option<RemoteEvent> {
    if task.is_recurring {
        return None;
    }
    let due = task.due_date?;
    Some(RemoteEvent {
        external_id: SyncEntity::task(task.id).external_id(),
        title: task.title.clone(),
        start: EventStart::AllDay(due),
        duration_minutes: task.duration_minutes,
        completed: task.completed_at.is_some(),
    })
}

/// One async lock per owner; every sync pass for an owner holds it.
///
/// An entry only lives while some pass holds or waits for it: the map's own
/// reference is the last one once a guard is dropped, and such entries are
/// pruned on the next acquire.
#[derive(Debug, Default)]
pub struct OwnerLocks {
    locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl OwnerLocks {
    pub async fn acquire(&self, owner_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.retain(|id, lock| *id == owner_id || Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(owner_id).or_default())
        };
        lock.lock_owned().await
    }

    /// Owners with a lock entry right now.
    pub fn tracked_owners(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_locked(&self, owner_id: Uuid) -> bool {
        let locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .get(&owner_id)
            .is_some_and(|lock| lock.try_lock().is_err())
    }
}

pub struct SyncReconciler {
    repo: Arc<SqliteRepository>,
    calendar: Arc<dyn CalendarClient>,
    locks: OwnerLocks,
}

impl SyncReconciler {
    pub fn new(repo: Arc<SqliteRepository>, calendar: Arc<dyn CalendarClient>) -> Self {
        Self {
            repo,
            calendar,
            locks: OwnerLocks::default(),
        }
    }

    pub fn locks(&self) -> &OwnerLocks {
        &self.locks
    }

    /// Run one operation under its owner's lock.
    pub async fn execute(&self, op: &SyncOperation) -> Result<SyncReport, CoreError> {
        let _guard = self.locks.acquire(op.owner_id()).await;
        debug!(op = op.name(), owner_id = %op.owner_id(), "sync started");

        match op {
            SyncOperation::Instance { owner_id, instance_id } => {
                self.sync_entities(*owner_id, vec![SyncEntity::instance(*instance_id)])
                    .await
            }
            SyncOperation::Task { owner_id, task_id } => {
                let mut entities = vec![SyncEntity::task(*task_id)];
                entities.extend(
                    self.repo
                        .find_instances_for_task(*task_id)
                        .await?
                        .iter()
                        .map(|instance| SyncEntity::instance(instance.id)),
                );
                self.sync_entities(*owner_id, entities).await
            }
            SyncOperation::RemoveRemote { owner_id, entities } => {
                self.remove_entities(*owner_id, entities).await
            }
            SyncOperation::PurgeTask {
                owner_id,
                task_id,
                entities,
            } => {
                // Nothing purged and the row still there means the deletion was undone.
                // A retry after a purge finds no row and goes on to the remote side.
                if !self.repo.purge_task(*owner_id, *task_id).await?
                    && self.repo.find_task_by_id(*task_id).await?.is_some()
                {
                    debug!(%task_id, "task restored before purge");
                    return Ok(SyncReport::default());
                }
                self.remove_entities(*owner_id, entities).await
            }
            SyncOperation::Owner { owner_id } => self.sync_owner_locked(*owner_id).await,
            SyncOperation::FullResync { owner_id } => self.full_resync_locked(*owner_id).await,
        }
    }

    /// Incremental sync of one instance's current state.
    pub async fn sync_instance(&self, instance: &TaskInstance) -> Result<SyncOutcome, CoreError> {
        let task = self
            .repo
            .find_task_by_id(instance.task_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("task {}", instance.task_id)))?;
        let _guard = self.locks.acquire(task.owner_id).await;
        self.push_entity(task.owner_id, SyncEntity::instance(instance.id)).await
    }

    pub async fn sync_owner(&self, owner_id: Uuid) -> Result<SyncReport, CoreError> {
        let _guard = self.locks.acquire(owner_id).await;
        self.sync_owner_locked(owner_id).await
    }

    pub async fn full_resync(&self, owner_id: Uuid) -> Result<SyncReport, CoreError> {
        let _guard = self.locks.acquire(owner_id).await;
        self.full_resync_locked(owner_id).await
    }

    async fn sync_entities(&self, owner_id: Uuid, entities: Vec<SyncEntity>) -> Result<SyncReport, CoreError> {
        let mut report = SyncReport::default();
        for entity in entities {
            let outcome = self.push_entity(owner_id, entity).await?;
            if report.push(entity, outcome) {
                break;
            }
        }
        Ok(report)
    }

    async fn remove_entities(&self, owner_id: Uuid, entities: &[SyncEntity]) -> Result<SyncReport, CoreError> {
        let mut report = SyncReport::default();
        for entity in entities {
            let record = self.repo.find_sync_record(*entity).await?;
            let outcome = self.remove_locked(owner_id, *entity, record).await?;
            if report.push(*entity, outcome) {
                break;
            }
        }
        Ok(report)
    }

    async fn sync_owner_locked(&self, owner_id: Uuid) -> Result<SyncReport, CoreError> {
        let mut entities = self.owner_entities(owner_id).await?;
        for record in self.repo.find_sync_records(owner_id).await? {
            if !entities.contains(&record.entity()) {
                entities.push(record.entity());
            }
        }
        self.sync_entities(owner_id, entities).await
    }

    async fn full_resync_locked(&self, owner_id: Uuid) -> Result<SyncReport, CoreError> {
        let mut report = SyncReport::default();

        // Remote events with no local counterpart go first; their ids are
        // lost once the records are cleared.
        for record in self.repo.find_sync_records(owner_id).await? {
            let entity = record.entity();
            if self.desired_event(owner_id, entity).await?.is_none() {
                let outcome = self.remove_locked(owner_id, entity, Some(record)).await?;
                if report.push(entity, outcome) {
                    return Ok(report);
                }
            }
        }

        let cleared = self.repo.clear_sync_records(owner_id).await?;
        debug!(%owner_id, cleared, "sync records cleared");

        for entity in self.owner_entities(owner_id).await? {
            let Some(event) = self.desired_event(owner_id, entity).await? else {
                continue;
            };
            let outcome = self.create(owner_id, entity, &event).await?;
            if report.push(entity, outcome) {
                warn!(%owner_id, "full resync aborted");
                return Ok(report);
            }
        }

        info!(
            %owner_id,
            created = report.count(|o| matches!(o, SyncOutcome::Created)),
            deleted = report.count(|o| matches!(o, SyncOutcome::Deleted)),
            failed = report.count(|o| matches!(o, SyncOutcome::Failed(_))),
            "full resync finished"
        );
        Ok(report)
    }

    /// Tasks awaiting purge still count: their events stay until the purge.
    async fn owner_entities(&self, owner_id: Uuid) -> Result<Vec<SyncEntity>, CoreError> {
        self.repo.find_syncable_entities(owner_id).await
    }

    /// What the remote side should hold for `entity` right now; None when
    /// the entity is gone or has no remote representation.
    async fn desired_event(&self, owner_id: Uuid, entity: SyncEntity) -> Result<Option<RemoteEvent>, CoreError> {
        match entity.kind {
            EntityKind::Task => match self.repo.find_task_by_id(entity.id).await? {
                Some(task) => {
                    ensure_owner(&task, owner_id, entity)?;
                    Ok(task_event(&task))
                }
                None => Ok(None),
            },
            EntityKind::Instance => {
                let Some(instance) = self.repo.find_instance_by_id(entity.id).await? else {
                    return Ok(None);
                };
                match self.repo.find_task_by_id(instance.task_id).await? {
                    Some(task) => {
                        ensure_owner(&task, owner_id, entity)?;
                        Ok(instance_event(&task, &instance))
                    }
                    None => Ok(None),
                }
            }
        }
    }

    /// Hash-gated push of one entity.
    async fn push_entity(&self, owner_id: Uuid, entity: SyncEntity) -> Result<SyncOutcome, CoreError> {
        let record = self.repo.find_sync_record(entity).await?;
        let Some(event) = self.desired_event(owner_id, entity).await? else {
            return self.remove_locked(owner_id, entity, record).await;
        };
        let hash = content_hash(&event);

        let remote_id = record.as_ref().and_then(|r| r.remote_event_id.clone());
        match (record, remote_id) {
            (Some(record), Some(_)) if record.is_current(&hash) => {
                debug!(%entity, "remote event up to date");
                Ok(SyncOutcome::Unchanged)
            }
            (_, Some(remote_id)) => match self.calendar.update_event(&remote_id, &event).await {
                Ok(()) => {
                    self.repo
                        .record_synced(owner_id, entity, &remote_id, &hash)
                        .await?;
                    Ok(SyncOutcome::Updated)
                }
                Err(CalendarError::EventMissing(_)) => {
                    warn!(%entity, %remote_id, "remote event vanished; recreating");
                    self.repo.delete_sync_record(entity).await?;
                    self.create(owner_id, entity, &event).await
                }
                Err(err) => self.failed(owner_id, entity, err).await,
            },
            (_, None) => self.create(owner_id, entity, &event).await,
        }
    }

    async fn create(&self, owner_id: Uuid, entity: SyncEntity, event: &RemoteEvent) -> Result<SyncOutcome, CoreError> {
        match self.calendar.create_event(event).await {
            Ok(remote_id) => {
                self.repo
                    .record_synced(owner_id, entity, &remote_id, &content_hash(event))
                    .await?;
                debug!(%entity, %remote_id, "remote event created");
                Ok(SyncOutcome::Created)
            }
            Err(err) => self.failed(owner_id, entity, err).await,
        }
    }

    async fn remove_locked(
        &self,
        owner_id: Uuid,
        entity: SyncEntity,
        record: Option<SyncRecord>,
    ) -> Result<SyncOutcome, CoreError> {
        let Some(record) = record else {
            return Ok(SyncOutcome::Unchanged);
        };
        if let Some(remote_id) = &record.remote_event_id {
            match self.calendar.delete_event(remote_id).await {
                Ok(()) | Err(CalendarError::EventMissing(_)) => {}
                Err(err) => return self.failed(owner_id, entity, err).await,
            }
        }
        self.repo.delete_sync_record(entity).await?;
        debug!(%entity, "remote event removed");
        Ok(SyncOutcome::Deleted)
    }

    /// Non-retryable failures leave the entity marked unsynced.
    async fn failed(&self, owner_id: Uuid, entity: SyncEntity, err: CalendarError) -> Result<SyncOutcome, CoreError> {
        if err.is_retryable() {
            debug!(%entity, error = %err, "retryable calendar failure");
        } else {
            warn!(%entity, error = %err, "calendar rejected sync");
            self.repo
                .record_sync_failure(owner_id, entity, &err.to_string())
                .await?;
        }
        Ok(SyncOutcome::Failed(err))
    }
}

fn ensure_owner(task: &Task, owner_id: Uuid, entity: SyncEntity) -> Result<(), CoreError> {
    if task.owner_id == owner_id {
        Ok(())
    } else {
        Err(CoreError::OwnershipViolation(entity.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskPriority;
    use chrono::{NaiveDate, TimeZone, Utc};

    fn task() -> Task {
        let now = Utc::now();
        Task {
            id: Uuid::now_v7(),
            owner_id: Uuid::now_v7(),
            domain_id: None,
            title: "Water plants".to_string(),
            priority: TaskPriority::Low,
            duration_minutes: 10,
            timezone: "UTC".to_string(),
            due_date: NaiveDate::from_ymd_opt(2026, 1, 10),
            completed_at: None,
            recurrence_rule: None,
            recurrence_start: None,
            is_recurring: false,
            created_at: now,
            updated_at: now,
        }
    }

    fn instance(task: &Task, state: InstanceState) -> TaskInstance {
        let now = Utc::now();
        TaskInstance {
            id: Uuid::now_v7(),
            task_id: task.id,
            occurrence_date: NaiveDate::from_ymd_opt(2026, 1, 5).unwrap(),
            state,
            scheduled_at: Some(Utc.with_ymd_and_hms(2026, 1, 5, 8, 0, 0).unwrap()),
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_hash_tracks_remote_fields_only() {
        let task = task();
        let pending = instance(&task, InstanceState::Pending);
        let base = instance_event(&task, &pending).unwrap();

        let mut same = base.clone();
        same.external_id = "other".to_string();
        assert_eq!(content_hash(&base), content_hash(&same));

        let mut done = base.clone();
        done.completed = true;
        assert_ne!(content_hash(&base), content_hash(&done));

        let mut longer = base.clone();
        longer.duration_minutes += 5;
        assert_ne!(content_hash(&base), content_hash(&longer));
    }

    #[test]
    fn test_skipped_instances_have_no_event() {
        let task = task();
        assert!(instance_event(&task, &instance(&task, InstanceState::Skipped)).is_none());
        let completed = instance_event(&task, &instance(&task, InstanceState::Completed)).unwrap();
        assert!(completed.completed);
    }

    #[test]
    fn test_task_event_only_for_dated_one_off() {
        let mut task = task();
        assert_eq!(
            task_event(&task).map(|e| e.start),
            Some(EventStart::AllDay(NaiveDate::from_ymd_opt(2026, 1, 10).unwrap()))
        );

        task.due_date = None;
        assert!(task_event(&task).is_none());

        task.due_date = NaiveDate::from_ymd_opt(2026, 1, 10);
        task.is_recurring = true;
        assert!(task_event(&task).is_none());
    }

    #[test]
    fn test_report_stops_on_fatal_failure() {
        let mut report = SyncReport::default();
        let entity = SyncEntity::instance(Uuid::now_v7());
        assert!(!report.push(entity, SyncOutcome::Failed(CalendarError::Transient("x".into()))));
        assert!(report.needs_retry());
        assert!(report.push(entity, SyncOutcome::Failed(CalendarError::CredentialExpired)));
        assert_eq!(report.aborted, Some(CalendarError::CredentialExpired));
        assert!(!report.needs_retry());
    }

    #[tokio::test]
    async fn test_owner_locks_are_per_owner() {
        let locks = OwnerLocks::default();
        let alice = Uuid::now_v7();
        let bob = Uuid::now_v7();

        let guard = locks.acquire(alice).await;
        assert!(locks.is_locked(alice));
        assert!(!locks.is_locked(bob));
        let _bob = locks.acquire(bob).await;
        drop(guard);
        assert!(!locks.is_locked(alice));
    }

    #[tokio::test]
    async fn test_owner_locks_forget_idle_owners() {
        let locks = OwnerLocks::default();
        for _ in 0..100 {
            let _guard = locks.acquire(Uuid::now_v7()).await;
        }
        assert_eq!(locks.tracked_owners(), 1);

        let alice = Uuid::now_v7();
        let held = locks.acquire(alice).await;
        let _bob = locks.acquire(Uuid::now_v7()).await;
        assert_eq!(locks.tracked_owners(), 2);

        // A held lock survives pruning; a released one does not
        let _carol = locks.acquire(Uuid::now_v7()).await;
        assert_eq!(locks.tracked_owners(), 3);
        drop(held);
        let _dave = locks.acquire(Uuid::now_v7()).await;
        assert_eq!(locks.tracked_owners(), 3);
        assert!(!locks.is_locked(alice));
    }
}
