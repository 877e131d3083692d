use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::error::CoreError;
use crate::recurrence::{RecurrenceRule, RecurrenceRuleInput, RuleEvaluator};
use crate::timezone;

/// Owner-scoped grouping of tasks (work, health, home, ...).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Domain {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum TaskPriority {
    None,
    Low,
    Medium,
    High,
}

#[derive(Error, Debug, PartialEq)]
#[error("Invalid task priority: {0}")]
pub struct ParseTaskPriorityError(String);

impl FromStr for TaskPriority {
    type Err = ParseTaskPriorityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(TaskPriority::None),
            "low" => Ok(TaskPriority::Low),
            "medium" => Ok(TaskPriority::Medium),
            "high" => Ok(TaskPriority::High),
            _ => Err(ParseTaskPriorityError(s.to_string())),
        }
    }
}

/// Lifecycle state of a materialized occurrence.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum InstanceState {
    Pending,
    Completed,
    Skipped,
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceState::Pending => write!(f, "pending"),
            InstanceState::Completed => write!(f, "completed"),
            InstanceState::Skipped => write!(f, "skipped"),
        }
    }
}

#[derive(Error, Debug, PartialEq)]
#[error("Invalid instance state: {0}")]
pub struct ParseInstanceStateError(String);

impl FromStr for InstanceState {
    type Err = ParseInstanceStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(InstanceState::Pending),
            "completed" | "done" => Ok(InstanceState::Completed),
            "skipped" => Ok(InstanceState::Skipped),
            _ => Err(ParseInstanceStateError(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub domain_id: Option<Uuid>,
    pub title: String,
    pub priority: TaskPriority,
    pub duration_minutes: i64,
    /// IANA timezone the recurrence anchor time is expressed in
    pub timezone: String,
    /// Due date of a one-off task. Always None while recurring.
    pub due_date: Option<NaiveDate>,
    /// Completion of a one-off task. Recurring tasks complete per instance.
    pub completed_at: Option<DateTime<Utc>>,
    /// Kept when recurrence is disabled so it can be re-enabled later
    pub recurrence_rule: Option<RecurrenceRule>,
    pub recurrence_start: Option<NaiveDate>,
    pub is_recurring: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn tz(&self) -> Result<Tz, CoreError> {
        timezone::parse_timezone(&self.timezone)
    }

    /// Evaluator for the active rule, or None when recurrence is off.
    pub fn evaluator(&self) -> Option<RuleEvaluator<'_>> {
        if !self.is_recurring {
            return None;
        }
        match (&self.recurrence_rule, self.recurrence_start) {
            (Some(rule), Some(start)) => Some(RuleEvaluator::new(rule, start)),
            _ => None,
        }
    }

    /// UTC instant an occurrence on `date` is scheduled for, if the rule has an anchor time.
    pub fn scheduled_at_for(&self, date: NaiveDate) -> Result<Option<DateTime<Utc>>, CoreError> {
        let anchor = self.recurrence_rule.as_ref().and_then(|rule| rule.anchor_time);
        match anchor {
            Some(time) => Ok(Some(timezone::scheduled_at(date, time, &self.tz()?))),
            None => Ok(None),
        }
    }
}

/// Row shape of `tasks`; the rule column holds the boundary JSON form.
#[derive(Debug, FromRow)]
pub(crate) struct TaskRow {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub domain_id: Option<Uuid>,
    pub title: String,
    pub priority: TaskPriority,
    pub duration_minutes: i64,
    pub timezone: String,
    pub due_date: Option<NaiveDate>,
    pub completed_at: Option<DateTime<Utc>>,
    pub recurrence_rule: Option<String>,
    pub recurrence_start: Option<NaiveDate>,
    pub is_recurring: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<TaskRow> for Task {
    type Error = CoreError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        // Deserializing re-runs rule validation
        let recurrence_rule = row
            .recurrence_rule
            .as_deref()
            .map(serde_json::from_str::<RecurrenceRule>)
            .transpose()?;

        Ok(Task {
            id: row.id,
            owner_id: row.owner_id,
            domain_id: row.domain_id,
            title: row.title,
            priority: row.priority,
            duration_minutes: row.duration_minutes,
            timezone: row.timezone,
            due_date: row.due_date,
            completed_at: row.completed_at,
            recurrence_rule,
            recurrence_start: row.recurrence_start,
            is_recurring: row.is_recurring,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// The materialized, stateful record for one occurrence of a recurring task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
pub struct TaskInstance {
    pub id: Uuid,
    pub task_id: Uuid,
    pub occurrence_date: NaiveDate,
    pub state: InstanceState,
    /// Derived from the rule's anchor time in the task's timezone
    pub scheduled_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Instance joined with the task fields a listing needs.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct InstanceDetails {
    pub id: Uuid,
    pub task_id: Uuid,
    pub title: String,
    pub priority: TaskPriority,
    pub occurrence_date: NaiveDate,
    pub state: InstanceState,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Result of one insert attempt against the (task, date) uniqueness constraint.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Inserted(TaskInstance),
    /// Another writer won the race; this is its row.
    AlreadyExists(TaskInstance),
}

impl InsertOutcome {
    pub fn instance(&self) -> &TaskInstance {
        match self {
            InsertOutcome::Inserted(instance) | InsertOutcome::AlreadyExists(instance) => instance,
        }
    }

    pub fn into_instance(self) -> TaskInstance {
        match self {
            InsertOutcome::Inserted(instance) | InsertOutcome::AlreadyExists(instance) => instance,
        }
    }

    pub fn was_inserted(&self) -> bool {
        matches!(self, InsertOutcome::Inserted(_))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum EntityKind {
    Task,
    Instance,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Task => write!(f, "task"),
            EntityKind::Instance => write!(f, "instance"),
        }
    }
}

/// A local entity that may have a remote calendar counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SyncEntity {
    pub kind: EntityKind,
    pub id: Uuid,
}

impl SyncEntity {
    pub fn task(id: Uuid) -> Self {
        Self { kind: EntityKind::Task, id }
    }

    pub fn instance(id: Uuid) -> Self {
        Self { kind: EntityKind::Instance, id }
    }

    /// Stable idempotency key handed to the calendar service.
    pub fn external_id(&self) -> String {
        format!("cadence-{}-{}", self.kind, self.id.simple())
    }
}

impl std::fmt::Display for SyncEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind, self.id)
    }
}

/// Bookkeeping linking a local entity to its remote calendar event.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SyncRecord {
    pub entity_kind: EntityKind,
    pub entity_id: Uuid,
    pub owner_id: Uuid,
    pub remote_event_id: Option<String>,
    pub content_hash: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Set when a non-retryable failure left the entity unsynced
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl SyncRecord {
    pub fn entity(&self) -> SyncEntity {
        SyncEntity {
            kind: self.entity_kind,
            id: self.entity_id,
        }
    }

    /// True when the remote copy was last pushed with exactly this content.
    pub fn is_current(&self, content_hash: &str) -> bool {
        self.last_error.is_none()
            && self.remote_event_id.is_some()
            && self.content_hash.as_deref() == Some(content_hash)
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewTaskData {
    pub title: String,
    pub domain_id: Option<Uuid>,
    pub priority: Option<TaskPriority>,
    pub duration_minutes: Option<i64>,
    /// IANA name; defaults to UTC
    pub timezone: Option<String>,
    pub due_date: Option<NaiveDate>,
    /// When present the task is created recurring
    pub recurrence: Option<RecurrenceRuleInput>,
    /// Defaults to today in the task's timezone
    pub recurrence_start: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateTaskData {
    pub title: Option<String>,
    pub domain_id: Option<Option<Uuid>>,
    pub priority: Option<TaskPriority>,
    pub duration_minutes: Option<i64>,
    pub timezone: Option<String>,
    pub due_date: Option<Option<NaiveDate>>,
    /// Replaces the rule; turns recurrence on unless `is_recurring` says otherwise
    pub recurrence: Option<RecurrenceRuleInput>,
    pub recurrence_start: Option<NaiveDate>,
    pub is_recurring: Option<bool>,
}

/// What an edit did to a task's recurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecurrenceEdit {
    Unchanged,
    Enabled,
    Disabled,
    RuleChanged,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrphanReport {
    /// Pending instances removed; their remote events must go too
    pub deleted_instance_ids: Vec<Uuid>,
    /// Completed or skipped instances kept as history
    pub retained: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MaterializationFailure {
    pub date: NaiveDate,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MaterializationReport {
    pub created: usize,
    pub existing: usize,
    pub failures: Vec<MaterializationFailure>,
    /// Every instance the window resolved to, in date order
    pub instances: Vec<TaskInstance>,
}

impl MaterializationReport {
    pub fn record(&mut self, outcome: InsertOutcome) {
        if outcome.was_inserted() {
            self.created += 1;
        } else {
            self.existing += 1;
        }
        self.instances.push(outcome.into_instance());
    }

    pub fn merge(&mut self, other: MaterializationReport) {
        self.created += other.created;
        self.existing += other.existing;
        self.failures.extend(other.failures);
        self.instances.extend(other.instances);
    }
}

#[derive(Debug, Clone)]
pub struct TaskUpdate {
    pub task: Task,
    pub edit: RecurrenceEdit,
    pub orphans: OrphanReport,
    pub materialized: MaterializationReport,
}

#[derive(Debug, Clone)]
pub struct TaskDeletion {
    pub task_id: Uuid,
    /// Instances hidden with the task; they are removed with it on purge
    pub instance_ids: Vec<Uuid>,
}

impl TaskDeletion {
    /// The task followed by its instances.
    pub fn entities(&self) -> Vec<SyncEntity> {
        let mut entities = vec![SyncEntity::task(self.task_id)];
        entities.extend(self.instance_ids.iter().map(|id| SyncEntity::instance(*id)));
        entities
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionReason {
    NotFound,
    NotOwned,
    InvalidTransition(InstanceState),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchRejection {
    pub instance_id: Uuid,
    pub reason: RejectionReason,
}

#[derive(Debug, Clone, Default)]
pub struct BatchCompletion {
    pub completed: Vec<TaskInstance>,
    pub rejected: Vec<BatchRejection>,
}

/// Configuration for materialization behavior
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MaterializationConfig {
    /// Horizon for rules that don't carry their own
    pub default_horizon_days: u32,
    /// Upper bound on dates a single evaluation may produce
    pub max_occurrences: u16,
}

impl Default for MaterializationConfig {
    fn default() -> Self {
        Self {
            default_horizon_days: 14,
            max_occurrences: 366,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_from_str() {
        assert_eq!("HIGH".parse::<TaskPriority>(), Ok(TaskPriority::High));
        assert_eq!("none".parse::<TaskPriority>(), Ok(TaskPriority::None));
        assert!("urgent".parse::<TaskPriority>().is_err());
    }

    #[test]
    fn test_instance_state_round_trip_through_display() {
        for state in [InstanceState::Pending, InstanceState::Completed, InstanceState::Skipped] {
            assert_eq!(state.to_string().parse::<InstanceState>(), Ok(state));
        }
        assert_eq!("done".parse::<InstanceState>(), Ok(InstanceState::Completed));
    }

    #[test]
    fn test_external_id_is_stable_and_kind_scoped() {
        let id = Uuid::now_v7();
        assert_eq!(SyncEntity::instance(id).external_id(), SyncEntity::instance(id).external_id());
        assert_ne!(SyncEntity::instance(id).external_id(), SyncEntity::task(id).external_id());
        assert!(SyncEntity::task(id).external_id().starts_with("cadence-task-"));
    }

    #[test]
    fn test_sync_record_is_current_requires_clean_remote_copy() {
        let mut record = SyncRecord {
            entity_kind: EntityKind::Instance,
            entity_id: Uuid::now_v7(),
            owner_id: Uuid::now_v7(),
            remote_event_id: Some("evt-1".to_string()),
            content_hash: Some("abc".to_string()),
            last_synced_at: Some(Utc::now()),
            last_error: None,
            updated_at: Utc::now(),
        };
        assert!(record.is_current("abc"));
        assert!(!record.is_current("def"));

        record.last_error = Some("credential expired".to_string());
        assert!(!record.is_current("abc"));
    }
}
