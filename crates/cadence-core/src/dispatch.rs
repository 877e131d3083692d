//! Out-of-band execution of sync work.
//!
//! [`BackgroundDispatcher`] runs [`SyncOperation`]s on tracked tokio tasks
//! with retry for transient calendar failures. [`GraceWindows`] delays the
//! sync that follows a user action so the action can still be undone; each
//! entity has its own independently cancellable window.

use crate::calendar::CalendarError;
use crate::lifecycle::Transition;
use crate::models::SyncEntity;
use crate::sync::{SyncOperation, SyncOutcome, SyncReconciler, SyncReport};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// How long a state change can be undone before it is pushed
    pub grace_period_ms: u64,
    /// Attempts per operation, the first one included
    pub max_attempts: u32,
    pub retry_base_ms: u64,
    pub retry_max_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: 5_000,
            max_attempts: 4,
            retry_base_ms: 250,
            retry_max_ms: 10_000,
        }
    }
}

impl DispatchConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    /// Exponential backoff before attempt `attempt + 1`.
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.retry_base_ms.saturating_mul(factor).min(self.retry_max_ms))
    }
}

#[derive(Debug, Default)]
struct Counters {
    dispatched: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    retries: AtomicU64,
}

/// Snapshot of background sync activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub dispatched: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub retries: u64,
}

struct DispatcherInner {
    reconciler: Arc<SyncReconciler>,
    tracker: TaskTracker,
    config: DispatchConfig,
    counters: Counters,
}

#[derive(Clone)]
pub struct BackgroundDispatcher {
    inner: Arc<DispatcherInner>,
}

impl BackgroundDispatcher {
    pub fn new(reconciler: Arc<SyncReconciler>, config: DispatchConfig) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                reconciler,
                tracker: TaskTracker::new(),
                config,
                counters: Counters::default(),
            }),
        }
    }

    /// Spawn `op` and return immediately. The caller never sees its result.
    pub fn dispatch(&self, op: SyncOperation) {
        self.inner.counters.dispatched.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(&self.inner);
        self.inner.tracker.spawn(async move {
            inner.run(op).await;
        });
    }

    /// Wait until every dispatched operation has finished.
    pub async fn drain(&self) {
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        self.inner.tracker.reopen();
    }

    pub fn stats(&self) -> DispatchStats {
        let counters = &self.inner.counters;
        DispatchStats {
            dispatched: counters.dispatched.load(Ordering::Relaxed),
            succeeded: counters.succeeded.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            retries: counters.retries.load(Ordering::Relaxed),
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.inner.config
    }
}

impl DispatcherInner {
    async fn run(&self, op: SyncOperation) {
        let owner_id = op.owner_id();
        let mut attempt = 1;
        loop {
            let retry_in = match self.reconciler.execute(&op).await {
                Ok(report) if report.needs_retry() && attempt < self.config.max_attempts => {
                    self.config.backoff(attempt).max(rate_limit_hint(&report))
                }
                Ok(report) => {
                    self.finish(&op, &report);
                    return;
                }
                Err(err) if err.is_retryable() && attempt < self.config.max_attempts => {
                    self.config.backoff(attempt)
                }
                Err(err) => {
                    error!(op = op.name(), %owner_id, attempt, error = %err, "background sync failed");
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    return;
                }
            };

            warn!(op = op.name(), %owner_id, attempt, retry_in_ms = retry_in.as_millis() as u64, "retrying sync");
            self.counters.retries.fetch_add(1, Ordering::Relaxed);
            tokio::time::sleep(retry_in).await;
            attempt += 1;
        }
    }

    fn finish(&self, op: &SyncOperation, report: &SyncReport) {
        let owner_id = op.owner_id();
        let mut failed = false;
        if let Some(err) = &report.aborted {
            error!(op = op.name(), %owner_id, error = %err, "sync aborted");
            failed = true;
        }
        for (entity, err) in report.failures() {
            error!(op = op.name(), %owner_id, %entity, error = %err, "entity left unsynced");
            failed = true;
        }

        if failed {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
        } else {
            debug!(
                op = op.name(),
                %owner_id,
                created = report.count(|o| matches!(o, SyncOutcome::Created)),
                updated = report.count(|o| matches!(o, SyncOutcome::Updated)),
                "sync finished"
            );
            self.counters.succeeded.fetch_add(1, Ordering::Relaxed);
        }
    }
}

fn rate_limit_hint(report: &SyncReport) -> Duration {
    report
        .failures()
        .filter_map(|(_, err)| match err {
            CalendarError::RateLimited { retry_after } => *retry_after,
            _ => None,
        })
        .max()
        .unwrap_or_default()
}

/// What an undo has to revert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingAction {
    Transition(Transition),
    /// The task is hidden but its rows and remote events are still there
    Delete,
}

impl fmt::Display for PendingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PendingAction::Transition(transition) => write!(f, "{transition}"),
            PendingAction::Delete => f.write_str("delete"),
        }
    }
}

/// A state change still inside its grace window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingChange {
    pub entity: SyncEntity,
    pub action: PendingAction,
}

struct PendingEntry {
    ticket: u64,
    change: PendingChange,
    cancel: CancellationToken,
    fire: CancellationToken,
}

/// Deferred syncs keyed by entity id.
pub struct GraceWindows {
    entries: Arc<Mutex<HashMap<Uuid, PendingEntry>>>,
    next_ticket: AtomicU64,
    tracker: TaskTracker,
    delay: Duration,
}

impl GraceWindows {
    pub fn new(delay: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            next_ticket: AtomicU64::new(1),
            tracker: TaskTracker::new(),
            delay,
        }
    }

    /// Dispatch `op` once the grace period passes, replacing any change
    /// still pending for the same entity.
    pub async fn schedule(&self, change: PendingChange, op: SyncOperation, dispatcher: &BackgroundDispatcher) {
        let entity_id = change.entity.id;
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let fire = CancellationToken::new();

        {
            let mut entries = self.entries.lock().await;
            let entry = PendingEntry {
                ticket,
                change,
                cancel: cancel.clone(),
                fire: fire.clone(),
            };
            if let Some(previous) = entries.insert(entity_id, entry) {
                debug!(entity = %change.entity, replaced = %previous.change.action, "grace window replaced");
                previous.cancel.cancel();
            }
        }

        let entries = Arc::clone(&self.entries);
        let dispatcher = dispatcher.clone();
        let delay = self.delay;
        self.tracker.spawn(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = fire.cancelled() => {}
                _ = tokio::time::sleep(delay) => {}
            }

            // A newer entry or a take() may have won the race with the timer
            let current = {
                let mut entries = entries.lock().await;
                match entries.get(&entity_id) {
                    Some(entry) if entry.ticket == ticket => entries.remove(&entity_id).is_some(),
                    _ => false,
                }
            };
            if current {
                dispatcher.dispatch(op);
            }
        });
    }

    /// Cancel and return the pending change for this entity only.
    pub async fn take(&self, entity_id: Uuid) -> Option<PendingChange> {
        let entry = self.entries.lock().await.remove(&entity_id)?;
        entry.cancel.cancel();
        Some(entry.change)
    }

    pub async fn pending(&self, entity_id: Uuid) -> Option<PendingChange> {
        self.entries.lock().await.get(&entity_id).map(|entry| entry.change)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Fire every pending change now and wait until each has been handed
    /// to the dispatcher.
    pub async fn flush(&self) {
        {
            let entries = self.entries.lock().await;
            for entry in entries.values() {
                entry.fire.cancel();
            }
        }
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = DispatchConfig {
            retry_base_ms: 100,
            retry_max_ms: 1_000,
            ..Default::default()
        };
        assert_eq!(config.backoff(1), Duration::from_millis(100));
        assert_eq!(config.backoff(2), Duration::from_millis(200));
        assert_eq!(config.backoff(3), Duration::from_millis(400));
        assert_eq!(config.backoff(10), Duration::from_millis(1_000));
    }

    #[test]
    fn test_rate_limit_hint_takes_longest() {
        let mut report = SyncReport::default();
        let entity = SyncEntity::instance(Uuid::now_v7());
        report.outcomes.push((
            entity,
            SyncOutcome::Failed(CalendarError::RateLimited {
                retry_after: Some(Duration::from_secs(2)),
            }),
        ));
        report.outcomes.push((entity, SyncOutcome::Failed(CalendarError::Transient("x".into()))));
        assert_eq!(rate_limit_hint(&report), Duration::from_secs(2));
        assert_eq!(rate_limit_hint(&SyncReport::default()), Duration::ZERO);
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: DispatchConfig = serde_json::from_str(r#"{"grace_period_ms": 0}"#).unwrap();
        assert_eq!(config.grace_period(), Duration::ZERO);
        assert_eq!(config.max_attempts, 4);
    }
}
