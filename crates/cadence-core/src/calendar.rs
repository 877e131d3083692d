//! Contract the sync engine needs from an external calendar service, plus an
//! in-process implementation used by tests and embedders.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CalendarError {
    #[error("Calendar service unavailable: {0}")]
    Transient(String),

    #[error("Calendar service rate limited the request")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Remote event {0} no longer exists")]
    EventMissing(String),

    #[error("Calendar credentials expired")]
    CredentialExpired,

    #[error("Calendar no longer exists")]
    CalendarGone,
}

impl CalendarError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, CalendarError::Transient(_) | CalendarError::RateLimited { .. })
    }

    /// Errors after which no further call for the same owner can succeed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CalendarError::CredentialExpired | CalendarError::CalendarGone)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventStart {
    AllDay(NaiveDate),
    At(DateTime<Utc>),
}

/// The remote representation of one local task or instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEvent {
    /// Idempotency key; stable for the lifetime of the local entity
    pub external_id: String,
    pub title: String,
    pub start: EventStart,
    pub duration_minutes: i64,
    pub completed: bool,
}

#[async_trait]
pub trait CalendarClient: Send + Sync {
    /// Create the event, or return the existing remote id when an event with
    /// the same `external_id` is already present.
    async fn create_event(&self, event: &RemoteEvent) -> Result<String, CalendarError>;

    async fn update_event(&self, remote_id: &str, event: &RemoteEvent) -> Result<(), CalendarError>;

    async fn delete_event(&self, remote_id: &str) -> Result<(), CalendarError>;
}

#[derive(Debug, Default)]
struct MemoryState {
    events: HashMap<String, RemoteEvent>,
    next_id: u64,
    faults: VecDeque<CalendarError>,
    calls: usize,
}

impl MemoryState {
    fn begin_call(&mut self) -> Result<(), CalendarError> {
        self.calls += 1;
        match self.faults.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Calendar held in memory. Supports injecting faults and simulating drift
/// (events disappearing behind the sync engine's back).
#[derive(Debug, Default)]
pub struct MemoryCalendar {
    state: Mutex<MemoryState>,
    latency: Option<Duration>,
}

impl MemoryCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps for `latency` before touching state.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn pause(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    /// Queue an error returned by the next call (calls consume faults in order).
    pub fn fail_next(&self, err: CalendarError) {
        self.lock().faults.push_back(err);
    }

    /// Delete an event without telling anyone.
    pub fn remove_event(&self, remote_id: &str) -> Option<RemoteEvent> {
        self.lock().events.remove(remote_id)
    }

    pub fn event(&self, remote_id: &str) -> Option<RemoteEvent> {
        self.lock().events.get(remote_id).cloned()
    }

    pub fn find_by_external_id(&self, external_id: &str) -> Option<(String, RemoteEvent)> {
        self.lock()
            .events
            .iter()
            .find(|(_, event)| event.external_id == external_id)
            .map(|(id, event)| (id.clone(), event.clone()))
    }

    pub fn events(&self) -> Vec<(String, RemoteEvent)> {
        let mut events: Vec<_> = self
            .lock()
            .events
            .iter()
            .map(|(id, event)| (id.clone(), event.clone()))
            .collect();
        events.sort_by(|a, b| a.0.cmp(&b.0));
        events
    }

    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of calls made, including ones that failed.
    pub fn call_count(&self) -> usize {
        self.lock().calls
    }
}

#[async_trait]
impl CalendarClient for MemoryCalendar {
    async fn create_event(&self, event: &RemoteEvent) -> Result<String, CalendarError> {
        self.pause().await;
        let mut state = self.lock();
        state.begin_call()?;

        let existing = state
            .events
            .iter()
            .find(|(_, e)| e.external_id == event.external_id)
            .map(|(id, _)| id.clone());
        let remote_id = match existing {
            Some(id) => id,
            None => {
                state.next_id += 1;
                format!("evt-{}", state.next_id)
            }
        };
        state.events.insert(remote_id.clone(), event.clone());
        Ok(remote_id)
    }

    async fn update_event(&self, remote_id: &str, event: &RemoteEvent) -> Result<(), CalendarError> {
        self.pause().await;
        let mut state = self.lock();
        state.begin_call()?;
        match state.events.get_mut(remote_id) {
            Some(existing) => {
                *existing = event.clone();
                Ok(())
            }
            None => Err(CalendarError::EventMissing(remote_id.to_string())),
        }
    }

    async fn delete_event(&self, remote_id: &str) -> Result<(), CalendarError> {
        self.pause().await;
        let mut state = self.lock();
        state.begin_call()?;
        match state.events.remove(remote_id) {
            Some(_) => Ok(()),
            None => Err(CalendarError::EventMissing(remote_id.to_string())),
        }
    }
}
