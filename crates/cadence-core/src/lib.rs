//! # Cadence Core Library
//!
//! Recurring-task instances for a personal dashboard, kept in step with an
//! external calendar.
//!
//! ## Features
//!
//! - **Rule Evaluation**: Daily, weekly and monthly rules evaluated over a
//!   bounded date window with `rrule`
//! - **Idempotent Materialization**: At most one instance per (task, date),
//!   enforced by the database
//! - **Instance Lifecycle**: pending, completed and skipped with explicit
//!   transitions and undo
//! - **Calendar Reconciliation**: Hash-gated incremental sync plus a full
//!   resync that repairs remote drift
//! - **Background Dispatch**: Calendar work runs off the request path with
//!   retry and per-entity grace windows
//!
//! ## Core Modules
//!
//! - [`db`]: Database connection and migration management
//! - [`models`]: Core data structures and transfer objects
//! - [`recurrence`]: Rule validation, evaluation and materialization windows
//! - [`lifecycle`]: Instance state machine and recurrence edit classification
//! - [`repository`]: Data access layer with Repository pattern
//! - [`calendar`]: Calendar client contract and an in-memory implementation
//! - [`sync`]: Local to remote reconciliation
//! - [`dispatch`]: Background execution and undo windows
//! - [`service`]: Owner-scoped operations for front ends
//! - [`timezone`]: Timezone utilities and validation
//! - [`error`]: Error types
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use cadence_core::{
//!     calendar::MemoryCalendar, db, dispatch::DispatchConfig,
//!     models::{MaterializationConfig, NewTaskData},
//!     recurrence::{MaterializationManager, RecurrenceRuleInput},
//!     repository::SqliteRepository, service::TaskService,
//! };
//! use std::sync::Arc;
//! use uuid::Uuid;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), cadence_core::error::CoreError> {
//!     let pool = db::establish_connection("cadence.db").await?;
//!     let manager = MaterializationManager::new(MaterializationConfig::default());
//!     let repo = Arc::new(SqliteRepository::new(pool, manager));
//!     let service = TaskService::new(repo, Arc::new(MemoryCalendar::new()), DispatchConfig::default());
//!
//!     let owner = Uuid::now_v7();
//!     let task = service
//!         .create_task(owner, NewTaskData {
//!             title: "Stretch".to_string(),
//!             recurrence: Some(RecurrenceRuleInput {
//!                 frequency: "weekly".to_string(),
//!                 days_of_week: vec!["mon".to_string(), "wed".to_string(), "fri".to_string()],
//!                 ..Default::default()
//!             }),
//!             ..Default::default()
//!         })
//!         .await?;
//!     println!("Created task: {}", task.title);
//!
//!     service.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod calendar;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod lifecycle;
pub mod models;
pub mod recurrence;
pub mod repository;
pub mod service;
pub mod sync;
pub mod timezone;
