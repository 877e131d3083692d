use crate::calendar::CalendarError;
use crate::lifecycle::Transition;
use crate::models::InstanceState;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Database error")]
    Database(#[from] sqlx::Error),

    #[error("Migration error")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("IO error")]
    Io(#[from] std::io::Error),

    #[error("Serialization error")]
    Serialization(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("{0} belongs to another owner")]
    OwnershipViolation(String),

    #[error("Cannot {transition} an item that is {from}")]
    InvalidTransition {
        from: InstanceState,
        transition: Transition,
    },

    #[error("Ambiguous short ID. Did you mean one of these?")]
    AmbiguousId(Vec<(String, String)>), // Vec of (ID, Title)

    #[error("Calendar error: {0}")]
    Calendar(#[from] CalendarError),
}

impl CoreError {
    /// Whether a background caller may retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        match self {
            CoreError::Calendar(err) => err.is_retryable(),
            CoreError::Database(sqlx::Error::PoolTimedOut) => true,
            _ => false,
        }
    }
}
