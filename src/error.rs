use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::session::SessionStatus;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid interval: end {end} is before start {start}")]
    InvalidInterval {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("No active session for worker {worker_id} on task {task_id}")]
    NoActiveSession { worker_id: String, task_id: String },

    #[error("Session for worker {worker_id} on task {task_id} is {status}, it must be on hold first")]
    NotOnHold {
        worker_id: String,
        task_id: String,
        status: SessionStatus,
    },

    #[error("Worker {worker_id} is already working on task {task_id}")]
    AlreadyInProgress { worker_id: String, task_id: String },

    #[error("Another start for worker {0} won the race, retry")]
    ConcurrentStartConflict(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Invalid window format: {0}")]
    WindowParse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid status '{0}' (expected not_started, in_progress, on_hold or completed)")]
    InvalidStatus(String),

    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True when the caller can simply try the same operation again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::ConcurrentStartConflict(_))
    }

    /// True for persistence and infrastructure failures, as opposed to
    /// violated preconditions of the session lifecycle.
    pub fn is_store_error(&self) -> bool {
        matches!(self, Error::Database(_) | Error::Migration(_))
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Database(e.to_string())
    }
}

impl From<rusqlite_migration::Error> for Error {
    fn from(e: rusqlite_migration::Error) -> Self {
        Error::Migration(e.to_string())
    }
}

impl<E: fmt::Display> From<tokio_rusqlite::Error<E>> for Error {
    fn from(e: tokio_rusqlite::Error<E>) -> Self {
        Error::Database(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
