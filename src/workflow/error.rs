//! Typed error taxonomy for the ticket workflow.
//!
//! Validation failures (`TicketNotFound`, `PermissionDenied`,
//! `InvalidState`, `BadRequest`) are detected before any write and perform
//! no mutation. `Database` aborts the whole transition. Notification
//! failures never appear here: they are logged by the dispatcher and never
//! surfaced to the caller.

use thiserror::Error;

use super::models::TicketStatus;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Ticket {id} not found")]
    TicketNotFound { id: i64 },

    #[error("Person {id} not found")]
    PersonNotFound { id: i64 },

    #[error("Permission denied: {message}")]
    PermissionDenied { message: String },

    #[error("Cannot {action} a ticket in status '{status}'")]
    InvalidState {
        action: &'static str,
        status: TicketStatus,
    },

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Database error: {0}")]
    Database(#[source] anyhow::Error),

    #[error("Database lock poisoned")]
    LockPoisoned,
}

impl WorkflowError {
    pub fn denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied {
            message: message.into(),
        }
    }
}

impl From<rusqlite::Error> for WorkflowError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(e.into())
    }
}
