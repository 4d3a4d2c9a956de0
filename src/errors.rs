//! Typed error hierarchy for the helpdesk.
//!
//! `HelpdeskError` is what service operations return. Store functions
//! stay on `anyhow::Result` and fold into `Other` at the boundary; policy
//! decisions from `helpdesk-common` convert via `From`.

use helpdesk_common::{PolicyError, TicketStatus, Transition};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HelpdeskError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(String),

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: i64 },

    #[error("Invalid {field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    #[error("Cannot {transition} a ticket that is {from}")]
    InvalidTransition {
        from: TicketStatus,
        transition: Transition,
    },

    #[error("{0}")]
    Conflict(String),

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HelpdeskError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn not_found(kind: &'static str, id: i64) -> Self {
        Self::NotFound { kind, id }
    }
}

impl From<PolicyError> for HelpdeskError {
    fn from(err: PolicyError) -> Self {
        match err {
            PolicyError::Forbidden(msg) => Self::Forbidden(msg.to_string()),
            PolicyError::InvalidTransition { from, transition } => {
                Self::InvalidTransition { from, transition }
            }
            PolicyError::NotOpen { .. } => Self::Conflict(err.to_string()),
        }
    }
}

pub type HelpdeskResult<T> = Result<T, HelpdeskError>;
