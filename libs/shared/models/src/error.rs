use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which uniqueness or capacity rule a `Conflict` tripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    SlotFull,
    DuplicateBooking,
    ScheduleOverlap,
    CodeCollision,
    SequenceExhausted,
    /// Another commit changed the row between read and write.
    ConcurrentUpdate,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictKind::SlotFull => write!(f, "slot full"),
            ConflictKind::DuplicateBooking => write!(f, "duplicate booking"),
            ConflictKind::ScheduleOverlap => write!(f, "schedule overlap"),
            ConflictKind::CodeCollision => write!(f, "payment code collision"),
            ConflictKind::SequenceExhausted => write!(f, "payment code sequence exhausted"),
            ConflictKind::ConcurrentUpdate => write!(f, "concurrent update"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("Business rule violation: {0}")]
    BusinessRuleViolation(String),

    #[error("Conflict ({kind}): {message}")]
    Conflict { kind: ConflictKind, message: String },

    /// The unit of work did not finish inside its deadline; nothing was committed.
    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("External service error: {0}")]
    ExternalService(String),
}

impl AppError {
    pub fn conflict(kind: ConflictKind, message: impl Into<String>) -> Self {
        AppError::Conflict { kind, message: message.into() }
    }

    pub fn conflict_kind(&self) -> Option<ConflictKind> {
        match self {
            AppError::Conflict { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Callers may resubmit the same request after these.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::Timeout(_)
                | AppError::Conflict { kind: ConflictKind::CodeCollision | ConflictKind::ConcurrentUpdate, .. }
        )
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_timeouts_and_write_races_are_retryable() {
        assert!(AppError::Timeout("tx".into()).is_retryable());
        assert!(AppError::conflict(ConflictKind::ConcurrentUpdate, "appointment").is_retryable());
        assert!(AppError::conflict(ConflictKind::CodeCollision, "LH20241217001").is_retryable());
        assert!(!AppError::conflict(ConflictKind::SlotFull, "slot full").is_retryable());
        assert!(!AppError::conflict(ConflictKind::DuplicateBooking, "dup").is_retryable());
        assert!(!AppError::NotFound("doctor".into()).is_retryable());
    }

    #[test]
    fn conflict_message_names_the_kind() {
        let err = AppError::conflict(ConflictKind::SlotFull, "15 of 15 seats taken");
        assert_eq!(err.to_string(), "Conflict (slot full): 15 of 15 seats taken");
        assert_eq!(err.conflict_kind(), Some(ConflictKind::SlotFull));
    }
}
