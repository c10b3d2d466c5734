use thiserror::Error;

use crate::validate::ValidationError;

/// Errors that can occur within the scheduling subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The authoring input was rejected before touching the store.
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// No schedule with the given ID exists for the requesting tenant.
    #[error("Schedule not found: {id}")]
    NotFound { id: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row could not be decoded (bad enum text or timestamp).
    #[error("Corrupt record {id}: {reason}")]
    CorruptRecord { id: String, reason: String },

    #[error("Store lock poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
