use almanac_scheduler::SchedulerError;
use thiserror::Error;

/// Errors that can occur within the dispatcher.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    /// Lease table access failed.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The schedule already has a queued or running job.
    #[error("Schedule already queued or running: {id}")]
    AlreadyInFlight { id: String },
}

impl DispatchError {
    /// True when the error means "no such schedule for this tenant".
    pub fn is_not_found(&self) -> bool {
        matches!(self, DispatchError::Scheduler(SchedulerError::NotFound { .. }))
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;
