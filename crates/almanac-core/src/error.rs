use thiserror::Error;

#[derive(Debug, Error)]
pub enum AlmanacError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Missing tenant context: {0}")]
    MissingTenant(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Schedule not found: {id}")]
    ScheduleNotFound { id: String },

    #[error("Schedule already queued or running: {id}")]
    Conflict { id: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AlmanacError {
    /// Short error code string returned to API clients.
    pub fn code(&self) -> &'static str {
        match self {
            AlmanacError::Config(_) => "CONFIG_ERROR",
            AlmanacError::AuthFailed(_) => "AUTH_FAILED",
            AlmanacError::MissingTenant(_) => "MISSING_TENANT",
            AlmanacError::Validation(_) => "VALIDATION_FAILED",
            AlmanacError::ScheduleNotFound { .. } => "NOT_FOUND",
            AlmanacError::Conflict { .. } => "CONFLICT",
            AlmanacError::Database(_) => "DATABASE_ERROR",
            AlmanacError::Serialization(_) => "SERIALIZATION_ERROR",
            AlmanacError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, AlmanacError>;
