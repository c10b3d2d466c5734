use almanac_core::AlmanacError;
use almanac_dispatch::DispatchError;
use almanac_scheduler::SchedulerError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

/// Error half of every API handler. Renders as
/// `{"success": false, "code": ..., "message": ..., "field"?: ...}`.
#[derive(Debug)]
pub struct ApiError {
    error: AlmanacError,
    /// Offending input field for validation failures.
    field: Option<&'static str>,
}

impl ApiError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            error: AlmanacError::Validation(message.into()),
            field: Some(field),
        }
    }

    fn status(&self) -> StatusCode {
        match self.error {
            AlmanacError::AuthFailed(_) => StatusCode::UNAUTHORIZED,
            AlmanacError::MissingTenant(_) | AlmanacError::Validation(_) => {
                StatusCode::BAD_REQUEST
            }
            AlmanacError::ScheduleNotFound { .. } => StatusCode::NOT_FOUND,
            AlmanacError::Conflict { .. } => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<AlmanacError> for ApiError {
    fn from(error: AlmanacError) -> Self {
        Self { error, field: None }
    }
}

impl From<SchedulerError> for ApiError {
    fn from(e: SchedulerError) -> Self {
        match e {
            SchedulerError::Validation(v) => Self::validation(v.field(), v.to_string()),
            SchedulerError::NotFound { id } => AlmanacError::ScheduleNotFound { id }.into(),
            SchedulerError::Serialization(e) => AlmanacError::Serialization(e).into(),
            SchedulerError::Database(e) => AlmanacError::Database(e.to_string()).into(),
            other => AlmanacError::Internal(other.to_string()).into(),
        }
    }
}

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::Scheduler(e) => e.into(),
            DispatchError::AlreadyInFlight { id } => AlmanacError::Conflict { id }.into(),
            DispatchError::Database(e) => AlmanacError::Database(e.to_string()).into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(code = self.error.code(), "request failed: {}", self.error);
        }

        let mut body = json!({
            "success": false,
            "code": self.error.code(),
            "message": self.error.to_string(),
        });
        if let Some(field) = self.field {
            body["field"] = json!(field);
        }
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use almanac_scheduler::ValidationError;

    #[test]
    fn layers_map_to_status_codes() {
        let not_found: ApiError = SchedulerError::NotFound { id: "s-1".into() }.into();
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);

        let conflict: ApiError = DispatchError::AlreadyInFlight { id: "s-1".into() }.into();
        assert_eq!(conflict.status(), StatusCode::CONFLICT);

        let invalid: ApiError = SchedulerError::Validation(ValidationError::Title).into();
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
        assert_eq!(invalid.field, Some("title"));

        let poisoned: ApiError = SchedulerError::LockPoisoned.into();
        assert_eq!(poisoned.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
