use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use super::error::ApiError;
use crate::app::AppState;
use crate::auth::Caller;

/// GET /api/scheduler/dashboard: counters, upcoming runs and recent activity
/// for the caller's tenant.
pub async fn dashboard_handler(
    State(state): State<Arc<AppState>>,
    caller: Caller,
) -> Result<Json<Value>, ApiError> {
    let summary = state.store.dashboard(&caller.tenant)?;
    Ok(Json(json!({ "success": true, "data": summary })))
}
