//! Dispatch queue inspection and control.
//!
//! The queue is shared by every tenant: `queueStats` counts all jobs, while
//! `recentJobs` only lists the caller's own.

use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use crate::app::AppState;
use crate::auth::Caller;

/// GET /api/scheduler/queue/stats
pub async fn stats_handler(State(state): State<Arc<AppState>>, caller: Caller) -> Json<Value> {
    let recent: Vec<_> = state
        .dispatcher
        .recent_jobs()
        .into_iter()
        .filter(|job| job.tenant_id == caller.tenant)
        .collect();
    Json(json!({
        "success": true,
        "data": {
            "queueStats": state.dispatcher.stats(),
            "recentJobs": recent,
        },
    }))
}

/// POST /api/scheduler/queue/pause: stop handing jobs to workers. Running
/// jobs finish; polling keeps enqueueing.
pub async fn pause_handler(State(state): State<Arc<AppState>>, caller: Caller) -> Json<Value> {
    state.dispatcher.pause();
    info!(tenant = %caller.tenant, user = %caller.user, "queue paused via API");
    Json(json!({ "success": true, "message": "Report queue paused" }))
}

/// POST /api/scheduler/queue/resume
pub async fn resume_handler(State(state): State<Arc<AppState>>, caller: Caller) -> Json<Value> {
    state.dispatcher.resume();
    info!(tenant = %caller.tenant, user = %caller.user, "queue resumed via API");
    Json(json!({ "success": true, "message": "Report queue resumed" }))
}
