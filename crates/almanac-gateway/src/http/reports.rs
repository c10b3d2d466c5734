//! Scheduled report CRUD, toggle, manual run and history.
//!
//! All routes live under `/api/scheduler/reports` and are scoped to the
//! caller's tenant; a schedule of another tenant answers 404.

use std::sync::Arc;

use almanac_core::ScheduleId;
use almanac_scheduler::status::view;
use almanac_scheduler::store::{DEFAULT_HISTORY_LIMIT, DEFAULT_PAGE_LIMIT};
use almanac_scheduler::{ListFilter, PageRequest, ReportType, ScheduleDraft};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::error::ApiError;
use super::extract::JsonBody;
use crate::app::AppState;
use crate::auth::Caller;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    /// `active` or `inactive`.
    pub status: Option<String>,
    pub report_type: Option<String>,
    /// Takes precedence over `status`.
    pub is_active: Option<bool>,
}

impl ListQuery {
    fn filter(&self) -> Result<ListFilter, ApiError> {
        let from_status = match self.status.as_deref() {
            None | Some("") => None,
            Some("active") => Some(true),
            Some("inactive") => Some(false),
            Some(other) => {
                return Err(ApiError::validation(
                    "status",
                    format!("status must be 'active' or 'inactive', got '{other}'"),
                ))
            }
        };
        let report_type = match self.report_type.as_deref() {
            None | Some("") => None,
            Some(raw) => Some(
                raw.parse::<ReportType>()
                    .map_err(|e| ApiError::validation("reportType", e))?,
            ),
        };
        Ok(ListFilter {
            is_active: self.is_active.or(from_status),
            report_type,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleRequest {
    pub is_active: bool,
}

/// GET /api/scheduler/reports
pub async fn list(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    let filter = query.filter()?;
    let page = PageRequest::new(query.page, query.limit, DEFAULT_PAGE_LIMIT);
    let result = state.store.list(&caller.tenant, &filter, page)?;

    let now = state.now();
    let items: Vec<_> = result.items.into_iter().map(|s| view(s, now)).collect();
    Ok(Json(json!({
        "success": true,
        "data": items,
        "pagination": result.pagination,
    })))
}

/// POST /api/scheduler/reports
pub async fn create(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    JsonBody(draft): JsonBody<ScheduleDraft>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let report = state.store.create(&caller.tenant, &caller.user, draft)?;
    info!(tenant = %caller.tenant, schedule_id = %report.id, "scheduled report created");

    let now = state.now();
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "data": view(report, now),
            "message": "Scheduled report created successfully",
        })),
    ))
}

/// GET /api/scheduler/reports/{id}
pub async fn get(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let report = state.store.get(&caller.tenant, &ScheduleId::from(id))?;
    let now = state.now();
    Ok(Json(json!({ "success": true, "data": view(report, now) })))
}

/// PUT /api/scheduler/reports/{id}: full replacement of the authoring fields.
pub async fn update(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<String>,
    JsonBody(draft): JsonBody<ScheduleDraft>,
) -> Result<Json<Value>, ApiError> {
    let report = state
        .store
        .update(&caller.tenant, &ScheduleId::from(id), draft)?;
    let now = state.now();
    Ok(Json(json!({
        "success": true,
        "data": view(report, now),
        "message": "Scheduled report updated successfully",
    })))
}

/// DELETE /api/scheduler/reports/{id}
pub async fn delete(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let id = ScheduleId::from(id);
    state.store.delete(&caller.tenant, &id)?;
    state.dispatcher.cancel_pending(&id);
    info!(tenant = %caller.tenant, schedule_id = %id, "scheduled report deleted");
    Ok(Json(json!({
        "success": true,
        "message": "Scheduled report deleted successfully",
    })))
}

/// POST /api/scheduler/reports/{id}/toggle
pub async fn toggle(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<String>,
    JsonBody(req): JsonBody<ToggleRequest>,
) -> Result<Json<Value>, ApiError> {
    let id = ScheduleId::from(id);
    let report = state.store.toggle(&caller.tenant, &id, req.is_active)?;
    if !req.is_active {
        state.dispatcher.cancel_pending(&id);
    }

    let now = state.now();
    let message = if req.is_active {
        "Scheduled report resumed"
    } else {
        "Scheduled report paused"
    };
    Ok(Json(json!({
        "success": true,
        "data": view(report, now),
        "message": message,
    })))
}

/// POST /api/scheduler/reports/{id}/run: queue an immediate run.
pub async fn run(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let job_id = state
        .dispatcher
        .run_now(&caller.tenant, &ScheduleId::from(id))?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "success": true,
            "data": { "jobId": job_id },
            "message": "Report execution queued",
        })),
    ))
}

/// GET /api/scheduler/reports/{id}/history
pub async fn history(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Value>, ApiError> {
    let page = PageRequest::new(query.page, query.limit, DEFAULT_HISTORY_LIMIT);
    let history = state
        .store
        .history(&caller.tenant, &ScheduleId::from(id), page)?;
    Ok(Json(json!({
        "success": true,
        "data": history.entries,
        "pagination": history.pagination,
        "summary": history.summary,
    })))
}
