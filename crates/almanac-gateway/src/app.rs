use std::sync::Arc;

use almanac_core::config::AlmanacConfig;
use almanac_dispatch::Dispatcher;
use almanac_scheduler::{Clock, ScheduleStore};
use axum::{
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};

use crate::http::{dashboard, health, queue, reports};

/// Central shared state, passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: AlmanacConfig,
    pub store: Arc<ScheduleStore>,
    pub dispatcher: Arc<Dispatcher>,
}

impl AppState {
    pub fn new(config: AlmanacConfig, store: Arc<ScheduleStore>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            config,
            store,
            dispatcher,
        }
    }

    /// Current instant according to the store's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.store.clock().now()
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/health", get(health::health_handler))
        .route("/reports", get(reports::list).post(reports::create))
        .route(
            "/reports/{id}",
            get(reports::get).put(reports::update).delete(reports::delete),
        )
        .route("/reports/{id}/toggle", post(reports::toggle))
        .route("/reports/{id}/run", post(reports::run))
        .route("/reports/{id}/history", get(reports::history))
        .route("/dashboard", get(dashboard::dashboard_handler))
        .route("/queue/stats", get(queue::stats_handler))
        .route("/queue/pause", post(queue::pause_handler))
        .route("/queue/resume", post(queue::resume_handler));

    Router::new()
        .nest("/api/scheduler", api)
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
