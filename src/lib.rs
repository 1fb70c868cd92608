pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod servicing;
pub mod ws;

use axum::{
    routing::{delete, get, patch, post},
    Router,
};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    config::AppConfig,
    servicing::{catalog::Catalog, lifecycle::ServiceLifecycleManager, priority::SchedulingPriorityView},
    ws::ServicingEvent,
};

// ─── App State ───────────────────────────────────────────────────────────────

pub struct AppState {
    pub pool: SqlitePool,
    pub event_tx: broadcast::Sender<ServicingEvent>,
    pub config: AppConfig,
    pub catalog: Catalog,
    pub lifecycle: ServiceLifecycleManager,
    pub priority: SchedulingPriorityView,
}

impl AppState {
    pub fn new(pool: SqlitePool, config: AppConfig) -> Self {
        let (event_tx, _) = broadcast::channel::<ServicingEvent>(256);
        AppState {
            catalog: Catalog::new(pool.clone(), event_tx.clone()),
            lifecycle: ServiceLifecycleManager::new(pool.clone(), event_tx.clone()),
            priority: SchedulingPriorityView::new(pool.clone()),
            pool,
            event_tx,
            config,
        }
    }
}

// ─── Router ──────────────────────────────────────────────────────────────────

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // WebSocket
        .route("/ws", get(api::ws_handler::ws_handler))
        // Servicing worklist
        .route("/api/servicing", get(api::servicing::list_statuses))
        // Resources
        .route(
            "/api/resources",
            get(api::resources::list_resources).post(api::resources::create_resource),
        )
        .route(
            "/api/resources/:id",
            get(api::resources::get_resource).put(api::resources::update_resource),
        )
        .route("/api/resources/:id/archive", post(api::resources::archive_resource))
        .route("/api/resources/:id/statuses", get(api::servicing::resource_statuses))
        .route("/api/resources/:id/lifetime-totals", get(api::servicing::lifetime_totals))
        .route("/api/resources/:id/schedules", post(api::resources::assign_schedule))
        .route(
            "/api/resources/:id/schedules/:schedule_id",
            delete(api::resources::unassign_schedule),
        )
        .route("/api/resources/:id/readings", post(api::resources::record_reading))
        .route("/api/resources/:id/active-service", get(api::services::active_service))
        .route("/api/resources/:id/services", post(api::services::start_service))
        // Metrics
        .route(
            "/api/metrics",
            get(api::metrics::list_metrics).post(api::metrics::create_metric),
        )
        .route(
            "/api/metrics/:id",
            get(api::metrics::get_metric).put(api::metrics::update_metric),
        )
        // Schedules
        .route(
            "/api/schedules",
            get(api::schedules::list_schedules).post(api::schedules::create_schedule),
        )
        .route("/api/schedules/bulk-edit", post(api::schedules::bulk_edit))
        .route(
            "/api/schedules/:id",
            get(api::schedules::get_schedule).put(api::schedules::update_schedule),
        )
        // Services
        .route("/api/services", get(api::services::list_services))
        .route("/api/services/:id", get(api::services::get_service))
        .route("/api/services/:id/previous", get(api::services::previous_service))
        .route("/api/services/:id/notes", patch(api::services::edit_notes))
        .route("/api/services/:id/:action", post(api::services::transition_service))
        .route("/api/services/:id/history", get(api::services::service_history))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
