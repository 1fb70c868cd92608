use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use crate::{
    api::{actor::CurrentActor, ArchivedQuery},
    servicing::catalog::{BulkScheduleEdit, NewSchedule, ScheduleUpdate},
    AppState,
};

/// GET /api/schedules
pub async fn list_schedules(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ArchivedQuery>,
) -> impl IntoResponse {
    match state.catalog.list_schedules(q.include_archived).await {
        Ok(schedules) => Json(serde_json::json!({ "schedules": schedules })).into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /api/schedules
pub async fn create_schedule(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Json(req): Json<NewSchedule>,
) -> impl IntoResponse {
    match state.catalog.create_schedule(&actor, req).await {
        Ok(schedule) => (StatusCode::CREATED, Json(schedule)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /api/schedules/:id
pub async fn get_schedule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.catalog.get_schedule(&id).await {
        Ok(schedule) => Json(schedule).into_response(),
        Err(e) => e.into_response(),
    }
}

/// PUT /api/schedules/:id
pub async fn update_schedule(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
    Json(req): Json<ScheduleUpdate>,
) -> impl IntoResponse {
    match state.catalog.update_schedule(&actor, &id, req).await {
        Ok(schedule) => Json(schedule).into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /api/schedules/bulk-edit
pub async fn bulk_edit(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Json(req): Json<BulkScheduleEdit>,
) -> impl IntoResponse {
    match state.catalog.bulk_edit(&actor, req).await {
        Ok(summary) => Json(summary).into_response(),
        Err(e) => e.into_response(),
    }
}
