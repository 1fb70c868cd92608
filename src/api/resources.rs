use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::{
    api::{actor::CurrentActor, ArchivedQuery},
    servicing::catalog::{NewReading, NewResource, ResourceUpdate},
    AppState,
};

#[derive(Deserialize)]
pub struct AssignScheduleRequest {
    pub schedule_id: String,
}

/// GET /api/resources
pub async fn list_resources(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ArchivedQuery>,
) -> impl IntoResponse {
    match state.catalog.list_resources(q.include_archived).await {
        Ok(resources) => Json(serde_json::json!({ "resources": resources })).into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /api/resources
pub async fn create_resource(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Json(req): Json<NewResource>,
) -> impl IntoResponse {
    match state.catalog.create_resource(&actor, req).await {
        Ok(resource) => (StatusCode::CREATED, Json(resource)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /api/resources/:id
pub async fn get_resource(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.catalog.get_resource(&id).await {
        Ok(resource) => Json(resource).into_response(),
        Err(e) => e.into_response(),
    }
}

/// PUT /api/resources/:id
pub async fn update_resource(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
    Json(req): Json<ResourceUpdate>,
) -> impl IntoResponse {
    match state.catalog.update_resource(&actor, &id, req).await {
        Ok(resource) => Json(resource).into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /api/resources/:id/archive
pub async fn archive_resource(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.catalog.archive_resource(&actor, &id).await {
        Ok(resource) => Json(resource).into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /api/resources/:id/schedules
pub async fn assign_schedule(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
    Json(req): Json<AssignScheduleRequest>,
) -> impl IntoResponse {
    match state.catalog.assign_schedule(&actor, &id, &req.schedule_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}

/// DELETE /api/resources/:id/schedules/:schedule_id
pub async fn unassign_schedule(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Path((id, schedule_id)): Path<(String, String)>,
) -> impl IntoResponse {
    match state.catalog.unassign_schedule(&actor, &id, &schedule_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /api/resources/:id/readings
pub async fn record_reading(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
    Json(req): Json<NewReading>,
) -> impl IntoResponse {
    match state.catalog.record_reading(&actor, &id, req).await {
        Ok(reading) => (StatusCode::CREATED, Json(reading)).into_response(),
        Err(e) => e.into_response(),
    }
}
