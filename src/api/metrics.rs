use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use crate::{
    api::{actor::CurrentActor, ArchivedQuery},
    servicing::catalog::{MetricUpdate, NewMetric},
    AppState,
};

/// GET /api/metrics
pub async fn list_metrics(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ArchivedQuery>,
) -> impl IntoResponse {
    match state.catalog.list_metrics(q.include_archived).await {
        Ok(metrics) => Json(serde_json::json!({ "metrics": metrics })).into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /api/metrics
pub async fn create_metric(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Json(req): Json<NewMetric>,
) -> impl IntoResponse {
    match state.catalog.create_metric(&actor, req).await {
        Ok(metric) => (StatusCode::CREATED, Json(metric)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /api/metrics/:id
pub async fn get_metric(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.catalog.get_metric(&id).await {
        Ok(metric) => Json(metric).into_response(),
        Err(e) => e.into_response(),
    }
}

/// PUT /api/metrics/:id
pub async fn update_metric(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
    Json(req): Json<MetricUpdate>,
) -> impl IntoResponse {
    match state.catalog.update_metric(&actor, &id, req).await {
        Ok(metric) => Json(metric).into_response(),
        Err(e) => e.into_response(),
    }
}
