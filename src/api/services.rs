use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use std::{str::FromStr, sync::Arc};

use crate::{
    api::actor::CurrentActor,
    db::{models::ServiceStatus, queries::ServiceFilter},
    error::ServicingError,
    servicing::{audit, lifecycle::ServiceAction, Page},
    AppState,
};

#[derive(Deserialize)]
pub struct StartServiceRequest {
    #[serde(default)]
    pub notes: String,
}

#[derive(Deserialize)]
pub struct EditNotesRequest {
    pub notes: String,
}

#[derive(Deserialize)]
pub struct ListServicesQuery {
    pub resource_id: Option<String>,
    pub status: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

/// POST /api/resources/:id/services
pub async fn start_service(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Path(resource_id): Path<String>,
    Json(req): Json<StartServiceRequest>,
) -> impl IntoResponse {
    match state.lifecycle.start(&actor, &resource_id, req.notes).await {
        Ok(service) => (StatusCode::CREATED, Json(service)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /api/resources/:id/active-service
pub async fn active_service(
    State(state): State<Arc<AppState>>,
    Path(resource_id): Path<String>,
) -> impl IntoResponse {
    match state.lifecycle.active_service_id(&resource_id).await {
        Ok(service_id) => Json(serde_json::json!({ "service_id": service_id })).into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /api/services
pub async fn list_services(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ListServicesQuery>,
) -> impl IntoResponse {
    let status = match q.status.as_deref().map(ServiceStatus::from_str).transpose() {
        Ok(status) => status,
        Err(message) => return ServicingError::validation("status", message).into_response(),
    };
    let filter = ServiceFilter {
        resource_id: q.resource_id,
        status,
    };
    let page = Page::new(q.page.unwrap_or(1), state.config.page_size(q.page_size));

    match state.lifecycle.list(&filter, page).await {
        Ok(paged) => Json(paged).into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /api/services/:id
pub async fn get_service(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.lifecycle.get(&id).await {
        Ok(service) => Json(service).into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /api/services/:id/previous
pub async fn previous_service(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.lifecycle.previous(&id).await {
        Ok(previous) => Json(serde_json::json!({ "previous": previous })).into_response(),
        Err(e) => e.into_response(),
    }
}

/// PATCH /api/services/:id/notes
pub async fn edit_notes(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
    Json(req): Json<EditNotesRequest>,
) -> impl IntoResponse {
    match state.lifecycle.edit_notes(&actor, &id, req.notes).await {
        Ok(service) => Json(service).into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /api/services/:id/{complete,cancel,reopen}
pub async fn transition_service(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Path((id, action)): Path<(String, String)>,
) -> impl IntoResponse {
    let action = match ServiceAction::from_str(&action) {
        Ok(action) => action,
        Err(e) => return e.into_response(),
    };
    match state.lifecycle.apply(&actor, &id, action).await {
        Ok(service) => Json(service).into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /api/services/:id/history
pub async fn service_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.lifecycle.history(&id).await {
        Ok(history) => {
            let entries = audit::with_diffs(history);
            Json(serde_json::json!({ "history": entries })).into_response()
        }
        Err(e) => e.into_response(),
    }
}
