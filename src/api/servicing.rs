use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use std::{str::FromStr, sync::Arc};

use crate::{
    api::actor::CurrentActor,
    error::ServicingError,
    servicing::{
        priority::{Sort, SortDirection, SortKey, StatusFilter},
        Page,
    },
    AppState,
};

#[derive(Deserialize)]
pub struct StatusQuery {
    /// Comma-separated team ids.
    pub teams: Option<String>,
    #[serde(default)]
    pub include_archived: bool,
    pub sort: Option<String>,
    pub dir: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

fn parse_sort(q: &StatusQuery) -> Result<Sort, ServicingError> {
    let default = Sort::default();
    let key = match q.sort.as_deref() {
        Some(raw) => SortKey::from_str(raw)?,
        None => default.key,
    };
    let direction = match q.dir.as_deref() {
        Some(raw) => SortDirection::from_str(raw)?,
        None => default.direction,
    };
    Ok(Sort { key, direction })
}

/// GET /api/servicing
pub async fn list_statuses(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Query(q): Query<StatusQuery>,
) -> impl IntoResponse {
    let sort = match parse_sort(&q) {
        Ok(sort) => sort,
        Err(e) => return e.into_response(),
    };
    let filter = StatusFilter {
        team_ids: q
            .teams
            .as_deref()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        include_archived: q.include_archived,
    };
    let page = Page::new(q.page.unwrap_or(1), state.config.page_size(q.page_size));

    match state.priority.list(&actor, &filter, sort, page).await {
        Ok(paged) => Json(paged).into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /api/resources/:id/statuses
pub async fn resource_statuses(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.priority.for_resource(&actor, &id).await {
        Ok(statuses) => Json(serde_json::json!({ "statuses": statuses })).into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /api/resources/:id/lifetime-totals
pub async fn lifetime_totals(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.priority.lifetime_totals(&id).await {
        Ok(totals) => Json(serde_json::json!({ "totals": totals })).into_response(),
        Err(e) => e.into_response(),
    }
}
