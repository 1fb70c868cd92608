use axum::{extract::FromRequestParts, http::request::Parts};

use crate::{
    error::ServicingError,
    servicing::actor::{Actor, ManageScope},
};

pub const ACTOR_HEADER: &str = "x-actor";
pub const SCOPE_HEADER: &str = "x-manage-scope";

/// The acting user, as asserted by the identity proxy in front of this service.
pub struct CurrentActor(pub Actor);

fn header(parts: &Parts, name: &str) -> Option<String> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for CurrentActor
where
    S: Send + Sync,
{
    type Rejection = ServicingError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let username = header(parts, ACTOR_HEADER)
            .ok_or_else(|| ServicingError::PermissionDenied("no acting user supplied".into()))?;
        let scope = match header(parts, SCOPE_HEADER) {
            Some(raw) => ManageScope::parse(&raw).ok_or_else(|| {
                ServicingError::validation(SCOPE_HEADER, format!("unrecognised scope '{}'", raw))
            })?,
            None => ManageScope::None,
        };
        Ok(CurrentActor(Actor::new(username, scope)))
    }
}
