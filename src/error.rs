use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::db::models::ServiceStatus;

/// Every way a servicing operation can be rejected.
#[derive(Error, Debug)]
pub enum ServicingError {
    #[error("{field}: {message}")]
    Validation { field: &'static str, message: String },

    #[error("cannot {action} a service that is {from}")]
    InvalidTransition {
        from: ServiceStatus,
        action: &'static str,
    },

    #[error("{0}")]
    Conflict(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

pub type Result<T> = std::result::Result<T, ServicingError>;

impl ServicingError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        ServicingError::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        ServicingError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn already_in_progress(resource_id: &str) -> Self {
        ServicingError::Conflict(format!(
            "resource {} already has a service in progress",
            resource_id
        ))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ServicingError::Validation { .. } => "validation",
            ServicingError::InvalidTransition { .. } => "invalid_transition",
            ServicingError::Conflict(_) => "conflict",
            ServicingError::NotFound { .. } => "not_found",
            ServicingError::PermissionDenied(_) => "permission_denied",
            ServicingError::Database(_) | ServicingError::Migration(_) => "internal",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ServicingError::Validation { .. } => StatusCode::BAD_REQUEST,
            ServicingError::InvalidTransition { .. } | ServicingError::Conflict(_) => {
                StatusCode::CONFLICT
            }
            ServicingError::NotFound { .. } => StatusCode::NOT_FOUND,
            ServicingError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            ServicingError::Database(_) | ServicingError::Migration(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// True when the error is SQLite rejecting a row against a unique index.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            matches!(db_err.kind(), sqlx::error::ErrorKind::UniqueViolation)
        }
        _ => false,
    }
}

impl IntoResponse for ServicingError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            ServicingError::Validation { field, message } => serde_json::json!({
                "error": message,
                "field": field,
                "kind": self.kind(),
            }),
            ServicingError::Database(e) => {
                tracing::error!("Database failure: {}", e);
                serde_json::json!({ "error": "Internal database error", "kind": self.kind() })
            }
            ServicingError::Migration(e) => {
                tracing::error!("Migration failure: {}", e);
                serde_json::json!({ "error": "Internal database error", "kind": self.kind() })
            }
            other => serde_json::json!({ "error": other.to_string(), "kind": other.kind() }),
        };
        (status, Json(body)).into_response()
    }
}
