use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::db::models::{ResourceServiceChange, ServiceStatus};

/// Events pushed to connected WebSocket clients so open worklists can refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServicingEvent {
    /// A service was started, transitioned or had its notes edited
    ServiceChanged {
        service_id: String,
        resource_id: String,
        status: ServiceStatus,
        change: ResourceServiceChange,
    },
    /// A usage reading was captured
    ReadingRecorded {
        resource_id: String,
        metric_id: String,
        value: Decimal,
        recorded_at: DateTime<Utc>,
    },
    /// Generic error notification
    Error { message: String },
}
