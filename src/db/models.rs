use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, FromRow, Row};
use std::{fmt, str::FromStr};
use uuid::Uuid;

/// Parse a decimal stored as TEXT. Decimals never round-trip through REAL.
fn decimal_column(row: &SqliteRow, column: &str) -> Result<Decimal, sqlx::Error> {
    let raw: String = row.try_get(column)?;
    Decimal::from_str(raw.trim()).map_err(|e| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

// ─── Resource ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Resource {
    pub id: String,
    pub resource_type: String,
    pub reference: String,
    pub team_id: Option<String>,
    pub is_archived: bool,
    /// Only ever written by a service completion.
    pub last_serviced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Resource {
    pub fn new(resource_type: String, reference: String, team_id: Option<String>) -> Self {
        Resource {
            id: Uuid::new_v4().to_string(),
            resource_type,
            reference,
            team_id,
            is_archived: false,
            last_serviced_at: None,
            created_at: Utc::now(),
        }
    }
}

// ─── ServiceMetric ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ServiceMetric {
    pub id: String,
    pub name: String,
    pub description: String,
    pub is_cumulative: bool,
    pub is_archived: bool,
}

impl ServiceMetric {
    pub fn new(name: String, description: String, is_cumulative: bool) -> Self {
        ServiceMetric {
            id: Uuid::new_v4().to_string(),
            name,
            description,
            is_cumulative,
            is_archived: false,
        }
    }
}

// ─── ServiceSchedule ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSchedule {
    pub id: String,
    pub name: String,
    pub metric_id: String,
    pub metric_name: String,
    pub threshold: Decimal,
    pub is_archived: bool,
    pub metric_is_archived: bool,
}

impl<'r> FromRow<'r, SqliteRow> for ServiceSchedule {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(ServiceSchedule {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            metric_id: row.try_get("metric_id")?,
            metric_name: row.try_get("metric_name")?,
            threshold: decimal_column(row, "threshold")?,
            is_archived: row.try_get("is_archived")?,
            metric_is_archived: row.try_get("metric_is_archived")?,
        })
    }
}

/// One (resource, schedule) pair with everything needed to judge whether the
/// resource is due against that schedule.
#[derive(Debug, Clone)]
pub struct AssignedSchedule {
    pub resource_id: String,
    pub resource_type: String,
    pub reference: String,
    pub team_id: Option<String>,
    pub resource_is_archived: bool,
    pub last_serviced_at: Option<DateTime<Utc>>,
    pub schedule_id: String,
    pub schedule_name: String,
    pub schedule_is_archived: bool,
    pub threshold: Decimal,
    pub metric_id: String,
    pub metric_name: String,
    pub is_cumulative: bool,
    pub metric_is_archived: bool,
    pub assigned_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, SqliteRow> for AssignedSchedule {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(AssignedSchedule {
            resource_id: row.try_get("resource_id")?,
            resource_type: row.try_get("resource_type")?,
            reference: row.try_get("reference")?,
            team_id: row.try_get("team_id")?,
            resource_is_archived: row.try_get("resource_is_archived")?,
            last_serviced_at: row.try_get("last_serviced_at")?,
            schedule_id: row.try_get("schedule_id")?,
            schedule_name: row.try_get("schedule_name")?,
            schedule_is_archived: row.try_get("schedule_is_archived")?,
            threshold: decimal_column(row, "threshold")?,
            metric_id: row.try_get("metric_id")?,
            metric_name: row.try_get("metric_name")?,
            is_cumulative: row.try_get("is_cumulative")?,
            metric_is_archived: row.try_get("metric_is_archived")?,
            assigned_at: row.try_get("assigned_at")?,
        })
    }
}

// ─── MetricReading ───────────────────────────────────────────────────────────

/// Append-only observation. Never updated, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricReading {
    pub id: String,
    pub resource_id: String,
    pub metric_id: String,
    pub value: Decimal,
    pub recorded_at: DateTime<Utc>,
    pub recorded_by: String,
}

impl MetricReading {
    pub fn new(
        resource_id: String,
        metric_id: String,
        value: Decimal,
        recorded_at: DateTime<Utc>,
        recorded_by: String,
    ) -> Self {
        MetricReading {
            id: Uuid::new_v4().to_string(),
            resource_id,
            metric_id,
            value,
            recorded_at,
            recorded_by,
        }
    }
}

impl<'r> FromRow<'r, SqliteRow> for MetricReading {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(MetricReading {
            id: row.try_get("id")?,
            resource_id: row.try_get("resource_id")?,
            metric_id: row.try_get("metric_id")?,
            value: decimal_column(row, "value")?,
            recorded_at: row.try_get("recorded_at")?,
            recorded_by: row.try_get("recorded_by")?,
        })
    }
}

// ─── ResourceService ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ServiceStatus {
    WorkInProgress,
    Completed,
    Cancelled,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::WorkInProgress => "work_in_progress",
            ServiceStatus::Completed => "completed",
            ServiceStatus::Cancelled => "cancelled",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ServiceStatus::WorkInProgress => "work in progress",
            ServiceStatus::Completed => "completed",
            ServiceStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ServiceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "work_in_progress" => Ok(ServiceStatus::WorkInProgress),
            "completed" => Ok(ServiceStatus::Completed),
            "cancelled" => Ok(ServiceStatus::Cancelled),
            other => Err(format!("unknown service status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ResourceService {
    pub id: String,
    pub resource_id: String,
    pub resource_type: String,
    pub resource_reference: String,
    pub status: ServiceStatus,
    pub notes: String,
    pub started_by: String,
    pub started_at: DateTime<Utc>,
    pub completed_by: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub reopened_by: Option<String>,
    pub reopened_at: Option<DateTime<Utc>>,
}

impl ResourceService {
    pub fn start(resource: &Resource, started_by: String, notes: String, now: DateTime<Utc>) -> Self {
        ResourceService {
            id: Uuid::new_v4().to_string(),
            resource_id: resource.id.clone(),
            resource_type: resource.resource_type.clone(),
            resource_reference: resource.reference.clone(),
            status: ServiceStatus::WorkInProgress,
            notes,
            started_by,
            started_at: now,
            completed_by: None,
            completed_at: None,
            cancelled_by: None,
            cancelled_at: None,
            reopened_by: None,
            reopened_at: None,
        }
    }
}

// ─── ResourceServiceChange ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ChangeAction {
    Created,
    NotesEdited,
    Completed,
    Cancelled,
    Reopened,
}

/// The tracked fields of a service as they stood right after a change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct FieldSnapshot {
    pub notes: String,
    pub started_by: String,
    pub completed_by: Option<String>,
    pub cancelled_by: Option<String>,
    pub reopened_by: Option<String>,
}

impl From<&ResourceService> for FieldSnapshot {
    fn from(service: &ResourceService) -> Self {
        FieldSnapshot {
            notes: service.notes.clone(),
            started_by: service.started_by.clone(),
            completed_by: service.completed_by.clone(),
            cancelled_by: service.cancelled_by.clone(),
            reopened_by: service.reopened_by.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ResourceServiceChange {
    pub id: i64,
    pub service_id: String,
    pub action: ChangeAction,
    pub change_by: String,
    pub change_at: DateTime<Utc>,
    pub is_creation: bool,
    #[sqlx(flatten)]
    pub snapshot: FieldSnapshot,
}
