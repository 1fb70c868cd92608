//! Reference data: resources, metrics, schedules, assignments and readings.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use std::str::FromStr;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::db::{
    models::{MetricReading, Resource, ServiceMetric, ServiceSchedule},
    queries,
};
use crate::error::{Result, ServicingError};
use crate::servicing::{actor::Actor, threshold};
use crate::ws::ServicingEvent;

/// Parse user-entered decimal text. Scientific notation is accepted.
pub fn parse_decimal(field: &'static str, raw: &str) -> Result<Decimal> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ServicingError::validation(field, "a value is required"));
    }
    Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .map_err(|_| ServicingError::validation(field, format!("'{}' is not a decimal number", trimmed)))
}

fn required(field: &'static str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ServicingError::validation(field, "is required"));
    }
    Ok(trimmed.to_string())
}

fn optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Writes that change which team owns a resource, or what is serviced on it,
/// need the same scope as running its services.
fn ensure_manages(actor: &Actor, team_id: Option<&str>, what: &str) -> Result<()> {
    if actor.may_manage(team_id) {
        return Ok(());
    }
    tracing::warn!(
        "{} is not allowed to {} (team {})",
        actor.username,
        what,
        team_id.unwrap_or("none")
    );
    Err(ServicingError::PermissionDenied(format!(
        "{} may not {}",
        actor.username, what
    )))
}

fn ensure_catalog_admin(actor: &Actor, what: &str) -> Result<()> {
    if actor.may_manage_catalog() {
        return Ok(());
    }
    tracing::warn!("{} is not allowed to {}", actor.username, what);
    Err(ServicingError::PermissionDenied(format!(
        "{} may not {}",
        actor.username, what
    )))
}

// ─── Requests ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct NewResource {
    pub resource_type: String,
    pub reference: String,
    #[serde(default)]
    pub team_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResourceUpdate {
    pub resource_type: String,
    pub reference: String,
    #[serde(default)]
    pub team_id: Option<String>,
    /// Left unchanged when absent.
    #[serde(default)]
    pub is_archived: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewMetric {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub is_cumulative: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricUpdate {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub is_cumulative: bool,
    #[serde(default)]
    pub is_archived: Option<bool>,
}

/// Thresholds arrive as text so malformed input maps to a field error.
#[derive(Debug, Clone, Deserialize)]
pub struct NewSchedule {
    pub name: String,
    #[serde(default)]
    pub metric_id: String,
    pub threshold: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleUpdate {
    pub name: String,
    pub metric_id: String,
    pub threshold: String,
    #[serde(default)]
    pub is_archived: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BulkScheduleEdit {
    pub resource_ids: Vec<String>,
    #[serde(default)]
    pub assign: Vec<String>,
    #[serde(default)]
    pub unassign: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BulkEditSummary {
    pub assigned: u64,
    pub unassigned: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewReading {
    pub metric_id: String,
    pub value: String,
    #[serde(default)]
    pub recorded_at: Option<DateTime<Utc>>,
}

// ─── Catalog ─────────────────────────────────────────────────────────────────

pub struct Catalog {
    pool: SqlitePool,
    event_tx: broadcast::Sender<ServicingEvent>,
}

impl Catalog {
    pub fn new(pool: SqlitePool, event_tx: broadcast::Sender<ServicingEvent>) -> Self {
        Catalog { pool, event_tx }
    }

    // ── resources ──

    pub async fn create_resource(&self, actor: &Actor, req: NewResource) -> Result<Resource> {
        let resource = Resource::new(
            required("resource_type", &req.resource_type)?,
            required("reference", &req.reference)?,
            optional(req.team_id),
        );
        ensure_manages(actor, resource.team_id.as_deref(), "create resources for this team")?;
        let mut conn = self.pool.acquire().await?;
        queries::insert_resource(&mut conn, &resource).await?;
        tracing::info!("Resource {} ({}) created", resource.reference, resource.id);
        Ok(resource)
    }

    pub async fn get_resource(&self, id: &str) -> Result<Resource> {
        let mut conn = self.pool.acquire().await?;
        queries::get_resource(&mut conn, id)
            .await?
            .ok_or_else(|| ServicingError::not_found("resource", id))
    }

    pub async fn list_resources(&self, include_archived: bool) -> Result<Vec<Resource>> {
        let mut conn = self.pool.acquire().await?;
        Ok(queries::list_resources(&mut conn, include_archived).await?)
    }

    /// Edits descriptive fields. `last_serviced_at` is never touched here.
    /// Moving a resource between teams needs manage scope over both.
    pub async fn update_resource(&self, actor: &Actor, id: &str, req: ResourceUpdate) -> Result<Resource> {
        let resource_type = required("resource_type", &req.resource_type)?;
        let reference = required("reference", &req.reference)?;
        let team_id = optional(req.team_id);

        let mut tx = self.pool.begin().await?;
        let current = load_resource(&mut tx, id).await?;
        ensure_manages(actor, current.team_id.as_deref(), "edit this resource")?;
        if team_id != current.team_id {
            ensure_manages(actor, team_id.as_deref(), "move resources into this team")?;
        }
        let n = queries::update_resource(
            &mut tx,
            id,
            &resource_type,
            &reference,
            team_id.as_deref(),
            req.is_archived.unwrap_or(current.is_archived),
        )
        .await?;
        if n == 0 {
            return Err(ServicingError::not_found("resource", id));
        }
        let resource = load_resource(&mut tx, id).await?;
        tx.commit().await?;
        tracing::info!("Resource {} updated by {}", resource.reference, actor.username);
        Ok(resource)
    }

    pub async fn archive_resource(&self, actor: &Actor, id: &str) -> Result<Resource> {
        let mut tx = self.pool.begin().await?;
        let current = load_resource(&mut tx, id).await?;
        ensure_manages(actor, current.team_id.as_deref(), "archive this resource")?;
        if queries::archive_resource(&mut tx, id).await? == 0 {
            return Err(ServicingError::not_found("resource", id));
        }
        let resource = load_resource(&mut tx, id).await?;
        tx.commit().await?;
        tracing::info!("Resource {} archived", resource.reference);
        Ok(resource)
    }

    // ── metrics ──

    pub async fn create_metric(&self, actor: &Actor, req: NewMetric) -> Result<ServiceMetric> {
        ensure_catalog_admin(actor, "create metrics")?;
        let metric = ServiceMetric::new(
            required("name", &req.name)?,
            req.description.trim().to_string(),
            req.is_cumulative,
        );
        let mut conn = self.pool.acquire().await?;
        queries::insert_metric(&mut conn, &metric).await?;
        tracing::info!("Metric {} ({}) created", metric.name, metric.id);
        Ok(metric)
    }

    pub async fn get_metric(&self, id: &str) -> Result<ServiceMetric> {
        let mut conn = self.pool.acquire().await?;
        queries::get_metric(&mut conn, id)
            .await?
            .ok_or_else(|| ServicingError::not_found("metric", id))
    }

    pub async fn list_metrics(&self, include_archived: bool) -> Result<Vec<ServiceMetric>> {
        let mut conn = self.pool.acquire().await?;
        Ok(queries::list_metrics(&mut conn, include_archived).await?)
    }

    /// Once readings exist the aggregation mode is fixed.
    pub async fn update_metric(&self, actor: &Actor, id: &str, req: MetricUpdate) -> Result<ServiceMetric> {
        ensure_catalog_admin(actor, "edit metrics")?;
        let name = required("name", &req.name)?;
        let mut tx = self.pool.begin().await?;
        let mut metric = queries::get_metric(&mut tx, id)
            .await?
            .ok_or_else(|| ServicingError::not_found("metric", id))?;

        if metric.is_cumulative != req.is_cumulative && queries::metric_has_readings(&mut tx, id).await? {
            return Err(ServicingError::validation(
                "is_cumulative",
                "cannot change once readings reference this metric",
            ));
        }

        metric.name = name;
        metric.description = req.description.trim().to_string();
        metric.is_cumulative = req.is_cumulative;
        if let Some(is_archived) = req.is_archived {
            metric.is_archived = is_archived;
        }
        queries::update_metric(&mut tx, &metric).await?;
        tx.commit().await?;
        Ok(metric)
    }

    // ── schedules ──

    pub async fn create_schedule(&self, actor: &Actor, req: NewSchedule) -> Result<ServiceSchedule> {
        ensure_catalog_admin(actor, "create schedules")?;
        let name = required("name", &req.name)?;
        let metric_id = required("metric_id", &req.metric_id)?;
        let threshold = parse_decimal("threshold", &req.threshold)?;
        threshold::validate_threshold(threshold)?;

        let mut tx = self.pool.begin().await?;
        ensure_live_metric(&mut tx, &metric_id).await?;
        let id = Uuid::new_v4().to_string();
        queries::insert_schedule(&mut tx, &id, &name, &metric_id, threshold).await?;
        let schedule = load_schedule(&mut tx, &id).await?;
        tx.commit().await?;
        tracing::info!("Schedule {} created at threshold {}", schedule.name, schedule.threshold);
        Ok(schedule)
    }

    pub async fn get_schedule(&self, id: &str) -> Result<ServiceSchedule> {
        let mut conn = self.pool.acquire().await?;
        load_schedule(&mut conn, id).await
    }

    pub async fn list_schedules(&self, include_archived: bool) -> Result<Vec<ServiceSchedule>> {
        let mut conn = self.pool.acquire().await?;
        Ok(queries::list_schedules(&mut conn, include_archived).await?)
    }

    pub async fn update_schedule(&self, actor: &Actor, id: &str, req: ScheduleUpdate) -> Result<ServiceSchedule> {
        ensure_catalog_admin(actor, "edit schedules")?;
        let name = required("name", &req.name)?;
        let metric_id = required("metric_id", &req.metric_id)?;
        let threshold = parse_decimal("threshold", &req.threshold)?;
        threshold::validate_threshold(threshold)?;

        let mut tx = self.pool.begin().await?;
        let current = load_schedule(&mut tx, id).await?;
        if current.metric_id != metric_id {
            ensure_live_metric(&mut tx, &metric_id).await?;
        }
        let is_archived = req.is_archived.unwrap_or(current.is_archived);
        queries::update_schedule(&mut tx, id, &name, &metric_id, threshold, is_archived).await?;
        let schedule = load_schedule(&mut tx, id).await?;
        tx.commit().await?;
        Ok(schedule)
    }

    // ── assignments ──

    pub async fn assign_schedule(&self, actor: &Actor, resource_id: &str, schedule_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        managed_resource(&mut tx, actor, resource_id).await?;
        assign(&mut tx, resource_id, schedule_id, Utc::now()).await?;
        tx.commit().await?;
        tracing::info!("Schedule {} assigned to resource {}", schedule_id, resource_id);
        Ok(())
    }

    pub async fn unassign_schedule(&self, actor: &Actor, resource_id: &str, schedule_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        managed_resource(&mut tx, actor, resource_id).await?;
        if queries::unassign_schedule(&mut tx, resource_id, schedule_id).await? == 0 {
            return Err(ServicingError::not_found(
                "schedule assignment",
                format!("{resource_id}/{schedule_id}"),
            ));
        }
        tx.commit().await?;
        tracing::info!("Schedule {} unassigned from resource {}", schedule_id, resource_id);
        Ok(())
    }

    /// Apply assignment changes to many resources. All or nothing. Counts only
    /// assignments that actually changed.
    pub async fn bulk_edit(&self, actor: &Actor, req: BulkScheduleEdit) -> Result<BulkEditSummary> {
        if req.resource_ids.is_empty() {
            return Err(ServicingError::validation("resource_ids", "select at least one resource"));
        }
        let now = Utc::now();
        let mut summary = BulkEditSummary::default();
        let mut tx = self.pool.begin().await?;
        for resource_id in &req.resource_ids {
            managed_resource(&mut tx, actor, resource_id).await?;
            for schedule_id in &req.assign {
                summary.assigned += assign(&mut tx, resource_id, schedule_id, now).await?;
            }
            for schedule_id in &req.unassign {
                summary.unassigned += queries::unassign_schedule(&mut tx, resource_id, schedule_id).await?;
            }
        }
        tx.commit().await?;
        tracing::info!(
            "Bulk schedule edit over {} resource(s): {} assigned, {} unassigned",
            req.resource_ids.len(),
            summary.assigned,
            summary.unassigned
        );
        Ok(summary)
    }

    // ── readings ──

    /// Capture a usage reading against a metric the resource tracks.
    pub async fn record_reading(&self, actor: &Actor, resource_id: &str, req: NewReading) -> Result<MetricReading> {
        let metric_id = required("metric_id", &req.metric_id)?;
        let value = parse_decimal("value", &req.value)?;

        let mut tx = self.pool.begin().await?;
        let resource = load_resource(&mut tx, resource_id).await?;
        if resource.is_archived {
            return Err(ServicingError::validation(
                "resource_id",
                "cannot record readings on an archived resource",
            ));
        }
        if !queries::resource_tracks_metric(&mut tx, resource_id, &metric_id).await? {
            return Err(ServicingError::validation(
                "metric_id",
                "resource has no live schedule for this metric",
            ));
        }
        let reading = MetricReading::new(
            resource_id.to_string(),
            metric_id,
            value,
            req.recorded_at.unwrap_or_else(Utc::now),
            actor.username.clone(),
        );
        queries::insert_reading(&mut tx, &reading).await?;
        tx.commit().await?;

        tracing::debug!(
            "Reading {} of metric {} on {} by {}",
            reading.value,
            reading.metric_id,
            resource.reference,
            actor.username
        );
        let _ = self.event_tx.send(ServicingEvent::ReadingRecorded {
            resource_id: reading.resource_id.clone(),
            metric_id: reading.metric_id.clone(),
            value: reading.value,
            recorded_at: reading.recorded_at,
        });
        Ok(reading)
    }
}

async fn load_resource(conn: &mut SqliteConnection, id: &str) -> Result<Resource> {
    queries::get_resource(conn, id)
        .await?
        .ok_or_else(|| ServicingError::not_found("resource", id))
}

async fn load_schedule(conn: &mut SqliteConnection, id: &str) -> Result<ServiceSchedule> {
    queries::get_schedule(conn, id)
        .await?
        .ok_or_else(|| ServicingError::not_found("schedule", id))
}

async fn ensure_live_metric(conn: &mut SqliteConnection, metric_id: &str) -> Result<()> {
    let metric = queries::get_metric(conn, metric_id)
        .await?
        .ok_or_else(|| ServicingError::not_found("metric", metric_id))?;
    if metric.is_archived {
        return Err(ServicingError::validation("metric_id", "metric is archived"));
    }
    Ok(())
}

async fn managed_resource(conn: &mut SqliteConnection, actor: &Actor, resource_id: &str) -> Result<Resource> {
    let resource = load_resource(conn, resource_id).await?;
    ensure_manages(actor, resource.team_id.as_deref(), "change schedules of this resource")?;
    Ok(resource)
}

/// Rows inserted: 0 when the schedule was already assigned.
async fn assign(conn: &mut SqliteConnection, resource_id: &str, schedule_id: &str, at: DateTime<Utc>) -> Result<u64> {
    let schedule = load_schedule(conn, schedule_id).await?;
    if schedule.is_archived || schedule.metric_is_archived {
        return Err(ServicingError::validation("schedule_id", "schedule is archived"));
    }
    Ok(queries::assign_schedule(conn, resource_id, schedule_id, at).await?)
}
