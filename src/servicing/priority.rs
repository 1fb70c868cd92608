//! The "due soon" worklist: every (resource, assigned schedule) pair with its
//! current value judged against the schedule threshold.
//!
//! Computed on every read. Nothing here is cached.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::{cmp::Ordering, collections::BTreeMap, collections::HashMap, str::FromStr};

use crate::db::{
    models::{AssignedSchedule, MetricReading},
    queries::{self, AssignmentFilter},
};
use crate::error::{Result, ServicingError};
use crate::servicing::{
    actor::Actor,
    threshold::{self, Band},
    usage, Page, Paged,
};

/// What the worklist offers for a row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RowAction {
    StartService,
    ViewService { service_id: String },
    None,
}

/// Derived status of one resource against one assigned schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceServiceMetricStatus {
    pub resource_id: String,
    pub resource_type: String,
    pub reference: String,
    pub team_id: Option<String>,
    pub resource_is_archived: bool,
    pub schedule_id: String,
    pub schedule_name: String,
    pub schedule_is_archived: bool,
    pub metric_id: String,
    pub metric_name: String,
    pub is_cumulative: bool,
    pub current_value: Option<Decimal>,
    pub current_value_overflowed: bool,
    pub threshold: Decimal,
    pub normalised_value: Option<Decimal>,
    pub normalised_percentage: Option<Decimal>,
    pub is_due: bool,
    pub band: Option<Band>,
    pub last_recorded_at: Option<DateTime<Utc>>,
    pub last_serviced_at: Option<DateTime<Utc>>,
    pub wip_service_id: Option<String>,
    pub has_wip_service: bool,
    pub can_manage: bool,
    pub action: RowAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    Reference,
    ResourceType,
    Team,
    ScheduleName,
    MetricName,
    CurrentValue,
    Threshold,
    NormalisedValue,
    IsDue,
    LastRecordedAt,
    LastServicedAt,
    HasWipService,
}

impl FromStr for SortKey {
    type Err = ServicingError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let key = match s {
            "reference" => SortKey::Reference,
            "resource_type" | "type" => SortKey::ResourceType,
            "team" => SortKey::Team,
            "schedule_name" => SortKey::ScheduleName,
            "metric_name" => SortKey::MetricName,
            "current_value" => SortKey::CurrentValue,
            "threshold" => SortKey::Threshold,
            "normalised_value" | "normalised_percentage" => SortKey::NormalisedValue,
            "is_due" => SortKey::IsDue,
            "last_recorded_at" => SortKey::LastRecordedAt,
            "last_serviced_at" => SortKey::LastServicedAt,
            "has_wip_service" => SortKey::HasWipService,
            other => {
                return Err(ServicingError::validation(
                    "sort",
                    format!("cannot sort by '{}'", other),
                ))
            }
        };
        Ok(key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl FromStr for SortDirection {
    type Err = ServicingError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(SortDirection::Asc),
            "desc" => Ok(SortDirection::Desc),
            other => Err(ServicingError::validation(
                "dir",
                format!("unknown sort direction '{}'", other),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sort {
    pub key: SortKey,
    pub direction: SortDirection,
}

impl Default for Sort {
    /// Most urgent first.
    fn default() -> Self {
        Sort {
            key: SortKey::NormalisedValue,
            direction: SortDirection::Desc,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusFilter {
    pub team_ids: Vec<String>,
    pub include_archived: bool,
}

fn compare(a: &ResourceServiceMetricStatus, b: &ResourceServiceMetricStatus, key: SortKey) -> Ordering {
    match key {
        SortKey::Reference => a.reference.cmp(&b.reference),
        SortKey::ResourceType => a.resource_type.cmp(&b.resource_type),
        SortKey::Team => a.team_id.cmp(&b.team_id),
        SortKey::ScheduleName => a.schedule_name.cmp(&b.schedule_name),
        SortKey::MetricName => a.metric_name.cmp(&b.metric_name),
        SortKey::CurrentValue => a.current_value.cmp(&b.current_value),
        SortKey::Threshold => a.threshold.cmp(&b.threshold),
        SortKey::NormalisedValue => a.normalised_value.cmp(&b.normalised_value),
        SortKey::IsDue => a.is_due.cmp(&b.is_due),
        SortKey::LastRecordedAt => a.last_recorded_at.cmp(&b.last_recorded_at),
        SortKey::LastServicedAt => a.last_serviced_at.cmp(&b.last_serviced_at),
        SortKey::HasWipService => a.has_wip_service.cmp(&b.has_wip_service),
    }
}

/// Order rows by `sort`, breaking ties on (resource, schedule) ascending so
/// consecutive pages never overlap or skip rows.
pub fn sort_statuses(rows: &mut [ResourceServiceMetricStatus], sort: Sort) {
    rows.sort_by(|a, b| {
        let primary = compare(a, b, sort.key);
        let primary = match sort.direction {
            SortDirection::Asc => primary,
            SortDirection::Desc => primary.reverse(),
        };
        primary
            .then_with(|| a.resource_id.cmp(&b.resource_id))
            .then_with(|| a.schedule_id.cmp(&b.schedule_id))
    });
}

/// Compose usage and threshold evaluation for one assignment. A row that
/// cannot be evaluated is shown without a band and never fails the listing.
pub fn build_status(
    assignment: &AssignedSchedule,
    readings: &[MetricReading],
    wip_service_id: Option<&str>,
    actor: &Actor,
) -> ResourceServiceMetricStatus {
    let usage = usage::usage_for_assignment(assignment, readings);
    let evaluation = usage
        .current_value
        .and_then(|value| match threshold::evaluate(value, assignment.threshold) {
            Ok(evaluation) => Some(evaluation),
            Err(e) => {
                tracing::warn!(
                    "Skipping evaluation of schedule {} on resource {}: {}",
                    assignment.schedule_id,
                    assignment.resource_id,
                    e
                );
                None
            }
        });
    let can_manage = actor.may_manage(assignment.team_id.as_deref());
    let action = match (wip_service_id, can_manage) {
        (Some(id), _) => RowAction::ViewService {
            service_id: id.to_string(),
        },
        (None, true) if !assignment.resource_is_archived => RowAction::StartService,
        (None, _) => RowAction::None,
    };

    ResourceServiceMetricStatus {
        resource_id: assignment.resource_id.clone(),
        resource_type: assignment.resource_type.clone(),
        reference: assignment.reference.clone(),
        team_id: assignment.team_id.clone(),
        resource_is_archived: assignment.resource_is_archived,
        schedule_id: assignment.schedule_id.clone(),
        schedule_name: assignment.schedule_name.clone(),
        schedule_is_archived: assignment.schedule_is_archived || assignment.metric_is_archived,
        metric_id: assignment.metric_id.clone(),
        metric_name: assignment.metric_name.clone(),
        is_cumulative: assignment.is_cumulative,
        current_value: usage.current_value,
        current_value_overflowed: usage.overflowed,
        threshold: assignment.threshold,
        normalised_value: evaluation.as_ref().map(|e| e.normalised_value),
        normalised_percentage: evaluation.as_ref().map(|e| e.normalised_percentage),
        is_due: evaluation.as_ref().is_some_and(|e| e.is_due),
        band: evaluation.as_ref().and_then(|e| e.band),
        last_recorded_at: usage.last_recorded_at,
        last_serviced_at: assignment.last_serviced_at,
        wip_service_id: wip_service_id.map(str::to_string),
        has_wip_service: wip_service_id.is_some(),
        can_manage,
        action,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifetimeTotal {
    pub metric_id: String,
    pub metric_name: String,
    /// `None` when the lifetime sum exceeds the decimal range.
    pub total: Option<Decimal>,
}

pub struct SchedulingPriorityView {
    pool: SqlitePool,
}

impl SchedulingPriorityView {
    pub fn new(pool: SqlitePool) -> Self {
        SchedulingPriorityView { pool }
    }

    /// The servicing worklist, sorted and paged.
    pub async fn list(
        &self,
        actor: &Actor,
        filter: &StatusFilter,
        sort: Sort,
        page: Page,
    ) -> Result<Paged<ResourceServiceMetricStatus>> {
        let assignment_filter = AssignmentFilter {
            resource_id: None,
            team_ids: filter.team_ids.clone(),
            include_archived: filter.include_archived,
        };
        let mut rows = self.compute(actor, &assignment_filter).await?;
        let total_count = rows.len() as i64;
        sort_statuses(&mut rows, sort);
        tracing::debug!(
            "Worklist for {}: {} row(s), page {} of size {}",
            actor.username,
            total_count,
            page.page,
            page.page_size
        );
        Ok(Paged::new(page.slice(rows), total_count, page))
    }

    /// Statuses of a single resource, most urgent first.
    pub async fn for_resource(&self, actor: &Actor, resource_id: &str) -> Result<Vec<ResourceServiceMetricStatus>> {
        self.ensure_resource(resource_id).await?;
        let assignment_filter = AssignmentFilter {
            resource_id: Some(resource_id.to_string()),
            team_ids: Vec::new(),
            include_archived: true,
        };
        let mut rows = self.compute(actor, &assignment_filter).await?;
        // the resource itself may be archived, its retired schedules are not shown
        rows.retain(|r| !r.schedule_is_archived);
        sort_statuses(&mut rows, Sort::default());
        Ok(rows)
    }

    /// Every reading ever taken per cumulative metric the resource tracks.
    pub async fn lifetime_totals(&self, resource_id: &str) -> Result<Vec<LifetimeTotal>> {
        self.ensure_resource(resource_id).await?;
        let mut tx = self.pool.begin().await?;
        let filter = AssignmentFilter {
            resource_id: Some(resource_id.to_string()),
            team_ids: Vec::new(),
            include_archived: false,
        };
        let assignments = queries::list_assigned_schedules(&mut tx, &filter).await?;
        let readings = queries::list_readings_for_resources(&mut tx, &[resource_id.to_string()]).await?;
        tx.commit().await?;

        let metrics: BTreeMap<&str, &str> = assignments
            .iter()
            .filter(|a| a.is_cumulative)
            .map(|a| (a.metric_id.as_str(), a.metric_name.as_str()))
            .collect();

        let mut totals: Vec<LifetimeTotal> = metrics
            .into_iter()
            .map(|(metric_id, metric_name)| LifetimeTotal {
                metric_id: metric_id.to_string(),
                metric_name: metric_name.to_string(),
                total: usage::lifetime_total(readings.iter().filter(|r| r.metric_id == metric_id)),
            })
            .collect();
        totals.sort_by(|a, b| a.metric_name.cmp(&b.metric_name).then_with(|| a.metric_id.cmp(&b.metric_id)));
        Ok(totals)
    }

    async fn ensure_resource(&self, resource_id: &str) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        match queries::get_resource(&mut conn, resource_id).await? {
            Some(_) => Ok(()),
            None => Err(ServicingError::not_found("resource", resource_id)),
        }
    }

    /// One consistent snapshot: assignments, readings and WIP services are read
    /// in the same transaction.
    async fn compute(
        &self,
        actor: &Actor,
        filter: &AssignmentFilter,
    ) -> Result<Vec<ResourceServiceMetricStatus>> {
        let mut tx = self.pool.begin().await?;
        let assignments = queries::list_assigned_schedules(&mut tx, filter).await?;

        let mut resource_ids: Vec<String> = assignments.iter().map(|a| a.resource_id.clone()).collect();
        resource_ids.dedup();
        let readings = queries::list_readings_for_resources(&mut tx, &resource_ids).await?;
        let active: HashMap<String, String> = queries::list_active_services(&mut tx)
            .await?
            .into_iter()
            .collect();
        tx.commit().await?;

        let mut by_resource: HashMap<&str, Vec<MetricReading>> = HashMap::new();
        for reading in &readings {
            by_resource
                .entry(reading.resource_id.as_str())
                .or_default()
                .push(reading.clone());
        }

        Ok(assignments
            .iter()
            .map(|assignment| {
                let resource_readings = by_resource
                    .get(assignment.resource_id.as_str())
                    .map(Vec::as_slice)
                    .unwrap_or(&[]);
                build_status(
                    assignment,
                    resource_readings,
                    active.get(&assignment.resource_id).map(String::as_str),
                    actor,
                )
            })
            .collect())
    }
}
