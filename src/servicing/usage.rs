//! Derives the current value of a metric for a resource from its readings.
//!
//! Cumulative metrics accrue: every reading recorded strictly after the
//! baseline is summed. Point-in-time metrics are gauges: the latest reading
//! wins and the baseline is irrelevant.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;

use crate::db::{
    models::{AssignedSchedule, MetricReading},
    queries::{self, AssignmentFilter},
};
use crate::error::{Result, ServicingError};

/// Result of aggregating one (resource, metric) reading stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// `None` only for a point-in-time metric that has never been read.
    pub current_value: Option<Decimal>,
    pub last_recorded_at: Option<DateTime<Utc>>,
    /// The cumulative sum left the decimal range; `current_value` is pinned
    /// at `Decimal::MAX`.
    pub overflowed: bool,
}

/// The instant cumulative usage is counted from: the last completed service,
/// or the moment the schedule was assigned if the resource was never serviced.
pub fn baseline(last_serviced_at: Option<DateTime<Utc>>, assigned_at: DateTime<Utc>) -> DateTime<Utc> {
    last_serviced_at.unwrap_or(assigned_at)
}

/// `readings` must already be restricted to one resource and one metric.
pub fn current_value<'a, I>(is_cumulative: bool, readings: I, baseline_at: DateTime<Utc>) -> Usage
where
    I: IntoIterator<Item = &'a MetricReading>,
{
    if is_cumulative {
        let mut total = Some(Decimal::ZERO);
        let mut last_recorded_at: Option<DateTime<Utc>> = None;
        for reading in readings.into_iter().filter(|r| r.recorded_at > baseline_at) {
            total = total.and_then(|t| t.checked_add(reading.value));
            last_recorded_at = last_recorded_at.max(Some(reading.recorded_at));
        }
        if total.is_none() {
            tracing::warn!("Cumulative usage exceeds the decimal range; reporting it as the maximum");
        }
        Usage {
            current_value: Some(total.unwrap_or(Decimal::MAX)),
            last_recorded_at,
            overflowed: total.is_none(),
        }
    } else {
        // ties on recorded_at resolve on id so repeated reads agree
        let latest = readings
            .into_iter()
            .max_by(|a, b| a.recorded_at.cmp(&b.recorded_at).then_with(|| a.id.cmp(&b.id)));
        Usage {
            current_value: latest.map(|r| r.value),
            last_recorded_at: latest.map(|r| r.recorded_at),
            overflowed: false,
        }
    }
}

/// Sum of every reading ever taken, ignoring the baseline. `None` when the
/// sum does not fit in a decimal.
pub fn lifetime_total<'a, I>(readings: I) -> Option<Decimal>
where
    I: IntoIterator<Item = &'a MetricReading>,
{
    readings
        .into_iter()
        .try_fold(Decimal::ZERO, |acc, r| acc.checked_add(r.value))
}

/// Aggregate the readings relevant to one assigned schedule.
pub fn usage_for_assignment(assignment: &AssignedSchedule, readings: &[MetricReading]) -> Usage {
    let baseline_at = baseline(assignment.last_serviced_at, assignment.assigned_at);
    current_value(
        assignment.is_cumulative,
        readings
            .iter()
            .filter(|r| r.resource_id == assignment.resource_id && r.metric_id == assignment.metric_id),
        baseline_at,
    )
}

/// Current value of a schedule's metric for a resource, read from the store.
pub async fn current_value_for(
    conn: &mut SqliteConnection,
    resource_id: &str,
    schedule_id: &str,
) -> Result<Usage> {
    let filter = AssignmentFilter {
        resource_id: Some(resource_id.to_string()),
        team_ids: Vec::new(),
        include_archived: true,
    };
    let assignment = queries::list_assigned_schedules(conn, &filter)
        .await?
        .into_iter()
        .find(|a| a.schedule_id == schedule_id)
        .ok_or_else(|| {
            ServicingError::not_found("schedule assignment", format!("{resource_id}/{schedule_id}"))
        })?;
    let readings = queries::list_readings_for_resources(conn, &[resource_id.to_string()]).await?;
    Ok(usage_for_assignment(&assignment, &readings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn reading(value: i64, at: DateTime<Utc>) -> MetricReading {
        MetricReading::new("press-1".into(), "hours".into(), Decimal::from(value), at, "op".into())
    }

    #[test]
    fn cumulative_sums_readings_after_baseline() {
        let t0 = Utc::now() - Duration::days(10);
        let readings = vec![
            reading(10, t0 + Duration::hours(1)),
            reading(15, t0 + Duration::hours(2)),
        ];
        let usage = current_value(true, &readings, t0);
        assert_eq!(usage.current_value, Some(Decimal::from(25)));
        assert_eq!(usage.last_recorded_at, Some(t0 + Duration::hours(2)));
    }

    #[test]
    fn cumulative_excludes_readings_at_or_before_baseline() {
        let t0 = Utc::now() - Duration::days(10);
        let readings = vec![
            reading(100, t0 - Duration::hours(1)),
            reading(7, t0),
            reading(10, t0 + Duration::hours(1)),
            reading(15, t0 + Duration::hours(2)),
        ];
        let usage = current_value(true, &readings, t0);
        assert_eq!(usage.current_value, Some(Decimal::from(25)));
    }

    #[test]
    fn cumulative_without_readings_is_zero() {
        let usage = current_value(true, std::iter::empty::<&MetricReading>(), Utc::now());
        assert_eq!(usage.current_value, Some(Decimal::ZERO));
        assert_eq!(usage.last_recorded_at, None);
    }

    #[test]
    fn point_in_time_takes_latest_regardless_of_baseline() {
        let t1 = Utc::now() - Duration::days(3);
        let t2 = t1 + Duration::hours(5);
        let readings = vec![reading(80, t2), reading(100, t1)];
        // baseline after both readings must not hide them
        let usage = current_value(false, &readings, t2 + Duration::days(1));
        assert_eq!(usage.current_value, Some(Decimal::from(80)));
        assert_eq!(usage.last_recorded_at, Some(t2));
    }

    #[test]
    fn point_in_time_without_readings_is_unrecorded() {
        let usage = current_value(false, std::iter::empty::<&MetricReading>(), Utc::now());
        assert_eq!(usage.current_value, None);
        assert_eq!(usage.last_recorded_at, None);
    }

    #[test]
    fn baseline_prefers_last_service() {
        let assigned = Utc::now() - Duration::days(30);
        let serviced = assigned + Duration::days(12);
        assert_eq!(baseline(Some(serviced), assigned), serviced);
        assert_eq!(baseline(None, assigned), assigned);
    }

    #[test]
    fn lifetime_total_ignores_baseline() {
        let t0 = Utc::now();
        let readings = vec![reading(3, t0 - Duration::days(400)), reading(4, t0)];
        assert_eq!(lifetime_total(&readings), Some(Decimal::from(7)));
    }

    #[test]
    fn cumulative_overflow_is_flagged() {
        let t0 = Utc::now() - Duration::days(1);
        let big = |at| MetricReading::new("press-1".into(), "hours".into(), Decimal::MAX, at, "op".into());
        let readings = vec![big(t0 + Duration::hours(1)), big(t0 + Duration::hours(2))];

        let usage = current_value(true, &readings, t0);
        assert!(usage.overflowed);
        assert_eq!(usage.current_value, Some(Decimal::MAX));
        assert_eq!(lifetime_total(&readings), None);

        let usage = current_value(true, &readings[..1], t0);
        assert!(!usage.overflowed);
    }

    #[test]
    fn decimal_sums_do_not_drift() {
        let t0 = Utc::now() - Duration::days(1);
        let tenth = Decimal::new(1, 1);
        let readings: Vec<MetricReading> = (1..=10)
            .map(|i| {
                MetricReading::new(
                    "press-1".into(),
                    "hours".into(),
                    tenth,
                    t0 + Duration::minutes(i),
                    "op".into(),
                )
            })
            .collect();
        let usage = current_value(true, &readings, t0);
        assert_eq!(usage.current_value, Some(Decimal::ONE));
    }
}
