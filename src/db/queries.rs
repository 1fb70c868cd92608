use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use super::models::{
    AssignedSchedule, ChangeAction, FieldSnapshot, MetricReading, Resource, ResourceService,
    ResourceServiceChange, ServiceMetric, ServiceSchedule, ServiceStatus,
};

type QueryResult<T> = Result<T, sqlx::Error>;

// ─── Resource queries ────────────────────────────────────────────────────────

pub async fn insert_resource(conn: &mut SqliteConnection, r: &Resource) -> QueryResult<()> {
    sqlx::query(
        "INSERT INTO resources (id, resource_type, reference, team_id, is_archived, last_serviced_at, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&r.id)
    .bind(&r.resource_type)
    .bind(&r.reference)
    .bind(&r.team_id)
    .bind(r.is_archived)
    .bind(r.last_serviced_at)
    .bind(r.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn get_resource(conn: &mut SqliteConnection, id: &str) -> QueryResult<Option<Resource>> {
    sqlx::query_as::<_, Resource>("SELECT * FROM resources WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
}

pub async fn list_resources(
    conn: &mut SqliteConnection,
    include_archived: bool,
) -> QueryResult<Vec<Resource>> {
    let sql = if include_archived {
        "SELECT * FROM resources ORDER BY reference ASC, id ASC"
    } else {
        "SELECT * FROM resources WHERE is_archived = 0 ORDER BY reference ASC, id ASC"
    };
    sqlx::query_as::<_, Resource>(sql).fetch_all(&mut *conn).await
}

pub async fn update_resource(
    conn: &mut SqliteConnection,
    id: &str,
    resource_type: &str,
    reference: &str,
    team_id: Option<&str>,
    is_archived: bool,
) -> QueryResult<u64> {
    let result = sqlx::query(
        "UPDATE resources SET resource_type = ?, reference = ?, team_id = ?, is_archived = ? WHERE id = ?",
    )
    .bind(resource_type)
    .bind(reference)
    .bind(team_id)
    .bind(is_archived)
    .bind(id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

pub async fn archive_resource(conn: &mut SqliteConnection, id: &str) -> QueryResult<u64> {
    let result = sqlx::query("UPDATE resources SET is_archived = 1 WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

/// No-op write on the resource row. Issued first inside a transaction it takes
/// SQLite's write lock, so every guard read afterwards is serialised against
/// other writers. Returns false when the resource does not exist.
pub async fn lock_resource(conn: &mut SqliteConnection, id: &str) -> QueryResult<bool> {
    let result = sqlx::query("UPDATE resources SET id = id WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn set_last_serviced_at(
    conn: &mut SqliteConnection,
    id: &str,
    at: DateTime<Utc>,
) -> QueryResult<()> {
    sqlx::query("UPDATE resources SET last_serviced_at = ? WHERE id = ?")
        .bind(at)
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

// ─── Metric queries ──────────────────────────────────────────────────────────

pub async fn insert_metric(conn: &mut SqliteConnection, m: &ServiceMetric) -> QueryResult<()> {
    sqlx::query(
        "INSERT INTO service_metrics (id, name, description, is_cumulative, is_archived)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&m.id)
    .bind(&m.name)
    .bind(&m.description)
    .bind(m.is_cumulative)
    .bind(m.is_archived)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn get_metric(conn: &mut SqliteConnection, id: &str) -> QueryResult<Option<ServiceMetric>> {
    sqlx::query_as::<_, ServiceMetric>("SELECT * FROM service_metrics WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
}

pub async fn list_metrics(
    conn: &mut SqliteConnection,
    include_archived: bool,
) -> QueryResult<Vec<ServiceMetric>> {
    let sql = if include_archived {
        "SELECT * FROM service_metrics ORDER BY name ASC, id ASC"
    } else {
        "SELECT * FROM service_metrics WHERE is_archived = 0 ORDER BY name ASC, id ASC"
    };
    sqlx::query_as::<_, ServiceMetric>(sql).fetch_all(&mut *conn).await
}

pub async fn update_metric(conn: &mut SqliteConnection, m: &ServiceMetric) -> QueryResult<u64> {
    let result = sqlx::query(
        "UPDATE service_metrics SET name = ?, description = ?, is_cumulative = ?, is_archived = ? WHERE id = ?",
    )
    .bind(&m.name)
    .bind(&m.description)
    .bind(m.is_cumulative)
    .bind(m.is_archived)
    .bind(&m.id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

pub async fn metric_has_readings(conn: &mut SqliteConnection, metric_id: &str) -> QueryResult<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM metric_readings WHERE metric_id = ?)",
    )
    .bind(metric_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(exists)
}

// ─── Schedule queries ────────────────────────────────────────────────────────

const SCHEDULE_SELECT: &str = "
SELECT
    s.id,
    s.name,
    s.metric_id,
    m.name AS metric_name,
    s.threshold,
    s.is_archived,
    m.is_archived AS metric_is_archived
FROM service_schedules s
JOIN service_metrics m ON m.id = s.metric_id";

pub async fn insert_schedule(
    conn: &mut SqliteConnection,
    id: &str,
    name: &str,
    metric_id: &str,
    threshold: Decimal,
) -> QueryResult<()> {
    sqlx::query(
        "INSERT INTO service_schedules (id, name, metric_id, threshold, is_archived)
         VALUES (?, ?, ?, ?, 0)",
    )
    .bind(id)
    .bind(name)
    .bind(metric_id)
    .bind(threshold.to_string())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn get_schedule(
    conn: &mut SqliteConnection,
    id: &str,
) -> QueryResult<Option<ServiceSchedule>> {
    let sql = format!("{SCHEDULE_SELECT}\nWHERE s.id = ?");
    sqlx::query_as::<_, ServiceSchedule>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
}

pub async fn list_schedules(
    conn: &mut SqliteConnection,
    include_archived: bool,
) -> QueryResult<Vec<ServiceSchedule>> {
    let filter = if include_archived {
        ""
    } else {
        "\nWHERE s.is_archived = 0 AND m.is_archived = 0"
    };
    let sql = format!("{SCHEDULE_SELECT}{filter}\nORDER BY s.name ASC, s.id ASC");
    sqlx::query_as::<_, ServiceSchedule>(&sql)
        .fetch_all(&mut *conn)
        .await
}

pub async fn update_schedule(
    conn: &mut SqliteConnection,
    id: &str,
    name: &str,
    metric_id: &str,
    threshold: Decimal,
    is_archived: bool,
) -> QueryResult<u64> {
    let result = sqlx::query(
        "UPDATE service_schedules SET name = ?, metric_id = ?, threshold = ?, is_archived = ? WHERE id = ?",
    )
    .bind(name)
    .bind(metric_id)
    .bind(threshold.to_string())
    .bind(is_archived)
    .bind(id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

// ─── Assignment queries ──────────────────────────────────────────────────────

/// Assigning an already-assigned schedule keeps the original assignment time.
pub async fn assign_schedule(
    conn: &mut SqliteConnection,
    resource_id: &str,
    schedule_id: &str,
    at: DateTime<Utc>,
) -> QueryResult<u64> {
    let result = sqlx::query(
        "INSERT OR IGNORE INTO schedule_assignments (resource_id, schedule_id, assigned_at)
         VALUES (?, ?, ?)",
    )
    .bind(resource_id)
    .bind(schedule_id)
    .bind(at)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

pub async fn unassign_schedule(
    conn: &mut SqliteConnection,
    resource_id: &str,
    schedule_id: &str,
) -> QueryResult<u64> {
    let result =
        sqlx::query("DELETE FROM schedule_assignments WHERE resource_id = ? AND schedule_id = ?")
            .bind(resource_id)
            .bind(schedule_id)
            .execute(&mut *conn)
            .await?;
    Ok(result.rows_affected())
}

/// Which (resource, schedule) pairs to load.
#[derive(Debug, Clone, Default)]
pub struct AssignmentFilter {
    pub resource_id: Option<String>,
    pub team_ids: Vec<String>,
    pub include_archived: bool,
}

pub async fn list_assigned_schedules(
    conn: &mut SqliteConnection,
    filter: &AssignmentFilter,
) -> QueryResult<Vec<AssignedSchedule>> {
    let mut qb = QueryBuilder::<Sqlite>::new(
        "SELECT
    r.id AS resource_id,
    r.resource_type,
    r.reference,
    r.team_id,
    r.is_archived AS resource_is_archived,
    r.last_serviced_at,
    s.id AS schedule_id,
    s.name AS schedule_name,
    s.is_archived AS schedule_is_archived,
    s.threshold,
    m.id AS metric_id,
    m.name AS metric_name,
    m.is_cumulative,
    m.is_archived AS metric_is_archived,
    a.assigned_at
FROM schedule_assignments a
JOIN resources r ON r.id = a.resource_id
JOIN service_schedules s ON s.id = a.schedule_id
JOIN service_metrics m ON m.id = s.metric_id
WHERE 1 = 1",
    );

    if !filter.include_archived {
        qb.push(" AND r.is_archived = 0 AND s.is_archived = 0 AND m.is_archived = 0");
    }
    if let Some(resource_id) = &filter.resource_id {
        qb.push(" AND r.id = ").push_bind(resource_id.clone());
    }
    if !filter.team_ids.is_empty() {
        qb.push(" AND r.team_id IN (");
        let mut separated = qb.separated(", ");
        for team_id in &filter.team_ids {
            separated.push_bind(team_id.clone());
        }
        separated.push_unseparated(")");
    }
    qb.push(" ORDER BY r.id ASC, s.id ASC");

    qb.build_query_as::<AssignedSchedule>()
        .fetch_all(&mut *conn)
        .await
}

/// Whether the resource tracks the metric through a live schedule assignment.
pub async fn resource_tracks_metric(
    conn: &mut SqliteConnection,
    resource_id: &str,
    metric_id: &str,
) -> QueryResult<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS (
            SELECT 1
            FROM schedule_assignments a
            JOIN service_schedules s ON s.id = a.schedule_id
            WHERE a.resource_id = ?
              AND s.metric_id = ?
              AND s.is_archived = 0
        )",
    )
    .bind(resource_id)
    .bind(metric_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(exists)
}

// ─── Reading queries ─────────────────────────────────────────────────────────

pub async fn insert_reading(conn: &mut SqliteConnection, r: &MetricReading) -> QueryResult<()> {
    sqlx::query(
        "INSERT INTO metric_readings (id, resource_id, metric_id, value, recorded_at, recorded_by)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&r.id)
    .bind(&r.resource_id)
    .bind(&r.metric_id)
    .bind(r.value.to_string())
    .bind(r.recorded_at)
    .bind(&r.recorded_by)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn list_readings_for_resources(
    conn: &mut SqliteConnection,
    resource_ids: &[String],
) -> QueryResult<Vec<MetricReading>> {
    if resource_ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM metric_readings WHERE resource_id IN (");
    let mut separated = qb.separated(", ");
    for id in resource_ids {
        separated.push_bind(id.clone());
    }
    separated.push_unseparated(")");
    qb.build_query_as::<MetricReading>()
        .fetch_all(&mut *conn)
        .await
}

// ─── Service queries ─────────────────────────────────────────────────────────

const SERVICE_SELECT: &str = "
SELECT
    rs.id,
    rs.resource_id,
    r.resource_type,
    r.reference AS resource_reference,
    rs.status,
    rs.notes,
    rs.started_by,
    rs.started_at,
    rs.completed_by,
    rs.completed_at,
    rs.cancelled_by,
    rs.cancelled_at,
    rs.reopened_by,
    rs.reopened_at
FROM resource_services rs
JOIN resources r ON r.id = rs.resource_id";

pub async fn insert_service(conn: &mut SqliteConnection, s: &ResourceService) -> QueryResult<()> {
    sqlx::query(
        "INSERT INTO resource_services (id, resource_id, status, notes, started_by, started_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&s.id)
    .bind(&s.resource_id)
    .bind(s.status)
    .bind(&s.notes)
    .bind(&s.started_by)
    .bind(s.started_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn get_service(
    conn: &mut SqliteConnection,
    id: &str,
) -> QueryResult<Option<ResourceService>> {
    let sql = format!("{SERVICE_SELECT}\nWHERE rs.id = ?");
    sqlx::query_as::<_, ResourceService>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
}

/// Same trick as [`lock_resource`], on the service row.
pub async fn lock_service(conn: &mut SqliteConnection, id: &str) -> QueryResult<bool> {
    let result = sqlx::query("UPDATE resource_services SET id = id WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn active_service_id(
    conn: &mut SqliteConnection,
    resource_id: &str,
) -> QueryResult<Option<String>> {
    sqlx::query_scalar("SELECT id FROM resource_services WHERE resource_id = ? AND status = ? LIMIT 1")
        .bind(resource_id)
        .bind(ServiceStatus::WorkInProgress)
        .fetch_optional(&mut *conn)
        .await
}

/// (resource_id, service_id) for every work-in-progress service.
pub async fn list_active_services(
    conn: &mut SqliteConnection,
) -> QueryResult<Vec<(String, String)>> {
    sqlx::query_as::<_, (String, String)>(
        "SELECT resource_id, id FROM resource_services WHERE status = ?",
    )
    .bind(ServiceStatus::WorkInProgress)
    .fetch_all(&mut *conn)
    .await
}

pub async fn mark_completed(
    conn: &mut SqliteConnection,
    id: &str,
    by: &str,
    at: DateTime<Utc>,
) -> QueryResult<u64> {
    let result = sqlx::query(
        "UPDATE resource_services
         SET status = ?, completed_by = ?, completed_at = ?
         WHERE id = ? AND status = ?",
    )
    .bind(ServiceStatus::Completed)
    .bind(by)
    .bind(at)
    .bind(id)
    .bind(ServiceStatus::WorkInProgress)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

pub async fn mark_cancelled(
    conn: &mut SqliteConnection,
    id: &str,
    by: &str,
    at: DateTime<Utc>,
) -> QueryResult<u64> {
    let result = sqlx::query(
        "UPDATE resource_services
         SET status = ?, cancelled_by = ?, cancelled_at = ?
         WHERE id = ? AND status = ?",
    )
    .bind(ServiceStatus::Cancelled)
    .bind(by)
    .bind(at)
    .bind(id)
    .bind(ServiceStatus::WorkInProgress)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

/// Clears the completed/cancelled bookkeeping. The journal keeps the history.
pub async fn mark_reopened(
    conn: &mut SqliteConnection,
    id: &str,
    by: &str,
    at: DateTime<Utc>,
) -> QueryResult<u64> {
    let result = sqlx::query(
        "UPDATE resource_services
         SET status = ?,
             completed_by = NULL,
             completed_at = NULL,
             cancelled_by = NULL,
             cancelled_at = NULL,
             reopened_by = ?,
             reopened_at = ?
         WHERE id = ? AND status IN (?, ?)",
    )
    .bind(ServiceStatus::WorkInProgress)
    .bind(by)
    .bind(at)
    .bind(id)
    .bind(ServiceStatus::Completed)
    .bind(ServiceStatus::Cancelled)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

pub async fn update_service_notes(
    conn: &mut SqliteConnection,
    id: &str,
    notes: &str,
) -> QueryResult<u64> {
    let result = sqlx::query("UPDATE resource_services SET notes = ? WHERE id = ?")
        .bind(notes)
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

#[derive(Debug, Clone, Default)]
pub struct ServiceFilter {
    pub resource_id: Option<String>,
    pub status: Option<ServiceStatus>,
}

fn push_service_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &ServiceFilter) {
    qb.push(" WHERE 1 = 1");
    if let Some(resource_id) = &filter.resource_id {
        qb.push(" AND rs.resource_id = ").push_bind(resource_id.clone());
    }
    if let Some(status) = filter.status {
        qb.push(" AND rs.status = ").push_bind(status);
    }
}

pub async fn list_services(
    conn: &mut SqliteConnection,
    filter: &ServiceFilter,
    limit: i64,
    offset: i64,
) -> QueryResult<Vec<ResourceService>> {
    let mut qb = QueryBuilder::<Sqlite>::new(SERVICE_SELECT);
    push_service_filter(&mut qb, filter);
    qb.push(" ORDER BY rs.started_at DESC, rs.id ASC LIMIT ")
        .push_bind(limit)
        .push(" OFFSET ")
        .push_bind(offset);
    qb.build_query_as::<ResourceService>()
        .fetch_all(&mut *conn)
        .await
}

pub async fn count_services(conn: &mut SqliteConnection, filter: &ServiceFilter) -> QueryResult<i64> {
    let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM resource_services rs");
    push_service_filter(&mut qb, filter);
    qb.build_query_scalar::<i64>().fetch_one(&mut *conn).await
}

/// Most recent non-cancelled service of the resource started before `before`.
pub async fn previous_service(
    conn: &mut SqliteConnection,
    resource_id: &str,
    exclude_id: &str,
    before: DateTime<Utc>,
) -> QueryResult<Option<ResourceService>> {
    let sql = format!(
        "{SERVICE_SELECT}
WHERE rs.resource_id = ?
  AND rs.id <> ?
  AND rs.started_at < ?
  AND rs.status <> ?
ORDER BY rs.started_at DESC
LIMIT 1"
    );
    sqlx::query_as::<_, ResourceService>(&sql)
        .bind(resource_id)
        .bind(exclude_id)
        .bind(before)
        .bind(ServiceStatus::Cancelled)
        .fetch_optional(&mut *conn)
        .await
}

// ─── Change journal queries ──────────────────────────────────────────────────

pub async fn insert_change(
    conn: &mut SqliteConnection,
    service_id: &str,
    action: ChangeAction,
    change_by: &str,
    change_at: DateTime<Utc>,
    snapshot: &FieldSnapshot,
) -> QueryResult<i64> {
    let result = sqlx::query(
        "INSERT INTO resource_service_changes
            (service_id, action, change_by, change_at, is_creation, notes, started_by, completed_by, cancelled_by, reopened_by)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(service_id)
    .bind(action)
    .bind(change_by)
    .bind(change_at)
    .bind(action == ChangeAction::Created)
    .bind(&snapshot.notes)
    .bind(&snapshot.started_by)
    .bind(&snapshot.completed_by)
    .bind(&snapshot.cancelled_by)
    .bind(&snapshot.reopened_by)
    .execute(&mut *conn)
    .await?;
    Ok(result.last_insert_rowid())
}

pub async fn list_changes(
    conn: &mut SqliteConnection,
    service_id: &str,
) -> QueryResult<Vec<ResourceServiceChange>> {
    sqlx::query_as::<_, ResourceServiceChange>(
        "SELECT * FROM resource_service_changes WHERE service_id = ? ORDER BY id ASC",
    )
    .bind(service_id)
    .fetch_all(&mut *conn)
    .await
}
