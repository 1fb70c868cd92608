use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use std::{fmt, str::FromStr};
use tokio::sync::broadcast;

use crate::db::{
    models::{ChangeAction, FieldSnapshot, Resource, ResourceService, ResourceServiceChange, ServiceStatus},
    queries::{self, ServiceFilter},
};
use crate::error::{is_unique_violation, Result, ServicingError};
use crate::servicing::{actor::Actor, audit, Page, Paged};
use crate::ws::ServicingEvent;

/// Transitions applicable to an existing service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceAction {
    Complete,
    Cancel,
    Reopen,
}

impl ServiceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceAction::Complete => "complete",
            ServiceAction::Cancel => "cancel",
            ServiceAction::Reopen => "reopen",
        }
    }

    fn change_action(&self) -> ChangeAction {
        match self {
            ServiceAction::Complete => ChangeAction::Completed,
            ServiceAction::Cancel => ChangeAction::Cancelled,
            ServiceAction::Reopen => ChangeAction::Reopened,
        }
    }
}

impl fmt::Display for ServiceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceAction {
    type Err = ServicingError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "complete" => Ok(ServiceAction::Complete),
            "cancel" => Ok(ServiceAction::Cancel),
            "reopen" => Ok(ServiceAction::Reopen),
            other => Err(ServicingError::validation(
                "action",
                format!("unsupported service action '{}'", other),
            )),
        }
    }
}

/// The transition table. Anything not listed is an invalid transition.
pub fn next_status(from: ServiceStatus, action: ServiceAction) -> Result<ServiceStatus> {
    match (from, action) {
        (ServiceStatus::WorkInProgress, ServiceAction::Complete) => Ok(ServiceStatus::Completed),
        (ServiceStatus::WorkInProgress, ServiceAction::Cancel) => Ok(ServiceStatus::Cancelled),
        (ServiceStatus::Completed | ServiceStatus::Cancelled, ServiceAction::Reopen) => {
            Ok(ServiceStatus::WorkInProgress)
        }
        (from, action) => Err(ServicingError::InvalidTransition {
            from,
            action: action.as_str(),
        }),
    }
}

/// Owns every mutation of a resource service. Each operation is one
/// transaction: guard, state change and journal entry commit together or not
/// at all.
pub struct ServiceLifecycleManager {
    pool: SqlitePool,
    event_tx: broadcast::Sender<ServicingEvent>,
}

impl ServiceLifecycleManager {
    pub fn new(pool: SqlitePool, event_tx: broadcast::Sender<ServicingEvent>) -> Self {
        ServiceLifecycleManager { pool, event_tx }
    }

    /// Open a new work-in-progress service on a resource.
    pub async fn start(&self, actor: &Actor, resource_id: &str, notes: String) -> Result<ResourceService> {
        let mut tx = self.pool.begin().await?;

        if !queries::lock_resource(&mut tx, resource_id).await? {
            return Err(ServicingError::not_found("resource", resource_id));
        }
        // stamped under the write lock so journal time follows commit order
        let now = Utc::now();
        let resource = queries::get_resource(&mut tx, resource_id)
            .await?
            .ok_or_else(|| ServicingError::not_found("resource", resource_id))?;

        authorize(actor, &resource, "start")?;
        if resource.is_archived {
            return Err(ServicingError::validation(
                "resource_id",
                "cannot start a service on an archived resource",
            ));
        }
        if let Some(existing) = queries::active_service_id(&mut tx, resource_id).await? {
            tracing::warn!(
                "{} tried to start a service on {} but {} is already in progress",
                actor.username,
                resource_id,
                existing
            );
            return Err(ServicingError::already_in_progress(resource_id));
        }

        let service = ResourceService::start(&resource, actor.username.clone(), notes, now);
        queries::insert_service(&mut tx, &service)
            .await
            .map_err(|e| wip_conflict(e, resource_id))?;
        let change = audit::record(
            &mut tx,
            &service.id,
            ChangeAction::Created,
            &actor.username,
            now,
            &FieldSnapshot::from(&service),
        )
        .await?;

        tx.commit().await?;

        tracing::info!(
            "Service {} started on resource {} by {}",
            service.id,
            resource.reference,
            actor.username
        );
        self.announce(&service, &change);
        Ok(service)
    }

    pub async fn complete(&self, actor: &Actor, service_id: &str) -> Result<ResourceService> {
        self.apply(actor, service_id, ServiceAction::Complete).await
    }

    pub async fn cancel(&self, actor: &Actor, service_id: &str) -> Result<ResourceService> {
        self.apply(actor, service_id, ServiceAction::Cancel).await
    }

    pub async fn reopen(&self, actor: &Actor, service_id: &str) -> Result<ResourceService> {
        self.apply(actor, service_id, ServiceAction::Reopen).await
    }

    /// Run a state transition on an existing service.
    pub async fn apply(
        &self,
        actor: &Actor,
        service_id: &str,
        action: ServiceAction,
    ) -> Result<ResourceService> {
        let mut tx = self.pool.begin().await?;

        let (service, resource) = lock_and_load(&mut tx, service_id).await?;
        let now = Utc::now();
        authorize(actor, &resource, action.as_str())?;

        if let Err(e) = next_status(service.status, action) {
            tracing::warn!(
                "Rejected {} of service {} by {}: {}",
                action,
                service_id,
                actor.username,
                e
            );
            return Err(e);
        }

        let updated = match action {
            ServiceAction::Complete => {
                let n = queries::mark_completed(&mut tx, service_id, &actor.username, now).await?;
                // the completion instant becomes the new cumulative baseline
                queries::set_last_serviced_at(&mut tx, &resource.id, now).await?;
                n
            }
            ServiceAction::Cancel => {
                queries::mark_cancelled(&mut tx, service_id, &actor.username, now).await?
            }
            ServiceAction::Reopen => {
                if let Some(other) = queries::active_service_id(&mut tx, &resource.id).await? {
                    tracing::warn!(
                        "{} tried to reopen {} but {} is already in progress on {}",
                        actor.username,
                        service_id,
                        other,
                        resource.id
                    );
                    return Err(ServicingError::already_in_progress(&resource.id));
                }
                queries::mark_reopened(&mut tx, service_id, &actor.username, now)
                    .await
                    .map_err(|e| wip_conflict(e, &resource.id))?
            }
        };
        if updated == 0 {
            // lock_and_load holds the write lock, so the status cannot have moved
            return Err(ServicingError::InvalidTransition {
                from: service.status,
                action: action.as_str(),
            });
        }

        let service = reload(&mut tx, service_id).await?;
        let change = audit::record(
            &mut tx,
            service_id,
            action.change_action(),
            &actor.username,
            now,
            &FieldSnapshot::from(&service),
        )
        .await?;

        tx.commit().await?;

        tracing::info!(
            "Service {} on resource {}: {} by {}, now {}",
            service_id,
            resource.reference,
            action,
            actor.username,
            service.status
        );
        self.announce(&service, &change);
        Ok(service)
    }

    /// Notes are editable in every status.
    pub async fn edit_notes(&self, actor: &Actor, service_id: &str, notes: String) -> Result<ResourceService> {
        let mut tx = self.pool.begin().await?;

        let (_, resource) = lock_and_load(&mut tx, service_id).await?;
        let now = Utc::now();
        authorize(actor, &resource, "edit notes of")?;

        queries::update_service_notes(&mut tx, service_id, &notes).await?;
        let service = reload(&mut tx, service_id).await?;
        let change = audit::record(
            &mut tx,
            service_id,
            ChangeAction::NotesEdited,
            &actor.username,
            now,
            &FieldSnapshot::from(&service),
        )
        .await?;

        tx.commit().await?;

        tracing::info!("Notes of service {} edited by {}", service_id, actor.username);
        self.announce(&service, &change);
        Ok(service)
    }

    pub async fn get(&self, service_id: &str) -> Result<ResourceService> {
        let mut conn = self.pool.acquire().await?;
        reload(&mut conn, service_id).await
    }

    /// Journal entries for a service, oldest first.
    pub async fn history(&self, service_id: &str) -> Result<Vec<ResourceServiceChange>> {
        let mut tx = self.pool.begin().await?;
        if queries::get_service(&mut tx, service_id).await?.is_none() {
            return Err(ServicingError::not_found("service", service_id));
        }
        let history = audit::history(&mut tx, service_id).await?;
        tx.commit().await?;
        Ok(history)
    }

    pub async fn active_service_id(&self, resource_id: &str) -> Result<Option<String>> {
        let mut conn = self.pool.acquire().await?;
        if queries::get_resource(&mut conn, resource_id).await?.is_none() {
            return Err(ServicingError::not_found("resource", resource_id));
        }
        Ok(queries::active_service_id(&mut conn, resource_id).await?)
    }

    /// Services newest first.
    pub async fn list(&self, filter: &ServiceFilter, page: Page) -> Result<Paged<ResourceService>> {
        let mut tx = self.pool.begin().await?;
        let items = queries::list_services(&mut tx, filter, page.limit(), page.offset()).await?;
        let total_count = queries::count_services(&mut tx, filter).await?;
        tx.commit().await?;
        Ok(Paged::new(items, total_count, page))
    }

    /// The last non-cancelled service of the same resource started before this one.
    pub async fn previous(&self, service_id: &str) -> Result<Option<ResourceService>> {
        let mut tx = self.pool.begin().await?;
        let service = reload(&mut tx, service_id).await?;
        let previous =
            queries::previous_service(&mut tx, &service.resource_id, &service.id, service.started_at).await?;
        tx.commit().await?;
        Ok(previous)
    }

    fn announce(&self, service: &ResourceService, change: &ResourceServiceChange) {
        // no subscribers is fine
        let _ = self.event_tx.send(ServicingEvent::ServiceChanged {
            service_id: service.id.clone(),
            resource_id: service.resource_id.clone(),
            status: service.status,
            change: change.clone(),
        });
    }
}

fn authorize(actor: &Actor, resource: &Resource, verb: &str) -> Result<()> {
    if actor.may_manage(resource.team_id.as_deref()) {
        return Ok(());
    }
    tracing::warn!(
        "{} is not allowed to {} a service on resource {}",
        actor.username,
        verb,
        resource.id
    );
    Err(ServicingError::PermissionDenied(format!(
        "{} may not manage servicing of resource {}",
        actor.username, resource.reference
    )))
}

/// A lost race against the one-WIP index surfaces as a conflict, not a fault.
fn wip_conflict(err: sqlx::Error, resource_id: &str) -> ServicingError {
    if is_unique_violation(&err) {
        ServicingError::already_in_progress(resource_id)
    } else {
        ServicingError::Database(err)
    }
}

async fn reload(conn: &mut SqliteConnection, service_id: &str) -> Result<ResourceService> {
    queries::get_service(conn, service_id)
        .await?
        .ok_or_else(|| ServicingError::not_found("service", service_id))
}

/// Take the write lock via the service row, then read the service and its resource.
async fn lock_and_load(
    conn: &mut SqliteConnection,
    service_id: &str,
) -> Result<(ResourceService, Resource)> {
    if !queries::lock_service(conn, service_id).await? {
        return Err(ServicingError::not_found("service", service_id));
    }
    let service = reload(conn, service_id).await?;
    let resource = queries::get_resource(conn, &service.resource_id)
        .await?
        .ok_or_else(|| ServicingError::not_found("resource", service.resource_id.clone()))?;
    Ok((service, resource))
}
