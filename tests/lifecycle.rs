mod common;

use chrono::{Duration, Utc};
use std::sync::Arc;

use common::{dec, harness, press, read};
use servicing_backend::{
    db::{
        models::{ChangeAction, ServiceStatus},
        queries::ServiceFilter,
    },
    error::ServicingError,
    servicing::{
        actor::{Actor, ManageScope},
        audit,
        catalog::NewReading,
        priority::{RowAction, Sort, StatusFilter},
        Page,
    },
};

fn manager() -> Actor {
    Actor::manager("mia")
}

#[tokio::test]
async fn start_then_second_start_conflicts() {
    let h = harness().await;
    let p = press(&h.state, "P-1", None, true, "100").await;

    let service = h.state.lifecycle.start(&manager(), &p.resource.id, "oil leak".into()).await.unwrap();
    assert_eq!(service.status, ServiceStatus::WorkInProgress);
    assert_eq!(service.started_by, "mia");
    assert_eq!(service.resource_reference, "P-1");

    let err = h.state.lifecycle.start(&manager(), &p.resource.id, String::new()).await.unwrap_err();
    assert!(matches!(err, ServicingError::Conflict(_)), "got {err:?}");

    let active = h.state.lifecycle.active_service_id(&p.resource.id).await.unwrap();
    assert_eq!(active, Some(service.id));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_starts_leave_one_work_in_progress() {
    let h = harness().await;
    let p = press(&h.state, "P-1", None, true, "100").await;

    let mut handles = Vec::new();
    for n in 0..8 {
        let state = Arc::clone(&h.state);
        let resource_id = p.resource.id.clone();
        handles.push(tokio::spawn(async move {
            let actor = Actor::manager(format!("tech-{n}"));
            state.lifecycle.start(&actor, &resource_id, String::new()).await
        }));
    }

    let mut started = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => started += 1,
            Err(ServicingError::Conflict(_)) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(started, 1);

    let filter = ServiceFilter {
        resource_id: Some(p.resource.id.clone()),
        status: Some(ServiceStatus::WorkInProgress),
    };
    let wip = h.state.lifecycle.list(&filter, Page::new(1, 50)).await.unwrap();
    assert_eq!(wip.total_count, 1);
}

#[tokio::test]
async fn completion_resets_cumulative_usage() {
    let h = harness().await;
    let p = press(&h.state, "P-1", None, true, "100").await;
    read(&h.state, &p, "60").await;
    read(&h.state, &p, "35").await;

    let before = h.state.priority.for_resource(&manager(), &p.resource.id).await.unwrap();
    assert_eq!(before[0].current_value, Some(dec("95")));

    let service = h.state.lifecycle.start(&manager(), &p.resource.id, String::new()).await.unwrap();
    let completed = h.state.lifecycle.complete(&manager(), &service.id).await.unwrap();
    assert_eq!(completed.status, ServiceStatus::Completed);
    assert_eq!(completed.completed_by.as_deref(), Some("mia"));

    let resource = h.state.catalog.get_resource(&p.resource.id).await.unwrap();
    assert_eq!(resource.last_serviced_at, completed.completed_at);

    let after = h.state.priority.for_resource(&manager(), &p.resource.id).await.unwrap();
    assert_eq!(after[0].current_value, Some(dec("0")));
    assert!(!after[0].is_due);

    h.state
        .catalog
        .record_reading(
            &Actor::viewer("operator"),
            &p.resource.id,
            NewReading {
                metric_id: p.metric.id.clone(),
                value: "7.5".into(),
                recorded_at: Some(Utc::now() + Duration::seconds(1)),
            },
        )
        .await
        .unwrap();
    let later = h.state.priority.for_resource(&manager(), &p.resource.id).await.unwrap();
    assert_eq!(later[0].current_value, Some(dec("7.5")));
}

#[tokio::test]
async fn cancellation_keeps_the_baseline() {
    let h = harness().await;
    let p = press(&h.state, "P-1", None, true, "100").await;
    read(&h.state, &p, "120").await;

    let service = h.state.lifecycle.start(&manager(), &p.resource.id, String::new()).await.unwrap();
    let cancelled = h.state.lifecycle.cancel(&manager(), &service.id).await.unwrap();
    assert_eq!(cancelled.status, ServiceStatus::Cancelled);
    assert_eq!(cancelled.cancelled_by.as_deref(), Some("mia"));

    let resource = h.state.catalog.get_resource(&p.resource.id).await.unwrap();
    assert_eq!(resource.last_serviced_at, None);

    let rows = h.state.priority.for_resource(&manager(), &p.resource.id).await.unwrap();
    assert_eq!(rows[0].current_value, Some(dec("120")));
    assert!(rows[0].is_due);
    assert_eq!(rows[0].action, RowAction::StartService);
}

#[tokio::test]
async fn reopen_is_refused_while_another_service_runs() {
    let h = harness().await;
    let p = press(&h.state, "P-1", None, true, "100").await;

    let first = h.state.lifecycle.start(&manager(), &p.resource.id, String::new()).await.unwrap();
    h.state.lifecycle.cancel(&manager(), &first.id).await.unwrap();
    let second = h.state.lifecycle.start(&manager(), &p.resource.id, String::new()).await.unwrap();

    let err = h.state.lifecycle.reopen(&manager(), &first.id).await.unwrap_err();
    assert!(matches!(err, ServicingError::Conflict(_)), "got {err:?}");
    assert_eq!(h.state.lifecycle.get(&first.id).await.unwrap().status, ServiceStatus::Cancelled);

    h.state.lifecycle.complete(&manager(), &second.id).await.unwrap();
    let reopened = h.state.lifecycle.reopen(&manager(), &first.id).await.unwrap();
    assert_eq!(reopened.status, ServiceStatus::WorkInProgress);
    assert_eq!(reopened.reopened_by.as_deref(), Some("mia"));
}

#[tokio::test]
async fn invalid_transitions_are_rejected_without_side_effects() {
    let h = harness().await;
    let p = press(&h.state, "P-1", None, true, "100").await;
    let service = h.state.lifecycle.start(&manager(), &p.resource.id, String::new()).await.unwrap();

    let err = h.state.lifecycle.reopen(&manager(), &service.id).await.unwrap_err();
    assert!(matches!(
        err,
        ServicingError::InvalidTransition {
            from: ServiceStatus::WorkInProgress,
            action: "reopen"
        }
    ));

    h.state.lifecycle.complete(&manager(), &service.id).await.unwrap();
    for attempt in ["complete", "cancel"] {
        let action = attempt.parse().unwrap();
        let err = h.state.lifecycle.apply(&manager(), &service.id, action).await.unwrap_err();
        assert!(matches!(err, ServicingError::InvalidTransition { .. }), "got {err:?}");
    }

    let history = h.state.lifecycle.history(&service.id).await.unwrap();
    assert_eq!(history.len(), 2);
}

#[tokio::test]
async fn journal_records_every_mutation_in_order() {
    let h = harness().await;
    let p = press(&h.state, "P-1", None, true, "100").await;

    let service = h.state.lifecycle.start(&Actor::manager("ann"), &p.resource.id, "".into()).await.unwrap();
    h.state.lifecycle.edit_notes(&Actor::manager("ben"), &service.id, "replaced belt".into()).await.unwrap();
    h.state.lifecycle.complete(&Actor::manager("cat"), &service.id).await.unwrap();
    h.state.lifecycle.reopen(&Actor::manager("dan"), &service.id).await.unwrap();

    let history = h.state.lifecycle.history(&service.id).await.unwrap();
    let actions: Vec<ChangeAction> = history.iter().map(|c| c.action).collect();
    assert_eq!(
        actions,
        vec![
            ChangeAction::Created,
            ChangeAction::NotesEdited,
            ChangeAction::Completed,
            ChangeAction::Reopened
        ]
    );
    let actors: Vec<&str> = history.iter().map(|c| c.change_by.as_str()).collect();
    assert_eq!(actors, vec!["ann", "ben", "cat", "dan"]);
    assert!(history[0].is_creation);
    assert!(history[1..].iter().all(|c| !c.is_creation));
    assert!(history.windows(2).all(|w| w[0].change_at <= w[1].change_at));

    let entries = audit::with_diffs(history);
    let notes_diff = &entries[1].changes;
    assert_eq!(notes_diff.len(), 1);
    assert_eq!(notes_diff[0].key, "notes");
    assert_eq!(notes_diff[0].after.as_deref(), Some("replaced belt"));

    let reopen_keys: Vec<&str> = entries[3].changes.iter().map(|c| c.key.as_str()).collect();
    assert_eq!(reopen_keys, vec!["completed_by", "reopened_by"]);
}

#[tokio::test]
async fn unauthorised_actor_changes_nothing() {
    let h = harness().await;
    let p = press(&h.state, "P-1", Some("press-shop"), true, "100").await;

    let outsider = Actor::new("olly", ManageScope::parse("teams:welding").unwrap());
    let err = h.state.lifecycle.start(&outsider, &p.resource.id, String::new()).await.unwrap_err();
    assert!(matches!(err, ServicingError::PermissionDenied(_)));
    assert_eq!(h.state.lifecycle.active_service_id(&p.resource.id).await.unwrap(), None);

    let insider = Actor::new("ida", ManageScope::parse("teams:press-shop").unwrap());
    let service = h.state.lifecycle.start(&insider, &p.resource.id, String::new()).await.unwrap();

    let err = h.state.lifecycle.complete(&Actor::viewer("vic"), &service.id).await.unwrap_err();
    assert!(matches!(err, ServicingError::PermissionDenied(_)));
    assert_eq!(h.state.lifecycle.get(&service.id).await.unwrap().status, ServiceStatus::WorkInProgress);
    assert_eq!(h.state.lifecycle.history(&service.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn unknown_ids_are_not_found() {
    let h = harness().await;
    let err = h.state.lifecycle.start(&manager(), "nope", String::new()).await.unwrap_err();
    assert!(matches!(err, ServicingError::NotFound { entity: "resource", .. }));

    let err = h.state.lifecycle.complete(&manager(), "nope").await.unwrap_err();
    assert!(matches!(err, ServicingError::NotFound { entity: "service", .. }));

    let err = h.state.lifecycle.history("nope").await.unwrap_err();
    assert!(matches!(err, ServicingError::NotFound { .. }));
}

#[tokio::test]
async fn archived_resource_cannot_start_service() {
    let h = harness().await;
    let p = press(&h.state, "P-1", None, true, "100").await;
    h.state.catalog.archive_resource(&manager(), &p.resource.id).await.unwrap();

    let err = h.state.lifecycle.start(&manager(), &p.resource.id, String::new()).await.unwrap_err();
    assert!(matches!(err, ServicingError::Validation { field: "resource_id", .. }));
}

#[tokio::test]
async fn previous_skips_cancelled_services() {
    let h = harness().await;
    let p = press(&h.state, "P-1", None, true, "100").await;

    let first = h.state.lifecycle.start(&manager(), &p.resource.id, String::new()).await.unwrap();
    h.state.lifecycle.complete(&manager(), &first.id).await.unwrap();
    let second = h.state.lifecycle.start(&manager(), &p.resource.id, String::new()).await.unwrap();
    h.state.lifecycle.cancel(&manager(), &second.id).await.unwrap();
    let third = h.state.lifecycle.start(&manager(), &p.resource.id, String::new()).await.unwrap();

    let previous = h.state.lifecycle.previous(&third.id).await.unwrap();
    assert_eq!(previous.map(|s| s.id), Some(first.id.clone()));
    assert!(h.state.lifecycle.previous(&first.id).await.unwrap().is_none());
}

#[tokio::test]
async fn worklist_links_running_service() {
    let h = harness().await;
    let p = press(&h.state, "P-1", None, true, "100").await;
    read(&h.state, &p, "85").await;
    let service = h.state.lifecycle.start(&manager(), &p.resource.id, String::new()).await.unwrap();

    let page = h
        .state
        .priority
        .list(&Actor::viewer("vic"), &StatusFilter::default(), Sort::default(), Page::new(1, 10))
        .await
        .unwrap();
    assert_eq!(page.total_count, 1);
    let row = &page.items[0];
    assert!(row.has_wip_service);
    assert!(!row.can_manage);
    assert_eq!(
        row.action,
        RowAction::ViewService {
            service_id: service.id
        }
    );
}

#[tokio::test]
async fn reopening_a_completed_service_keeps_last_serviced_at() {
    let h = harness().await;
    let p = press(&h.state, "P-1", None, true, "100").await;
    read(&h.state, &p, "40").await;

    let service = h.state.lifecycle.start(&manager(), &p.resource.id, String::new()).await.unwrap();
    let completed = h.state.lifecycle.complete(&manager(), &service.id).await.unwrap();
    let serviced_at = h.state.catalog.get_resource(&p.resource.id).await.unwrap().last_serviced_at;
    assert_eq!(serviced_at, completed.completed_at);

    h.state.lifecycle.reopen(&manager(), &service.id).await.unwrap();
    let resource = h.state.catalog.get_resource(&p.resource.id).await.unwrap();
    assert_eq!(resource.last_serviced_at, serviced_at);

    let rows = h.state.priority.for_resource(&manager(), &p.resource.id).await.unwrap();
    assert_eq!(rows[0].current_value, Some(dec("0")));
}

#[tokio::test]
async fn cancel_appends_exactly_one_entry() {
    let h = harness().await;
    let p = press(&h.state, "P-1", None, true, "100").await;
    let service = h.state.lifecycle.start(&manager(), &p.resource.id, String::new()).await.unwrap();
    assert_eq!(h.state.lifecycle.history(&service.id).await.unwrap().len(), 1);

    h.state.lifecycle.cancel(&Actor::manager("cal"), &service.id).await.unwrap();
    let history = h.state.lifecycle.history(&service.id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].action, ChangeAction::Cancelled);
    assert_eq!(history[1].change_by, "cal");
    assert_eq!(history[1].snapshot.cancelled_by.as_deref(), Some("cal"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_edits_journal_in_commit_order() {
    let h = harness().await;
    let p = press(&h.state, "P-1", None, true, "100").await;
    let service = h.state.lifecycle.start(&manager(), &p.resource.id, String::new()).await.unwrap();

    let mut handles = Vec::new();
    for n in 0..8 {
        let state = Arc::clone(&h.state);
        let service_id = service.id.clone();
        handles.push(tokio::spawn(async move {
            let actor = Actor::manager(format!("tech-{n}"));
            state
                .lifecycle
                .edit_notes(&actor, &service_id, format!("note {n}"))
                .await
                .map(|_| ())
        }));
    }
    let state = Arc::clone(&h.state);
    let service_id = service.id.clone();
    handles.push(tokio::spawn(async move {
        state.lifecycle.cancel(&manager(), &service_id).await.map(|_| ())
    }));
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let history = h.state.lifecycle.history(&service.id).await.unwrap();
    assert_eq!(history.len(), 10);
    assert!(history.windows(2).all(|w| w[0].id < w[1].id));
    assert!(history.windows(2).all(|w| w[0].change_at <= w[1].change_at));
    assert_eq!(history[0].action, ChangeAction::Created);
    let cancels = history.iter().filter(|c| c.action == ChangeAction::Cancelled).count();
    assert_eq!(cancels, 1);
}
