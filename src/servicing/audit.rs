//! Append-only change journal for resource services.
//!
//! Each entry stores the full set of tracked fields as they stood after the
//! change, so consecutive entries can be diffed without extra queries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;

use crate::db::{
    models::{ChangeAction, FieldSnapshot, ResourceServiceChange},
    queries,
};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrackedField {
    pub key: &'static str,
    pub label: &'static str,
}

/// Fields captured in every journal entry, in display order.
pub const TRACKED_FIELDS: &[TrackedField] = &[
    TrackedField { key: "notes", label: "Notes" },
    TrackedField { key: "started_by", label: "Started By" },
    TrackedField { key: "completed_by", label: "Completed By" },
    TrackedField { key: "cancelled_by", label: "Cancelled By" },
    TrackedField { key: "reopened_by", label: "Reopened By" },
];

impl FieldSnapshot {
    /// Value of a tracked field. Unknown keys and unset fields are `None`.
    pub fn get(&self, key: &str) -> Option<&str> {
        match key {
            "notes" => Some(self.notes.as_str()),
            "started_by" => Some(self.started_by.as_str()),
            "completed_by" => self.completed_by.as_deref(),
            "cancelled_by" => self.cancelled_by.as_deref(),
            "reopened_by" => self.reopened_by.as_deref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub key: String,
    pub label: String,
    pub before: Option<String>,
    pub after: Option<String>,
}

/// Tracked fields that differ between two snapshots. With no previous
/// snapshot every set field counts as changed.
pub fn diff(previous: Option<&FieldSnapshot>, current: &FieldSnapshot) -> Vec<FieldChange> {
    TRACKED_FIELDS
        .iter()
        .filter_map(|field| {
            let before = previous.and_then(|p| p.get(field.key));
            let after = current.get(field.key);
            let unchanged = before == after || (previous.is_none() && after.map_or(true, str::is_empty));
            if unchanged {
                return None;
            }
            Some(FieldChange {
                key: field.key.to_string(),
                label: field.label.to_string(),
                before: before.map(str::to_string),
                after: after.map(str::to_string),
            })
        })
        .collect()
}

/// One journal entry together with what it changed relative to its predecessor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(flatten)]
    pub change: ResourceServiceChange,
    pub changes: Vec<FieldChange>,
}

/// Attach per-entry diffs to a history that is already oldest first.
pub fn with_diffs(history: Vec<ResourceServiceChange>) -> Vec<HistoryEntry> {
    let mut previous: Option<FieldSnapshot> = None;
    history
        .into_iter()
        .map(|change| {
            let changes = diff(previous.as_ref(), &change.snapshot);
            previous = Some(change.snapshot.clone());
            HistoryEntry { change, changes }
        })
        .collect()
}

/// Append one entry. Must run inside the transaction of the mutation it
/// describes so the two commit together.
pub async fn record(
    conn: &mut SqliteConnection,
    service_id: &str,
    action: ChangeAction,
    actor: &str,
    at: DateTime<Utc>,
    snapshot: &FieldSnapshot,
) -> Result<ResourceServiceChange> {
    let id = queries::insert_change(conn, service_id, action, actor, at, snapshot).await?;
    tracing::debug!("Recorded {:?} change #{} on service {}", action, id, service_id);
    Ok(ResourceServiceChange {
        id,
        service_id: service_id.to_string(),
        action,
        change_by: actor.to_string(),
        change_at: at,
        is_creation: action == ChangeAction::Created,
        snapshot: snapshot.clone(),
    })
}

/// Entries for a service in commit order. The journal id is assigned under the
/// write lock, so it orders entries even when clocks disagree.
pub async fn history(conn: &mut SqliteConnection, service_id: &str) -> Result<Vec<ResourceServiceChange>> {
    Ok(queries::list_changes(conn, service_id).await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(notes: &str) -> FieldSnapshot {
        FieldSnapshot {
            notes: notes.to_string(),
            started_by: "alice".to_string(),
            completed_by: None,
            cancelled_by: None,
            reopened_by: None,
        }
    }

    #[test]
    fn every_tracked_field_is_readable() {
        let mut snap = snapshot("n");
        snap.completed_by = Some("c".into());
        snap.cancelled_by = Some("x".into());
        snap.reopened_by = Some("r".into());
        for field in TRACKED_FIELDS {
            assert!(snap.get(field.key).is_some(), "{} not readable", field.key);
        }
        assert_eq!(snap.get("unknown"), None);
    }

    #[test]
    fn creation_diff_lists_set_fields() {
        let changes = diff(None, &snapshot(""));
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].key, "started_by");
        assert_eq!(changes[0].after.as_deref(), Some("alice"));
    }

    #[test]
    fn notes_edit_diff_only_touches_notes() {
        let before = snapshot("old");
        let after = snapshot("new");
        let changes = diff(Some(&before), &after);
        assert_eq!(
            changes,
            vec![FieldChange {
                key: "notes".into(),
                label: "Notes".into(),
                before: Some("old".into()),
                after: Some("new".into()),
            }]
        );
    }

    #[test]
    fn reopen_diff_shows_cleared_completion() {
        let mut completed = snapshot("n");
        completed.completed_by = Some("bob".into());
        let mut reopened = snapshot("n");
        reopened.reopened_by = Some("carol".into());

        let changes = diff(Some(&completed), &reopened);
        let keys: Vec<&str> = changes.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, vec!["completed_by", "reopened_by"]);
        assert_eq!(changes[0].after, None);
    }
}
