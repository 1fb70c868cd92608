use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Which resources an actor may manage servicing for. Supplied by the
/// identity layer; the engine never derives it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManageScope {
    None,
    All,
    Teams(BTreeSet<String>),
}

impl ManageScope {
    /// `none`, `all`, or `teams:<id>,<id>,...`
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        match raw {
            "" | "none" => Some(ManageScope::None),
            "all" => Some(ManageScope::All),
            _ => {
                let teams = raw.strip_prefix("teams:")?;
                let teams: BTreeSet<String> = teams
                    .split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect();
                Some(ManageScope::Teams(teams))
            }
        }
    }
}

/// The user acting on the servicing engine for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub username: String,
    pub scope: ManageScope,
}

impl Actor {
    pub fn new(username: impl Into<String>, scope: ManageScope) -> Self {
        Actor {
            username: username.into(),
            scope,
        }
    }

    /// An actor with no manage capability anywhere.
    pub fn viewer(username: impl Into<String>) -> Self {
        Actor::new(username, ManageScope::None)
    }

    pub fn manager(username: impl Into<String>) -> Self {
        Actor::new(username, ManageScope::All)
    }

    /// Whether this actor may manage servicing of a resource owned by `team_id`.
    /// Unowned resources are only manageable with an unrestricted scope.
    pub fn may_manage(&self, team_id: Option<&str>) -> bool {
        match &self.scope {
            ManageScope::None => false,
            ManageScope::All => true,
            ManageScope::Teams(teams) => team_id.is_some_and(|t| teams.contains(t)),
        }
    }

    /// Metrics and schedules are shared by every team, so editing them needs
    /// an unrestricted scope.
    pub fn may_manage_catalog(&self) -> bool {
        matches!(self.scope, ManageScope::All)
    }
}
