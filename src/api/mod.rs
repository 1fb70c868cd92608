pub mod actor;
pub mod metrics;
pub mod resources;
pub mod schedules;
pub mod services;
pub mod servicing;
pub mod ws_handler;

use serde::Deserialize;

/// `?include_archived=true` on catalog listings.
#[derive(Debug, Default, Deserialize)]
pub struct ArchivedQuery {
    #[serde(default)]
    pub include_archived: bool,
}
