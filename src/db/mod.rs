pub mod models;
pub mod queries;

use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};
use std::{str::FromStr, time::Duration};

use crate::error::Result;

/// How long a writer waits for SQLite's write lock before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn init_pool(database_url: &str, max_connections: u32) -> Result<SqlitePool> {
    // Parse the URL into connect options and enable file creation
    let connect_opts = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT)
        .foreign_keys(true);

    // Ensure the parent directory exists before sqlx tries to open the file
    if let Some(filename) = connect_opts.clone().get_filename().to_str() {
        if filename != ":memory:" {
            if let Some(parent) = std::path::Path::new(filename).parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(sqlx::Error::Io)?;
                }
            }
        }
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .connect_with(connect_opts)
        .await?;

    // Run embedded migrations
    sqlx::migrate!("./migrations").run(&pool).await?;

    tracing::info!("Database initialized at {}", database_url);
    Ok(pool)
}
