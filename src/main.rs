use anyhow::Result;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use servicing_backend::{build_router, config::AppConfig, db, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    // Logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "servicing_backend=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("=== Resource servicing engine starting ===");

    let config = AppConfig::from_env();

    // Database
    let pool = db::init_pool(&config.database_url, config.max_connections).await?;
    tracing::info!("Database ready");

    let port = config.port;
    let state = Arc::new(AppState::new(pool, config));
    let app = build_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
