//! Markstash binary entry point

use markstash::{AppState, config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application entry point
///
/// # Setup
/// 1. Load configuration from file and environment
/// 2. Initialize tracing/logging from `logging.*` (`RUST_LOG` overrides the level)
/// 3. Initialize metrics
/// 4. Initialize AppState
/// 5. Build Axum router
/// 6. Start background tasks (session purge)
/// 7. Start HTTP server with graceful shutdown
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration
    let config = config::AppConfig::load()?;

    // 2. Initialize tracing/logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.default_filter().into());

    if config.logging.is_json() {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }

    tracing::info!("Starting Markstash...");
    tracing::info!(
        domain = %config.server.domain,
        protocol = %config.server.protocol,
        provider = %config.auth.provider.name,
        "Configuration loaded"
    );
    config.log_warnings();

    // 3. Initialize metrics
    markstash::metrics::init_metrics();

    // 4. Initialize application state
    let state = AppState::new(config.clone()).await?;

    // 5. Build Axum router
    let app = markstash::build_router(state.clone());

    // 6. Start background tasks
    spawn_session_purge_task(state.clone());

    // 7. Start HTTP server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);
    tracing::info!("Public URL: {}", config.server.base_url());

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            state.begin_shutdown();
        })
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Spawn background task removing expired sessions
fn spawn_session_purge_task(state: AppState) {
    tokio::spawn(async move {
        let interval_secs = state.config.auth.session_purge_interval_seconds.max(1);
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));

        loop {
            interval.tick().await;

            if let Err(error) = state.sessions.purge_expired().await {
                tracing::error!(%error, "Session purge failed");
            }
        }
    });

    tracing::info!("Session purge task spawned");
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
