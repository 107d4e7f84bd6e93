//! Markstash - a minimal personal bookmark manager
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      API Layer (Axum)                        │
//! │  - Login / callback / logout                                │
//! │  - Bookmark pages, forms and live stream                    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Client Components                         │
//! │  - Session gate, login flow                                 │
//! │  - Bookmark store + realtime subscriber, bookmark view      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │               Service Layer + Change Bus                     │
//! │  - Bookmark writes, published after commit                  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Data Layer                              │
//! │  - SQLite (sqlx)                                            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `api`: HTTP handlers for bookmark pages and metrics
//! - `auth`: OAuth sign-in, sessions and extractors
//! - `client`: Per-request components built on a session provider
//! - `realtime`: Change-notification bus
//! - `service`: Business logic layer
//! - `data`: Database layer
//! - `config`: Configuration management
//! - `error`: Error types

pub mod api;
pub mod auth;
pub mod client;
pub mod config;
pub mod data;
pub mod error;
pub mod metrics;
pub mod realtime;
pub mod service;

use std::sync::Arc;
use tokio::sync::watch;

/// Application state shared across all handlers
///
/// This struct is cloned for each request and contains
/// shared resources like the database pool, change bus and session store.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Database connection pool
    pub db: Arc<data::Database>,

    /// Bookmark change bus
    pub bus: Arc<realtime::ChangeBus>,

    /// Server-side sessions
    pub sessions: Arc<auth::SessionStore>,

    /// Bookmark writes and reads
    pub bookmarks: Arc<service::BookmarkService>,

    /// Sign-in against the identity provider
    pub login: Arc<client::LoginFlow>,

    /// Flips to `true` once the server starts shutting down
    pub shutdown: Arc<watch::Sender<bool>>,
}

impl AppState {
    /// Initialize application state
    ///
    /// # Steps
    /// 1. Build the outbound HTTP client
    /// 2. Create the identity provider from configuration
    /// 3. Connect to SQLite and wire the services
    ///
    /// # Errors
    /// Returns error if any initialization step fails
    pub async fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("Markstash/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| error::AppError::Internal(e.into()))?;

        let identity = Arc::new(auth::OAuthIdentityProvider::new(
            config.auth.provider.clone(),
            http_client,
        ));

        Self::with_identity_provider(config, identity).await
    }

    /// Initialize application state around a given identity provider
    pub async fn with_identity_provider(
        config: config::AppConfig,
        identity: Arc<dyn auth::IdentityProvider>,
    ) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        let db = Arc::new(data::Database::connect(&config.database.path).await?);
        tracing::info!(path = %config.database.path.display(), "Database connected");

        let bus = Arc::new(realtime::ChangeBus::new(config.realtime.channel_capacity));
        let sessions = Arc::new(auth::SessionStore::new(
            db.clone(),
            config.auth.session_secret.clone(),
            config.auth.session_max_age,
        ));
        let bookmarks = Arc::new(service::BookmarkService::new(db.clone(), bus.clone()));
        let login = Arc::new(client::LoginFlow::new(
            identity,
            db.clone(),
            sessions.clone(),
            config.auth.provider.name.clone(),
            config.server.callback_url(),
        ));

        tracing::info!(
            provider = %config.auth.provider.name,
            "Application state initialized successfully"
        );

        let (shutdown, _rx) = watch::channel(false);

        Ok(Self {
            config: Arc::new(config),
            db,
            bus,
            sessions,
            bookmarks,
            login,
            shutdown: Arc::new(shutdown),
        })
    }

    /// Tell long-lived responses to finish
    ///
    /// Graceful shutdown waits for every open connection, so live streams
    /// must end on their own once this is called.
    pub fn begin_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Receiver that observes [`AppState::begin_shutdown`]
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Backend handle for client components
    pub fn backend(&self) -> client::BackendClient {
        client::BackendClient::new(self.bookmarks.clone())
    }
}

/// Build the Axum router with all routes.
///
/// This is shared by the binary and integration tests to keep route
/// composition consistent across environments.
pub fn build_router(state: AppState) -> axum::Router {
    use axum::Router;
    use tower_http::{
        compression::CompressionLayer, limit::RequestBodyLimitLayer, trace::TraceLayer,
    };

    let cors_layer = build_cors_layer(&state.config.server);

    Router::new()
        .route("/health", axum::routing::get(health_check))
        .merge(auth::auth_router())
        .merge(api::bookmarks_router())
        .route_layer(axum::middleware::from_fn(api::track_http_metrics))
        .layer(RequestBodyLimitLayer::new(64 * 1024))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .with_state(state)
        .merge(api::metrics_router())
}

fn build_cors_layer(server: &config::ServerConfig) -> tower_http::cors::CorsLayer {
    use axum::http::HeaderValue;
    use tower_http::cors::{Any, CorsLayer};

    if !server.protocol.eq_ignore_ascii_case("https") {
        return CorsLayer::permissive();
    }

    let allowed_origin = server.base_url();
    match HeaderValue::from_str(&allowed_origin) {
        Ok(origin) => CorsLayer::new()
            .allow_origin([origin])
            .allow_methods(Any)
            .allow_headers(Any),
        Err(error) => {
            tracing::error!(
                %error,
                origin = %allowed_origin,
                "Failed to parse CORS origin from server base URL; denying cross-origin requests"
            );
            CorsLayer::new().allow_methods(Any).allow_headers(Any)
        }
    }
}

async fn health_check() -> &'static str {
    "OK"
}
