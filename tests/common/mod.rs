//! Common test utilities for E2E tests

#![allow(dead_code)]

use async_trait::async_trait;
use markstash::auth::{IdentityProvider, ProviderIdentity};
use markstash::error::AppError;
use markstash::{AppState, config};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Codes starting with this prefix are accepted; the rest names the subject
pub const VALID_CODE_PREFIX: &str = "valid-";

/// In-process identity provider
///
/// `valid-<subject>` exchanges to `<subject>@example.com`; any other code is
/// rejected the way a real provider rejects an expired code.
pub struct ScriptedIdentityProvider;

#[async_trait]
impl IdentityProvider for ScriptedIdentityProvider {
    fn authorize_url(&self, redirect_uri: &str, state: &str) -> Result<String, AppError> {
        Ok(format!(
            "https://idp.test/authorize?redirect_uri={}&state={}",
            urlencoding::encode(redirect_uri),
            urlencoding::encode(state)
        ))
    }

    async fn exchange_code(
        &self,
        code: &str,
        _redirect_uri: &str,
    ) -> Result<ProviderIdentity, AppError> {
        match code.strip_prefix(VALID_CODE_PREFIX) {
            Some(subject) if !subject.is_empty() => Ok(ProviderIdentity {
                subject: subject.to_string(),
                email: format!("{subject}@example.com"),
            }),
            _ => Err(AppError::AuthExchange("invalid_grant".to_string())),
        }
    }
}

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub _temp_dir: TempDir,
    /// Client that does not follow redirects
    pub client: reqwest::Client,
    stop: Option<oneshot::Sender<()>>,
    server: Option<JoinHandle<std::io::Result<()>>>,
}

impl TestServer {
    /// Create a new test server instance
    pub async fn new() -> Self {
        // Create temporary directory for test database
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        // Create test configuration
        let config = config::AppConfig {
            server: config::ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0, // Let OS assign port
                domain: "localhost".to_string(),
                protocol: "http".to_string(),
            },
            database: config::DatabaseConfig { path: db_path },
            auth: config::AuthConfig {
                session_secret: "test-secret-key-32-bytes-long!!!".to_string(),
                session_max_age: 604800,
                session_purge_interval_seconds: 3600,
                provider: config::ProviderConfig {
                    name: "google".to_string(),
                    client_id: "test-client-id".to_string(),
                    client_secret: "test-client-secret".to_string(),
                    authorize_url: "https://idp.test/authorize".to_string(),
                    token_url: "https://idp.test/token".to_string(),
                    userinfo_url: "https://idp.test/userinfo".to_string(),
                    scopes: "openid email".to_string(),
                },
            },
            realtime: config::RealtimeConfig {
                channel_capacity: 256,
            },
            logging: config::LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        };

        // Initialize app state
        let state = AppState::with_identity_provider(config, Arc::new(ScriptedIdentityProvider))
            .await
            .unwrap();

        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap();

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let addr_str = format!("http://{}", addr);

        let app = markstash::build_router(state.clone());

        // Spawn server in background, shutting down the way main does
        let (stop, stopped) = oneshot::channel::<()>();
        let shutdown_state = state.clone();
        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = stopped.await;
                    shutdown_state.begin_shutdown();
                })
                .await
        });

        Self {
            addr: addr_str,
            state,
            _temp_dir: temp_dir,
            client,
            stop: Some(stop),
            server: Some(server),
        }
    }

    /// Trigger graceful shutdown
    ///
    /// # Returns
    /// `true` if the server finished within three seconds
    pub async fn stop(&mut self) -> bool {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        match self.server.take() {
            Some(server) => tokio::time::timeout(Duration::from_secs(3), server)
                .await
                .is_ok(),
            None => true,
        }
    }

    /// Open the live bookmark stream with `cookie`
    pub async fn open_stream(&self, cookie: &str) -> EventReader {
        let response = self
            .client
            .get(self.url("/bookmarks/stream"))
            .header("Cookie", cookie)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        EventReader {
            response,
            buffer: String::new(),
        }
    }

    /// Get base URL for API requests
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    /// Run the full sign-in flow for `subject`
    ///
    /// # Returns
    /// A `Cookie` header value carrying the session
    pub async fn sign_in(&self, subject: &str) -> String {
        let start = self
            .client
            .post(self.url("/auth/login"))
            .send()
            .await
            .unwrap();
        let oauth_state = cookie_value(&start, "oauth_state").expect("oauth_state cookie");

        let callback = self
            .client
            .get(self.url(&format!(
                "/auth/callback?code={VALID_CODE_PREFIX}{subject}&state={oauth_state}"
            )))
            .header("Cookie", format!("oauth_state={oauth_state}"))
            .send()
            .await
            .unwrap();
        assert_eq!(location(&callback), "/bookmarks");

        let token = cookie_value(&callback, "session").expect("session cookie");
        format!("session={token}")
    }
}

/// Value of the `name` cookie set by `response`, ignoring removals
pub fn cookie_value(response: &reqwest::Response, name: &str) -> Option<String> {
    response
        .headers()
        .get_all("set-cookie")
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| value.split(';').next())
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, value)| *key == name && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

/// `Location` header of a redirect
pub fn location(response: &reqwest::Response) -> String {
    assert!(
        response.status().is_redirection(),
        "expected redirect, got {}",
        response.status()
    );
    response
        .headers()
        .get("location")
        .and_then(|v| v.to_str().ok())
        .expect("location header")
        .to_string()
}

/// Reads server-sent events one block at a time
pub struct EventReader {
    response: reqwest::Response,
    buffer: String,
}

impl EventReader {
    /// Next event block, skipping keep-alive comments
    ///
    /// Returns `None` when the stream ends.
    pub async fn next_event(&mut self) -> Option<String> {
        loop {
            if let Some(end) = self.buffer.find("\n\n") {
                let block: String = self.buffer.drain(..end + 2).collect();
                let block = block.trim().to_string();
                if block.is_empty() || block.starts_with(':') {
                    continue;
                }
                return Some(block);
            }

            let chunk = tokio::time::timeout(Duration::from_secs(5), self.response.chunk())
                .await
                .expect("event within 5s")
                .ok()??;
            self.buffer.push_str(&String::from_utf8_lossy(&chunk));
        }
    }

    /// Skip events until one contains `needle`
    pub async fn wait_for(&mut self, needle: &str) -> String {
        while let Some(event) = self.next_event().await {
            if event.contains(needle) {
                return event;
            }
        }
        panic!("stream ended before an event containing {needle:?}");
    }
}
