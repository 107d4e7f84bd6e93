//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::{net::IpAddr, path::PathBuf};

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub realtime: RealtimeConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Port number (e.g., 8080)
    pub port: u16,
    /// Public domain (e.g., "marks.example.com")
    pub domain: String,
    /// Protocol ("http" or "https")
    pub protocol: String,
}

impl ServerConfig {
    /// Get the base URL for the instance
    ///
    /// # Returns
    /// Full URL like "https://marks.example.com"
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.protocol, self.domain)
    }

    /// Absolute URL the identity provider redirects back to.
    pub fn callback_url(&self) -> String {
        format!("{}/auth/callback", self.base_url())
    }
}

/// Database configuration (SQLite only)
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    pub path: PathBuf,
}

/// Authentication configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Session secret key (32+ bytes)
    pub session_secret: String,
    /// Session max age in seconds (default: 604800 = 7 days)
    pub session_max_age: i64,
    /// Interval between expired-session sweeps in seconds
    pub session_purge_interval_seconds: u64,
    pub provider: ProviderConfig,
}

/// OAuth 2.0 identity provider configuration
///
/// Defaults point at Google's endpoints; any provider speaking the
/// authorization-code flow with a JSON userinfo endpoint works.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Provider label stored alongside users (e.g. "google")
    pub name: String,
    pub client_id: String,
    pub client_secret: String,
    pub authorize_url: String,
    pub token_url: String,
    pub userinfo_url: String,
    /// Space separated scopes
    pub scopes: String,
}

/// Change-notification bus configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeConfig {
    /// Events buffered per subscriber before it is reported as lagging
    pub channel_capacity: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl LoggingConfig {
    /// Filter used when `RUST_LOG` is unset
    pub fn default_filter(&self) -> String {
        format!(
            "markstash={},tower_http=debug",
            self.level.to_ascii_lowercase()
        )
    }

    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (MARKSTASH__*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("server.domain", "localhost:8080")?
            .set_default("server.protocol", "http")?
            .set_default("database.path", "data/markstash.db")?
            .set_default("auth.session_max_age", 604800)?
            .set_default("auth.session_purge_interval_seconds", 3600)?
            .set_default("auth.provider.name", "google")?
            .set_default(
                "auth.provider.authorize_url",
                "https://accounts.google.com/o/oauth2/v2/auth",
            )?
            .set_default("auth.provider.token_url", "https://oauth2.googleapis.com/token")?
            .set_default(
                "auth.provider.userinfo_url",
                "https://openidconnect.googleapis.com/v1/userinfo",
            )?
            .set_default("auth.provider.scopes", "openid email profile")?
            .set_default("realtime.channel_capacity", 256)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            // Load from config/default.toml if it exists
            .add_source(File::with_name("config/default").required(false))
            // Load from config/local.toml if it exists (overrides default)
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables (MARKSTASH__*)
            .add_source(
                Environment::with_prefix("MARKSTASH")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    /// Warn about settings that are only fine for local development
    ///
    /// Called once logging is up, since configuration loads first.
    pub fn log_warnings(&self) {
        if !self.should_use_secure_cookies() {
            tracing::warn!(
                host = %normalized_server_host(&self.server.domain),
                protocol = %self.server.protocol,
                "Using insecure session cookies for local development"
            );
        }
    }

    pub fn should_use_secure_cookies(&self) -> bool {
        self.server.protocol.eq_ignore_ascii_case("https")
            || !is_local_server_domain(&self.server.domain)
    }

    pub(crate) fn validate(&self) -> Result<(), crate::error::AppError> {
        const MIN_SESSION_SECRET_BYTES: usize = 32;

        if self.auth.session_secret.len() < MIN_SESSION_SECRET_BYTES {
            return Err(crate::error::AppError::Config(format!(
                "auth.session_secret must be at least {} bytes",
                MIN_SESSION_SECRET_BYTES
            )));
        }

        if self.auth.session_max_age <= 0 {
            return Err(crate::error::AppError::Config(
                "auth.session_max_age must be greater than 0".to_string(),
            ));
        }

        if self.realtime.channel_capacity == 0 {
            return Err(crate::error::AppError::Config(
                "realtime.channel_capacity must be greater than 0".to_string(),
            ));
        }

        if self.logging.level.parse::<tracing::Level>().is_err() {
            return Err(crate::error::AppError::Config(format!(
                "logging.level must be one of trace, debug, info, warn, error (got {})",
                self.logging.level
            )));
        }

        if !self.logging.is_json() && !self.logging.format.eq_ignore_ascii_case("pretty") {
            return Err(crate::error::AppError::Config(format!(
                "logging.format must be pretty or json (got {})",
                self.logging.format
            )));
        }

        for (key, value) in [
            ("auth.provider.authorize_url", &self.auth.provider.authorize_url),
            ("auth.provider.token_url", &self.auth.provider.token_url),
            ("auth.provider.userinfo_url", &self.auth.provider.userinfo_url),
        ] {
            if url::Url::parse(value).is_err() {
                return Err(crate::error::AppError::Config(format!(
                    "{key} must be an absolute URL"
                )));
            }
        }

        if self.should_use_secure_cookies() && !self.server.protocol.eq_ignore_ascii_case("https") {
            return Err(crate::error::AppError::Config(
                "server.protocol must be https for non-local server domains".to_string(),
            ));
        }

        Ok(())
    }
}

fn normalized_server_host(domain: &str) -> String {
    let trimmed = domain.trim();
    let parsed_host = url::Url::parse(&format!("http://{trimmed}"))
        .ok()
        .and_then(|url| url.host_str().map(|host| host.to_string()));
    let host = parsed_host.unwrap_or_else(|| trimmed.to_string());
    host.trim_end_matches('.').to_ascii_lowercase()
}

fn is_local_server_domain(domain: &str) -> bool {
    let host = normalized_server_host(domain);
    if host == "localhost" || host.ends_with(".localhost") {
        return true;
    }

    // Url normalizes IPv6 hosts to their bracketed form
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = bare.parse::<IpAddr>() {
        return ip.is_loopback() || ip.is_unspecified();
    }

    false
}
