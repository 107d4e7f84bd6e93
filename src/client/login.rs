//! Login flow: provider redirect and authorization-code exchange

use base64::Engine as _;
use rand::RngCore;
use serde::Deserialize;
use std::sync::Arc;

use super::gate::LOGIN_PATH;
use crate::auth::{IdentityProvider, Session, SessionStore};
use crate::data::Database;
use crate::error::AppError;
use crate::metrics::SIGN_INS_TOTAL;

/// Landing page after a successful sign-in
pub const BOOKMARKS_PATH: &str = "/bookmarks";

/// Query parameters the provider sends back to `/auth/callback`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    /// Set by the provider when the user denied access
    pub error: Option<String>,
}

/// Why a callback did not produce a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackFailure {
    /// The provider rejected the code, or the CSRF state did not match
    AuthFailed,
    /// Anything unexpected on our side
    ServerError,
}

impl CallbackFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallbackFailure::AuthFailed => "auth_failed",
            CallbackFailure::ServerError => "server_error",
        }
    }

    fn classify(error: &AppError) -> Self {
        match error {
            AppError::AuthExchange(_) | AppError::Unauthorized | AppError::InvalidSignature => {
                CallbackFailure::AuthFailed
            }
            _ => CallbackFailure::ServerError,
        }
    }
}

/// Result of handling the provider callback
#[derive(Debug)]
pub enum CallbackOutcome {
    SignedIn { session: Session, token: String },
    MissingCode,
    Failed(CallbackFailure),
}

impl CallbackOutcome {
    /// Redirect target for this outcome
    pub fn location(&self) -> String {
        match self {
            CallbackOutcome::SignedIn { .. } => BOOKMARKS_PATH.to_string(),
            CallbackOutcome::MissingCode => LOGIN_PATH.to_string(),
            CallbackOutcome::Failed(failure) => format!("{LOGIN_PATH}?error={}", failure.as_str()),
        }
    }
}

/// Where to send the browser to start authentication
#[derive(Debug, Clone)]
pub struct SignInRedirect {
    pub location: String,
    /// CSRF state the callback must echo back
    pub state: String,
}

/// Drives sign-in against the identity provider
pub struct LoginFlow {
    identity: Arc<dyn IdentityProvider>,
    db: Arc<Database>,
    sessions: Arc<SessionStore>,
    provider_name: String,
    callback_url: String,
}

impl LoginFlow {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        db: Arc<Database>,
        sessions: Arc<SessionStore>,
        provider_name: impl Into<String>,
        callback_url: impl Into<String>,
    ) -> Self {
        Self {
            identity,
            db,
            sessions,
            provider_name: provider_name.into(),
            callback_url: callback_url.into(),
        }
    }

    /// Start provider-redirect authentication
    ///
    /// The callback target is always this application's own callback URL.
    pub fn sign_in(&self) -> Result<SignInRedirect, AppError> {
        let state = generate_csrf_state();
        let location = self
            .identity
            .authorize_url(&self.callback_url, &state)
            .inspect_err(|error| {
                tracing::error!(%error, "Failed to start sign-in");
                SIGN_INS_TOTAL.with_label_values(&["start_failed"]).inc();
            })?;

        Ok(SignInRedirect { location, state })
    }

    /// Handle the provider callback
    ///
    /// # Arguments
    /// * `params` - Query string of the callback request
    /// * `expected_state` - CSRF state stored when sign-in started
    pub async fn complete(
        &self,
        params: &CallbackParams,
        expected_state: Option<&str>,
    ) -> CallbackOutcome {
        let Some(code) = params.code.as_deref().filter(|code| !code.is_empty()) else {
            if let Some(error) = &params.error {
                tracing::warn!(%error, "Provider returned without an authorization code");
            }
            return CallbackOutcome::MissingCode;
        };

        if !verify_csrf_state(params.state.as_deref(), expected_state) {
            tracing::warn!("OAuth state mismatch on callback");
            SIGN_INS_TOTAL.with_label_values(&["auth_failed"]).inc();
            return CallbackOutcome::Failed(CallbackFailure::AuthFailed);
        }

        match self.exchange(code).await {
            Ok((session, token)) => {
                SIGN_INS_TOTAL.with_label_values(&["success"]).inc();
                tracing::info!(user_id = %session.user.id, "User signed in");
                CallbackOutcome::SignedIn { session, token }
            }
            Err(error) => {
                let failure = CallbackFailure::classify(&error);
                SIGN_INS_TOTAL.with_label_values(&[failure.as_str()]).inc();
                tracing::error!(%error, failure = failure.as_str(), "Authorization code exchange failed");
                CallbackOutcome::Failed(failure)
            }
        }
    }

    async fn exchange(&self, code: &str) -> Result<(Session, String), AppError> {
        let identity = self
            .identity
            .exchange_code(code, &self.callback_url)
            .await?;
        let user = self
            .db
            .upsert_user(&self.provider_name, &identity.subject, &identity.email)
            .await?;
        self.sessions.create(&user).await
    }
}

/// Generate a random CSRF state token
fn generate_csrf_state() -> String {
    let mut bytes = [0_u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Verify CSRF state from cookie matches callback state
fn verify_csrf_state(received: Option<&str>, expected: Option<&str>) -> bool {
    match (received, expected) {
        (Some(received), Some(expected)) => !expected.is_empty() && received == expected,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{MockIdentityProvider, ProviderIdentity};
    use tempfile::TempDir;

    const CALLBACK: &str = "http://localhost/auth/callback";

    async fn flow(identity: MockIdentityProvider) -> (LoginFlow, Arc<SessionStore>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db = Arc::new(Database::connect(&temp_dir.path().join("test.db")).await.unwrap());
        let sessions = Arc::new(SessionStore::new(
            db.clone(),
            "test-secret-key-32-bytes-long!!!",
            3600,
        ));
        let flow = LoginFlow::new(Arc::new(identity), db, sessions.clone(), "google", CALLBACK);
        (flow, sessions, temp_dir)
    }

    fn params(code: Option<&str>, state: Option<&str>) -> CallbackParams {
        CallbackParams {
            code: code.map(str::to_string),
            state: state.map(str::to_string),
            error: None,
        }
    }

    #[tokio::test]
    async fn sign_in_targets_own_callback() {
        let mut identity = MockIdentityProvider::new();
        identity
            .expect_authorize_url()
            .withf(|redirect_uri, _state| redirect_uri == CALLBACK)
            .returning(|_, state| Ok(format!("https://idp.example.com/auth?state={state}")));
        let (flow, _sessions, _dir) = flow(identity).await;

        let redirect = flow.sign_in().unwrap();
        assert!(redirect.location.ends_with(&redirect.state));
        assert!(redirect.state.len() >= 43);
    }

    #[tokio::test]
    async fn sign_in_failure_is_surfaced() {
        let mut identity = MockIdentityProvider::new();
        identity
            .expect_authorize_url()
            .returning(|_, _| Err(AppError::Config("bad authorize url".to_string())));
        let (flow, _sessions, _dir) = flow(identity).await;

        assert!(flow.sign_in().is_err());
    }

    #[tokio::test]
    async fn valid_code_creates_session() {
        let mut identity = MockIdentityProvider::new();
        identity
            .expect_exchange_code()
            .withf(|code, redirect_uri| code == "good-code" && redirect_uri == CALLBACK)
            .returning(|_, _| {
                Ok(ProviderIdentity {
                    subject: "sub-1".to_string(),
                    email: "user@example.com".to_string(),
                })
            });
        let (flow, sessions, _dir) = flow(identity).await;

        let outcome = flow
            .complete(&params(Some("good-code"), Some("xyz")), Some("xyz"))
            .await;

        assert_eq!(outcome.location(), BOOKMARKS_PATH);
        let CallbackOutcome::SignedIn { session, token } = outcome else {
            panic!("expected sign-in");
        };
        assert_eq!(session.user.email, "user@example.com");
        assert_eq!(sessions.resolve(&token).await.unwrap(), Some(session));
    }

    #[tokio::test]
    async fn rejected_code_is_auth_failed() {
        let mut identity = MockIdentityProvider::new();
        identity
            .expect_exchange_code()
            .returning(|_, _| Err(AppError::AuthExchange("invalid_grant".to_string())));
        let (flow, _sessions, _dir) = flow(identity).await;

        let outcome = flow
            .complete(&params(Some("expired"), Some("xyz")), Some("xyz"))
            .await;
        assert_eq!(outcome.location(), "/auth/login?error=auth_failed");
    }

    #[tokio::test]
    async fn unexpected_failure_is_server_error() {
        let mut identity = MockIdentityProvider::new();
        identity
            .expect_exchange_code()
            .returning(|_, _| Err(AppError::Internal(anyhow::anyhow!("boom"))));
        let (flow, _sessions, _dir) = flow(identity).await;

        let outcome = flow
            .complete(&params(Some("code"), Some("xyz")), Some("xyz"))
            .await;
        assert_eq!(outcome.location(), "/auth/login?error=server_error");
    }

    #[tokio::test]
    async fn missing_code_goes_to_plain_login() {
        let (flow, _sessions, _dir) = flow(MockIdentityProvider::new()).await;

        let outcome = flow.complete(&params(None, Some("xyz")), Some("xyz")).await;
        assert!(matches!(outcome, CallbackOutcome::MissingCode));
        assert_eq!(outcome.location(), LOGIN_PATH);
    }

    #[tokio::test]
    async fn state_mismatch_never_reaches_provider() {
        // No expectations: any provider call would panic
        let (flow, _sessions, _dir) = flow(MockIdentityProvider::new()).await;

        for (received, expected) in [(Some("a"), Some("b")), (None, Some("b")), (Some("a"), None)] {
            let outcome = flow.complete(&params(Some("code"), received), expected).await;
            assert_eq!(outcome.location(), "/auth/login?error=auth_failed");
        }
    }
}
