//! Authentication extractors
//!
//! Resolve the session token carried by a request.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{HeaderMap, request::Parts},
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::CookieJar;
use std::sync::Arc;

use super::handle::{SessionHandle, SessionProvider};
use super::session::{Session, SessionUser};
use crate::AppState;
use crate::client::{GateOutcome, SessionGate};
use crate::error::AppError;

/// Name of the session cookie
pub const SESSION_COOKIE: &str = "session";

/// Session token from the `session` cookie or an `Authorization: Bearer` header
pub fn extract_token_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(ToOwned::to_owned)
        .or_else(|| {
            let jar = CookieJar::from_headers(headers);
            jar.get(SESSION_COOKIE).map(|cookie| cookie.value().to_owned())
        })
}

fn session_handle(parts: &Parts, state: &AppState) -> Arc<SessionHandle> {
    SessionHandle::new(state.sessions.clone(), extract_token_from_headers(&parts.headers))
}

/// Optional session
///
/// Resolves to `None` for missing, invalid or revoked tokens and never
/// rejects. Storage failures are logged and treated as signed out.
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<Session>);

#[async_trait]
impl<S> FromRequestParts<S> for MaybeUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Some(token) = extract_token_from_headers(&parts.headers) else {
            return Ok(MaybeUser(None));
        };

        let state = AppState::from_ref(state);
        match state.sessions.resolve(&token).await {
            Ok(session) => Ok(MaybeUser(session)),
            Err(error) => {
                tracing::error!(%error, "Session lookup failed");
                Ok(MaybeUser(None))
            }
        }
    }
}

/// Session gate for page handlers
///
/// Redirects to the login page when there is no live session. The handle
/// stays with the request so components built from it follow later
/// sign-outs.
pub struct SignedIn {
    pub user: SessionUser,
    pub sessions: Arc<SessionHandle>,
}

#[async_trait]
impl<S> FromRequestParts<S> for SignedIn
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);
        let sessions = session_handle(parts, &app_state);
        let gate = SessionGate::new(sessions.clone() as Arc<dyn SessionProvider>);

        match gate.mount().await {
            GateOutcome::Allowed(user) => Ok(SignedIn { user, sessions }),
            GateOutcome::Redirect(location) => Err(Redirect::to(location).into_response()),
            GateOutcome::Pending => Err(AppError::Unauthorized.into_response()),
        }
    }
}
