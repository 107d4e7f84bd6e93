//! OAuth sign-in routes
//!
//! Implements the OAuth 2.0 authorization code flow against the configured
//! identity provider.

use axum::{
    Router,
    extract::{Query, State},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use serde::Deserialize;

use super::handle::SessionHandle;
use super::middleware::{MaybeUser, SESSION_COOKIE};
use crate::AppState;
use crate::client::{
    BOOKMARKS_PATH, CallbackOutcome, CallbackParams, LOGIN_PATH, alert_message, render_login,
    sign_out,
};

/// Cookie holding the CSRF state between sign-in and callback
const OAUTH_STATE_COOKIE: &str = "oauth_state";

/// Create authentication router
///
/// Routes:
/// - GET /auth/login - Login page
/// - POST /auth/login - Redirect to the identity provider
/// - GET /auth/callback - OAuth callback
/// - POST /auth/logout - Logout
pub fn auth_router() -> Router<AppState> {
    Router::new()
        .route("/auth/login", get(login_page).post(start_sign_in))
        .route("/auth/callback", get(callback))
        .route("/auth/logout", post(logout))
}

#[derive(Debug, Default, Deserialize)]
struct LoginQuery {
    error: Option<String>,
}

/// GET /auth/login
///
/// Signed-in visitors go straight to their bookmarks.
async fn login_page(
    State(state): State<AppState>,
    MaybeUser(session): MaybeUser,
    Query(query): Query<LoginQuery>,
) -> Response {
    if session.is_some() {
        return Redirect::to(BOOKMARKS_PATH).into_response();
    }

    let alert = query.error.as_deref().map(alert_message);
    Html(render_login(&state.config.auth.provider.name, alert)).into_response()
}

/// POST /auth/login
///
/// # Steps
/// 1. Generate CSRF state token
/// 2. Store state in cookie
/// 3. Redirect to the provider with client_id, redirect_uri, scope, state
async fn start_sign_in(State(state): State<AppState>, jar: CookieJar) -> Response {
    match state.login.sign_in() {
        Ok(redirect) => {
            let cookie = build_state_cookie(&redirect.state, state.config.should_use_secure_cookies());
            (jar.add(cookie), Redirect::to(&redirect.location)).into_response()
        }
        Err(_) => Redirect::to(&format!("{LOGIN_PATH}?error=signin_failed")).into_response(),
    }
}

/// GET /auth/callback
///
/// # Steps
/// 1. Verify CSRF state against the cookie
/// 2. Exchange code for the provider identity
/// 3. Upsert the user and create a session
/// 4. Set the session cookie and redirect to the bookmarks page
async fn callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
    jar: CookieJar,
) -> Response {
    let expected_state = jar.get(OAUTH_STATE_COOKIE).map(|cookie| cookie.value().to_owned());
    let outcome = state.login.complete(&params, expected_state.as_deref()).await;
    let location = outcome.location();

    let jar = jar.remove(clear_state_cookie());
    match outcome {
        CallbackOutcome::SignedIn { token, .. } => {
            let cookie = build_session_cookie(token, state.config.should_use_secure_cookies());
            (jar.add(cookie), Redirect::to(&location)).into_response()
        }
        _ => (jar, Redirect::to(&location)).into_response(),
    }
}

/// POST /auth/logout
///
/// Revokes the session, clears the cookie and redirects to login.
async fn logout(State(state): State<AppState>, jar: CookieJar) -> Response {
    let token = jar.get(SESSION_COOKIE).map(|cookie| cookie.value().to_owned());
    let sessions = SessionHandle::new(state.sessions.clone(), token);
    let location = sign_out(sessions.as_ref()).await;

    (jar.remove(clear_session_cookie()), Redirect::to(location)).into_response()
}

fn build_state_cookie(value: &str, secure: bool) -> Cookie<'static> {
    Cookie::build((OAUTH_STATE_COOKIE, value.to_string()))
        .path("/auth")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .build()
}

fn clear_state_cookie() -> Cookie<'static> {
    Cookie::build((OAUTH_STATE_COOKIE, "")).path("/auth").build()
}

fn build_session_cookie(token: String, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .build()
}

fn clear_session_cookie() -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, "")).path("/").build()
}
