//! E2E tests for sign-in, the session gate and sign-out

mod common;

use common::{TestServer, cookie_value, location};

#[tokio::test]
async fn test_bookmarks_without_session_redirects_to_login() {
    let server = TestServer::new().await;

    let response = server
        .client
        .get(server.url("/bookmarks"))
        .send()
        .await
        .unwrap();

    assert_eq!(location(&response), "/auth/login");
}

#[tokio::test]
async fn test_bookmarks_with_garbage_token_redirects_to_login() {
    let server = TestServer::new().await;

    let response = server
        .client
        .get(server.url("/bookmarks"))
        .header("Cookie", "session=not-a-real-token")
        .send()
        .await
        .unwrap();

    assert_eq!(location(&response), "/auth/login");
}

#[tokio::test]
async fn test_login_page_renders_provider_button() {
    let server = TestServer::new().await;

    let response = server
        .client
        .get(server.url("/auth/login"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body = response.text().await.unwrap();
    assert!(body.contains("Sign in with Google"));
}

#[tokio::test]
async fn test_start_sign_in_redirects_to_provider_with_state() {
    let server = TestServer::new().await;

    let response = server
        .client
        .post(server.url("/auth/login"))
        .send()
        .await
        .unwrap();

    let target = location(&response);
    let state = cookie_value(&response, "oauth_state").expect("state cookie");
    assert!(target.starts_with("https://idp.test/authorize"));
    assert!(target.contains(&format!("state={state}")));
    assert!(target.contains(&urlencoding::encode("http://localhost/auth/callback").into_owned()));
}

#[tokio::test]
async fn test_valid_callback_signs_in() {
    let server = TestServer::new().await;
    let cookie = server.sign_in("alice").await;

    let response = server
        .client
        .get(server.url("/bookmarks"))
        .header("Cookie", &cookie)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body = response.text().await.unwrap();
    assert!(body.contains("alice@example.com"));
    assert!(body.contains("No bookmarks yet. Add one to get started!"));
}

#[tokio::test]
async fn test_bearer_token_is_accepted() {
    let server = TestServer::new().await;
    let cookie = server.sign_in("alice").await;
    let token = cookie.trim_start_matches("session=");

    let response = server
        .client
        .get(server.url("/bookmarks"))
        .bearer_auth(token)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn test_rejected_code_reports_auth_failed() {
    let server = TestServer::new().await;
    let start = server
        .client
        .post(server.url("/auth/login"))
        .send()
        .await
        .unwrap();
    let state = cookie_value(&start, "oauth_state").unwrap();

    let response = server
        .client
        .get(server.url(&format!("/auth/callback?code=expired&state={state}")))
        .header("Cookie", format!("oauth_state={state}"))
        .send()
        .await
        .unwrap();

    assert_eq!(location(&response), "/auth/login?error=auth_failed");
    assert!(cookie_value(&response, "session").is_none());
}

#[tokio::test]
async fn test_state_mismatch_reports_auth_failed() {
    let server = TestServer::new().await;

    let response = server
        .client
        .get(server.url("/auth/callback?code=valid-alice&state=forged"))
        .header("Cookie", "oauth_state=expected")
        .send()
        .await
        .unwrap();

    assert_eq!(location(&response), "/auth/login?error=auth_failed");
    assert!(cookie_value(&response, "session").is_none());
}

#[tokio::test]
async fn test_callback_without_code_returns_to_login() {
    let server = TestServer::new().await;

    let response = server
        .client
        .get(server.url("/auth/callback?error=access_denied"))
        .send()
        .await
        .unwrap();

    assert_eq!(location(&response), "/auth/login");
}

#[tokio::test]
async fn test_login_page_redirects_when_signed_in() {
    let server = TestServer::new().await;
    let cookie = server.sign_in("alice").await;

    let response = server
        .client
        .get(server.url("/auth/login"))
        .header("Cookie", &cookie)
        .send()
        .await
        .unwrap();

    assert_eq!(location(&response), "/bookmarks");
}

#[tokio::test]
async fn test_logout_revokes_session() {
    let server = TestServer::new().await;
    let cookie = server.sign_in("alice").await;

    let response = server
        .client
        .post(server.url("/auth/logout"))
        .header("Cookie", &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(location(&response), "/auth/login");

    // The old token no longer opens the gate
    let response = server
        .client
        .get(server.url("/bookmarks"))
        .header("Cookie", &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(location(&response), "/auth/login");
}

#[tokio::test]
async fn test_logout_without_session_still_navigates_to_login() {
    let server = TestServer::new().await;

    let response = server
        .client
        .post(server.url("/auth/logout"))
        .send()
        .await
        .unwrap();

    assert_eq!(location(&response), "/auth/login");
}
