//! Bookmark view: form handling, actions and HTML

use serde::Deserialize;
use std::sync::Arc;

use super::BackendClient;
use super::gate::LOGIN_PATH;
use super::store::{BookmarkStore, Snapshot};
use crate::auth::{SessionProvider, SessionUser};
use crate::data::{Bookmark, NewBookmark};
use crate::error::AppError;

/// Alert shown when the form is submitted incomplete
pub const FILL_ALL_FIELDS: &str = "Please fill in all fields";

/// Bookmark creation form
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BookmarkForm {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
}

impl BookmarkForm {
    /// Both fields must be non-empty after trimming
    pub fn validate(&self) -> Result<NewBookmark, AppError> {
        let title = self.title.trim();
        let url = self.url.trim();
        if title.is_empty() || url.is_empty() {
            return Err(AppError::Validation(FILL_ALL_FIELDS.to_string()));
        }
        Ok(NewBookmark {
            title: title.to_string(),
            url: url.to_string(),
        })
    }

    pub fn clear(&mut self) {
        self.title.clear();
        self.url.clear();
    }
}

/// Answer to the delete confirmation prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed,
    Declined,
}

impl From<bool> for Confirmation {
    fn from(confirmed: bool) -> Self {
        if confirmed {
            Confirmation::Confirmed
        } else {
            Confirmation::Declined
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Declined,
    Deleted(Bookmark),
}

/// Actions available on the bookmarks page for one signed-in user
pub struct BookmarkView {
    backend: BackendClient,
    sessions: Arc<dyn SessionProvider>,
    user: SessionUser,
    store: Option<Arc<BookmarkStore>>,
}

impl BookmarkView {
    pub fn new(backend: BackendClient, sessions: Arc<dyn SessionProvider>, user: SessionUser) -> Self {
        Self {
            backend,
            sessions,
            user,
            store: None,
        }
    }

    /// Refetch through `store` after deletes
    ///
    /// Only useful for a view that lives alongside a mounted store. The
    /// form handlers build a view per request and answer with a redirect, so
    /// the next page load is their refetch; open streams get the delete
    /// over the realtime channel.
    pub fn with_store(mut self, store: Arc<BookmarkStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn user(&self) -> &SessionUser {
        &self.user
    }

    /// Insert the form's bookmark for the current user
    ///
    /// The form is cleared only on success. The list itself is not touched
    /// here; the new row arrives through the realtime channel.
    pub async fn add(&self, form: &mut BookmarkForm) -> Result<Bookmark, AppError> {
        let input = form.validate()?;
        let bookmark = self.backend.bookmarks.create(&self.user.id, input).await?;
        form.clear();
        Ok(bookmark)
    }

    /// Delete one of the current user's bookmarks
    pub async fn delete(
        &self,
        id: &str,
        confirmation: Confirmation,
    ) -> Result<DeleteOutcome, AppError> {
        if confirmation == Confirmation::Declined {
            return Ok(DeleteOutcome::Declined);
        }

        let deleted = self.backend.bookmarks.delete(&self.user.id, id).await?;
        if let Some(store) = &self.store {
            store.refetch().await;
        }
        Ok(DeleteOutcome::Deleted(deleted))
    }

    /// Sign out and return where to navigate
    pub async fn logout(&self) -> &'static str {
        sign_out(self.sessions.as_ref()).await
    }
}

/// Sign out through `sessions`
///
/// Navigation to the login page happens even if revoking fails; the error
/// is logged.
pub async fn sign_out(sessions: &dyn SessionProvider) -> &'static str {
    if let Err(error) = sessions.sign_out().await {
        tracing::error!(%error, "Sign-out failed");
    }
    LOGIN_PATH
}

/// Render the bookmarks page
pub fn render_bookmarks(user: &SessionUser, snapshot: &Snapshot, alert: Option<&str>) -> String {
    let alert = alert
        .map(|message| format!(r#"<div class="alert" role="alert">{}</div>"#, html_escape::encode_text(message)))
        .unwrap_or_default();

    let list = if snapshot.loading {
        r#"<p class="loading">Loading...</p>"#.to_string()
    } else if snapshot.bookmarks.is_empty() {
        r#"<p class="empty">No bookmarks yet. Add one to get started!</p>"#.to_string()
    } else {
        snapshot
            .bookmarks
            .iter()
            .map(render_card)
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1" />
  <title>My Bookmarks</title>
</head>
<body>
  <header>
    <h1>Bookmark App</h1>
    <span class="email">{email}</span>
    <form method="post" action="/auth/logout"><button type="submit">Logout</button></form>
  </header>
  {alert}
  <h2>Add New Bookmark</h2>
  <form method="post" action="/bookmarks" class="add">
    <label>Title <input type="text" name="title" placeholder="e.g., GitHub" autocomplete="off" /></label>
    <label>URL <input type="url" name="url" placeholder="https://example.com" autocomplete="off" /></label>
    <button type="submit">Add Bookmark</button>
  </form>
  <h2>My Bookmarks (<span id="count">{count}</span>)</h2>
  <div id="bookmarks">
{list}
  </div>
  <script>
    function confirmDelete(form) {{
      if (!confirm("Are you sure you want to delete this bookmark?")) return false;
      form.confirmed.value = "true";
      return true;
    }}
    function linkable(url) {{
      try {{
        const protocol = new URL(url).protocol;
        return protocol === "http:" || protocol === "https:" ? url : null;
      }} catch (_) {{
        return null;
      }}
    }}
    function renderCard(bookmark) {{
      const card = document.createElement("div");
      card.className = "card";
      const title = document.createElement("h3");
      title.textContent = bookmark.title;
      const href = linkable(bookmark.url);
      const link = document.createElement(href ? "a" : "span");
      if (href) {{
        link.href = href;
        link.target = "_blank";
        link.rel = "noopener noreferrer";
      }}
      link.textContent = bookmark.url;
      const time = document.createElement("time");
      time.dateTime = bookmark.created_at;
      time.textContent = bookmark.created_at.slice(0, 10);
      const form = document.createElement("form");
      form.method = "post";
      form.action = "/bookmarks/" + encodeURIComponent(bookmark.id) + "/delete";
      form.onsubmit = () => confirmDelete(form);
      form.innerHTML = '<input type="hidden" name="confirmed" value="false" /><button type="submit">Delete</button>';
      card.append(title, link, time, form);
      return card;
    }}
    const stream = new EventSource("/bookmarks/stream");
    stream.addEventListener("snapshot", (event) => {{
      const snapshot = JSON.parse(event.data);
      if (snapshot.loading) return;
      const list = document.getElementById("bookmarks");
      document.getElementById("count").textContent = snapshot.bookmarks.length;
      list.replaceChildren(...snapshot.bookmarks.map(renderCard));
      if (snapshot.bookmarks.length === 0) {{
        const empty = document.createElement("p");
        empty.className = "empty";
        empty.textContent = "No bookmarks yet. Add one to get started!";
        list.append(empty);
      }}
    }});
    stream.addEventListener("signed_out", () => {{ window.location.href = "{login}"; }});
  </script>
</body>
</html>"#,
        email = html_escape::encode_text(&user.email),
        alert = alert,
        count = snapshot.bookmarks.len(),
        list = list,
        login = LOGIN_PATH,
    )
}

/// Whether `url` may become a live link; other schemes render as text
fn is_linkable(url: &str) -> bool {
    url::Url::parse(url).is_ok_and(|parsed| matches!(parsed.scheme(), "http" | "https"))
}

fn render_card(bookmark: &Bookmark) -> String {
    let url = html_escape::encode_text(&bookmark.url);
    let link = if is_linkable(&bookmark.url) {
        format!(
            r#"<a href="{href}" target="_blank" rel="noopener noreferrer">{url}</a>"#,
            href = html_escape::encode_double_quoted_attribute(&bookmark.url),
        )
    } else {
        format!(r#"<span class="url">{url}</span>"#)
    };

    format!(
        r#"    <div class="card">
      <h3>{title}</h3>
      {link}
      <time datetime="{datetime}">{date}</time>
      <form method="post" action="/bookmarks/{id}/delete" onsubmit="return confirmDelete(this)">
        <input type="hidden" name="confirmed" value="false" />
        <button type="submit">Delete</button>
      </form>
    </div>"#,
        title = html_escape::encode_text(&bookmark.title),
        datetime = bookmark.created_at.to_rfc3339(),
        date = bookmark.created_at.format("%Y-%m-%d"),
        id = urlencoding::encode(&bookmark.id),
    )
}

/// Render the login page
pub fn render_login(provider: &str, alert: Option<&str>) -> String {
    let alert = alert
        .map(|message| format!(r#"<div class="alert" role="alert">{}</div>"#, html_escape::encode_text(message)))
        .unwrap_or_default();

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1" />
  <title>Sign in - Bookmark App</title>
</head>
<body>
  <h1>Bookmark App</h1>
  {alert}
  <form method="post" action="{login}">
    <button type="submit">Sign in with {provider}</button>
  </form>
</body>
</html>"#,
        alert = alert,
        login = LOGIN_PATH,
        provider = html_escape::encode_text(&provider_label(provider)),
    )
}

/// "google" -> "Google"
fn provider_label(provider: &str) -> String {
    let mut chars = provider.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// User-facing text for an `?error=` code
pub fn alert_message(code: &str) -> &'static str {
    match code {
        "signin_failed" => "Failed to sign in",
        "auth_failed" => "Authentication failed. Please try again.",
        "server_error" => "Something went wrong. Please try again later.",
        "fill_fields" => FILL_ALL_FIELDS,
        "add_failed" => "Failed to add bookmark",
        "delete_failed" => "Failed to delete bookmark",
        _ => "Something went wrong",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{SessionHandle, SessionStore};
    use crate::client::Phase;
    use crate::data::{Database, User};
    use crate::realtime::ChangeBus;
    use crate::service::BookmarkService;
    use chrono::Utc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn form(title: &str, url: &str) -> BookmarkForm {
        BookmarkForm {
            title: title.to_string(),
            url: url.to_string(),
        }
    }

    #[test]
    fn form_requires_both_fields() {
        for (title, url) in [("", "https://github.com"), ("GitHub", "  "), ("", "")] {
            let error = form(title, url).validate().unwrap_err();
            assert!(matches!(error, AppError::Validation(message) if message == FILL_ALL_FIELDS));
        }
    }

    #[test]
    fn form_trims_input() {
        let input = form("  GitHub ", " https://github.com ").validate().unwrap();
        assert_eq!(input.title, "GitHub");
        assert_eq!(input.url, "https://github.com");
    }

    #[test]
    fn rendering_escapes_user_text() {
        let user = SessionUser {
            id: "u1".to_string(),
            email: "<b>me</b>@example.com".to_string(),
        };
        let snapshot = Snapshot {
            phase: Phase::Ready,
            loading: false,
            user_id: Some("u1".to_string()),
            bookmarks: vec![Bookmark {
                id: "b1".to_string(),
                title: "<script>alert(1)</script>".to_string(),
                url: "https://example.com/?a=\"x\"".to_string(),
                user_id: "u1".to_string(),
                created_at: Utc::now(),
            }],
        };

        let html = render_bookmarks(&user, &snapshot, Some("<oops>"));
        assert!(!html.contains("<script>alert(1)"));
        assert!(html.contains("&lt;script&gt;"));
        assert!(html.contains("&lt;b&gt;me&lt;/b&gt;"));
        assert!(html.contains("&lt;oops&gt;"));
        assert!(html.contains(r#"href="https://example.com/?a=&quot;x&quot;""#));
        assert!(html.contains(r#"<span id="count">1</span>"#));
    }

    #[test]
    fn only_web_urls_become_links() {
        let user = SessionUser {
            id: "u1".to_string(),
            email: "me@example.com".to_string(),
        };
        let bookmark = |id: &str, url: &str| Bookmark {
            id: id.to_string(),
            title: id.to_string(),
            url: url.to_string(),
            user_id: "u1".to_string(),
            created_at: Utc::now(),
        };
        let snapshot = Snapshot {
            phase: Phase::Ready,
            loading: false,
            user_id: Some("u1".to_string()),
            bookmarks: vec![
                bookmark("script", "javascript:alert(document.cookie)"),
                bookmark("upper", " JavaScript:alert(1)"),
                bookmark("web", "HTTPS://example.com/page"),
            ],
        };

        let html = render_bookmarks(&user, &snapshot, None);
        assert!(!html.contains(r#"href="javascript"#));
        assert!(!html.contains(r#"href=" JavaScript"#));
        assert!(html.contains(r#"<span class="url">javascript:alert(document.cookie)</span>"#));
        assert!(html.contains(r#"href="HTTPS://example.com/page""#));
        assert!(is_linkable("http://example.com"));
        assert!(!is_linkable("data:text/html,hi"));
        assert!(!is_linkable("not a url"));
    }

    #[test]
    fn login_page_names_provider() {
        let html = render_login("google", Some(alert_message("auth_failed")));
        assert!(html.contains("Sign in with Google"));
        assert!(html.contains("Authentication failed"));
    }

    #[test]
    fn empty_list_shows_empty_state() {
        let user = SessionUser {
            id: "u1".to_string(),
            email: "me@example.com".to_string(),
        };
        let snapshot = Snapshot {
            phase: Phase::Ready,
            loading: false,
            user_id: Some("u1".to_string()),
            bookmarks: Vec::new(),
        };
        assert!(render_bookmarks(&user, &snapshot, None).contains("No bookmarks yet"));
    }

    struct Fixture {
        backend: BackendClient,
        sessions: Arc<SessionStore>,
        user: User,
        _dir: TempDir,
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let db = Arc::new(Database::connect(&dir.path().join("test.db")).await.unwrap());
        let backend = BackendClient::new(Arc::new(BookmarkService::new(
            db.clone(),
            Arc::new(ChangeBus::new(64)),
        )));
        let sessions = Arc::new(SessionStore::new(
            db.clone(),
            "test-secret-key-32-bytes-long!!!",
            3600,
        ));
        let user = db.upsert_user("google", "a", "a@example.com").await.unwrap();
        Fixture {
            backend,
            sessions,
            user,
            _dir: dir,
        }
    }

    fn session_user(user: &User) -> SessionUser {
        SessionUser {
            id: user.id.clone(),
            email: user.email.clone(),
        }
    }

    #[tokio::test]
    async fn github_scenario_round_trip() {
        let fixture = fixture().await;
        let (_session, token) = fixture.sessions.create(&fixture.user).await.unwrap();
        let handle = SessionHandle::new(fixture.sessions.clone(), Some(token));
        let store = Arc::new(BookmarkStore::new(fixture.backend.clone(), handle.clone()));
        store.init().await;
        let before = store.bookmarks();

        let view = BookmarkView::new(fixture.backend.clone(), handle, session_user(&fixture.user))
            .with_store(store.clone());

        let mut github = form("GitHub", "https://github.com");
        let created = view.add(&mut github).await.unwrap();
        assert_eq!(github, BookmarkForm::default());

        let mut snapshots = store.watch();
        let snapshot = tokio::time::timeout(
            Duration::from_secs(2),
            snapshots.wait_for(|s| s.bookmarks.first().map(|b| &b.id) == Some(&created.id)),
        )
        .await
        .unwrap()
        .unwrap()
        .clone();
        assert_eq!(snapshot.bookmarks[0].title, "GitHub");

        let outcome = view.delete(&created.id, Confirmation::Confirmed).await.unwrap();
        assert_eq!(outcome, DeleteOutcome::Deleted(created));
        assert_eq!(store.bookmarks(), before);
    }

    #[tokio::test]
    async fn declined_delete_is_a_no_op() {
        let fixture = fixture().await;
        let handle = SessionHandle::new(fixture.sessions.clone(), None);
        let view = BookmarkView::new(fixture.backend.clone(), handle, session_user(&fixture.user));
        let mut input = form("GitHub", "https://github.com");
        let created = view.add(&mut input).await.unwrap();

        let outcome = view.delete(&created.id, Confirmation::from(false)).await.unwrap();
        assert_eq!(outcome, DeleteOutcome::Declined);
        assert_eq!(fixture.backend.bookmarks.list(&fixture.user.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn invalid_form_is_kept() {
        let fixture = fixture().await;
        let handle = SessionHandle::new(fixture.sessions.clone(), None);
        let view = BookmarkView::new(fixture.backend.clone(), handle, session_user(&fixture.user));

        let mut input = form("GitHub", "");
        assert!(view.add(&mut input).await.is_err());
        assert_eq!(input.title, "GitHub");
    }

    #[tokio::test]
    async fn logout_revokes_and_goes_to_login() {
        let fixture = fixture().await;
        let (_session, token) = fixture.sessions.create(&fixture.user).await.unwrap();
        let handle = SessionHandle::new(fixture.sessions.clone(), Some(token.clone()));
        let view = BookmarkView::new(fixture.backend.clone(), handle, session_user(&fixture.user));

        assert_eq!(view.logout().await, LOGIN_PATH);
        assert!(fixture.sessions.resolve(&token).await.unwrap().is_none());
    }
}
