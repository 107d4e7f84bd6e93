//! Bookmark pages and live stream

use axum::{
    Form, Router,
    extract::{Path, Query, State},
    response::sse::{Event, KeepAlive, Sse},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use futures::stream::{self, Stream};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::watch;

use crate::AppState;
use crate::auth::{SessionProvider, SignedIn};
use crate::client::{
    BOOKMARKS_PATH, BookmarkForm, BookmarkStore, BookmarkView, Confirmation, DeleteOutcome,
    LOGIN_PATH, Phase, Snapshot, alert_message, render_bookmarks,
};
use crate::error::AppError;

/// Create bookmarks router
///
/// Routes:
/// - GET /bookmarks - Bookmark list page
/// - POST /bookmarks - Add a bookmark
/// - POST /bookmarks/:id/delete - Delete a bookmark
/// - GET /bookmarks/stream - Live list snapshots (SSE)
pub fn bookmarks_router() -> Router<AppState> {
    Router::new()
        .route("/bookmarks", get(bookmarks_page).post(add_bookmark))
        .route("/bookmarks/:id/delete", post(delete_bookmark))
        .route("/bookmarks/stream", get(stream_bookmarks))
}

#[derive(Debug, Default, Deserialize)]
struct PageQuery {
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DeleteForm {
    #[serde(default)]
    confirmed: Option<String>,
}

fn page_error(code: &str) -> Response {
    Redirect::to(&format!("{BOOKMARKS_PATH}?error={code}")).into_response()
}

/// GET /bookmarks
async fn bookmarks_page(
    State(state): State<AppState>,
    SignedIn { user, sessions }: SignedIn,
    Query(query): Query<PageQuery>,
) -> Response {
    let store = BookmarkStore::new(state.backend(), sessions as Arc<dyn SessionProvider>);
    let phase = store.init().await;
    let snapshot = store.snapshot();
    store.shutdown();

    if phase == Phase::Idle {
        return Redirect::to(LOGIN_PATH).into_response();
    }

    let alert = query.error.as_deref().map(alert_message);
    Html(render_bookmarks(&user, &snapshot, alert)).into_response()
}

/// POST /bookmarks
async fn add_bookmark(
    State(state): State<AppState>,
    SignedIn { user, sessions }: SignedIn,
    Form(mut form): Form<BookmarkForm>,
) -> Response {
    let view = BookmarkView::new(state.backend(), sessions, user);
    match view.add(&mut form).await {
        Ok(_) => Redirect::to(BOOKMARKS_PATH).into_response(),
        Err(AppError::Validation(_)) => page_error("fill_fields"),
        Err(error) => {
            tracing::error!(%error, user_id = %view.user().id, "Error adding bookmark");
            page_error("add_failed")
        }
    }
}

/// POST /bookmarks/:id/delete
///
/// Only acts when the form carries `confirmed=true`. No store is attached:
/// the redirect reloads the list, and live streams see the delete event.
async fn delete_bookmark(
    State(state): State<AppState>,
    SignedIn { user, sessions }: SignedIn,
    Path(id): Path<String>,
    Form(form): Form<DeleteForm>,
) -> Response {
    let confirmation = Confirmation::from(form.confirmed.as_deref() == Some("true"));
    let view = BookmarkView::new(state.backend(), sessions, user);

    match view.delete(&id, confirmation).await {
        Ok(DeleteOutcome::Deleted(_) | DeleteOutcome::Declined) => {
            Redirect::to(BOOKMARKS_PATH).into_response()
        }
        Err(error) => {
            tracing::error!(%error, bookmark_id = %id, "Error deleting bookmark");
            page_error("delete_failed")
        }
    }
}

/// GET /bookmarks/stream
///
/// Sends a `snapshot` event with the whole list on connect and after every
/// change, and a final `signed_out` event when the session ends. The stream
/// also ends when the server begins shutting down.
async fn stream_bookmarks(
    State(state): State<AppState>,
    SignedIn { sessions, .. }: SignedIn,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let store = Arc::new(BookmarkStore::new(
        state.backend(),
        sessions as Arc<dyn SessionProvider>,
    ));
    store.init().await;

    let feed = LiveFeed {
        snapshots: store.watch(),
        shutdown: state.shutdown_signal(),
        store,
        sent_first: false,
        finished: false,
    };

    Sse::new(stream::unfold(feed, next_event)).keep_alive(KeepAlive::default())
}

/// Per-connection stream state; owns the store for the connection's lifetime
struct LiveFeed {
    store: Arc<BookmarkStore>,
    snapshots: watch::Receiver<Snapshot>,
    shutdown: watch::Receiver<bool>,
    sent_first: bool,
    finished: bool,
}

async fn next_event(mut feed: LiveFeed) -> Option<(Result<Event, Infallible>, LiveFeed)> {
    if feed.finished || *feed.shutdown.borrow() {
        feed.store.shutdown();
        return None;
    }
    if feed.sent_first {
        tokio::select! {
            changed = feed.snapshots.changed() => {
                if changed.is_err() {
                    return None;
                }
            }
            () = shutting_down(&mut feed.shutdown) => {
                tracing::debug!("Closing bookmark stream for shutdown");
                feed.store.shutdown();
                return None;
            }
        }
    }
    feed.sent_first = true;

    let snapshot = feed.snapshots.borrow_and_update().clone();
    let event = if snapshot.phase == Phase::Idle {
        feed.finished = true;
        feed.store.shutdown();
        Event::default().event("signed_out").data(LOGIN_PATH)
    } else {
        snapshot_event(&snapshot)
    };

    Some((Ok(event), feed))
}

/// Resolves once shutdown begins
async fn shutting_down(shutdown: &mut watch::Receiver<bool>) {
    // A dropped sender means the state is gone too
    let _ = shutdown.wait_for(|stopping| *stopping).await;
}

fn snapshot_event(snapshot: &Snapshot) -> Event {
    match Event::default().event("snapshot").json_data(snapshot) {
        Ok(event) => event,
        Err(error) => {
            tracing::error!(%error, "Failed to encode bookmark snapshot");
            Event::default().comment("snapshot unavailable")
        }
    }
}

