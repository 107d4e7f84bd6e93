//! Client-side components
//!
//! Each page and live stream builds these per request or per connection:
//! - Session gate and login flow
//! - Bookmark store with its realtime subscriber
//! - Bookmark view (forms, actions, HTML)
//!
//! Every component receives its session provider explicitly.

mod gate;
mod login;
mod reconcile;
mod store;
mod subscriber;
mod view;

pub use gate::{GateOutcome, GateState, LOGIN_PATH, SessionGate};
pub use login::{
    BOOKMARKS_PATH, CallbackFailure, CallbackOutcome, CallbackParams, LoginFlow, SignInRedirect,
};
pub use reconcile::{ApplyError, apply_change, validate_change};
pub use store::{BookmarkStore, Phase, Snapshot};
pub use subscriber::{ChangeSink, RealtimeSubscriber};
pub use view::{
    BookmarkForm, BookmarkView, Confirmation, DeleteOutcome, FILL_ALL_FIELDS, alert_message,
    render_bookmarks, render_login, sign_out,
};

use std::sync::Arc;

use crate::realtime::ChangeBus;
use crate::service::BookmarkService;

/// Backend handle shared by client components
#[derive(Clone)]
pub struct BackendClient {
    pub bookmarks: Arc<BookmarkService>,
}

impl BackendClient {
    pub fn new(bookmarks: Arc<BookmarkService>) -> Self {
        Self { bookmarks }
    }

    /// Change bus the backend publishes to
    pub fn bus(&self) -> &Arc<ChangeBus> {
        self.bookmarks.bus()
    }
}
