//! Bookmark store
//!
//! Holds one user's bookmark list and keeps it current:
//!
//! ```text
//! Uninitialized -> AuthResolving -> Idle
//!                               \-> Loading -> Ready
//! ```
//!
//! The realtime channel is opened before the first load. Events that arrive
//! while a load is in flight are buffered and replayed over the loaded rows,
//! so a row inserted during the load shows up exactly once.

use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::BackendClient;
use super::reconcile::{ApplyError, apply_change, validate_change};
use super::subscriber::{ChangeSink, RealtimeSubscriber};
use crate::auth::{SessionProvider, SessionUser};
use crate::data::Bookmark;
use crate::error::AppError;
use crate::realtime::ChangeEvent;

/// Lifecycle phase of a store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Uninitialized,
    AuthResolving,
    /// No signed-in user
    Idle,
    Loading,
    Ready,
}

/// Point-in-time view of the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub phase: Phase,
    pub loading: bool,
    pub user_id: Option<String>,
    pub bookmarks: Vec<Bookmark>,
}

struct StoreState {
    phase: Phase,
    loading: bool,
    user_id: Option<String>,
    bookmarks: Vec<Bookmark>,
    /// Ids deleted since the user was captured
    deleted: HashSet<String>,
    /// Events held back while a load is in flight
    pending: Option<Vec<ChangeEvent>>,
    /// Bumped by every load and user change; stale completions compare unequal
    generation: u64,
    subscriber: Option<RealtimeSubscriber>,
}

impl StoreState {
    fn snapshot(&self) -> Snapshot {
        Snapshot {
            phase: self.phase,
            loading: self.loading,
            user_id: self.user_id.clone(),
            bookmarks: self.bookmarks.clone(),
        }
    }
}

struct Shared {
    backend: BackendClient,
    sessions: Arc<dyn SessionProvider>,
    mounted: AtomicBool,
    /// Set while a load is in flight
    busy: AtomicBool,
    state: Mutex<StoreState>,
    snapshots: watch::Sender<Snapshot>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::SeqCst)
    }

    fn publish(&self, state: &StoreState) {
        self.snapshots.send_replace(state.snapshot());
    }

    fn user_id(&self) -> Option<String> {
        self.lock().user_id.clone()
    }

    /// Switch to `user_id`: close any previous channel, open the new one
    /// and load
    async fn activate(self: &Arc<Self>, user_id: String) -> bool {
        {
            let mut state = self.lock();
            if !self.is_mounted() {
                return false;
            }

            // Previous channel goes away before the new one opens
            state.subscriber = None;
            state.bookmarks.clear();
            state.deleted.clear();
            state.user_id = Some(user_id.clone());
            state.generation += 1;
            state.pending = Some(Vec::new());

            let sink: Weak<Shared> = Arc::downgrade(self);
            state.subscriber = Some(RealtimeSubscriber::open(
                self.backend.bus(),
                &user_id,
                sink,
            ));
            self.busy.store(false, Ordering::SeqCst);
            tracing::debug!(%user_id, "Bookmark store activated");
        }

        self.load(&user_id).await
    }

    /// Signed out: close the channel and forget the list
    fn deactivate(&self) {
        let mut state = self.lock();
        if !self.is_mounted() {
            return;
        }

        state.subscriber = None;
        state.user_id = None;
        state.bookmarks.clear();
        state.deleted.clear();
        state.pending = None;
        state.generation += 1;
        state.loading = false;
        state.phase = Phase::Idle;
        self.busy.store(false, Ordering::SeqCst);
        self.publish(&state);
    }

    async fn on_auth_change(self: &Arc<Self>, user: Option<SessionUser>) {
        let current = self.user_id();
        match user {
            None if current.is_some() => {
                tracing::info!("Signed out; clearing bookmark store");
                self.deactivate();
            }
            Some(user) if current.as_deref() != Some(user.id.as_str()) => {
                tracing::info!(user_id = %user.id, "Signed-in user changed; reloading bookmarks");
                self.activate(user.id).await;
            }
            _ => {}
        }
    }

    async fn load(&self, user_id: &str) -> bool {
        let Some(generation) = self.begin_load() else {
            return false;
        };
        let result = self.backend.bookmarks.list(user_id).await;
        self.finish_load(generation, result)
    }

    /// Mark a load as started
    ///
    /// # Returns
    /// The load's generation, or `None` if unmounted or already busy
    fn begin_load(&self) -> Option<u64> {
        if !self.is_mounted() {
            return None;
        }
        if self.busy.swap(true, Ordering::SeqCst) {
            tracing::debug!("Bookmark load already in flight");
            return None;
        }

        let mut state = self.lock();
        state.generation += 1;
        state.loading = true;
        state.phase = Phase::Loading;
        state.pending.get_or_insert_with(Vec::new);
        self.publish(&state);
        Some(state.generation)
    }

    /// Apply a load result unless it is stale
    fn finish_load(&self, generation: u64, result: Result<Vec<Bookmark>, AppError>) -> bool {
        let mut state = self.lock();
        if !self.is_mounted() || state.generation != generation {
            tracing::debug!(generation, "Discarding stale bookmark load");
            return false;
        }

        let pending = state.pending.take().unwrap_or_default();
        let mut rows = match result {
            Ok(rows) => rows,
            Err(error) => {
                tracing::error!(%error, "Failed to load bookmarks");
                std::mem::take(&mut state.bookmarks)
            }
        };
        let mut deleted = std::mem::take(&mut state.deleted);
        rows.retain(|row| !deleted.contains(&row.id));
        for event in &pending {
            if let Err(error) = apply_change(&mut rows, &mut deleted, event) {
                tracing::warn!(seq = event.seq, %error, "Dropping buffered change event");
            }
        }

        state.bookmarks = rows;
        state.deleted = deleted;
        state.loading = false;
        state.phase = Phase::Ready;
        self.busy.store(false, Ordering::SeqCst);
        self.publish(&state);
        true
    }

    async fn refetch(&self) -> bool {
        let Some(user_id) = self.user_id() else {
            return false;
        };
        self.busy.store(false, Ordering::SeqCst);
        self.load(&user_id).await
    }
}

impl ChangeSink for Shared {
    fn on_change(&self, event: &ChangeEvent) -> Result<(), ApplyError> {
        let mut state = self.lock();
        if !self.is_mounted() || state.user_id.as_deref() != event.owner() {
            return Ok(());
        }

        if let Some(pending) = state.pending.as_mut() {
            validate_change(event)?;
            pending.push(event.clone());
            return Ok(());
        }

        let state = &mut *state;
        apply_change(&mut state.bookmarks, &mut state.deleted, event)?;
        self.publish(state);
        Ok(())
    }

    fn on_lagged(self: Arc<Self>, _missed: u64) {
        tokio::spawn(async move {
            self.refetch().await;
        });
    }
}

/// One user's live bookmark list
///
/// Dropping the store shuts it down.
pub struct BookmarkStore {
    shared: Arc<Shared>,
    auth_watcher: Mutex<Option<JoinHandle<()>>>,
}

impl BookmarkStore {
    pub fn new(backend: BackendClient, sessions: Arc<dyn SessionProvider>) -> Self {
        let initial = StoreState {
            phase: Phase::Uninitialized,
            loading: true,
            user_id: None,
            bookmarks: Vec::new(),
            deleted: HashSet::new(),
            pending: None,
            generation: 0,
            subscriber: None,
        };
        let (snapshots, _rx) = watch::channel(initial.snapshot());

        Self {
            shared: Arc::new(Shared {
                backend,
                sessions,
                mounted: AtomicBool::new(true),
                busy: AtomicBool::new(false),
                state: Mutex::new(initial),
                snapshots,
            }),
            auth_watcher: Mutex::new(None),
        }
    }

    /// Resolve the session, then subscribe and load
    ///
    /// Afterwards the store follows the provider's auth state: sign-out
    /// clears it, a different user reloads it.
    pub async fn init(&self) -> Phase {
        {
            let mut state = self.shared.lock();
            if !self.shared.is_mounted() {
                return state.phase;
            }
            state.phase = Phase::AuthResolving;
            self.shared.publish(&state);
        }

        let mut auth_state = self.shared.sessions.auth_state();
        let session = match self.shared.sessions.current_session().await {
            Ok(session) => session,
            Err(error) => {
                tracing::error!(%error, "Session check failed");
                None
            }
        };
        auth_state.borrow_and_update();

        match session {
            Some(session) => {
                self.shared.activate(session.user.id).await;
            }
            None => self.shared.deactivate(),
        }

        if self.shared.is_mounted() {
            let watcher = tokio::spawn(follow_auth_state(Arc::downgrade(&self.shared), auth_state));
            if let Some(previous) = self
                .auth_watcher
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .replace(watcher)
            {
                previous.abort();
            }
        }

        self.phase()
    }

    /// Load `user_id`'s bookmarks
    ///
    /// # Returns
    /// `false` if a load was already in flight, the store is shut down, or
    /// a newer load superseded this one
    pub async fn load(&self, user_id: &str) -> bool {
        self.shared.load(user_id).await
    }

    /// Re-issue the load for the current user, even if one is in flight
    pub async fn refetch(&self) -> bool {
        self.shared.refetch().await
    }

    pub fn bookmarks(&self) -> Vec<Bookmark> {
        self.shared.lock().bookmarks.clone()
    }

    pub fn loading(&self) -> bool {
        self.shared.lock().loading
    }

    pub fn phase(&self) -> Phase {
        self.shared.lock().phase
    }

    pub fn user_id(&self) -> Option<String> {
        self.shared.user_id()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.shared.lock().snapshot()
    }

    /// Snapshots published after every change
    pub fn watch(&self) -> watch::Receiver<Snapshot> {
        self.shared.snapshots.subscribe()
    }

    /// Name of the open realtime channel
    pub fn channel_name(&self) -> Option<String> {
        self.shared
            .lock()
            .subscriber
            .as_ref()
            .map(|subscriber| subscriber.channel_name().to_string())
    }

    /// Stop following changes; later completions leave the state alone
    pub fn shutdown(&self) {
        self.shared.mounted.store(false, Ordering::SeqCst);
        self.shared.lock().subscriber = None;
        if let Some(watcher) = self
            .auth_watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            watcher.abort();
        }
    }
}

impl Drop for BookmarkStore {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn follow_auth_state(
    shared: Weak<Shared>,
    mut auth_state: watch::Receiver<Option<SessionUser>>,
) {
    while auth_state.changed().await.is_ok() {
        let user = auth_state.borrow_and_update().clone();
        let Some(shared) = shared.upgrade() else {
            break;
        };
        if !shared.is_mounted() {
            break;
        }
        shared.on_auth_change(user).await;
    }
}
