//! Session provider handed to client components
//!
//! Components never reach for a global auth singleton; each one receives an
//! `Arc<dyn SessionProvider>` and follows its auth-state channel.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use super::session::{Session, SessionUser};
use super::store::{AuthEvent, SessionStore};
use crate::error::AppError;

/// Source of the current session and auth-state changes
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Query the current session
    ///
    /// Also refreshes the value published on [`SessionProvider::auth_state`].
    async fn current_session(&self) -> Result<Option<Session>, AppError>;

    /// Signed-in user, updated whenever the auth state changes
    fn auth_state(&self) -> watch::Receiver<Option<SessionUser>>;

    /// End the session everywhere it is used
    async fn sign_out(&self) -> Result<(), AppError>;
}

/// Token-holding session provider backed by the [`SessionStore`]
///
/// A revocation of this handle's session (for example sign-out in another
/// tab) is observed through the store's auth events and published as a
/// signed-out state.
pub struct SessionHandle {
    store: Arc<SessionStore>,
    token: Mutex<Option<String>>,
    session_id: Mutex<Option<String>>,
    state: watch::Sender<Option<SessionUser>>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl SessionHandle {
    /// Create a handle holding `token`
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(store: Arc<SessionStore>, token: Option<String>) -> Arc<Self> {
        let events = store.subscribe();
        let (state, _rx) = watch::channel(None);
        let handle = Arc::new(Self {
            store,
            token: Mutex::new(token),
            session_id: Mutex::new(None),
            state,
            listener: Mutex::new(None),
        });

        let listener = tokio::spawn(follow_auth_events(Arc::downgrade(&handle), events));
        *handle
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(listener);

        handle
    }

    /// Token currently held, if any
    pub fn token(&self) -> Option<String> {
        self.token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn session_id(&self) -> Option<String> {
        self.session_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn publish(&self, user: Option<SessionUser>) {
        self.state.send_if_modified(|current| {
            if *current == user {
                false
            } else {
                *current = user;
                true
            }
        });
    }

    fn clear(&self) {
        self.token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.session_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.publish(None);
    }
}

#[async_trait]
impl SessionProvider for SessionHandle {
    async fn current_session(&self) -> Result<Option<Session>, AppError> {
        let Some(token) = self.token() else {
            self.publish(None);
            return Ok(None);
        };

        match self.store.resolve(&token).await? {
            Some(session) => {
                *self
                    .session_id
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(session.id.clone());
                self.publish(Some(session.user.clone()));
                Ok(Some(session))
            }
            None => {
                self.clear();
                Ok(None)
            }
        }
    }

    fn auth_state(&self) -> watch::Receiver<Option<SessionUser>> {
        self.state.subscribe()
    }

    async fn sign_out(&self) -> Result<(), AppError> {
        if let Some(token) = self.token() {
            self.store.revoke(&token).await?;
        }
        self.clear();
        Ok(())
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if let Some(listener) = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            listener.abort();
        }
    }
}

async fn follow_auth_events(handle: Weak<SessionHandle>, mut events: broadcast::Receiver<AuthEvent>) {
    loop {
        match events.recv().await {
            Ok(AuthEvent::SignedOut { session_id, .. }) => {
                let Some(handle) = handle.upgrade() else {
                    break;
                };
                if handle.session_id().as_deref() == Some(session_id.as_str()) {
                    tracing::debug!(%session_id, "Session revoked elsewhere");
                    handle.clear();
                }
            }
            Ok(AuthEvent::SignedIn { .. }) => {}
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                let Some(handle) = handle.upgrade() else {
                    break;
                };
                tracing::warn!(missed, "Auth events lagged; re-resolving session");
                if let Err(error) = handle.current_session().await {
                    tracing::error!(%error, "Failed to re-resolve session");
                }
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
