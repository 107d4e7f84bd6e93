//! Session gate for protected views

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;

use crate::auth::{SessionProvider, SessionUser};

/// Where unauthenticated visitors are sent
pub const LOGIN_PATH: &str = "/auth/login";

/// Result of checking the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    /// Still resolving, or the gate was unmounted before it finished
    Pending,
    Allowed(SessionUser),
    Redirect(&'static str),
}

/// Observable gate state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateState {
    pub loading: bool,
    pub outcome: GateOutcome,
}

/// Checks the session before a protected view renders
///
/// State is only mutated while mounted; completions that land after
/// [`SessionGate::unmount`] are dropped.
pub struct SessionGate {
    sessions: Arc<dyn SessionProvider>,
    mounted: AtomicBool,
    state: watch::Sender<GateState>,
}

impl SessionGate {
    pub fn new(sessions: Arc<dyn SessionProvider>) -> Self {
        let (state, _rx) = watch::channel(GateState {
            loading: true,
            outcome: GateOutcome::Pending,
        });
        Self {
            sessions,
            mounted: AtomicBool::new(true),
            state,
        }
    }

    /// Query the session and settle the gate
    pub async fn mount(&self) -> GateOutcome {
        let outcome = match self.sessions.current_session().await {
            Ok(Some(session)) => GateOutcome::Allowed(session.user),
            Ok(None) => GateOutcome::Redirect(LOGIN_PATH),
            Err(error) => {
                tracing::error!(%error, "Session check failed");
                GateOutcome::Redirect(LOGIN_PATH)
            }
        };

        if !self.is_mounted() {
            return GateOutcome::Pending;
        }

        self.set(outcome.clone());
        outcome
    }

    /// Wait until the session ends while mounted
    ///
    /// Returns the redirect target, or `None` if the gate was unmounted or
    /// the provider went away first.
    pub async fn until_signed_out(&self) -> Option<&'static str> {
        let mut auth_state = self.sessions.auth_state();
        if auth_state.wait_for(|user| user.is_none()).await.is_err() {
            return None;
        }
        if !self.is_mounted() {
            return None;
        }

        self.set(GateOutcome::Redirect(LOGIN_PATH));
        Some(LOGIN_PATH)
    }

    /// Tear down; later completions no longer touch state
    pub fn unmount(&self) {
        self.mounted.store(false, Ordering::SeqCst);
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> watch::Receiver<GateState> {
        self.state.subscribe()
    }

    fn set(&self, outcome: GateOutcome) {
        self.state.send_replace(GateState {
            loading: false,
            outcome,
        });
    }
}
