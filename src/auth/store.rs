//! Server-side session store
//!
//! Issues signed tokens backed by a `sessions` row and broadcasts
//! sign-in/sign-out so open stores and gates can react without polling.

use chrono::{Duration, Utc};
use std::sync::Arc;
use tokio::sync::broadcast;

use super::session::{Session, SessionUser, create_session_token, verify_session_token};
use crate::data::{Database, EntityId, SessionRecord, User};
use crate::error::AppError;

const AUTH_EVENT_CAPACITY: usize = 64;

/// Auth state change notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn { session_id: String, user_id: String },
    SignedOut { session_id: String, user_id: String },
}

/// Issues, resolves and revokes sessions
pub struct SessionStore {
    db: Arc<Database>,
    secret: String,
    max_age: Duration,
    events: broadcast::Sender<AuthEvent>,
}

impl SessionStore {
    pub fn new(db: Arc<Database>, secret: impl Into<String>, max_age_seconds: i64) -> Self {
        let (events, _rx) = broadcast::channel(AUTH_EVENT_CAPACITY);
        Self {
            db,
            secret: secret.into(),
            max_age: Duration::seconds(max_age_seconds),
            events,
        }
    }

    /// Create a session for `user`
    ///
    /// # Returns
    /// The session claims and the signed token to hand to the client
    pub async fn create(&self, user: &User) -> Result<(Session, String), AppError> {
        let now = Utc::now();
        let record = SessionRecord {
            id: EntityId::new().0,
            user_id: user.id.clone(),
            created_at: now,
            expires_at: now + self.max_age,
        };
        self.db.insert_session(&record).await?;

        let session = Session {
            id: record.id,
            user: SessionUser {
                id: user.id.clone(),
                email: user.email.clone(),
            },
            created_at: record.created_at,
            expires_at: record.expires_at,
        };
        let token = create_session_token(&session, &self.secret)?;

        tracing::info!(session_id = %session.id, user_id = %user.id, "Session created");
        let _ = self.events.send(AuthEvent::SignedIn {
            session_id: session.id.clone(),
            user_id: user.id.clone(),
        });

        Ok((session, token))
    }

    /// Resolve a token to a live session
    ///
    /// Bad signatures, expired tokens and revoked sessions all resolve to
    /// `None`; only storage failures are errors.
    pub async fn resolve(&self, token: &str) -> Result<Option<Session>, AppError> {
        let session = match verify_session_token(token, &self.secret) {
            Ok(session) => session,
            Err(error) => {
                tracing::debug!(%error, "Rejected session token");
                return Ok(None);
            }
        };

        match self.db.get_session(&session.id).await? {
            Some(record) if record.user_id == session.user.id && record.expires_at > Utc::now() => {
                Ok(Some(session))
            }
            _ => Ok(None),
        }
    }

    /// Revoke the session behind `token`
    ///
    /// # Returns
    /// `true` if a live session was removed
    pub async fn revoke(&self, token: &str) -> Result<bool, AppError> {
        let Ok(session) = verify_session_token(token, &self.secret) else {
            return Ok(false);
        };

        let removed = self.db.delete_session(&session.id).await?;
        if removed {
            tracing::info!(session_id = %session.id, user_id = %session.user.id, "Session revoked");
            let _ = self.events.send(AuthEvent::SignedOut {
                session_id: session.id,
                user_id: session.user.id,
            });
        }

        Ok(removed)
    }

    /// Remove expired session rows
    pub async fn purge_expired(&self) -> Result<u64, AppError> {
        let removed = self.db.delete_expired_sessions(Utc::now()).await?;
        if removed > 0 {
            crate::metrics::SESSIONS_PURGED_TOTAL.inc_by(removed);
            tracing::info!(removed, "Expired sessions purged");
        }
        Ok(removed)
    }

    /// Subscribe to sign-in/sign-out notifications
    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}
