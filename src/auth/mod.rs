//! Authentication
//!
//! Handles:
//! - OAuth sign-in against an identity provider
//! - Server-side sessions and signed session tokens
//! - Session providers handed to client components
//! - Request extractors

mod handle;
mod identity;
mod middleware;
mod oauth;
pub mod session;
mod store;

pub use handle::{SessionHandle, SessionProvider};
#[cfg(test)]
pub use identity::MockIdentityProvider;
pub use identity::{IdentityProvider, OAuthIdentityProvider, ProviderIdentity};
pub use middleware::{MaybeUser, SESSION_COOKIE, SignedIn, extract_token_from_headers};
pub use oauth::auth_router;
pub use session::{Session, SessionUser, create_session_token, verify_session_token};
pub use store::{AuthEvent, SessionStore};
