//! Data models
//!
//! Rust structs representing database entities.
//! All models use ULID for IDs and chrono for timestamps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

// =============================================================================
// ID Types
// =============================================================================

/// Entity ID wrapper (ULID format, 26 characters)
///
/// Example: "01ARZ3NDEKTSV4RRFFQ69G5FAV"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    /// Generate a new ULID
    pub fn new() -> Self {
        Self(ulid::Ulid::new().to_string())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// User
// =============================================================================

/// A person signed in through the identity provider
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: String,
    /// Provider label (e.g. "google")
    pub provider: String,
    /// Stable subject identifier issued by the provider
    pub provider_subject: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub last_sign_in_at: DateTime<Utc>,
}

// =============================================================================
// Session
// =============================================================================

/// Server-side session row
///
/// The signed cookie token is only honored while this row exists.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SessionRecord {
    pub id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

// =============================================================================
// Bookmark
// =============================================================================

/// A saved link owned by exactly one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Bookmark {
    pub id: String,
    pub title: String,
    pub url: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

impl Bookmark {
    /// List order: newest first, ties broken by id descending.
    pub fn display_order(&self, other: &Self) -> Ordering {
        other
            .created_at
            .cmp(&self.created_at)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// Validated input for a new bookmark
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBookmark {
    pub title: String,
    pub url: String,
}

/// Partial update for an existing bookmark
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookmarkChanges {
    pub title: Option<String>,
    pub url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn bookmark(id: &str, created_at: DateTime<Utc>) -> Bookmark {
        Bookmark {
            id: id.to_string(),
            title: id.to_string(),
            url: format!("https://example.com/{id}"),
            user_id: "user".to_string(),
            created_at,
        }
    }

    #[test]
    fn display_order_puts_newest_first() {
        let now = Utc::now();
        let mut list = vec![
            bookmark("old", now - Duration::minutes(5)),
            bookmark("new", now),
            bookmark("mid", now - Duration::minutes(1)),
        ];
        list.sort_by(Bookmark::display_order);

        let ids: Vec<_> = list.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "mid", "old"]);
    }

    #[test]
    fn display_order_breaks_ties_by_id() {
        let now = Utc::now();
        let mut list = vec![bookmark("01A", now), bookmark("01B", now)];
        list.sort_by(Bookmark::display_order);
        assert_eq!(list[0].id, "01B");
    }

    #[test]
    fn entity_ids_are_ulids() {
        let id = EntityId::new();
        assert_eq!(id.0.len(), 26);
        assert!(ulid::Ulid::from_string(&id.0).is_ok());
    }
}
