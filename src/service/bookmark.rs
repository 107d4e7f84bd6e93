//! Bookmark service
//!
//! Writes go to the database first; the change is published on the bus only
//! after the statement commits.

use chrono::Utc;
use std::sync::Arc;

use crate::data::{Bookmark, BookmarkChanges, Database, EntityId, NewBookmark};
use crate::error::AppError;
use crate::metrics::{BOOKMARK_LOADS_TOTAL, BOOKMARK_MUTATIONS_TOTAL};
use crate::realtime::{ChangeBus, ChangeKind};

/// Bookmark service
pub struct BookmarkService {
    db: Arc<Database>,
    bus: Arc<ChangeBus>,
}

impl BookmarkService {
    /// Create new bookmark service
    pub fn new(db: Arc<Database>, bus: Arc<ChangeBus>) -> Self {
        Self { db, bus }
    }

    /// Bus this service publishes to
    pub fn bus(&self) -> &Arc<ChangeBus> {
        &self.bus
    }

    /// All bookmarks owned by `user_id`, newest first
    pub async fn list(&self, user_id: &str) -> Result<Vec<Bookmark>, AppError> {
        let result = self.db.list_bookmarks_for_user(user_id).await;
        let status = if result.is_ok() { "success" } else { "error" };
        BOOKMARK_LOADS_TOTAL.with_label_values(&[status]).inc();
        result
    }

    /// Insert a bookmark for `user_id`
    ///
    /// # Errors
    /// `Validation` if title or url is blank after trimming
    pub async fn create(&self, user_id: &str, input: NewBookmark) -> Result<Bookmark, AppError> {
        if input.title.trim().is_empty() || input.url.trim().is_empty() {
            return Err(AppError::Validation(
                "title and url must not be empty".to_string(),
            ));
        }

        let bookmark = Bookmark {
            id: EntityId::new().0,
            title: input.title,
            url: input.url,
            user_id: user_id.to_string(),
            created_at: Utc::now(),
        };
        self.db.insert_bookmark(&bookmark).await?;

        BOOKMARK_MUTATIONS_TOTAL.with_label_values(&["insert"]).inc();
        let seq = self
            .bus
            .publish(ChangeKind::Insert, Some(bookmark.clone()), None);
        tracing::info!(bookmark_id = %bookmark.id, user_id, seq, "Bookmark created");

        Ok(bookmark)
    }

    /// Update title and/or url of a bookmark owned by `user_id`
    pub async fn update(
        &self,
        user_id: &str,
        id: &str,
        changes: BookmarkChanges,
    ) -> Result<Bookmark, AppError> {
        let blank = |value: &Option<String>| value.as_deref().is_some_and(|v| v.trim().is_empty());
        if blank(&changes.title) || blank(&changes.url) {
            return Err(AppError::Validation(
                "title and url must not be empty".to_string(),
            ));
        }

        let old = self
            .db
            .get_bookmark(id)
            .await?
            .filter(|bookmark| bookmark.user_id == user_id)
            .ok_or(AppError::NotFound)?;
        let new = self
            .db
            .update_bookmark(id, user_id, &changes)
            .await?
            .ok_or(AppError::NotFound)?;

        BOOKMARK_MUTATIONS_TOTAL.with_label_values(&["update"]).inc();
        let seq = self
            .bus
            .publish(ChangeKind::Update, Some(new.clone()), Some(old));
        tracing::info!(bookmark_id = %id, user_id, seq, "Bookmark updated");

        Ok(new)
    }

    /// Delete a bookmark owned by `user_id`
    ///
    /// # Errors
    /// `NotFound` if no bookmark with that id belongs to the user
    pub async fn delete(&self, user_id: &str, id: &str) -> Result<Bookmark, AppError> {
        let old = self
            .db
            .delete_bookmark(id, user_id)
            .await?
            .ok_or(AppError::NotFound)?;

        BOOKMARK_MUTATIONS_TOTAL.with_label_values(&["delete"]).inc();
        let seq = self.bus.publish(ChangeKind::Delete, None, Some(old.clone()));
        tracing::info!(bookmark_id = %id, user_id, seq, "Bookmark deleted");

        Ok(old)
    }
}
