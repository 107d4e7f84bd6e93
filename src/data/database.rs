//! SQLite database operations
//!
//! All database access goes through this module.
//! Uses SQLx with runtime-checked queries.

use chrono::{DateTime, Utc};
use sqlx::{Pool, Sqlite, SqlitePool};
use std::path::Path;

use super::models::*;
use crate::error::AppError;

/// Database connection pool wrapper.
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    // =========================================================================
    // Connection
    // =========================================================================

    /// Connect to SQLite database
    ///
    /// Creates the database file if it doesn't exist.
    /// Runs pending migrations automatically.
    ///
    /// # Arguments
    /// * `path` - Path to SQLite database file
    ///
    /// # Errors
    /// Returns error if connection or migration fails
    pub async fn connect(path: &Path) -> Result<Self, AppError> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AppError::Database(sqlx::Error::Io(e)))?;
        }

        if path.to_str().is_none() {
            return Err(AppError::Config(format!(
                "database path must be valid UTF-8: {}",
                path.display()
            )));
        }

        // Create connection string
        let connection_string = format!("sqlite:{}?mode=rwc", path.display());

        // Create connection pool
        let pool = SqlitePool::connect(&connection_string).await?;

        // Run migrations
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| {
                tracing::error!("Migration failed: {}", e);
                AppError::Internal(anyhow::anyhow!("Migration failed: {}", e))
            })?;

        tracing::info!(path = %path.display(), "Database connected and migrated successfully");

        Ok(Self { pool })
    }

    // =========================================================================
    // Users
    // =========================================================================

    /// Insert or refresh a user keyed by provider identity
    ///
    /// Existing users keep their id; email and last sign-in are updated.
    pub async fn upsert_user(
        &self,
        provider: &str,
        provider_subject: &str,
        email: &str,
    ) -> Result<User, AppError> {
        let now = Utc::now();
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, provider, provider_subject, email, created_at, last_sign_in_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(provider, provider_subject) DO UPDATE SET
                email = excluded.email,
                last_sign_in_at = excluded.last_sign_in_at
            RETURNING *
            "#,
        )
        .bind(EntityId::new().0)
        .bind(provider)
        .bind(provider_subject)
        .bind(email)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(user)
    }

    /// Get user by ID
    pub async fn get_user(&self, id: &str) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    /// Persist a new session row
    pub async fn insert_session(&self, session: &SessionRecord) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO sessions (id, user_id, created_at, expires_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&session.id)
        .bind(&session.user_id)
        .bind(session.created_at)
        .bind(session.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get session row by ID
    pub async fn get_session(&self, id: &str) -> Result<Option<SessionRecord>, AppError> {
        let session = sqlx::query_as::<_, SessionRecord>("SELECT * FROM sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(session)
    }

    /// Delete session row
    ///
    /// # Returns
    /// `true` if a row was removed
    pub async fn delete_session(&self, id: &str) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete every session that expired before `now`
    pub async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    // =========================================================================
    // Bookmarks
    // =========================================================================

    /// All bookmarks owned by a user, newest first
    pub async fn list_bookmarks_for_user(&self, user_id: &str) -> Result<Vec<Bookmark>, AppError> {
        let bookmarks = sqlx::query_as::<_, Bookmark>(
            "SELECT * FROM bookmarks WHERE user_id = ? ORDER BY created_at DESC, id DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(bookmarks)
    }

    /// Get bookmark by ID
    pub async fn get_bookmark(&self, id: &str) -> Result<Option<Bookmark>, AppError> {
        let bookmark = sqlx::query_as::<_, Bookmark>("SELECT * FROM bookmarks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(bookmark)
    }

    /// Insert bookmark
    pub async fn insert_bookmark(&self, bookmark: &Bookmark) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO bookmarks (id, title, url, user_id, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&bookmark.id)
        .bind(&bookmark.title)
        .bind(&bookmark.url)
        .bind(&bookmark.user_id)
        .bind(bookmark.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Apply changes to a bookmark owned by `user_id`
    ///
    /// # Returns
    /// The updated row, or None if no such bookmark belongs to the user
    pub async fn update_bookmark(
        &self,
        id: &str,
        user_id: &str,
        changes: &BookmarkChanges,
    ) -> Result<Option<Bookmark>, AppError> {
        let bookmark = sqlx::query_as::<_, Bookmark>(
            r#"
            UPDATE bookmarks
            SET title = COALESCE(?, title), url = COALESCE(?, url)
            WHERE id = ? AND user_id = ?
            RETURNING *
            "#,
        )
        .bind(changes.title.as_deref())
        .bind(changes.url.as_deref())
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(bookmark)
    }

    /// Delete a bookmark owned by `user_id`
    ///
    /// # Returns
    /// The deleted row, or None if nothing matched
    pub async fn delete_bookmark(
        &self,
        id: &str,
        user_id: &str,
    ) -> Result<Option<Bookmark>, AppError> {
        let bookmark = sqlx::query_as::<_, Bookmark>(
            "DELETE FROM bookmarks WHERE id = ? AND user_id = ? RETURNING *",
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(bookmark)
    }
}
