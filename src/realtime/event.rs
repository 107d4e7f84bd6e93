//! Change events carried by the bus

use serde::Serialize;
use std::fmt;

use crate::data::Bookmark;

/// Table whose changes are published on the bus
pub const BOOKMARKS_TABLE: &str = "bookmarks";

/// Kind of row change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Insert => "insert",
            ChangeKind::Update => "update",
            ChangeKind::Delete => "delete",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A committed change to the `bookmarks` table
///
/// `new` is set for inserts and updates, `old` for updates and deletes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEvent {
    /// Monotonic per-process sequence number
    pub seq: u64,
    /// Watched table the row belongs to
    pub table: &'static str,
    pub kind: ChangeKind,
    pub new: Option<Bookmark>,
    pub old: Option<Bookmark>,
}

impl ChangeEvent {
    /// Owner of the affected row, taken from whichever image is present.
    pub fn owner(&self) -> Option<&str> {
        self.new
            .as_ref()
            .or(self.old.as_ref())
            .map(|row| row.user_id.as_str())
    }

    /// Identifier of the affected row.
    pub fn row_id(&self) -> Option<&str> {
        self.new
            .as_ref()
            .or(self.old.as_ref())
            .map(|row| row.id.as_str())
    }
}
