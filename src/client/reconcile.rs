//! Applying change events to an in-memory bookmark list

use std::collections::HashSet;
use thiserror::Error;

use crate::data::Bookmark;
use crate::realtime::{ChangeEvent, ChangeKind};

/// A change event that cannot be applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ApplyError {
    #[error("{0} event carries no new row")]
    MissingNew(ChangeKind),
    #[error("delete event carries no old row")]
    MissingOld,
}

/// Apply one change event to `list`
///
/// The list is kept in display order (newest first). Inserts merge by id so
/// an event for a row that a concurrent load already returned does not
/// duplicate it. Updates of ids not in the list are ignored.
///
/// Deleted ids are recorded in `deleted`. Ids are never reused, so an insert
/// or update for a recorded id is a late event published after the delete
/// and is dropped.
pub fn apply_change(
    list: &mut Vec<Bookmark>,
    deleted: &mut HashSet<String>,
    event: &ChangeEvent,
) -> Result<(), ApplyError> {
    match event.kind {
        ChangeKind::Insert => {
            let row = event.new.as_ref().ok_or(ApplyError::MissingNew(event.kind))?;
            if !deleted.contains(&row.id) {
                upsert_sorted(list, row);
            }
        }
        ChangeKind::Update => {
            let row = event.new.as_ref().ok_or(ApplyError::MissingNew(event.kind))?;
            if let Some(existing) = list.iter_mut().find(|b| b.id == row.id) {
                *existing = row.clone();
            }
        }
        ChangeKind::Delete => {
            let row = event.old.as_ref().ok_or(ApplyError::MissingOld)?;
            list.retain(|b| b.id != row.id);
            deleted.insert(row.id.clone());
        }
    }
    Ok(())
}

/// Check that `event` carries the row image its kind needs
pub fn validate_change(event: &ChangeEvent) -> Result<(), ApplyError> {
    match event.kind {
        ChangeKind::Insert | ChangeKind::Update if event.new.is_none() => {
            Err(ApplyError::MissingNew(event.kind))
        }
        ChangeKind::Delete if event.old.is_none() => Err(ApplyError::MissingOld),
        _ => Ok(()),
    }
}

fn upsert_sorted(list: &mut Vec<Bookmark>, row: &Bookmark) {
    if let Some(existing) = list.iter_mut().find(|b| b.id == row.id) {
        *existing = row.clone();
        return;
    }
    let at = list
        .iter()
        .position(|b| row.display_order(b).is_lt())
        .unwrap_or(list.len());
    list.insert(at, row.clone());
}
