//! Change-notification bus
//!
//! Stands in for a database change feed: the bookmark service publishes
//! every committed insert/update/delete, and subscribers receive them over
//! owner-filtered channels.

mod bus;
mod event;

pub use bus::{ChangeBus, Channel, ChannelError, Subscription};
pub use event::{BOOKMARKS_TABLE, ChangeEvent, ChangeKind};

/// Channel name for a user's bookmark feed
pub fn bookmarks_channel_name(user_id: &str) -> String {
    format!("bookmarks-{user_id}")
}
