//! Service layer
//!
//! Contains business logic separated from HTTP handlers.
//! Services orchestrate database writes and change publication.

mod bookmark;

pub use bookmark::BookmarkService;
