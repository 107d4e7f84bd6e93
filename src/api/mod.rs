//! API layer
//!
//! HTTP handlers for:
//! - Bookmark pages and live stream
//! - Metrics (Prometheus)

mod bookmarks;
pub mod metrics;

pub use bookmarks::bookmarks_router;
pub use metrics::{metrics_router, track_http_metrics};
