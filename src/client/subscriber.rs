//! Realtime subscriber
//!
//! Opens exactly one owner-filtered channel per user and forwards its events
//! to a sink until dropped.

use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;

use super::reconcile::ApplyError;
use crate::metrics::{REALTIME_EVENTS_APPLIED, REALTIME_EVENTS_LAGGED, REALTIME_SUBSCRIPTIONS_ACTIVE};
use crate::realtime::{ChangeBus, ChangeEvent, ChannelError, Subscription, bookmarks_channel_name};

/// Receiver of channel events
pub trait ChangeSink: Send + Sync {
    /// Apply one event
    fn on_change(&self, event: &ChangeEvent) -> Result<(), ApplyError>;

    /// Events were dropped because the receiver fell behind
    fn on_lagged(self: Arc<Self>, missed: u64);
}

/// Live `bookmarks-<user_id>` channel
///
/// Dropping the subscriber tears the channel down.
pub struct RealtimeSubscriber {
    channel: String,
    user_id: String,
    task: JoinHandle<()>,
}

impl RealtimeSubscriber {
    /// Subscribe to `user_id`'s bookmark changes
    ///
    /// The bus subscription is active when this returns, so events published
    /// afterwards are never missed. The sink is held weakly.
    pub fn open(bus: &ChangeBus, user_id: &str, sink: Weak<dyn ChangeSink>) -> Self {
        let channel = bookmarks_channel_name(user_id);
        let subscription = bus.channel(channel.clone()).filter_owner(user_id).subscribe();

        REALTIME_SUBSCRIPTIONS_ACTIVE.inc();
        tracing::debug!(%channel, "Realtime channel opened");

        Self {
            channel,
            user_id: user_id.to_string(),
            task: tokio::spawn(deliver(subscription, sink)),
        }
    }

    pub fn channel_name(&self) -> &str {
        &self.channel
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }
}

impl Drop for RealtimeSubscriber {
    fn drop(&mut self) {
        self.task.abort();
        REALTIME_SUBSCRIPTIONS_ACTIVE.dec();
        tracing::debug!(channel = %self.channel, "Realtime channel closed");
    }
}

async fn deliver(mut subscription: Subscription, sink: Weak<dyn ChangeSink>) {
    loop {
        let received = subscription.recv().await;
        let Some(sink) = sink.upgrade() else {
            break;
        };

        match received {
            Ok(event) => match sink.on_change(&event) {
                Ok(()) => {
                    REALTIME_EVENTS_APPLIED.with_label_values(&["applied"]).inc();
                }
                Err(error) => {
                    // Malformed event: skip it, keep the channel
                    REALTIME_EVENTS_APPLIED.with_label_values(&["rejected"]).inc();
                    tracing::warn!(
                        channel = subscription.name(),
                        seq = event.seq,
                        %error,
                        "Ignoring malformed change event"
                    );
                }
            },
            Err(ChannelError::Lagged(missed)) => {
                REALTIME_EVENTS_LAGGED.inc_by(missed);
                tracing::warn!(channel = subscription.name(), missed, "Realtime channel lagged; refetching");
                sink.on_lagged(missed);
            }
            Err(ChannelError::Closed) => break,
        }
    }
}
