//! In-process change-notification bus
//!
//! Every committed bookmark mutation is published once; each open channel
//! holds its own broadcast receiver and filters by owner before delivery.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::broadcast;

use super::event::{BOOKMARKS_TABLE, ChangeEvent, ChangeKind};
use crate::data::Bookmark;

/// Reasons a subscription stops yielding events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// The receiver fell behind and `0` events were dropped
    #[error("subscription lagged behind by {0} events")]
    Lagged(u64),
    /// The bus was dropped
    #[error("change bus closed")]
    Closed,
}

/// Publish/subscribe bus for bookmark changes
pub struct ChangeBus {
    sender: broadcast::Sender<Arc<ChangeEvent>>,
    seq: AtomicU64,
    /// Serializes seq assignment and send so channel order matches seq order
    publish_lock: Mutex<()>,
}

impl ChangeBus {
    /// Create a bus buffering up to `capacity` events per receiver
    pub fn new(capacity: usize) -> Self {
        let (sender, _rx) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            seq: AtomicU64::new(0),
            publish_lock: Mutex::new(()),
        }
    }

    /// Publish a committed change
    ///
    /// # Returns
    /// The sequence number assigned to the event
    pub fn publish(&self, kind: ChangeKind, new: Option<Bookmark>, old: Option<Bookmark>) -> u64 {
        let _guard = self
            .publish_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let event = Arc::new(ChangeEvent {
            seq,
            table: BOOKMARKS_TABLE,
            kind,
            new,
            old,
        });

        // No receivers is not an error: nobody is watching right now
        let receivers = self.sender.send(event).unwrap_or(0);

        crate::metrics::REALTIME_EVENTS_PUBLISHED
            .with_label_values(&[kind.as_str()])
            .inc();
        tracing::debug!(seq, kind = %kind, receivers, "Change event published");

        seq
    }

    /// Sequence number of the most recent event (0 before the first)
    pub fn last_seq(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }

    /// Number of live receivers
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Start describing a named channel
    pub fn channel(&self, name: impl Into<String>) -> Channel<'_> {
        Channel {
            bus: self,
            name: name.into(),
            owner: None,
        }
    }
}

/// Builder for a subscription
pub struct Channel<'a> {
    bus: &'a ChangeBus,
    name: String,
    owner: Option<String>,
}

impl Channel<'_> {
    /// Deliver only events whose row belongs to `user_id`
    pub fn filter_owner(mut self, user_id: impl Into<String>) -> Self {
        self.owner = Some(user_id.into());
        self
    }

    /// Activate the subscription
    ///
    /// Events published after this call returns are delivered.
    pub fn subscribe(self) -> Subscription {
        tracing::debug!(channel = %self.name, owner = ?self.owner, "Channel subscribed");
        Subscription {
            name: self.name,
            owner: self.owner,
            receiver: self.bus.sender.subscribe(),
        }
    }
}

/// Live subscription to the bus
pub struct Subscription {
    name: String,
    owner: Option<String>,
    receiver: broadcast::Receiver<Arc<ChangeEvent>>,
}

impl Subscription {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for the next event that passes this subscription's filter
    pub async fn recv(&mut self) -> Result<Arc<ChangeEvent>, ChannelError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.matches(&event) {
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    return Err(ChannelError::Lagged(missed));
                }
                Err(broadcast::error::RecvError::Closed) => return Err(ChannelError::Closed),
            }
        }
    }

    fn matches(&self, event: &ChangeEvent) -> bool {
        match &self.owner {
            Some(owner) => event.owner() == Some(owner.as_str()),
            None => true,
        }
    }
}
