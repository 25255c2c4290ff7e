//! Push hub fanning change events out to pair subscriptions.

use dashmap::DashMap;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

use lostfound_protocol::ChangeEvent;

use super::traits::{Subscription, SubscriptionHandle};

/// Default size of the per-subscription event buffer.
pub const DEFAULT_SUBSCRIPTION_BUFFER: usize = 64;

struct Subscriber {
    user_id: String,
    other_id: String,
    tx: mpsc::Sender<ChangeEvent>,
}

/// In-process publish/subscribe hub.
///
/// Routing is coarse: an event reaches every subscription whose user is the
/// sender or the receiver of the message, whatever the counterpart. The sync
/// bridge narrows events down to its pair.
pub struct PushHub {
    /// Subscription ID -> subscriber
    subscribers: DashMap<u64, Subscriber>,

    next_id: AtomicU64,

    buffer: usize,
}

impl PushHub {
    pub fn new(buffer: usize) -> Self {
        Self {
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
        }
    }

    /// Register a subscription for `user_id` watching `other_id`.
    pub fn subscribe(&self, user_id: &str, other_id: &str) -> Subscription {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.insert(
            id,
            Subscriber {
                user_id: user_id.to_string(),
                other_id: other_id.to_string(),
                tx,
            },
        );
        info!("Subscription {} opened for {} <-> {}", id, user_id, other_id);

        Subscription {
            handle: SubscriptionHandle {
                id,
                user_id: user_id.to_string(),
                other_id: other_id.to_string(),
            },
            events: rx,
        }
    }

    /// Remove a subscription. Returns false when it was already gone.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let removed = self.subscribers.remove(&handle.id).is_some();
        if removed {
            info!(
                "Subscription {} released for {} <-> {}",
                handle.id, handle.user_id, handle.other_id
            );
        } else {
            debug!("Subscription {} already released", handle.id);
        }
        removed
    }

    /// Deliver an event to every subscriber involved in the message.
    ///
    /// Returns the number of subscriptions the event was queued for.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        let message = event.message();
        let mut delivered = 0;
        let mut closed = Vec::new();

        for entry in self.subscribers.iter() {
            let subscriber = entry.value();
            if subscriber.user_id != message.sender_id && subscriber.user_id != message.receiver_id
            {
                continue;
            }
            match subscriber.tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        "Dropping event for message {} on subscription {}: buffer full",
                        message.id,
                        entry.key()
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*entry.key()),
            }
        }

        for id in closed {
            if let Some((_, subscriber)) = self.subscribers.remove(&id) {
                debug!(
                    "Removed closed subscription {} for {} <-> {}",
                    id, subscriber.user_id, subscriber.other_id
                );
            }
        }

        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl Default for PushHub {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIPTION_BUFFER)
    }
}
