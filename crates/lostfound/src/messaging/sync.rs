//! Real-time sync bridge: the push-channel subscription behind one open chat.
//!
//! Lifecycle per chat screen:
//!
//! ```text
//! Unsubscribed --connect--> Subscribing --confirmed--> Active
//!      ^                         |                        |
//!      +------ failed -----------+                        |
//!      +------------- disconnect / pair change -----------+
//! ```
//!
//! Subscription failures and dropped channels are logged, never surfaced; the
//! chat keeps working on the history it already has. Reconnecting is left to
//! the backend.

use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::mpsc::error::TryRecvError;

use lostfound_protocol::{ChangeEvent, Message, Pair};

use crate::backend::{Backend, Subscription};
use crate::error::SubscriptionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Unsubscribed,
    Subscribing,
    Active,
}

/// A change for the current pair, ready to apply to the message store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncUpdate {
    Inserted(Message),
    Updated(Message),
}

impl SyncUpdate {
    pub fn message(&self) -> &Message {
        match self {
            SyncUpdate::Inserted(message) | SyncUpdate::Updated(message) => message,
        }
    }
}

pub struct SyncBridge {
    backend: Arc<dyn Backend>,
    state: SyncState,
    pair: Option<Pair>,
    subscription: Option<Subscription>,
}

impl SyncBridge {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            state: SyncState::Unsubscribed,
            pair: None,
            subscription: None,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn pair(&self) -> Option<&Pair> {
        self.pair.as_ref()
    }

    /// Subscribe to `pair`.
    ///
    /// Already subscribed to the same pair: nothing happens. Subscribed to a
    /// different pair: that subscription is released first.
    pub async fn connect(&mut self, pair: Pair) -> SyncState {
        if self.state != SyncState::Unsubscribed {
            if self.pair.as_ref() == Some(&pair) {
                return self.state;
            }
            self.disconnect().await;
        }

        self.state = SyncState::Subscribing;
        self.pair = Some(pair.clone());

        match self
            .backend
            .subscribe_to_pair(&pair.user_id, &pair.other_id)
            .await
        {
            Ok(subscription) => {
                debug!(
                    "Subscription {} active for {}",
                    subscription.handle.id, pair
                );
                self.subscription = Some(subscription);
                self.state = SyncState::Active;
            }
            Err(source) => {
                let err = SubscriptionError::Subscribe {
                    pair: pair.to_string(),
                    source,
                };
                warn!("{err}; continuing without live updates");
                self.state = SyncState::Unsubscribed;
                self.pair = None;
            }
        }
        self.state
    }

    /// Release the subscription, if any.
    ///
    /// Returns true when a handle was released; repeated calls are no-ops.
    pub async fn disconnect(&mut self) -> bool {
        self.state = SyncState::Unsubscribed;
        self.pair = None;
        let Some(subscription) = self.subscription.take() else {
            return false;
        };

        let handle = subscription.handle;
        if let Err(source) = self.backend.unsubscribe(&handle).await {
            let err = SubscriptionError::Release {
                handle: handle.id,
                source,
            };
            warn!("{err}");
        } else {
            info!("Released subscription {}", handle.id);
        }
        true
    }

    /// Wait for the next change belonging to the current pair.
    ///
    /// Returns `None` when not subscribed or when the channel closed; a closed
    /// channel releases the subscription.
    pub async fn next_update(&mut self) -> Option<SyncUpdate> {
        loop {
            let event = {
                let subscription = self.subscription.as_mut()?;
                subscription.events.recv().await
            };
            match event {
                Some(event) => {
                    if let Some(update) = self.accept(event) {
                        return Some(update);
                    }
                }
                None => {
                    self.channel_closed().await;
                    return None;
                }
            }
        }
    }

    /// Collect every change already queued, without waiting.
    pub async fn drain(&mut self) -> Vec<SyncUpdate> {
        let mut updates = Vec::new();
        loop {
            let event = match self.subscription.as_mut() {
                Some(subscription) => subscription.events.try_recv(),
                None => break,
            };
            match event {
                Ok(event) => updates.extend(self.accept(event)),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.channel_closed().await;
                    break;
                }
            }
        }
        updates
    }

    /// Keep only events exchanged within the current pair.
    fn accept(&self, event: ChangeEvent) -> Option<SyncUpdate> {
        let pair = self.pair.as_ref()?;
        if !event.message().belongs_to(pair) {
            debug!(
                "Ignoring message {} outside {}",
                event.message().id,
                pair
            );
            return None;
        }
        Some(match event {
            ChangeEvent::Insert { message } => SyncUpdate::Inserted(message),
            ChangeEvent::Update { message } => SyncUpdate::Updated(message),
        })
    }

    async fn channel_closed(&mut self) {
        if let Some(pair) = &self.pair {
            let err = SubscriptionError::Closed {
                pair: pair.to_string(),
            };
            warn!("{err}");
        }
        self.disconnect().await;
    }
}
