//! Backend trait definitions.

use async_trait::async_trait;
use tokio::sync::mpsc;

use lostfound_protocol::{ChangeEvent, ItemSummary, Message, NewMessage, UserProfile};

use crate::error::BackendResult;

/// Identifies one live push-channel subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    pub id: u64,
    pub user_id: String,
    pub other_id: String,
}

/// A live subscription: the handle used to release it and the receiving end
/// of the channel.
///
/// The channel is keyed by user, so it may also carry events for other pairs
/// involving `user_id`; consumers filter.
#[derive(Debug)]
pub struct Subscription {
    pub handle: SubscriptionHandle,
    pub events: mpsc::Receiver<ChangeEvent>,
}

/// Persistence, lookup and push channel used by the messaging core.
///
/// Implementations are shared behind an `Arc` by every screen of a session.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Up to `limit` most recent messages exchanged between the two users in
    /// either direction, newest first.
    async fn fetch_messages(
        &self,
        user_id: &str,
        other_id: &str,
        limit: usize,
    ) -> BackendResult<Vec<Message>>;

    /// Up to `limit` most recent messages sent or received by `user_id`,
    /// newest first.
    async fn fetch_recent_feed(&self, user_id: &str, limit: usize) -> BackendResult<Vec<Message>>;

    /// Persist a message; the backend assigns id and timestamp.
    async fn send_message(&self, message: NewMessage) -> BackendResult<Message>;

    /// Mark every message from `sender_id` to `receiver_id` read.
    ///
    /// Returns the number of messages that changed; repeating the call
    /// returns zero.
    async fn mark_read(&self, receiver_id: &str, sender_id: &str) -> BackendResult<u64>;

    /// Open a push channel for changes touching `user_id` and `other_id`.
    async fn subscribe_to_pair(&self, user_id: &str, other_id: &str)
    -> BackendResult<Subscription>;

    /// Release a subscription. Unknown or already released handles are ignored.
    async fn unsubscribe(&self, handle: &SubscriptionHandle) -> BackendResult<()>;

    async fn lookup_user(&self, user_id: &str) -> BackendResult<Option<UserProfile>>;

    async fn lookup_item(&self, item_id: &str) -> BackendResult<Option<ItemSummary>>;
}
