//! In-memory backend.
//!
//! Keeps everything in process and publishes through a [`PushHub`]. Used as
//! the fake in tests and for offline demos; failures can be injected per
//! operation and calls are counted.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

use lostfound_protocol::{ChangeEvent, ItemSummary, Message, MessageId, NewMessage, UserProfile};

use super::hub::PushHub;
use super::traits::{Backend, Subscription, SubscriptionHandle};
use crate::error::{BackendError, BackendResult};

#[derive(Default)]
struct State {
    messages: Vec<Message>,
    users: HashMap<String, UserProfile>,
    items: HashMap<String, ItemSummary>,
    next_id: MessageId,
    failures: Failures,
}

#[derive(Default)]
struct Failures {
    feed: bool,
    send: bool,
    subscribe: bool,
    mark_read: bool,
    /// History fetches touching any of these users fail.
    history: HashSet<String>,
    /// Lookups for these user ids fail.
    lookups: HashSet<String>,
}

/// Call counters, readable without locking.
#[derive(Debug, Default)]
pub struct CallCounts {
    fetch_messages: AtomicUsize,
    mark_read: AtomicUsize,
    subscribe: AtomicUsize,
    unsubscribe: AtomicUsize,
    lookup_user: AtomicUsize,
    lookup_item: AtomicUsize,
}

impl CallCounts {
    pub fn fetch_messages(&self) -> usize {
        self.fetch_messages.load(Ordering::SeqCst)
    }

    pub fn mark_read(&self) -> usize {
        self.mark_read.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> usize {
        self.subscribe.load(Ordering::SeqCst)
    }

    pub fn unsubscribe(&self) -> usize {
        self.unsubscribe.load(Ordering::SeqCst)
    }

    pub fn lookup_user(&self) -> usize {
        self.lookup_user.load(Ordering::SeqCst)
    }

    pub fn lookup_item(&self) -> usize {
        self.lookup_item.load(Ordering::SeqCst)
    }
}

/// Backend that stores messages, users and items in memory.
pub struct MemoryBackend {
    state: Mutex<State>,
    hub: Arc<PushHub>,
    calls: CallCounts,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_hub(Arc::new(PushHub::default()))
    }

    pub fn with_hub(hub: Arc<PushHub>) -> Self {
        Self {
            state: Mutex::new(State {
                next_id: 1,
                ..State::default()
            }),
            hub,
            calls: CallCounts::default(),
        }
    }

    pub fn hub(&self) -> &Arc<PushHub> {
        &self.hub
    }

    pub fn calls(&self) -> &CallCounts {
        &self.calls
    }

    pub async fn add_user(&self, profile: UserProfile) {
        let mut state = self.state.lock().await;
        state.users.insert(profile.id.clone(), profile);
    }

    pub async fn add_item(&self, item: ItemSummary) {
        let mut state = self.state.lock().await;
        state.items.insert(item.id.clone(), item);
    }

    /// Store a message with an explicit timestamp without publishing it.
    pub async fn seed(&self, message: NewMessage, sent_at: DateTime<Utc>) -> Message {
        let mut state = self.state.lock().await;
        Self::insert(&mut state, message, sent_at)
    }

    /// Snapshot of a stored message.
    pub async fn message(&self, id: MessageId) -> Option<Message> {
        let state = self.state.lock().await;
        state.messages.iter().find(|m| m.id == id).cloned()
    }

    pub async fn fail_feed(&self, fail: bool) {
        self.state.lock().await.failures.feed = fail;
    }

    pub async fn fail_send(&self, fail: bool) {
        self.state.lock().await.failures.send = fail;
    }

    pub async fn fail_subscribe(&self, fail: bool) {
        self.state.lock().await.failures.subscribe = fail;
    }

    pub async fn fail_mark_read(&self, fail: bool) {
        self.state.lock().await.failures.mark_read = fail;
    }

    /// Make history fetches involving `user_id` fail.
    pub async fn fail_history_for(&self, user_id: &str) {
        let mut state = self.state.lock().await;
        state.failures.history.insert(user_id.to_string());
    }

    /// Make profile lookups of `user_id` fail.
    pub async fn fail_lookup_for(&self, user_id: &str) {
        let mut state = self.state.lock().await;
        state.failures.lookups.insert(user_id.to_string());
    }

    fn insert(state: &mut State, message: NewMessage, sent_at: DateTime<Utc>) -> Message {
        let id = state.next_id;
        state.next_id += 1;
        let stored = Message {
            id,
            sender_id: message.sender_id,
            receiver_id: message.receiver_id,
            item_id: message.item_id,
            content: message.content,
            photo_url: message.photo_url,
            sent_at,
            read: false,
        };
        state.messages.push(stored.clone());
        stored
    }

    fn newest_first(mut messages: Vec<Message>, limit: usize) -> Vec<Message> {
        messages.sort_by(|a, b| b.sent_at.cmp(&a.sent_at).then(b.id.cmp(&a.id)));
        messages.truncate(limit);
        messages
    }

    fn unavailable(operation: &str) -> BackendError {
        BackendError::Unavailable(format!("{operation} failed"))
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn fetch_messages(
        &self,
        user_id: &str,
        other_id: &str,
        limit: usize,
    ) -> BackendResult<Vec<Message>> {
        self.calls.fetch_messages.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().await;
        if state.failures.history.contains(user_id) || state.failures.history.contains(other_id) {
            return Err(Self::unavailable("fetch_messages"));
        }
        let matching = state
            .messages
            .iter()
            .filter(|m| {
                (m.sender_id == user_id && m.receiver_id == other_id)
                    || (m.sender_id == other_id && m.receiver_id == user_id)
            })
            .cloned()
            .collect();
        Ok(Self::newest_first(matching, limit))
    }

    async fn fetch_recent_feed(&self, user_id: &str, limit: usize) -> BackendResult<Vec<Message>> {
        let state = self.state.lock().await;
        if state.failures.feed {
            return Err(Self::unavailable("fetch_recent_feed"));
        }
        let matching = state
            .messages
            .iter()
            .filter(|m| m.sender_id == user_id || m.receiver_id == user_id)
            .cloned()
            .collect();
        Ok(Self::newest_first(matching, limit))
    }

    async fn send_message(&self, message: NewMessage) -> BackendResult<Message> {
        let stored = {
            let mut state = self.state.lock().await;
            if state.failures.send {
                return Err(Self::unavailable("send_message"));
            }
            Self::insert(&mut state, message, Utc::now())
        };
        self.hub.publish(ChangeEvent::Insert {
            message: stored.clone(),
        });
        Ok(stored)
    }

    async fn mark_read(&self, receiver_id: &str, sender_id: &str) -> BackendResult<u64> {
        self.calls.mark_read.fetch_add(1, Ordering::SeqCst);
        let changed: Vec<Message> = {
            let mut state = self.state.lock().await;
            if state.failures.mark_read {
                return Err(Self::unavailable("mark_read"));
            }
            state
                .messages
                .iter_mut()
                .filter(|m| m.receiver_id == receiver_id && m.sender_id == sender_id && !m.read)
                .map(|m| {
                    m.read = true;
                    m.clone()
                })
                .collect()
        };
        for message in &changed {
            self.hub.publish(ChangeEvent::Update {
                message: message.clone(),
            });
        }
        Ok(changed.len() as u64)
    }

    async fn subscribe_to_pair(
        &self,
        user_id: &str,
        other_id: &str,
    ) -> BackendResult<Subscription> {
        self.calls.subscribe.fetch_add(1, Ordering::SeqCst);
        if self.state.lock().await.failures.subscribe {
            return Err(Self::unavailable("subscribe_to_pair"));
        }
        Ok(self.hub.subscribe(user_id, other_id))
    }

    async fn unsubscribe(&self, handle: &SubscriptionHandle) -> BackendResult<()> {
        self.calls.unsubscribe.fetch_add(1, Ordering::SeqCst);
        self.hub.unsubscribe(handle);
        Ok(())
    }

    async fn lookup_user(&self, user_id: &str) -> BackendResult<Option<UserProfile>> {
        self.calls.lookup_user.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().await;
        if state.failures.lookups.contains(user_id) {
            return Err(Self::unavailable("lookup_user"));
        }
        Ok(state.users.get(user_id).cloned())
    }

    async fn lookup_item(&self, item_id: &str) -> BackendResult<Option<ItemSummary>> {
        self.calls.lookup_item.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().await;
        Ok(state.items.get(item_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap() + Duration::minutes(minute)
    }

    #[tokio::test]
    async fn test_fetch_messages_newest_first_both_directions() {
        let backend = MemoryBackend::new();
        backend.seed(NewMessage::text("alice", "bob", "one"), at(1)).await;
        backend.seed(NewMessage::text("bob", "alice", "two"), at(2)).await;
        backend.seed(NewMessage::text("alice", "carol", "other"), at(3)).await;

        let messages = backend.fetch_messages("alice", "bob", 10).await.unwrap();
        let contents: Vec<_> = messages.iter().filter_map(|m| m.content.as_deref()).collect();
        assert_eq!(contents, vec!["two", "one"]);

        let limited = backend.fetch_messages("bob", "alice", 1).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].content.as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn test_send_publishes_insert() {
        let backend = MemoryBackend::new();
        let mut sub = backend.subscribe_to_pair("bob", "alice").await.unwrap();

        let sent = backend
            .send_message(NewMessage::text("alice", "bob", "found your umbrella"))
            .await
            .unwrap();

        match sub.events.recv().await.unwrap() {
            ChangeEvent::Insert { message } => assert_eq!(message, sent),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_mark_read_counts_changes_once() {
        let backend = MemoryBackend::new();
        backend.seed(NewMessage::text("bob", "alice", "a"), at(1)).await;
        backend.seed(NewMessage::text("bob", "alice", "b"), at(2)).await;
        backend.seed(NewMessage::text("alice", "bob", "c"), at(3)).await;

        assert_eq!(backend.mark_read("alice", "bob").await.unwrap(), 2);
        assert_eq!(backend.mark_read("alice", "bob").await.unwrap(), 0);
        assert_eq!(backend.calls().mark_read(), 2);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let backend = MemoryBackend::new();
        backend.fail_history_for("bob").await;
        backend.fail_feed(true).await;

        assert!(backend.fetch_messages("alice", "bob", 10).await.is_err());
        assert!(backend.fetch_messages("alice", "carol", 10).await.is_ok());
        assert!(backend.fetch_recent_feed("alice", 10).await.is_err());
    }
}
