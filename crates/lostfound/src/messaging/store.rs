//! Ordered, deduplicated message history for one pair of participants.

use log::{debug, warn};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use lostfound_protocol::{Message, MessageId, Pair};

use crate::backend::Backend;
use crate::error::{BackendResult, FetchError};

/// Default number of messages loaded when a chat opens.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Fetch up to `limit` most recent messages for `pair`, oldest first.
pub async fn load_history(
    backend: &dyn Backend,
    pair: &Pair,
    limit: usize,
) -> Result<Vec<Message>, FetchError> {
    let mut messages = backend
        .fetch_messages(&pair.user_id, &pair.other_id, limit)
        .await
        .map_err(FetchError::History)?;
    // Backends return newest first.
    messages.reverse();
    messages.sort_by_key(|m| m.sent_at);
    Ok(messages)
}

/// What [`MessageStore::append`] did with a message.
#[derive(Debug)]
pub enum AppendOutcome {
    /// A message with the same id was already present.
    Duplicate,

    /// The message was inserted. When it was an unread message addressed to
    /// the local user, `read_ack` is the fire-and-forget acknowledgement task.
    Inserted { read_ack: Option<JoinHandle<()>> },
}

impl AppendOutcome {
    pub fn is_inserted(&self) -> bool {
        matches!(self, AppendOutcome::Inserted { .. })
    }
}

/// Message history of one open chat.
///
/// Entries are unique by id and kept in ascending `sent_at` order; messages
/// sharing a timestamp stay in the order they were added.
pub struct MessageStore {
    backend: Arc<dyn Backend>,
    pair: Pair,
    messages: Vec<Message>,
    ids: HashSet<MessageId>,
}

impl MessageStore {
    pub fn new(backend: Arc<dyn Backend>, pair: Pair) -> Self {
        Self {
            backend,
            pair,
            messages: Vec::new(),
            ids: HashSet::new(),
        }
    }

    pub fn pair(&self) -> &Pair {
        &self.pair
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.ids.contains(&id)
    }

    /// Unread messages from the counterpart.
    pub fn unread_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.is_unread_for(&self.pair.user_id))
            .count()
    }

    /// Fetch the pair's history; the result is not applied.
    pub async fn load(&self, limit: usize) -> Result<Vec<Message>, FetchError> {
        load_history(self.backend.as_ref(), &self.pair, limit).await
    }

    /// Apply a loaded history. Messages already present (for example delivered
    /// by the push channel before the load finished) are skipped.
    ///
    /// Returns how many messages were new.
    pub fn merge(&mut self, loaded: Vec<Message>) -> usize {
        loaded
            .into_iter()
            .filter(|message| self.insert(message.clone()))
            .count()
    }

    /// Add one message unless its id is already present.
    ///
    /// An unread message addressed to the local user is marked read locally
    /// and acknowledged to the backend on the current tokio runtime. Outside a
    /// runtime no acknowledgement is sent and the message stays unread, so a
    /// later [`MessageStore::mark_read`] picks it up.
    pub fn append(&mut self, mut message: Message) -> AppendOutcome {
        if self.ids.contains(&message.id) {
            debug!("Ignoring duplicate message {}", message.id);
            return AppendOutcome::Duplicate;
        }

        let read_ack = if message.is_unread_for(&self.pair.user_id) {
            let ack = self.spawn_read_ack();
            if ack.is_some() {
                message.read = true;
            }
            ack
        } else {
            None
        };
        self.insert(message);

        AppendOutcome::Inserted { read_ack }
    }

    /// Refresh the read flag of a message already in the store.
    pub fn apply_update(&mut self, updated: &Message) -> bool {
        match self.messages.iter_mut().find(|m| m.id == updated.id) {
            Some(existing) if updated.read && !existing.read => {
                existing.read = true;
                true
            }
            _ => false,
        }
    }

    /// Mark everything the counterpart sent to the local user as read.
    ///
    /// Safe to repeat: a second call changes nothing.
    pub async fn mark_read(&mut self) -> BackendResult<u64> {
        let changed = self
            .backend
            .mark_read(&self.pair.user_id, &self.pair.other_id)
            .await?;
        for message in &mut self.messages {
            if message.is_unread_for(&self.pair.user_id) {
                message.read = true;
            }
        }
        Ok(changed)
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.ids.clear();
    }

    fn insert(&mut self, message: Message) -> bool {
        if !self.ids.insert(message.id) {
            return false;
        }
        let position = self
            .messages
            .partition_point(|existing| existing.sent_at <= message.sent_at);
        self.messages.insert(position, message);
        true
    }

    fn spawn_read_ack(&self) -> Option<JoinHandle<()>> {
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(err) => {
                warn!("Not acknowledging messages for {}: {}", self.pair, err);
                return None;
            }
        };
        let backend = Arc::clone(&self.backend);
        let pair = self.pair.clone();
        Some(runtime.spawn(async move {
            if let Err(err) = backend.mark_read(&pair.user_id, &pair.other_id).await {
                warn!("Failed to acknowledge messages for {}: {}", pair, err);
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use lostfound_protocol::NewMessage;

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn message(id: MessageId, sender: &str, receiver: &str, minute: i64) -> Message {
        Message {
            id,
            sender_id: sender.to_string(),
            receiver_id: receiver.to_string(),
            item_id: None,
            content: Some(format!("message {id}")),
            photo_url: None,
            sent_at: at(minute),
            read: false,
        }
    }

    fn store(backend: Arc<MemoryBackend>) -> MessageStore {
        MessageStore::new(backend, Pair::new("alice", "bob"))
    }

    fn assert_sorted(store: &MessageStore) {
        assert!(
            store
                .messages()
                .windows(2)
                .all(|w| w[0].sent_at <= w[1].sent_at)
        );
    }

    #[tokio::test]
    async fn test_append_ignores_duplicate_ids() {
        let mut store = store(Arc::new(MemoryBackend::new()));

        assert!(store.append(message(1, "alice", "bob", 1)).is_inserted());
        assert!(store.append(message(2, "alice", "bob", 2)).is_inserted());
        assert!(!store.append(message(1, "alice", "bob", 1)).is_inserted());
        assert!(!store.append(message(2, "alice", "bob", 5)).is_inserted());

        let ids: Vec<_> = store.messages().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_append_keeps_chronological_order() {
        let mut store = store(Arc::new(MemoryBackend::new()));
        for (id, minute) in [(1, 5), (2, 1), (3, 9), (4, 3), (5, 5)] {
            store.append(message(id, "alice", "bob", minute));
        }

        assert_sorted(&store);
        let ids: Vec<_> = store.messages().iter().map(|m| m.id).collect();
        // Equal timestamps keep insertion order.
        assert_eq!(ids, vec![2, 4, 1, 5, 3]);
    }

    #[tokio::test]
    async fn test_inbound_append_acknowledges_read() {
        let backend = Arc::new(MemoryBackend::new());
        let mut store = store(backend.clone());

        match store.append(message(1, "bob", "alice", 1)) {
            AppendOutcome::Inserted {
                read_ack: Some(handle),
            } => handle.await.unwrap(),
            other => panic!("expected an acknowledgement, got {other:?}"),
        }
        assert_eq!(backend.calls().mark_read(), 1);
        assert!(store.messages()[0].read);

        // Outgoing messages are never acknowledged.
        match store.append(message(2, "alice", "bob", 2)) {
            AppendOutcome::Inserted { read_ack } => assert!(read_ack.is_none()),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failed_acknowledgement_is_not_an_error() {
        let backend = Arc::new(MemoryBackend::new());
        backend.fail_mark_read(true).await;
        let mut store = store(backend.clone());

        if let AppendOutcome::Inserted {
            read_ack: Some(handle),
        } = store.append(message(1, "bob", "alice", 1))
        {
            handle.await.unwrap();
        }
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_append_outside_runtime_leaves_message_unread() {
        let backend = Arc::new(MemoryBackend::new());
        let mut store = store(backend.clone());

        match store.append(message(1, "bob", "alice", 1)) {
            AppendOutcome::Inserted { read_ack } => assert!(read_ack.is_none()),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(store.len(), 1);
        assert!(!store.messages()[0].read);
        assert_eq!(store.unread_count(), 1);
        assert_eq!(backend.calls().mark_read(), 0);
    }

    #[tokio::test]
    async fn test_load_returns_oldest_first() {
        let backend = Arc::new(MemoryBackend::new());
        backend.seed(NewMessage::text("alice", "bob", "first"), at(1)).await;
        backend.seed(NewMessage::text("bob", "alice", "second"), at(2)).await;
        backend.seed(NewMessage::text("alice", "bob", "third"), at(3)).await;

        let store = store(backend);
        let loaded = store.load(2).await.unwrap();
        let contents: Vec<_> = loaded.iter().filter_map(|m| m.content.as_deref()).collect();
        assert_eq!(contents, vec!["second", "third"]);
    }

    #[tokio::test]
    async fn test_load_failure_is_fetch_error() {
        let backend = Arc::new(MemoryBackend::new());
        backend.fail_history_for("bob").await;
        let store = store(backend);
        assert!(matches!(store.load(10).await, Err(FetchError::History(_))));
    }

    #[tokio::test]
    async fn test_merge_after_realtime_events_converges() {
        let backend = Arc::new(MemoryBackend::new());
        let mut store = store(backend);

        // Push events land before the initial load resolves.
        store.append(message(3, "alice", "bob", 3));
        store.append(message(4, "alice", "bob", 4));

        let loaded = vec![
            message(1, "alice", "bob", 1),
            message(2, "alice", "bob", 2),
            message(3, "alice", "bob", 3),
        ];
        assert_eq!(store.merge(loaded), 2);

        let ids: Vec<_> = store.messages().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert_sorted(&store);
    }

    #[tokio::test]
    async fn test_mark_read_twice_matches_once() {
        let backend = Arc::new(MemoryBackend::new());
        backend.seed(NewMessage::text("bob", "alice", "hello"), at(1)).await;
        let mut store = store(backend.clone());
        let loaded = store.load(10).await.unwrap();
        store.merge(loaded);
        assert_eq!(store.unread_count(), 1);

        assert_eq!(store.mark_read().await.unwrap(), 1);
        let after_once: Vec<_> = store.messages().to_vec();
        assert_eq!(store.mark_read().await.unwrap(), 0);

        assert_eq!(store.messages(), after_once.as_slice());
        assert_eq!(store.unread_count(), 0);
    }

    #[tokio::test]
    async fn test_apply_update_sets_read_flag() {
        let mut store = store(Arc::new(MemoryBackend::new()));
        store.append(message(1, "alice", "bob", 1));

        let mut updated = message(1, "alice", "bob", 1);
        updated.read = true;
        assert!(store.apply_update(&updated));
        assert!(!store.apply_update(&updated));
        assert!(store.messages()[0].read);
    }
}
