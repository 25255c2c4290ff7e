//! Chat screen model: message store plus sync bridge for the open pair.

use log::{debug, warn};
use std::sync::Arc;

use lostfound_protocol::{Message, NewMessage, Pair};

use super::store::{DEFAULT_HISTORY_LIMIT, MessageStore, load_history};
use super::sync::{SyncBridge, SyncState, SyncUpdate};
use crate::backend::Backend;
use crate::error::{FetchError, SendError};

/// History fetch issued by [`ChatScreen::focus`].
///
/// It runs detached from the screen, so the screen may move on while the fetch
/// is in flight; [`ChatScreen::apply_load`] decides whether the result still
/// applies.
#[derive(Debug, Clone)]
pub struct LoadRequest {
    epoch: u64,
    pair: Pair,
    limit: usize,
}

impl LoadRequest {
    pub fn pair(&self) -> &Pair {
        &self.pair
    }

    pub async fn execute(self, backend: Arc<dyn Backend>) -> LoadOutcome {
        let result = load_history(backend.as_ref(), &self.pair, self.limit).await;
        LoadOutcome {
            epoch: self.epoch,
            pair: self.pair,
            result,
        }
    }
}

#[derive(Debug)]
pub struct LoadOutcome {
    epoch: u64,
    pair: Pair,
    result: Result<Vec<Message>, FetchError>,
}

/// State behind one chat screen.
///
/// Every focus change bumps an epoch; loads stamped with an older epoch are
/// discarded when they resolve.
pub struct ChatScreen {
    backend: Arc<dyn Backend>,
    user_id: String,
    history_limit: usize,
    epoch: u64,
    store: Option<MessageStore>,
    bridge: SyncBridge,
    draft: String,
    error: Option<String>,
}

impl ChatScreen {
    pub fn new(backend: Arc<dyn Backend>, user_id: impl Into<String>) -> Self {
        Self {
            bridge: SyncBridge::new(Arc::clone(&backend)),
            backend,
            user_id: user_id.into(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            epoch: 0,
            store: None,
            draft: String::new(),
            error: None,
        }
    }

    pub fn with_history_limit(mut self, history_limit: usize) -> Self {
        self.history_limit = history_limit.max(1);
        self
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn pair(&self) -> Option<&Pair> {
        self.store.as_ref().map(MessageStore::pair)
    }

    /// Messages of the open conversation, oldest first.
    pub fn messages(&self) -> &[Message] {
        self.store.as_ref().map(MessageStore::messages).unwrap_or_default()
    }

    /// Last user-visible error (failed load or send).
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn sync_state(&self) -> SyncState {
        self.bridge.state()
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.draft = text.into();
    }

    /// Point the screen at `other_id`.
    ///
    /// Releases the previous subscription, starts an empty store, subscribes
    /// to the new pair and returns the history fetch to run.
    pub async fn focus(&mut self, other_id: &str) -> LoadRequest {
        self.bridge.disconnect().await;
        self.epoch += 1;

        let pair = Pair::new(self.user_id.as_str(), other_id);
        self.store = Some(MessageStore::new(Arc::clone(&self.backend), pair.clone()));
        self.error = None;
        if pair.user_id.is_empty() || pair.other_id.is_empty() {
            debug!("Not subscribing for incomplete pair {}", pair);
        } else {
            self.bridge.connect(pair.clone()).await;
        }

        LoadRequest {
            epoch: self.epoch,
            pair,
            limit: self.history_limit,
        }
    }

    /// Apply a finished load and acknowledge what it brought in. Returns
    /// false, leaving the screen untouched, when the screen has moved on since
    /// the load was issued.
    pub async fn apply_load(&mut self, outcome: LoadOutcome) -> bool {
        if outcome.epoch != self.epoch {
            debug!("Discarding stale history for {}", outcome.pair);
            return false;
        }
        let Some(store) = self.store.as_mut() else {
            return false;
        };
        if store.pair() != &outcome.pair {
            return false;
        }

        match outcome.result {
            Ok(messages) => {
                store.merge(messages);
                self.acknowledge().await;
            }
            Err(err) => {
                warn!("{err}");
                self.error = Some(err.to_string());
            }
        }
        true
    }

    /// Focus, load and acknowledge in one go.
    pub async fn open(&mut self, other_id: &str) {
        let request = self.focus(other_id).await;
        let outcome = request.execute(Arc::clone(&self.backend)).await;
        self.apply_load(outcome).await;
    }

    /// Mark the counterpart's messages read when any are unread.
    pub async fn acknowledge(&mut self) {
        let Some(store) = self.store.as_mut() else {
            return;
        };
        if store.unread_count() == 0 {
            return;
        }
        if let Err(err) = store.mark_read().await {
            warn!("Failed to mark {} read: {}", store.pair(), err);
        }
    }

    /// Wait for the next live change and apply it.
    pub async fn next_update(&mut self) -> Option<SyncUpdate> {
        let update = self.bridge.next_update().await?;
        self.apply_update(&update);
        Some(update)
    }

    /// Apply every live change already queued. Returns how many arrived.
    pub async fn drain_updates(&mut self) -> usize {
        let updates = self.bridge.drain().await;
        for update in &updates {
            self.apply_update(update);
        }
        updates.len()
    }

    fn apply_update(&mut self, update: &SyncUpdate) {
        let Some(store) = self.store.as_mut() else {
            return;
        };
        match update {
            SyncUpdate::Inserted(message) => {
                store.append(message.clone());
            }
            SyncUpdate::Updated(message) => {
                store.apply_update(message);
            }
        }
    }

    /// Send the draft, optionally about a listing and with an uploaded photo.
    ///
    /// On success the draft is cleared and the message shows up immediately;
    /// the echo from the push channel is deduplicated. On failure the draft is
    /// kept and the error text is recorded.
    pub async fn send(
        &mut self,
        item_id: Option<String>,
        photo_url: Option<String>,
    ) -> Result<Message, SendError> {
        let result = self.try_send(item_id, photo_url).await;
        match &result {
            Ok(_) => {
                self.draft.clear();
                self.error = None;
            }
            Err(err) => self.error = Some(err.to_string()),
        }
        result
    }

    async fn try_send(
        &mut self,
        item_id: Option<String>,
        photo_url: Option<String>,
    ) -> Result<Message, SendError> {
        let store = self.store.as_mut().ok_or(SendError::NoConversation)?;
        let text = self.draft.trim();
        let message = NewMessage {
            sender_id: store.pair().user_id.clone(),
            receiver_id: store.pair().other_id.clone(),
            item_id,
            content: (!text.is_empty()).then(|| text.to_string()),
            photo_url,
        };
        if message.is_empty() {
            return Err(SendError::Empty);
        }

        let sent = self.backend.send_message(message).await?;
        store.append(sent.clone());
        Ok(sent)
    }

    /// Leave the screen: release the subscription and drop the history.
    pub async fn close(&mut self) {
        self.bridge.disconnect().await;
        self.epoch += 1;
        self.store = None;
    }
}
