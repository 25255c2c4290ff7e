//! Inbox aggregation: one summary row per counterpart.

use log::warn;
use std::collections::HashMap;
use std::sync::Arc;

use lostfound_protocol::{Conversation, ItemSummary, Message, UserProfile};

use crate::backend::Backend;
use crate::error::{FetchError, LookupError};

/// Upper bound on the feed fetched for the inbox.
pub const MAX_FEED_LIMIT: usize = 100;

/// Name shown when a counterpart's profile cannot be resolved.
pub const UNKNOWN_USER_NAME: &str = "Unknown user";

/// Builds inbox rows from the recent-message feed.
pub struct ConversationAggregator {
    backend: Arc<dyn Backend>,
    feed_limit: usize,
}

impl ConversationAggregator {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            feed_limit: MAX_FEED_LIMIT,
        }
    }

    /// Use a smaller feed; values above [`MAX_FEED_LIMIT`] are capped.
    pub fn with_feed_limit(mut self, feed_limit: usize) -> Self {
        self.feed_limit = feed_limit.clamp(1, MAX_FEED_LIMIT);
        self
    }

    pub fn feed_limit(&self) -> usize {
        self.feed_limit
    }

    /// Fetch the feed of `user_id` and summarize it.
    ///
    /// Rows come out in the order their counterparts first appear in the
    /// newest-first feed, so the most recently active conversation leads. No
    /// re-sort by timestamp is applied.
    pub async fn build(&self, user_id: &str) -> Result<Vec<Conversation>, FetchError> {
        let feed = self
            .backend
            .fetch_recent_feed(user_id, self.feed_limit)
            .await
            .map_err(FetchError::Feed)?;
        Ok(self.summarize(user_id, feed).await)
    }

    /// Group a newest-first feed by counterpart.
    ///
    /// The first message seen for a counterpart seeds its row; later (older)
    /// messages only contribute to the unread count.
    pub async fn summarize(&self, user_id: &str, feed: Vec<Message>) -> Vec<Conversation> {
        let mut lookups = LookupCache::default();
        let mut conversations: Vec<Conversation> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for message in feed {
            let other_id = message.counterpart(user_id).to_string();
            let unread = usize::from(message.is_unread_for(user_id));

            if let Some(&position) = index.get(&other_id) {
                conversations[position].unread += unread;
                continue;
            }

            let profile = lookups.user(self.backend.as_ref(), &other_id).await;
            let item_title = match message.item_id.as_deref() {
                Some(item_id) => lookups
                    .item(self.backend.as_ref(), item_id)
                    .await
                    .map(|item| item.title),
                None => None,
            };

            index.insert(other_id.clone(), conversations.len());
            conversations.push(Conversation {
                other_name: profile
                    .as_ref()
                    .map(|p| p.name.clone())
                    .unwrap_or_else(|| UNKNOWN_USER_NAME.to_string()),
                avatar_url: profile.and_then(|p| p.avatar_url),
                other_id,
                last_message: message.preview(),
                last_message_at: message.sent_at,
                unread,
                item_id: message.item_id,
                item_title,
            });
        }

        conversations
    }
}

/// Per-build memo of user and item lookups. Failed lookups are remembered
/// too, so each id costs at most one backend call.
#[derive(Default)]
struct LookupCache {
    users: HashMap<String, Option<UserProfile>>,
    items: HashMap<String, Option<ItemSummary>>,
}

impl LookupCache {
    async fn user(&mut self, backend: &dyn Backend, user_id: &str) -> Option<UserProfile> {
        if let Some(cached) = self.users.get(user_id) {
            return cached.clone();
        }
        let resolved = match backend.lookup_user(user_id).await {
            Ok(profile) => profile,
            Err(source) => {
                let err = LookupError::User {
                    user_id: user_id.to_string(),
                    source,
                };
                warn!("{err}");
                None
            }
        };
        self.users.insert(user_id.to_string(), resolved.clone());
        resolved
    }

    async fn item(&mut self, backend: &dyn Backend, item_id: &str) -> Option<ItemSummary> {
        if let Some(cached) = self.items.get(item_id) {
            return cached.clone();
        }
        let resolved = match backend.lookup_item(item_id).await {
            Ok(item) => item,
            Err(source) => {
                let err = LookupError::Item {
                    item_id: item_id.to_string(),
                    source,
                };
                warn!("{err}");
                None
            }
        };
        self.items.insert(item_id.to_string(), resolved.clone());
        resolved
    }
}
