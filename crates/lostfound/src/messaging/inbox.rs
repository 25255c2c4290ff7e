//! Inbox screen model: conversation list with optional search.

use log::warn;
use std::sync::Arc;

use lostfound_protocol::Conversation;

use super::conversations::ConversationAggregator;
use super::search::{MessageSearch, SearchHit, SearchOutcome};
use crate::backend::Backend;

/// What the inbox currently shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboxView<'a> {
    Conversations(&'a [Conversation]),
    SearchResults(&'a [SearchHit]),
}

pub struct InboxScreen {
    user_id: String,
    aggregator: ConversationAggregator,
    search: MessageSearch,
    conversations: Vec<Conversation>,
    /// Active search term, rerun on every refresh.
    term: Option<String>,
    results: SearchOutcome,
    error: Option<String>,
}

impl InboxScreen {
    pub fn new(backend: Arc<dyn Backend>, user_id: impl Into<String>) -> Self {
        let user_id = user_id.into();
        Self {
            aggregator: ConversationAggregator::new(Arc::clone(&backend)),
            search: MessageSearch::new(backend, user_id.as_str()),
            user_id,
            conversations: Vec::new(),
            term: None,
            results: SearchOutcome::Inactive,
            error: None,
        }
    }

    pub fn with_limits(mut self, feed_limit: usize, search_history_limit: usize) -> Self {
        self.aggregator = self.aggregator.with_feed_limit(feed_limit);
        self.search = self.search.with_history_limit(search_history_limit);
        self
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Rebuild the conversation list and rerun an active search against it.
    /// A failed fetch empties the list and records the error text.
    pub async fn refresh(&mut self) {
        match self.aggregator.build(&self.user_id).await {
            Ok(conversations) => {
                self.conversations = conversations;
                self.error = None;
            }
            Err(err) => {
                warn!("{err}");
                self.conversations.clear();
                self.error = Some(err.to_string());
            }
        }
        self.rerun_search().await;
    }

    /// Search the loaded conversations. A blank term restores the list.
    pub async fn set_search(&mut self, term: &str) {
        let term = term.trim();
        self.term = (!term.is_empty()).then(|| term.to_string());
        self.rerun_search().await;
    }

    pub fn clear_search(&mut self) {
        self.term = None;
        self.results = SearchOutcome::Inactive;
    }

    pub fn search_term(&self) -> Option<&str> {
        self.term.as_deref()
    }

    async fn rerun_search(&mut self) {
        self.results = match self.term {
            Some(ref term) => self.search.search(term, &self.conversations).await,
            None => SearchOutcome::Inactive,
        };
    }

    pub fn visible(&self) -> InboxView<'_> {
        match &self.results {
            SearchOutcome::Inactive => InboxView::Conversations(&self.conversations),
            SearchOutcome::Hits(hits) => InboxView::SearchResults(hits),
        }
    }
}
