//! Client-side search across the inbox's conversations.

use log::debug;
use serde::Serialize;
use std::sync::Arc;

use lostfound_protocol::{Conversation, Message, Pair};

use super::store::load_history;
use crate::backend::Backend;

/// Messages fetched per conversation when searching.
pub const SEARCH_HISTORY_LIMIT: usize = 200;

/// A message matching the search term, with the conversation it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    pub conversation: Conversation,
    pub message: Message,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    /// The term was blank; show the unfiltered conversation list.
    Inactive,

    Hits(Vec<SearchHit>),
}

impl SearchOutcome {
    pub fn hits(&self) -> &[SearchHit] {
        match self {
            SearchOutcome::Inactive => &[],
            SearchOutcome::Hits(hits) => hits.as_slice(),
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, SearchOutcome::Hits(_))
    }
}

pub struct MessageSearch {
    backend: Arc<dyn Backend>,
    user_id: String,
    history_limit: usize,
}

impl MessageSearch {
    pub fn new(backend: Arc<dyn Backend>, user_id: impl Into<String>) -> Self {
        Self {
            backend,
            user_id: user_id.into(),
            history_limit: SEARCH_HISTORY_LIMIT,
        }
    }

    pub fn with_history_limit(mut self, history_limit: usize) -> Self {
        self.history_limit = history_limit.max(1);
        self
    }

    /// Find messages whose text contains `term`, ignoring case.
    ///
    /// Hits are grouped by conversation in the order given, then oldest first
    /// within a conversation. A conversation whose history cannot be fetched
    /// contributes nothing.
    pub async fn search(&self, term: &str, conversations: &[Conversation]) -> SearchOutcome {
        let term = term.trim();
        if term.is_empty() {
            return SearchOutcome::Inactive;
        }
        let needle = term.to_lowercase();

        let mut hits = Vec::new();
        for conversation in conversations {
            let pair = Pair::new(self.user_id.as_str(), conversation.other_id.as_str());
            let history =
                match load_history(self.backend.as_ref(), &pair, self.history_limit).await {
                    Ok(history) => history,
                    Err(err) => {
                        debug!("Skipping {} in search: {}", pair, err);
                        continue;
                    }
                };
            hits.extend(
                history
                    .into_iter()
                    .filter(|message| message.content_contains(&needle))
                    .map(|message| SearchHit {
                        conversation: conversation.clone(),
                        message,
                    }),
            );
        }

        SearchOutcome::Hits(hits)
    }
}
