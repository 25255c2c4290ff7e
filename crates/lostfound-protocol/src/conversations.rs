//! Conversation summaries and participant pairs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Two participants seen from one side: `user_id` is the local user,
/// `other_id` the counterpart.
///
/// Matching is unordered, so a pair covers messages in both directions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pair {
    pub user_id: String,
    pub other_id: String,
}

impl Pair {
    pub fn new(user_id: impl Into<String>, other_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            other_id: other_id.into(),
        }
    }

    /// Whether `a` and `b` are the two members of this pair, in any order.
    pub fn matches(&self, a: &str, b: &str) -> bool {
        (self.user_id == a && self.other_id == b) || (self.user_id == b && self.other_id == a)
    }

    /// Whether `user_id` is one of the two members.
    pub fn involves(&self, user_id: &str) -> bool {
        self.user_id == user_id || self.other_id == user_id
    }
}

impl std::fmt::Display for Pair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}<->{}", self.user_id, self.other_id)
    }
}

/// Inbox row: the most recent exchange with one counterpart.
///
/// Derived from the message feed on every refresh; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub other_id: String,

    /// Display name, or a placeholder when the lookup failed.
    pub other_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,

    pub last_message: String,

    pub last_message_at: DateTime<Utc>,

    /// Unread messages from the counterpart within the fetched feed.
    pub unread: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_title: Option<String>,
}

impl Conversation {
    pub fn has_unread(&self) -> bool {
        self.unread > 0
    }
}
