//! Canonical message types.
//!
//! A message is a direct exchange between two users, optionally about a
//! listing. Messages are created by the backend on send and are immutable
//! except for the `read` flag, which flips once when the receiver acknowledges.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::conversations::Pair;

/// Server-assigned message identifier. Monotonic per backend, so it doubles as
/// a tie-breaker between messages sharing a timestamp.
pub type MessageId = i64;

/// Preview text shown for messages that carry only a photo.
pub const PHOTO_PREVIEW: &str = "Photo";

/// A persisted direct message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,

    pub sender_id: String,

    pub receiver_id: String,

    /// Listing the message is about.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,

    /// Server-assigned send time.
    pub sent_at: DateTime<Utc>,

    #[serde(default)]
    pub read: bool,
}

impl Message {
    /// The participant that is not `user_id`.
    ///
    /// For a message a user sent to themselves this is the user again.
    pub fn counterpart(&self, user_id: &str) -> &str {
        if self.sender_id == user_id {
            &self.receiver_id
        } else {
            &self.sender_id
        }
    }

    /// Whether `user_id` is the receiver of this message.
    pub fn is_addressed_to(&self, user_id: &str) -> bool {
        self.receiver_id == user_id
    }

    /// Whether this message is an unread message addressed to `user_id`.
    pub fn is_unread_for(&self, user_id: &str) -> bool {
        !self.read && self.is_addressed_to(user_id)
    }

    /// Whether this message was exchanged between the two members of `pair`,
    /// in either direction.
    pub fn belongs_to(&self, pair: &Pair) -> bool {
        pair.matches(&self.sender_id, &self.receiver_id)
    }

    /// One-line preview used by inbox summaries.
    pub fn preview(&self) -> String {
        match (&self.content, &self.photo_url) {
            (Some(content), _) if !content.trim().is_empty() => content.clone(),
            (_, Some(_)) => PHOTO_PREVIEW.to_string(),
            _ => String::new(),
        }
    }

    /// Case-insensitive substring match on the text content.
    ///
    /// `needle` must already be lowercased.
    pub fn content_contains(&self, needle: &str) -> bool {
        self.content
            .as_deref()
            .is_some_and(|content| content.to_lowercase().contains(needle))
    }
}

/// Fields supplied by the sender; the backend assigns id, timestamp and read
/// state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    pub sender_id: String,
    pub receiver_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
}

impl NewMessage {
    /// A text message from `sender_id` to `receiver_id`.
    pub fn text(
        sender_id: impl Into<String>,
        receiver_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            sender_id: sender_id.into(),
            receiver_id: receiver_id.into(),
            item_id: None,
            content: Some(content.into()),
            photo_url: None,
        }
    }

    /// Attach the listing this message is about.
    pub fn with_item(mut self, item_id: impl Into<String>) -> Self {
        self.item_id = Some(item_id.into());
        self
    }

    /// Attach an already-uploaded photo.
    pub fn with_photo(mut self, photo_url: impl Into<String>) -> Self {
        self.photo_url = Some(photo_url.into());
        self
    }

    /// True when there is neither text nor a photo to send.
    pub fn is_empty(&self) -> bool {
        let has_text = self
            .content
            .as_deref()
            .is_some_and(|content| !content.trim().is_empty());
        !has_text && self.photo_url.is_none()
    }
}

/// Change notification delivered over the push channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeEvent {
    /// A message was created.
    Insert { message: Message },

    /// An existing message changed (the read flag is the only mutable field).
    Update { message: Message },
}

impl ChangeEvent {
    /// The message carried by this event.
    pub fn message(&self) -> &Message {
        match self {
            ChangeEvent::Insert { message } | ChangeEvent::Update { message } => message,
        }
    }
}
