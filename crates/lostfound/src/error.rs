//! Error types for the messaging core.
//!
//! Backends report [`BackendError`]; each core operation wraps it in the kind
//! its caller recovers from.

use thiserror::Error;

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors reported by a [`Backend`](crate::backend::Backend) implementation.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Database query failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The backend could not be reached.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// A stored row could not be turned into a record.
    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

/// A read from the backend failed. Screens render "no data" plus the text.
#[derive(Debug, Error)]
pub enum FetchError {
    /// History for one conversation.
    #[error("failed to load messages: {0}")]
    History(#[source] BackendError),

    /// The recent-message feed behind the inbox.
    #[error("failed to load conversations: {0}")]
    Feed(#[source] BackendError),
}

/// Sending a message failed. The draft is kept so the user can retry.
#[derive(Debug, Error)]
pub enum SendError {
    /// Neither text nor a photo was supplied.
    #[error("message is empty")]
    Empty,

    /// No conversation is open on the screen.
    #[error("no conversation is open")]
    NoConversation,

    #[error("failed to send message: {0}")]
    Backend(#[from] BackendError),
}

/// Opening or keeping the push channel failed. Never surfaced to the user.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("failed to subscribe to {pair}: {source}")]
    Subscribe {
        pair: String,
        #[source]
        source: BackendError,
    },

    #[error("failed to release subscription {handle}: {source}")]
    Release {
        handle: u64,
        #[source]
        source: BackendError,
    },

    /// The backend dropped the channel.
    #[error("push channel for {pair} closed")]
    Closed { pair: String },
}

/// Display metadata could not be resolved. Degrades to a placeholder.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("failed to look up user {user_id}: {source}")]
    User {
        user_id: String,
        #[source]
        source: BackendError,
    },

    #[error("failed to look up item {item_id}: {source}")]
    Item {
        item_id: String,
        #[source]
        source: BackendError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FetchError::History(BackendError::Unavailable("offline".to_string()));
        assert_eq!(
            err.to_string(),
            "failed to load messages: backend unavailable: offline"
        );

        let err = LookupError::User {
            user_id: "usr_1".to_string(),
            source: BackendError::Unavailable("timeout".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "failed to look up user usr_1: backend unavailable: timeout"
        );
    }

    #[test]
    fn test_send_error_from_backend() {
        let err: SendError = BackendError::InvalidRecord("bad timestamp".to_string()).into();
        assert!(matches!(err, SendError::Backend(_)));
        assert_eq!(SendError::Empty.to_string(), "message is empty");
    }
}
