//! Messaging core behind the inbox and chat screens.
//!
//! Screens own their state and mutate it through `&mut self`, so appends to a
//! store never interleave. Backend calls are the only suspension points; a
//! history load may resolve before or after live events and the store
//! converges either way.

mod chat;
mod conversations;
mod inbox;
mod search;
mod store;
mod sync;

pub use chat::{ChatScreen, LoadOutcome, LoadRequest};
pub use conversations::{ConversationAggregator, MAX_FEED_LIMIT, UNKNOWN_USER_NAME};
pub use inbox::{InboxScreen, InboxView};
pub use search::{MessageSearch, SEARCH_HISTORY_LIMIT, SearchHit, SearchOutcome};
pub use store::{AppendOutcome, DEFAULT_HISTORY_LIMIT, MessageStore, load_history};
pub use sync::{SyncBridge, SyncState, SyncUpdate};
