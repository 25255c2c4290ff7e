//! Lostfound messaging core.
//!
//! The inbox and chat screens of the lost-and-found marketplace are built from
//! four pieces:
//!
//! - [`messaging::MessageStore`]: ordered, deduplicated history for one pair
//! - [`messaging::ConversationAggregator`]: inbox rows from the recent feed
//! - [`messaging::SyncBridge`]: push-channel subscription per open chat
//! - [`messaging::MessageSearch`]: substring search over loaded conversations
//!
//! Persistence and fan-out live behind the [`backend::Backend`] trait, with an
//! in-memory implementation and a SQLite implementation.

pub mod backend;
pub mod config;
pub mod error;
pub mod messaging;

pub use lostfound_protocol as protocol;
