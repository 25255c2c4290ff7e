//! Backend abstraction layer.
//!
//! Provides a trait-based backend with implementations for:
//! - In-memory storage (tests and offline demos)
//! - SQLite storage with an in-process push hub

mod hub;
mod memory;
mod sqlite;
mod traits;

pub use hub::{DEFAULT_SUBSCRIPTION_BUFFER, PushHub};
pub use memory::{CallCounts, MemoryBackend};
pub use sqlite::{ItemKind, SqliteBackend};
pub use traits::{Backend, Subscription, SubscriptionHandle};
