//! Canonical protocol types shared by the lostfound messaging core and its
//! backends.
//!
//! - [`messages`]: persisted message records and push-channel events
//! - [`conversations`]: derived inbox summaries and participant pairs
//! - [`profiles`]: display metadata resolved for users and listings

pub mod conversations;
pub mod messages;
pub mod profiles;

pub use conversations::{Conversation, Pair};
pub use messages::{ChangeEvent, Message, MessageId, NewMessage};
pub use profiles::{ItemSummary, UserProfile};
