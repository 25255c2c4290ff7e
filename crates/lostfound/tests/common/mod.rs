//! Shared setup for the messaging integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use lostfound::backend::{Backend, ItemKind, PushHub, SqliteBackend};
use lostfound::protocol::{ItemSummary, Message, NewMessage, UserProfile};

/// In-memory database with three users and one lost-item listing.
pub async fn marketplace() -> Arc<SqliteBackend> {
    let backend = SqliteBackend::in_memory(Arc::new(PushHub::default()))
        .await
        .unwrap();

    for (id, name) in [("me", "Morgan"), ("ann", "Ann"), ("ben", "Ben")] {
        backend
            .upsert_user(&UserProfile::new(id, name))
            .await
            .unwrap();
    }
    backend
        .upsert_item(&ItemSummary::new("keys-1", "Blue keyring"), "me", ItemKind::Lost)
        .await
        .unwrap();

    Arc::new(backend)
}

pub async fn send(backend: &SqliteBackend, from: &str, to: &str, text: &str) -> Message {
    backend
        .send_message(NewMessage::text(from, to, text))
        .await
        .unwrap()
}

/// Wait until every message from `sender` to `receiver` is read in the
/// database. Read acknowledgements run on spawned tasks.
pub async fn wait_until_read(backend: &SqliteBackend, receiver: &str, sender: &str) -> bool {
    for _ in 0..50 {
        let history = backend.fetch_messages(receiver, sender, 100).await.unwrap();
        if history
            .iter()
            .filter(|message| message.sender_id == sender)
            .all(|message| message.read)
        {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
