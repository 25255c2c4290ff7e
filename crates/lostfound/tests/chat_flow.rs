//! Chat screens driven against the SQLite backend and its push channel.

use std::sync::Arc;

use lostfound::backend::Backend;
use lostfound::messaging::{ChatScreen, SyncState};

mod common;
use common::{marketplace, send, wait_until_read};

fn contents(chat: &ChatScreen) -> Vec<&str> {
    chat.messages()
        .iter()
        .filter_map(|message| message.content.as_deref())
        .collect()
}

#[tokio::test]
async fn test_open_loads_history_and_marks_read() {
    let backend = marketplace().await;
    send(&backend, "ann", "me", "Found a keyring near the park").await;
    send(&backend, "me", "ann", "Is it blue?").await;
    send(&backend, "ann", "me", "Yes, with a bottle opener").await;

    let mut chat = ChatScreen::new(backend.clone(), "me");
    chat.open("ann").await;

    assert_eq!(
        contents(&chat),
        vec![
            "Found a keyring near the park",
            "Is it blue?",
            "Yes, with a bottle opener"
        ]
    );
    assert_eq!(chat.sync_state(), SyncState::Active);
    assert!(wait_until_read(&backend, "me", "ann").await);
    assert_eq!(backend.mark_read("me", "ann").await.unwrap(), 0);

    chat.close().await;
    assert_eq!(backend.hub().subscriber_count(), 0);
}

#[tokio::test]
async fn test_live_message_is_appended_and_acknowledged() {
    let backend = marketplace().await;
    let mut chat = ChatScreen::new(backend.clone(), "me");
    chat.open("ann").await;
    assert!(chat.messages().is_empty());

    let sent = send(&backend, "ann", "me", "I think I found your keys").await;
    let update = chat.next_update().await.unwrap();

    assert_eq!(update.message().id, sent.id);
    assert_eq!(chat.messages().len(), 1);
    assert!(chat.messages()[0].read);
    assert!(wait_until_read(&backend, "me", "ann").await);
}

#[tokio::test]
async fn test_two_screens_exchange_messages() {
    let backend = marketplace().await;
    let mut mine = ChatScreen::new(backend.clone(), "me");
    let mut theirs = ChatScreen::new(backend.clone(), "ann");
    mine.open("ann").await;
    theirs.open("me").await;

    mine.set_draft("Is it the blue keyring?");
    let sent = mine.send(Some("keys-1".to_string()), None).await.unwrap();
    assert_eq!(mine.draft(), "");
    assert_eq!(sent.item_id.as_deref(), Some("keys-1"));

    // The push echo of our own message is dropped as a duplicate.
    assert_eq!(mine.next_update().await.unwrap().message().id, sent.id);
    assert_eq!(mine.messages().len(), 1);

    assert_eq!(theirs.next_update().await.unwrap().message().id, sent.id);
    assert_eq!(contents(&theirs), vec!["Is it the blue keyring?"]);
    assert!(wait_until_read(&backend, "ann", "me").await);
}

#[tokio::test]
async fn test_events_before_load_converge() {
    let backend = marketplace().await;
    send(&backend, "ann", "me", "older").await;

    let mut chat = ChatScreen::new(backend.clone(), "me");
    let request = chat.focus("ann").await;
    send(&backend, "ann", "me", "newer").await;

    let outcome = request.execute(backend.clone()).await;
    assert!(chat.apply_load(outcome).await);
    assert_eq!(chat.drain_updates().await, 1);

    assert_eq!(contents(&chat), vec!["older", "newer"]);
}

#[tokio::test]
async fn test_pair_change_discards_stale_history() {
    let backend = marketplace().await;
    send(&backend, "ann", "me", "from ann").await;
    send(&backend, "ben", "me", "from ben").await;

    let mut chat = ChatScreen::new(backend.clone(), "me");
    let first = chat.focus("ann").await;
    let second = chat.focus("ben").await;

    let shared: Arc<dyn Backend> = backend.clone();
    let stale = tokio::spawn(first.execute(Arc::clone(&shared)));
    let fresh = second.execute(shared).await;

    assert!(chat.apply_load(fresh).await);
    assert!(!chat.apply_load(stale.await.unwrap()).await);
    assert_eq!(contents(&chat), vec!["from ben"]);
    assert_eq!(backend.hub().subscriber_count(), 1);
}

#[tokio::test]
async fn test_photo_only_message() {
    let backend = marketplace().await;
    let mut chat = ChatScreen::new(backend.clone(), "me");
    chat.open("ben").await;

    let sent = chat
        .send(None, Some("https://cdn.example/keys.jpg".to_string()))
        .await
        .unwrap();
    assert!(sent.content.is_none());
    assert_eq!(sent.preview(), "Photo");
}
