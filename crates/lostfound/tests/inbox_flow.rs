//! Inbox aggregation and search against the SQLite backend.

use lostfound::backend::Backend;
use lostfound::messaging::{InboxScreen, InboxView, UNKNOWN_USER_NAME};
use lostfound::protocol::NewMessage;

mod common;
use common::{marketplace, send};

#[tokio::test]
async fn test_inbox_summarizes_each_counterpart() {
    let backend = marketplace().await;
    send(&backend, "ann", "me", "Found a keyring near the park").await;
    backend
        .send_message(NewMessage::text("me", "ann", "Is it the blue one?").with_item("keys-1"))
        .await
        .unwrap();
    send(&backend, "ann", "me", "Yes").await;
    send(&backend, "ben", "me", "Any luck with the bike?").await;

    let mut inbox = InboxScreen::new(backend.clone(), "me");
    inbox.refresh().await;
    assert!(inbox.error().is_none());

    let conversations = inbox.conversations();
    assert_eq!(conversations.len(), 2);

    assert_eq!(conversations[0].other_id, "ben");
    assert_eq!(conversations[0].other_name, "Ben");
    assert_eq!(conversations[0].unread, 1);

    assert_eq!(conversations[1].other_id, "ann");
    assert_eq!(conversations[1].other_name, "Ann");
    assert_eq!(conversations[1].last_message, "Yes");
    assert_eq!(conversations[1].unread, 2);
    assert!(conversations[1].item_id.is_none());

    backend.mark_read("me", "ann").await.unwrap();
    inbox.refresh().await;
    assert!(!inbox.conversations()[1].has_unread());
}

#[tokio::test]
async fn test_inbox_item_title_and_unknown_user() {
    let backend = marketplace().await;
    backend
        .send_message(NewMessage::text("zoe", "me", "Is this yours?").with_item("keys-1"))
        .await
        .unwrap();

    let mut inbox = InboxScreen::new(backend, "me");
    inbox.refresh().await;

    let conversation = &inbox.conversations()[0];
    assert_eq!(conversation.other_name, UNKNOWN_USER_NAME);
    assert_eq!(conversation.item_title.as_deref(), Some("Blue keyring"));
}

#[tokio::test]
async fn test_search_finds_messages_across_conversations() {
    let backend = marketplace().await;
    send(&backend, "ann", "me", "Found your Keys!").await;
    send(&backend, "ben", "me", "No keys here, only a wallet").await;
    send(&backend, "ben", "me", "Call me").await;

    let mut inbox = InboxScreen::new(backend, "me").with_limits(100, 200);
    inbox.refresh().await;

    inbox.set_search("KEYS").await;
    let InboxView::SearchResults(hits) = inbox.visible() else {
        panic!("expected search results");
    };
    let found: Vec<_> = hits
        .iter()
        .map(|hit| hit.conversation.other_id.as_str())
        .collect();
    assert_eq!(found, vec!["ben", "ann"]);

    inbox.set_search("xyz").await;
    assert_eq!(inbox.visible(), InboxView::SearchResults(&[]));

    inbox.set_search("").await;
    assert!(matches!(inbox.visible(), InboxView::Conversations(c) if c.len() == 2));
}
