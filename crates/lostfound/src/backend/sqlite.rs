//! SQLite backend.
//!
//! Messages, users and listings live in one SQLite database; inserts and read
//! updates are fanned out through an in-process [`PushHub`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, instrument};

use lostfound_protocol::{ChangeEvent, ItemSummary, Message, NewMessage, UserProfile};

use super::hub::PushHub;
use super::traits::{Backend, Subscription, SubscriptionHandle};
use crate::error::{BackendError, BackendResult};

/// Schema for the marketplace messaging database.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    avatar_url TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Lost or found listings; only the title is needed by the messaging core
CREATE TABLE IF NOT EXISTS items (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    owner_id TEXT NOT NULL,
    kind TEXT NOT NULL CHECK(kind IN ('lost', 'found')),
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sender_id TEXT NOT NULL,
    receiver_id TEXT NOT NULL,
    item_id TEXT,
    content TEXT,
    photo_url TEXT,
    sent_at INTEGER NOT NULL,
    read INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_messages_pair ON messages(sender_id, receiver_id, sent_at);
CREATE INDEX IF NOT EXISTS idx_messages_receiver ON messages(receiver_id, sent_at);
"#;

const MESSAGE_COLUMNS: &str =
    "id, sender_id, receiver_id, item_id, content, photo_url, sent_at, read";

#[derive(Debug, sqlx::FromRow)]
struct MessageRow {
    id: i64,
    sender_id: String,
    receiver_id: String,
    item_id: Option<String>,
    content: Option<String>,
    photo_url: Option<String>,
    /// Unix milliseconds.
    sent_at: i64,
    read: bool,
}

impl TryFrom<MessageRow> for Message {
    type Error = BackendError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let sent_at = DateTime::<Utc>::from_timestamp_millis(row.sent_at).ok_or_else(|| {
            BackendError::InvalidRecord(format!(
                "message {} has out-of-range timestamp {}",
                row.id, row.sent_at
            ))
        })?;
        Ok(Message {
            id: row.id,
            sender_id: row.sender_id,
            receiver_id: row.receiver_id,
            item_id: row.item_id,
            content: row.content,
            photo_url: row.photo_url,
            sent_at,
            read: row.read,
        })
    }
}

fn into_messages(rows: Vec<MessageRow>) -> BackendResult<Vec<Message>> {
    rows.into_iter().map(Message::try_from).collect()
}

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: String,
    name: String,
    avatar_url: Option<String>,
}

/// Whether a listing reports something lost or something found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Lost,
    Found,
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemKind::Lost => write!(f, "lost"),
            ItemKind::Found => write!(f, "found"),
        }
    }
}

/// Backend backed by a SQLite database.
#[derive(Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
    hub: Arc<PushHub>,
}

impl SqliteBackend {
    /// Open or create the database at `path`.
    ///
    /// Creates the parent directory if it doesn't exist.
    pub async fn open(path: &Path, hub: Arc<PushHub>) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating database directory: {}", parent.display()))?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .context("parsing database URL")?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("connecting to database: {}", path.display()))?;

        let backend = Self { pool, hub };
        backend.initialize_schema().await?;
        Ok(backend)
    }

    /// Create an in-memory database (for testing).
    pub async fn in_memory(hub: Arc<PushHub>) -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .context("parsing in-memory database URL")?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("connecting to in-memory database")?;

        let backend = Self { pool, hub };
        backend.initialize_schema().await?;
        Ok(backend)
    }

    async fn initialize_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .context("initializing messaging database schema")?;
        Ok(())
    }

    pub fn hub(&self) -> &Arc<PushHub> {
        &self.hub
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert or update a user profile.
    #[instrument(skip(self, profile), fields(user_id = %profile.id))]
    pub async fn upsert_user(&self, profile: &UserProfile) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, name, avatar_url) VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET name = excluded.name, avatar_url = excluded.avatar_url
            "#,
        )
        .bind(&profile.id)
        .bind(&profile.name)
        .bind(&profile.avatar_url)
        .execute(&self.pool)
        .await
        .context("upserting user")?;
        Ok(())
    }

    /// Insert or update a listing.
    #[instrument(skip(self, item), fields(item_id = %item.id))]
    pub async fn upsert_item(&self, item: &ItemSummary, owner_id: &str, kind: ItemKind) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO items (id, title, owner_id, kind) VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET title = excluded.title
            "#,
        )
        .bind(&item.id)
        .bind(&item.title)
        .bind(owner_id)
        .bind(kind.to_string())
        .execute(&self.pool)
        .await
        .context("upserting item")?;
        Ok(())
    }

    async fn get_message(&self, id: i64) -> BackendResult<Message> {
        let row = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?"
        ))
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }
}

#[async_trait]
impl Backend for SqliteBackend {
    #[instrument(skip(self))]
    async fn fetch_messages(
        &self,
        user_id: &str,
        other_id: &str,
        limit: usize,
    ) -> BackendResult<Vec<Message>> {
        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS}
            FROM messages
            WHERE (sender_id = ? AND receiver_id = ?) OR (sender_id = ? AND receiver_id = ?)
            ORDER BY sent_at DESC, id DESC
            LIMIT ?
            "#
        ))
        .bind(user_id)
        .bind(other_id)
        .bind(other_id)
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        into_messages(rows)
    }

    #[instrument(skip(self))]
    async fn fetch_recent_feed(&self, user_id: &str, limit: usize) -> BackendResult<Vec<Message>> {
        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS}
            FROM messages
            WHERE sender_id = ? OR receiver_id = ?
            ORDER BY sent_at DESC, id DESC
            LIMIT ?
            "#
        ))
        .bind(user_id)
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        into_messages(rows)
    }

    #[instrument(skip(self, message), fields(sender = %message.sender_id, receiver = %message.receiver_id))]
    async fn send_message(&self, message: NewMessage) -> BackendResult<Message> {
        let sent_at = Utc::now().timestamp_millis();

        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO messages (sender_id, receiver_id, item_id, content, photo_url, sent_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&message.sender_id)
        .bind(&message.receiver_id)
        .bind(&message.item_id)
        .bind(&message.content)
        .bind(&message.photo_url)
        .bind(sent_at)
        .fetch_one(&self.pool)
        .await?;

        let stored = self.get_message(id).await?;
        let delivered = self.hub.publish(ChangeEvent::Insert {
            message: stored.clone(),
        });
        debug!("Message {} stored, pushed to {} subscription(s)", id, delivered);
        Ok(stored)
    }

    #[instrument(skip(self))]
    async fn mark_read(&self, receiver_id: &str, sender_id: &str) -> BackendResult<u64> {
        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            r#"
            UPDATE messages SET read = 1
            WHERE receiver_id = ? AND sender_id = ? AND read = 0
            RETURNING {MESSAGE_COLUMNS}
            "#
        ))
        .bind(receiver_id)
        .bind(sender_id)
        .fetch_all(&self.pool)
        .await?;

        let changed = into_messages(rows)?;
        for message in &changed {
            self.hub.publish(ChangeEvent::Update {
                message: message.clone(),
            });
        }
        Ok(changed.len() as u64)
    }

    async fn subscribe_to_pair(
        &self,
        user_id: &str,
        other_id: &str,
    ) -> BackendResult<Subscription> {
        Ok(self.hub.subscribe(user_id, other_id))
    }

    async fn unsubscribe(&self, handle: &SubscriptionHandle) -> BackendResult<()> {
        self.hub.unsubscribe(handle);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn lookup_user(&self, user_id: &str) -> BackendResult<Option<UserProfile>> {
        let row = sqlx::query_as::<_, UserRow>("SELECT id, name, avatar_url FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| UserProfile {
            id: row.id,
            name: row.name,
            avatar_url: row.avatar_url,
        }))
    }

    #[instrument(skip(self))]
    async fn lookup_item(&self, item_id: &str) -> BackendResult<Option<ItemSummary>> {
        let title = sqlx::query_scalar::<_, String>("SELECT title FROM items WHERE id = ?")
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(title.map(|title| ItemSummary::new(item_id, title)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn setup() -> SqliteBackend {
        SqliteBackend::in_memory(Arc::new(PushHub::default()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_send_and_fetch_pair() {
        let backend = setup().await;
        let first = backend
            .send_message(NewMessage::text("alice", "bob", "I think I found your dog"))
            .await
            .unwrap();
        let second = backend
            .send_message(NewMessage::text("bob", "alice", "Where?").with_item("itm_1"))
            .await
            .unwrap();
        backend
            .send_message(NewMessage::text("alice", "carol", "unrelated"))
            .await
            .unwrap();

        assert!(second.id > first.id);
        assert_eq!(second.item_id.as_deref(), Some("itm_1"));
        assert!(!second.read);

        let history = backend.fetch_messages("bob", "alice", 10).await.unwrap();
        let ids: Vec<_> = history.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);

        let feed = backend.fetch_recent_feed("alice", 10).await.unwrap();
        assert_eq!(feed.len(), 3);
    }

    #[tokio::test]
    async fn test_mark_read_is_idempotent() {
        let backend = setup().await;
        backend
            .send_message(NewMessage::text("bob", "alice", "hello"))
            .await
            .unwrap();
        backend
            .send_message(NewMessage::text("bob", "alice", "are you there?"))
            .await
            .unwrap();

        assert_eq!(backend.mark_read("alice", "bob").await.unwrap(), 2);
        assert_eq!(backend.mark_read("alice", "bob").await.unwrap(), 0);

        let history = backend.fetch_messages("alice", "bob", 10).await.unwrap();
        assert!(history.iter().all(|m| m.read));
    }

    #[tokio::test]
    async fn test_lookups() {
        let backend = setup().await;
        backend
            .upsert_user(&UserProfile::new("bob", "Bob").with_avatar("https://cdn.example/bob.png"))
            .await
            .unwrap();
        backend
            .upsert_item(&ItemSummary::new("itm_1", "Black umbrella"), "bob", ItemKind::Found)
            .await
            .unwrap();

        let bob = backend.lookup_user("bob").await.unwrap().unwrap();
        assert_eq!(bob.name, "Bob");
        assert!(backend.lookup_user("nobody").await.unwrap().is_none());

        let item = backend.lookup_item("itm_1").await.unwrap().unwrap();
        assert_eq!(item.title, "Black umbrella");
    }

    #[tokio::test]
    async fn test_push_channel_delivers_inserts() {
        let backend = setup().await;
        let mut sub = backend.subscribe_to_pair("alice", "bob").await.unwrap();

        let sent = backend
            .send_message(NewMessage::text("bob", "alice", "ping"))
            .await
            .unwrap();
        assert_eq!(sub.events.recv().await.unwrap().message().id, sent.id);

        backend.unsubscribe(&sub.handle).await.unwrap();
        backend.unsubscribe(&sub.handle).await.unwrap();
        assert_eq!(backend.hub().subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_open_creates_database_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("lostfound.db");
        let backend = SqliteBackend::open(&path, Arc::new(PushHub::default()))
            .await
            .unwrap();
        backend
            .send_message(NewMessage::text("alice", "bob", "hi"))
            .await
            .unwrap();
        assert!(path.exists());
    }
}
