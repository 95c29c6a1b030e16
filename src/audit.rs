use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::Connection;
use teloxide::types::{ChatId, MessageId};
use tokio::sync::Mutex;
use tracing::info;

/// Append-only SQLite log of delivered reactions. Written on every
/// confirmed reaction, never read back by the bot itself.
#[derive(Clone)]
pub struct ReactionLog {
    conn: Arc<Mutex<Connection>>,
}

impl ReactionLog {
    /// Open or create the database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        // Enable WAL mode for better concurrent read performance
        // journal_mode PRAGMA always returns the resulting mode, so use query_row
        let _: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;

        Self::run_migrations(&conn)?;

        info!("Reaction log initialized at: {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn run_migrations(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS reactions (
                id INTEGER PRIMARY KEY,
                chat_id INTEGER NOT NULL,
                message_id INTEGER NOT NULL,
                emoji TEXT NOT NULL,
                reacted_at TEXT NOT NULL DEFAULT (datetime('now'))
            );",
        )?;
        Ok(())
    }

    /// Append one delivered reaction; `reacted_at` is stamped by SQLite.
    pub async fn record(&self, chat: ChatId, message: MessageId, emoji: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO reactions (chat_id, message_id, emoji)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![chat.0, message.0, emoji],
        )
        .context("Failed to record reaction")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_record_appends_one_row() {
        let log = ReactionLog::open_in_memory().unwrap();

        log.record(ChatId(-100123), MessageId(7), "🔥").await.unwrap();

        let conn = log.conn.lock().await;
        let (chat, message, emoji, reacted_at): (i64, i32, String, String) = conn
            .query_row(
                "SELECT chat_id, message_id, emoji, reacted_at FROM reactions",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .unwrap();

        assert_eq!(chat, -100123);
        assert_eq!(message, 7);
        assert_eq!(emoji, "🔥");
        assert!(!reacted_at.is_empty());
    }

    #[tokio::test]
    async fn test_record_keeps_appending() {
        let log = ReactionLog::open_in_memory().unwrap();

        log.record(ChatId(1), MessageId(1), "👍").await.unwrap();
        log.record(ChatId(1), MessageId(2), "🎉").await.unwrap();
        log.record(ChatId(2), MessageId(1), "👻").await.unwrap();

        let conn = log.conn.lock().await;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM reactions", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 3);
    }
}
