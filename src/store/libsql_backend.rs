//! libSQL backend — implements `SessionStore` and `KnownUsers`.
//!
//! Session state is a small keyed-blob table: one row per (user, chat,
//! field), JSON value, `expires_at` timestamp. Reads treat expired rows as
//! absent; every write refreshes the TTL, so an active session stays alive
//! and an abandoned one ages out.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{params, Connection, Database as LibSqlDatabase};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;

use crate::error::StoreError;
use crate::store::migrations;
use crate::store::traits::{Answers, Cursor, KnownUsers, PollState, SessionKey, SessionStore};

/// Session field names. Poll sub-state is keyed per item index.
const FIELD_CURSOR: &str = "cursor";
const FIELD_ANSWERS: &str = "answers";
const FIELD_MESSAGES: &str = "messages";
const FIELD_ROW: &str = "row";

fn poll_field(index: usize) -> String {
    format!("poll:{index}")
}

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    ttl: Duration,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path, ttl: Duration) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| StoreError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
            ttl,
        };
        migrations::run_migrations(&backend.conn).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory(ttl: Duration) -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| StoreError::Pool(format!("Failed to create in-memory database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| StoreError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
            ttl,
        };
        migrations::run_migrations(&backend.conn).await?;
        Ok(backend)
    }

    fn deadline(&self) -> String {
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| chrono::Duration::zero());
        (Utc::now() + ttl).to_rfc3339()
    }

    /// Read a session field, honoring the TTL.
    async fn get_field(&self, key: SessionKey, field: &str) -> Result<Option<String>, StoreError> {
        let mut rows = self
            .conn
            .query(
                "SELECT value, expires_at FROM sessions
                 WHERE user_id = ?1 AND chat_id = ?2 AND field = ?3",
                params![key.user, key.chat, field],
            )
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?
        else {
            return Ok(None);
        };

        let value: String = row.get(0).map_err(|e| StoreError::Query(e.to_string()))?;
        let expires_at: String = row.get(1).map_err(|e| StoreError::Query(e.to_string()))?;
        if parse_datetime(&expires_at) <= Utc::now() {
            return Ok(None);
        }
        Ok(Some(value))
    }

    /// Write a session field, refreshing the TTL.
    async fn set_field(&self, key: SessionKey, field: &str, value: &str) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO sessions (user_id, chat_id, field, value, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![key.user, key.chat, field, value, self.deadline()],
            )
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }

    async fn delete_field(&self, key: SessionKey, field: &str) -> Result<(), StoreError> {
        self.conn
            .execute(
                "DELETE FROM sessions WHERE user_id = ?1 AND chat_id = ?2 AND field = ?3",
                params![key.user, key.chat, field],
            )
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        key: SessionKey,
        field: &str,
    ) -> Result<Option<T>, StoreError> {
        match self.get_field(key, field).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| StoreError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }

    async fn set_json<T: Serialize>(
        &self,
        key: SessionKey,
        field: &str,
        value: &T,
    ) -> Result<(), StoreError> {
        let raw =
            serde_json::to_string(value).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.set_field(key, field, &raw).await
    }
}

/// Parse an RFC 3339 timestamp; unparseable values read as long expired.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[async_trait]
impl SessionStore for LibSqlBackend {
    async fn cursor(&self, key: SessionKey) -> Result<Option<Cursor>, StoreError> {
        self.get_json(key, FIELD_CURSOR).await
    }

    async fn set_cursor(&self, key: SessionKey, cursor: Cursor) -> Result<(), StoreError> {
        self.set_json(key, FIELD_CURSOR, &cursor).await
    }

    async fn answers(&self, key: SessionKey) -> Result<Answers, StoreError> {
        Ok(self.get_json(key, FIELD_ANSWERS).await?.unwrap_or_default())
    }

    async fn set_answers(&self, key: SessionKey, answers: &Answers) -> Result<(), StoreError> {
        self.set_json(key, FIELD_ANSWERS, answers).await
    }

    async fn poll_state(
        &self,
        key: SessionKey,
        index: usize,
    ) -> Result<Option<PollState>, StoreError> {
        self.get_json(key, &poll_field(index)).await
    }

    async fn set_poll_state(
        &self,
        key: SessionKey,
        index: usize,
        state: &PollState,
    ) -> Result<(), StoreError> {
        self.set_json(key, &poll_field(index), state).await
    }

    async fn push_message(&self, key: SessionKey, message_id: i64) -> Result<(), StoreError> {
        let mut history: Vec<i64> = self
            .get_json(key, FIELD_MESSAGES)
            .await?
            .unwrap_or_default();
        history.push(message_id);
        self.set_json(key, FIELD_MESSAGES, &history).await
    }

    async fn drain_messages(&self, key: SessionKey) -> Result<Vec<i64>, StoreError> {
        let history: Vec<i64> = self
            .get_json(key, FIELD_MESSAGES)
            .await?
            .unwrap_or_default();
        self.delete_field(key, FIELD_MESSAGES).await?;
        Ok(history)
    }

    async fn row(&self, key: SessionKey) -> Result<Option<i64>, StoreError> {
        self.get_json(key, FIELD_ROW).await
    }

    async fn set_row(&self, key: SessionKey, row: i64) -> Result<(), StoreError> {
        self.set_json(key, FIELD_ROW, &row).await
    }

    async fn clear(&self, key: SessionKey) -> Result<(), StoreError> {
        self.conn
            .execute(
                "DELETE FROM sessions WHERE user_id = ?1 AND chat_id = ?2",
                params![key.user, key.chat],
            )
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl KnownUsers for LibSqlBackend {
    async fn exists(&self, user: i64) -> Result<bool, StoreError> {
        let mut rows = self
            .conn
            .query(
                "SELECT 1 FROM known_users WHERE user_id = ?1",
                params![user],
            )
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(rows
            .next()
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?
            .is_some())
    }

    async fn mark_known(&self, user: i64) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO known_users (user_id, completed_at) VALUES (?1, ?2)",
                params![user, Utc::now().to_rfc3339()],
            )
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }
}
