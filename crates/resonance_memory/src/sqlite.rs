use crate::normalize::normalize_record;
use crate::store::{merge_record, StateStore};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use resonance_core::{ConversationState, StatePatch, StoreError};
use serde_json::Value;
use sqlx::{sqlite::SqlitePoolOptions, Pool, Row, Sqlite};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// SQLite-backed state store: one JSON row per user.
#[derive(Clone)]
pub struct SqliteStateStore {
    pool: Pool<Sqlite>,
    // Two deferred transactions upgrading their read locks at once make
    // SQLite fail one with SQLITE_BUSY; serialize writers in-process instead.
    write_lock: Arc<Mutex<()>>,
}

impl SqliteStateStore {
    pub async fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_url = format!("sqlite://{}?mode=rwc", db_path.as_ref().display());
        // Every pooled connection to ":memory:" would get its own database.
        let max_connections = if db_path.as_ref() == Path::new(":memory:") {
            1
        } else {
            5
        };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(&db_url)
            .await
            .context("Failed to connect to SQLite database")?;

        let store = Self {
            pool,
            write_lock: Arc::new(Mutex::new(())),
        };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversation_state (
                user_id TEXT PRIMARY KEY,
                state_json TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create conversation_state table")?;
        Ok(())
    }

    /// Write a raw record as-is, bypassing normalization. For importing data
    /// produced by older writers.
    pub async fn import_raw(&self, user_id: &str, record: &Value) -> Result<()> {
        let json = serde_json::to_string(record).context("Failed to serialize raw record")?;
        sqlx::query(
            "INSERT INTO conversation_state (user_id, state_json, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET state_json = excluded.state_json, updated_at = excluded.updated_at",
        )
        .bind(user_id)
        .bind(&json)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .context("Failed to import raw state")?;
        Ok(())
    }

    async fn load_record(&self, user_id: &str) -> Result<Option<Value>, StoreError> {
        let row = sqlx::query("SELECT state_json FROM conversation_state WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load conversation state")
            .map_err(StoreError::unavailable)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let json: String = row
            .try_get("state_json")
            .map_err(StoreError::unavailable)?;
        serde_json::from_str(&json)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                user_id: user_id.to_string(),
                reason: e.to_string(),
            })
    }

    async fn write_merged(&self, user_id: &str, patch: &StatePatch) -> Result<ConversationState> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin state transaction")?;

        let existing: Option<String> =
            sqlx::query("SELECT state_json FROM conversation_state WHERE user_id = ?")
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await
                .context("Failed to read state for update")?
                .map(|row| row.try_get::<String, _>("state_json"))
                .transpose()
                .context("Failed to read state_json column")?;

        // An unreadable stored record is replaced rather than blocking every
        // future write for this user.
        let existing: Option<Value> = existing.and_then(|json| match serde_json::from_str(&json) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!("Discarding unreadable state for {}: {}", user_id, e);
                None
            }
        });

        let (state, record) = merge_record(existing.as_ref(), patch)?;
        let json = serde_json::to_string(&record).context("Failed to serialize state")?;

        sqlx::query(
            "INSERT INTO conversation_state (user_id, state_json, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET state_json = excluded.state_json, updated_at = excluded.updated_at",
        )
        .bind(user_id)
        .bind(&json)
        .bind(Utc::now().timestamp())
        .execute(&mut *tx)
        .await
        .context("Failed to save conversation state")?;

        tx.commit().await.context("Failed to commit state")?;
        Ok(state)
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn get(&self, user_id: &str) -> Result<Option<ConversationState>, StoreError> {
        Ok(self.load_record(user_id).await?.as_ref().map(normalize_record))
    }

    async fn upsert(
        &self,
        user_id: &str,
        patch: &StatePatch,
    ) -> Result<ConversationState, StoreError> {
        let state = self
            .write_merged(user_id, patch)
            .await
            .map_err(StoreError::unavailable)?;
        tracing::debug!("Conversation state saved for {}", user_id);
        Ok(state)
    }
}
