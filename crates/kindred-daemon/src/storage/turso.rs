//! Turso (libSQL) backed blob store

use anyhow::{Context, Result};
use async_trait::async_trait;
use libsql::{Builder, Connection, params};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{CURRENT_CHARACTER_KEY, CharacterRepository, history_key};
use crate::{character::CharacterProfile, chat::ChatMessage};

/// Turso database client
#[derive(Clone)]
pub struct TursoDb {
    conn: Arc<Mutex<Connection>>,
}

impl TursoDb {
    /// Connect to a Turso database
    pub async fn connect(url: &str, auth_token: Option<&str>) -> Result<Self> {
        let db = if url.starts_with("libsql://") || url.starts_with("https://") {
            let token = auth_token
                .map(|s| s.to_string())
                .context("auth token required for remote database")?;

            Builder::new_remote(url.to_string(), token)
                .build()
                .await
                .context("Failed to connect to remote Turso database")?
        } else {
            let path = url.strip_prefix("file:").unwrap_or(url);
            Builder::new_local(path)
                .build()
                .await
                .context("Failed to open local database")?
        };

        let conn = db.connect().context("Failed to get database connection")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Initialize the database schema
    pub async fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn.lock().await;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
            (),
        )
        .await?;

        info!("Database schema initialized");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT value FROM kv_store WHERE key = ?1",
                params![key.to_string()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(row.get::<String>(0)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: String) -> Result<()> {
        let conn = self.conn.lock().await;
        let timestamp = chrono::Utc::now().timestamp();

        conn.execute(
            r#"
            INSERT INTO kv_store (key, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
            params![key.to_string(), value, timestamp],
        )
        .await?;

        debug!("Wrote {key}");
        Ok(())
    }
}

#[async_trait]
impl CharacterRepository for TursoDb {
    async fn current_character(&self) -> Result<Option<CharacterProfile>> {
        let Some(raw) = self.get(CURRENT_CHARACTER_KEY).await? else {
            return Ok(None);
        };
        let profile = serde_json::from_str(&raw).context("corrupt character profile")?;
        Ok(Some(profile))
    }

    async fn save_character(&self, profile: &CharacterProfile) -> Result<()> {
        self.put(CURRENT_CHARACTER_KEY, serde_json::to_string(profile)?)
            .await
    }

    async fn load_history(&self, character_id: &str) -> Result<Option<Vec<ChatMessage>>> {
        let key = history_key(character_id);
        let Some(raw) = self.get(&key).await? else {
            return Ok(None);
        };
        let messages = serde_json::from_str(&raw)
            .with_context(|| format!("corrupt message log under {key}"))?;
        Ok(Some(messages))
    }

    async fn save_history(&self, character_id: &str, messages: &[ChatMessage]) -> Result<()> {
        self.put(&history_key(character_id), serde_json::to_string(messages)?)
            .await
    }
}
