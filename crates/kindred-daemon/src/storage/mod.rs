//! Persistent store for character profiles and message logs.
//!
//! Values are whole JSON blobs keyed by string, mirroring what the web
//! front-end kept in local storage. Every write is a full overwrite.

mod memory;
mod turso;

pub use memory::InMemoryRepository;
pub use turso::TursoDb;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::{character::CharacterProfile, chat::ChatMessage, config::StorageConfig};

pub type SharedRepository = Arc<dyn CharacterRepository>;

pub const CURRENT_CHARACTER_KEY: &str = "currentCharacter";

pub fn history_key(character_id: &str) -> String {
    format!("chatHistory:{character_id}")
}

/// Typed access to the persisted session state of a companion.
#[async_trait]
pub trait CharacterRepository: Send + Sync {
    async fn current_character(&self) -> Result<Option<CharacterProfile>>;

    async fn save_character(&self, profile: &CharacterProfile) -> Result<()>;

    /// `None` when no history was ever written for this character.
    async fn load_history(&self, character_id: &str) -> Result<Option<Vec<ChatMessage>>>;

    async fn save_history(&self, character_id: &str, messages: &[ChatMessage]) -> Result<()>;
}

/// Open the configured backend and make sure its schema exists.
pub async fn connect(config: &StorageConfig) -> Result<SharedRepository> {
    let token = std::env::var(&config.auth_token_env).ok();
    let db = TursoDb::connect(&config.url, token.as_deref()).await?;
    db.initialize_schema().await?;
    let repo: SharedRepository = Arc::new(db);
    Ok(repo)
}
