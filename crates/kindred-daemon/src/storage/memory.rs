use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;

use super::{CURRENT_CHARACTER_KEY, CharacterRepository, history_key};
use crate::{character::CharacterProfile, chat::ChatMessage};

/// Process-local store. Values are kept serialized so it behaves like the
/// blob store it stands in for.
#[derive(Default)]
pub struct InMemoryRepository {
    blobs: Mutex<HashMap<String, String>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_character(profile: &CharacterProfile) -> Result<Self> {
        let repo = Self::new();
        repo.put(CURRENT_CHARACTER_KEY, serde_json::to_string(profile)?);
        Ok(repo)
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.blobs.lock().get(key).cloned()
    }

    fn put(&self, key: &str, value: String) {
        self.blobs.lock().insert(key.to_string(), value);
    }
}

#[async_trait]
impl CharacterRepository for InMemoryRepository {
    async fn current_character(&self) -> Result<Option<CharacterProfile>> {
        self.raw(CURRENT_CHARACTER_KEY)
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(Into::into)
    }

    async fn save_character(&self, profile: &CharacterProfile) -> Result<()> {
        self.put(CURRENT_CHARACTER_KEY, serde_json::to_string(profile)?);
        Ok(())
    }

    async fn load_history(&self, character_id: &str) -> Result<Option<Vec<ChatMessage>>> {
        self.raw(&history_key(character_id))
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(Into::into)
    }

    async fn save_history(&self, character_id: &str, messages: &[ChatMessage]) -> Result<()> {
        self.put(&history_key(character_id), serde_json::to_string(messages)?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn history_is_keyed_per_character() {
        let repo = InMemoryRepository::new();
        repo.save_history("a", &[ChatMessage::user(1, "hi")])
            .await
            .unwrap();

        assert_eq!(repo.load_history("a").await.unwrap().unwrap().len(), 1);
        assert!(repo.load_history("b").await.unwrap().is_none());
        assert!(repo.raw("chatHistory:a").is_some());
    }

    #[tokio::test]
    async fn missing_character_reads_as_none() {
        let repo = InMemoryRepository::new();
        assert!(repo.current_character().await.unwrap().is_none());

        repo.save_character(&CharacterProfile::demo()).await.unwrap();
        let loaded = repo.current_character().await.unwrap().unwrap();
        assert_eq!(loaded, CharacterProfile::demo());
    }
}
