//! Generation collaborator: chat-completion backends that write the
//! companion's replies.

mod lmstudio;
mod openrouter;

use std::sync::Arc;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use lmstudio::LmStudioClient;
pub use openrouter::OpenRouterClient;

use crate::config::{LlmConfig, LlmProvider};

pub type SharedLlm = Arc<dyn LlmClient>;

/// A single message in a completion request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
}

/// The role of a message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    System,
    User,
    Assistant,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::Assistant,
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Complete a chat conversation with proper message structure.
    async fn complete_chat(&self, model: &str, messages: Vec<PromptMessage>) -> Result<String>;
}

/// Create a client from a provider configuration
pub fn create_client_from_provider(provider: &LlmProvider) -> Result<SharedLlm> {
    let client: SharedLlm = match provider {
        LlmProvider::LmStudio { endpoint } => Arc::new(LmStudioClient::new(endpoint)),
        LlmProvider::OpenRouter {
            site_url,
            site_name,
            ..
        } => {
            let api_key = provider
                .openrouter_api_key()
                .ok_or_else(|| anyhow!("OpenRouter requires api_key or api_key_env to be set"))?;
            Arc::new(OpenRouterClient::new(
                &api_key,
                site_url.clone(),
                site_name.clone(),
            )?)
        }
    };
    Ok(client)
}

pub fn create_client(config: &LlmConfig) -> Result<SharedLlm> {
    create_client_from_provider(&config.provider)
}

/// Pull the assistant text out of an OpenAI-style completion response.
pub(crate) fn extract_text(resp: &serde_json::Value) -> Result<String> {
    let choice = resp
        .get("choices")
        .and_then(|c| c.get(0))
        .ok_or_else(|| anyhow!("choices missing"))?;
    let message = choice
        .get("message")
        .ok_or_else(|| anyhow!("message missing"))?;

    if let Some(content) = message.get("content") {
        if let Some(text) = content.as_str() {
            return Ok(text.to_string());
        }
        if let Some(items) = content.as_array() {
            let mut combined = String::new();
            for item in items {
                if item.get("type").and_then(|t| t.as_str()) == Some("text") {
                    if let Some(chunk) = item.get("text").and_then(|t| t.as_str()) {
                        combined.push_str(chunk);
                    }
                }
            }
            if !combined.is_empty() {
                return Ok(combined);
            }
        }
    }

    Err(anyhow!("Unable to extract text from LLM response"))
}
