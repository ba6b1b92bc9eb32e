use anyhow::{Result, anyhow};
use reqwest::Client;
use serde_json::{Value, json};

use super::{LlmClient, PromptMessage, extract_text};

pub struct LmStudioClient {
    http: Client,
    endpoint: String,
}

impl LmStudioClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            endpoint: endpoint.into(),
        }
    }

    fn url(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.endpoint.trim_end_matches('/')
        )
    }

    async fn send(&self, payload: Value) -> Result<Value> {
        let resp = self.http.post(self.url()).json(&payload).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_else(|_| "no body".to_string());
            tracing::error!(%status, %body, "LM Studio request failed");
            return Err(anyhow!("LM Studio error {}: {}", status, body));
        }

        let json: Value = resp.json().await?;
        Ok(json)
    }
}

#[async_trait::async_trait]
impl LlmClient for LmStudioClient {
    async fn complete_chat(&self, model: &str, messages: Vec<PromptMessage>) -> Result<String> {
        let body = json!({
            "model": model,
            "messages": messages,
            "stream": false
        });

        let resp = self.send(body).await?;
        extract_text(&resp)
    }
}
