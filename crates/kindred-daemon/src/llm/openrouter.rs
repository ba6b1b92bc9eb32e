use anyhow::{Context, Result};
use reqwest::{
    Client,
    header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue},
};
use serde_json::{Value, json};

use super::{LlmClient, PromptMessage, extract_text};

pub struct OpenRouterClient {
    http: Client,
    headers: HeaderMap,
}

impl OpenRouterClient {
    pub fn new(api_key: &str, site_url: Option<String>, site_name: Option<String>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key))
                .context("API key is not a valid header value")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(url) = site_url {
            headers.insert("HTTP-Referer", HeaderValue::from_str(&url)?);
        }
        if let Some(name) = site_name {
            headers.insert("X-Title", HeaderValue::from_str(&name)?);
        }

        Ok(Self {
            http: Client::new(),
            headers,
        })
    }

    fn url(&self) -> &str {
        "https://openrouter.ai/api/v1/chat/completions"
    }

    async fn send(&self, payload: Value) -> Result<Value> {
        let resp = self
            .http
            .post(self.url())
            .headers(self.headers.clone())
            .json(&payload)
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await?;
        Ok(resp)
    }
}

#[async_trait::async_trait]
impl LlmClient for OpenRouterClient {
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
