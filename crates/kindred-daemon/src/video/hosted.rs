use anyhow::{Context, Result, anyhow};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::{VideoProvider, VideoSession};
use crate::{character::CharacterProfile, config::VideoConfig};

/// Conversational video-avatar API (`/v2/conversations`).
pub struct HostedVideo {
    http: Client,
    endpoint: String,
    api_key: String,
    replica_id: String,
}

#[derive(Debug, Deserialize)]
struct ConversationCreated {
    conversation_id: String,
    #[serde(default)]
    conversation_url: Option<String>,
}

impl HostedVideo {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        replica_id: impl Into<String>,
    ) -> Self {
        Self {
            http: Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            replica_id: replica_id.into(),
        }
    }

    pub fn from_config(config: &VideoConfig) -> Result<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .context("video.endpoint is not set")?;
        let api_key = config.api_key().context("video API key is not set")?;
        let replica_id = config
            .replica_id
            .clone()
            .context("video.replica_id is not set")?;
        Ok(Self::new(endpoint, api_key, replica_id))
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v2/{}", self.endpoint.trim_end_matches('/'), path)
    }
}

#[async_trait::async_trait]
impl VideoProvider for HostedVideo {
    async fn start(&self, profile: &CharacterProfile) -> Result<VideoSession> {
        let body = json!({
            "replica_id": self.replica_id,
            "conversation_name": format!("Call with {}", profile.name),
            "conversational_context": profile.persona_summary(),
        });

        let resp = self
            .http
            .post(self.url("conversations"))
            .header("x-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_else(|_| "no body".to_string());
            return Err(anyhow!("video provider error {}: {}", status, body));
        }

        let created: ConversationCreated = resp.json().await?;
        Ok(VideoSession {
            id: created.conversation_id,
            url: created.conversation_url,
            simulated: false,
        })
    }

    async fn end(&self, session: &VideoSession) -> Result<()> {
        self.http
            .post(self.url(&format!("conversations/{}/end", session.id)))
            .header("x-api-key", &self.api_key)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incomplete_config_is_rejected() {
        let config = VideoConfig {
            provider: "hosted".into(),
            endpoint: Some("https://video.example".into()),
            ..VideoConfig::default()
        };
        assert!(HostedVideo::from_config(&config).is_err());
    }

    #[test]
    fn builds_versioned_urls() {
        let video = HostedVideo::new("https://video.example/", "key", "r1");
        assert_eq!(
            video.url("conversations/abc/end"),
            "https://video.example/v2/conversations/abc/end"
        );
    }
}
