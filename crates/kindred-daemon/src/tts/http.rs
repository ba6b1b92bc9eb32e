use anyhow::{Result, anyhow};
use reqwest::Client;
use serde_json::json;

use super::{SpeechSynthesizer, SynthesisRequest};
use crate::{character::Gender, chat::Role};

/// OpenAI-compatible `/v1/audio/speech` client.
pub struct HttpSynth {
    http: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    default_voice: String,
}

impl HttpSynth {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        default_voice: impl Into<String>,
    ) -> Self {
        Self {
            http: Client::new(),
            endpoint: endpoint.into(),
            api_key,
            model: model.into(),
            default_voice: default_voice.into(),
        }
    }

    fn url(&self) -> String {
        format!("{}/v1/audio/speech", self.endpoint.trim_end_matches('/'))
    }

    fn voice_for(&self, request: &SynthesisRequest) -> String {
        if request.role == Role::User {
            return self.default_voice.clone();
        }
        if let Some(id) = &request.voice.voice_id {
            return id.clone();
        }
        match request.gender {
            Gender::Male => "onyx".into(),
            Gender::NonBinary => "sage".into(),
            Gender::Female => self.default_voice.clone(),
        }
    }
}

#[async_trait::async_trait]
impl SpeechSynthesizer for HttpSynth {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>> {
        let body = json!({
            "model": self.model,
            "input": request.text,
            "voice": self.voice_for(request),
            "speed": request.voice.speed,
            "response_format": "wav"
        });

        let mut builder = self.http.post(self.url()).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let resp = builder.send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_else(|_| "no body".to_string());
            tracing::error!(%status, %body, "TTS request failed");
            return Err(anyhow!("TTS error {}: {}", status, body));
        }

        Ok(resp.bytes().await?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::character::VoiceParams;

    fn request(gender: Gender, voice_id: Option<&str>) -> SynthesisRequest {
        SynthesisRequest {
            text: "hi".into(),
            role: Role::Assistant,
            voice: VoiceParams {
                voice_id: voice_id.map(Into::into),
                ..VoiceParams::default()
            },
            gender,
        }
    }

    #[test]
    fn explicit_voice_id_wins_over_gender_hint() {
        let synth = HttpSynth::new("http://localhost:8880/", None, "tts-1", "alloy");
        assert_eq!(synth.voice_for(&request(Gender::Male, Some("echo"))), "echo");
        assert_eq!(synth.voice_for(&request(Gender::Male, None)), "onyx");
        assert_eq!(synth.voice_for(&request(Gender::Female, None)), "alloy");
        assert_eq!(synth.url(), "http://localhost:8880/v1/audio/speech");
    }

    #[test]
    fn user_lines_use_default_voice() {
        let synth = HttpSynth::new("http://localhost:8880", None, "tts-1", "alloy");
        let request = SynthesisRequest {
            role: Role::User,
            ..request(Gender::Male, Some("echo"))
        };
        assert_eq!(synth.voice_for(&request), "alloy");
    }
}
