mod http;

use std::{sync::Arc, time::Duration};

use anyhow::{Result, anyhow};
use async_trait::async_trait;

pub use http::HttpSynth;

use crate::{
    character::{Gender, VoiceParams},
    chat::Role,
    config::TtsConfig,
};

pub type SharedSynth = Arc<dyn SpeechSynthesizer>;

/// What to say and how to say it.
#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    pub text: String,
    /// Who said it. User lines are read back in the neutral default voice.
    pub role: Role,
    pub voice: VoiceParams,
    pub gender: Gender,
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Render `request` to WAV bytes.
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>>;
}

pub fn create_synthesizer(config: &TtsConfig) -> Result<SharedSynth> {
    let synth: SharedSynth = match config.provider.as_str() {
        "null" => Arc::new(NullSynth),
        "http" => {
            let endpoint = config
                .endpoint
                .clone()
                .ok_or_else(|| anyhow!("tts.endpoint is required for the http provider"))?;
            Arc::new(HttpSynth::new(
                endpoint,
                config.api_key(),
                config.model.clone(),
                config.default_voice.clone(),
            ))
        }
        other => return Err(anyhow!("unknown tts provider {other:?}")),
    };
    Ok(synth)
}

/// Produces silence roughly as long as the text would take to read aloud.
pub struct NullSynth;

#[async_trait]
impl SpeechSynthesizer for NullSynth {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>> {
        Ok(render_silence(estimated_duration(&request.text).as_secs_f32()))
    }
}

/// Reading-time estimate used when the audio itself carries no length.
pub fn estimated_duration(text: &str) -> Duration {
    Duration::from_secs_f32((text.len() as f32 / 14.0).clamp(0.5, 3.0))
}

/// Play length of a canonical PCM WAV clip.
pub fn wav_duration(bytes: &[u8]) -> Option<Duration> {
    if bytes.len() < 44 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return None;
    }
    let byte_rate = u32::from_le_bytes(bytes[28..32].try_into().ok()?);
    let data_len = u32::from_le_bytes(bytes[40..44].try_into().ok()?);
    if byte_rate == 0 {
        return None;
    }
    Some(Duration::from_secs_f64(data_len as f64 / byte_rate as f64))
}

fn render_silence(duration_secs: f32) -> Vec<u8> {
    let sample_rate = 16_000u32;
    let channels = 1u16;
    let bits_per_sample = 16u16;
    let total_samples = (sample_rate as f32 * duration_secs) as u32;
    let byte_rate = sample_rate * channels as u32 * bits_per_sample as u32 / 8;
    let block_align = channels * bits_per_sample / 8;
    let data_len = total_samples * block_align as u32;
    let mut buffer = Vec::with_capacity(44 + data_len as usize);

    buffer.extend_from_slice(b"RIFF");
    buffer.extend_from_slice(&(36 + data_len).to_le_bytes());
    buffer.extend_from_slice(b"WAVEfmt ");
    buffer.extend_from_slice(&16u32.to_le_bytes()); // PCM chunk size
    buffer.extend_from_slice(&1u16.to_le_bytes()); // PCM format
    buffer.extend_from_slice(&channels.to_le_bytes());
    buffer.extend_from_slice(&sample_rate.to_le_bytes());
    buffer.extend_from_slice(&byte_rate.to_le_bytes());
    buffer.extend_from_slice(&block_align.to_le_bytes());
    buffer.extend_from_slice(&bits_per_sample.to_le_bytes());
    buffer.extend_from_slice(b"data");
    buffer.extend_from_slice(&data_len.to_le_bytes());

    buffer.resize(44 + data_len as usize, 0u8);
    buffer
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_duration_matches_header() {
        let wav = render_silence(1.5);
        let duration = wav_duration(&wav).unwrap();
        assert!((duration.as_secs_f64() - 1.5).abs() < 0.01);
    }

    #[test]
    fn non_wav_has_no_duration() {
        assert_eq!(wav_duration(b"ID3\x04mp3 frames follow"), None);
        assert_eq!(wav_duration(&[]), None);
    }

    #[test]
    fn estimate_is_clamped() {
        assert_eq!(estimated_duration("hi"), Duration::from_secs_f32(0.5));
        assert_eq!(estimated_duration(&"x".repeat(500)), Duration::from_secs_f32(3.0));
    }

    #[tokio::test]
    async fn null_synth_renders_playable_wav() {
        let request = SynthesisRequest {
            text: "Hello there, friend".into(),
            role: Role::Assistant,
            voice: VoiceParams::default(),
            gender: Gender::Female,
        };
        let wav = NullSynth.synthesize(&request).await.unwrap();
        assert!(wav_duration(&wav).is_some());
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let config = TtsConfig {
            provider: "carrier-pigeon".into(),
            ..TtsConfig::default()
        };
        assert!(create_synthesizer(&config).is_err());
    }
}
