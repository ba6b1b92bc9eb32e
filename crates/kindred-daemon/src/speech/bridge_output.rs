use anyhow::Result;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use super::{SpeechOutput, SpeechRequest};
use crate::{
    bridge::{BridgeHandle, DaemonMessage},
    tts::{self, SharedSynth, SynthesisRequest},
};

/// Synthesizes audio and ships it to connected front-ends, which play it.
///
/// The clip's own length decides how long the message counts as speaking.
pub struct BridgeSpeechOutput {
    synth: SharedSynth,
    bridge: BridgeHandle,
}

impl BridgeSpeechOutput {
    pub fn new(synth: SharedSynth, bridge: BridgeHandle) -> Self {
        Self { synth, bridge }
    }
}

#[async_trait]
impl SpeechOutput for BridgeSpeechOutput {
    async fn speak(&self, request: SpeechRequest) -> Result<()> {
        let audio = self
            .synth
            .synthesize(&SynthesisRequest {
                text: request.text.clone(),
                role: request.role,
                voice: request.voice.clone(),
                gender: request.gender,
            })
            .await?;
        let duration =
            tts::wav_duration(&audio).unwrap_or_else(|| tts::estimated_duration(&request.text));

        self.bridge.broadcast(DaemonMessage::Speak {
            message_id: request.message_id,
            text: request.text,
            audio_base64: Some(BASE64.encode(&audio)),
            voice: request.voice,
        })?;

        tokio::time::sleep(duration).await;
        Ok(())
    }

    async fn cancel(&self, message_id: u64) {
        let _ = self.bridge.broadcast(DaemonMessage::StopAudio { message_id });
    }
}
