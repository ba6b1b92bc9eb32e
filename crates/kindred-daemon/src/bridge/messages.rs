use serde::{Deserialize, Serialize};

use crate::{
    character::{CharacterProfile, VoiceParams},
    chat::{ChatMessage, Mood},
    session::SessionSnapshot,
    video::VideoState,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping {
        nonce: Option<String>,
    },
    /// Hand-off from the onboarding flow: make this the active companion.
    ActivateCharacter {
        profile: CharacterProfile,
    },
    LoadSession {
        #[serde(default)]
        character_id: Option<String>,
    },
    UserChat {
        text: String,
    },
    SetMood {
        mood: Mood,
    },
    PlaySpeech {
        message_id: u64,
    },
    StopSpeech,
    StartVideo,
    EndVideo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonMessage {
    Hello {
        version: String,
        capabilities: Vec<String>,
    },
    SessionLoaded {
        snapshot: SessionSnapshot,
    },
    /// A message was appended to the log.
    Message {
        message: ChatMessage,
    },
    Thinking {
        active: bool,
    },
    /// User-visible, non-fatal problem.
    Notice {
        level: String,
        message: String,
    },
    Speak {
        message_id: u64,
        text: String,
        audio_base64: Option<String>,
        voice: VoiceParams,
    },
    StopAudio {
        message_id: u64,
    },
    SpeechState {
        message_id: Option<u64>,
    },
    VideoState {
        state: VideoState,
    },
    Log {
        level: String,
        message: String,
        timestamp: i64,
    },
}

impl DaemonMessage {
    pub fn notice(level: &str, message: impl Into<String>) -> Self {
        DaemonMessage::Notice {
            level: level.to_string(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_client_messages() {
        let chat: ClientMessage =
            serde_json::from_str(r#"{"type":"user_chat","text":"hey"}"#).unwrap();
        assert!(matches!(chat, ClientMessage::UserChat { text } if text == "hey"));

        let mood: ClientMessage =
            serde_json::from_str(r#"{"type":"set_mood","mood":"calm"}"#).unwrap();
        assert!(matches!(mood, ClientMessage::SetMood { mood: Mood::Calm }));

        let stop: ClientMessage = serde_json::from_str(r#"{"type":"stop_speech"}"#).unwrap();
        assert!(matches!(stop, ClientMessage::StopSpeech));

        let load: ClientMessage = serde_json::from_str(r#"{"type":"load_session"}"#).unwrap();
        assert!(matches!(load, ClientMessage::LoadSession { character_id: None }));
    }

    #[test]
    fn speech_state_serializes_null_when_idle() {
        let value =
            serde_json::to_value(DaemonMessage::SpeechState { message_id: None }).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"type": "speech_state", "message_id": null})
        );
    }
}
