use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One turn in the message log. Never mutated after it is appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: u64,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotion: Option<Emotion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mood: Option<String>,
}

impl ChatMessage {
    pub fn user(id: u64, content: impl Into<String>) -> Self {
        Self {
            id,
            role: Role::User,
            content: content.into(),
            timestamp: Utc::now(),
            emotion: None,
            mood: None,
        }
    }

    pub fn assistant(
        id: u64,
        content: impl Into<String>,
        emotion: Emotion,
        mood: impl Into<String>,
    ) -> Self {
        Self {
            id,
            role: Role::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
            emotion: Some(emotion),
            mood: Some(mood.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Happy,
    Sad,
    Excited,
    Calm,
    Empathetic,
    Neutral,
}

/// Session-wide mood picked by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mood {
    Happy,
    Sad,
    #[default]
    Neutral,
    Excited,
    Calm,
}

impl fmt::Display for Mood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mood::Happy => "happy",
            Mood::Sad => "sad",
            Mood::Neutral => "neutral",
            Mood::Excited => "excited",
            Mood::Calm => "calm",
        })
    }
}

/// Hands out millisecond-timestamp ids, bumped past the previous id on ties.
#[derive(Debug, Default)]
pub struct MessageIdGenerator {
    last: u64,
}

impl MessageIdGenerator {
    /// Continue after the highest id already present in `messages`.
    pub fn after(messages: &[ChatMessage]) -> Self {
        Self {
            last: messages.iter().map(|m| m.id).max().unwrap_or(0),
        }
    }

    /// `None` once the log already holds `u64::MAX`; no larger id exists.
    pub fn next_id(&mut self) -> Option<u64> {
        let now = Utc::now().timestamp_millis().max(0) as u64;
        self.last = now.max(self.last.checked_add(1)?);
        Some(self.last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_strictly_increase_within_same_millisecond() {
        let mut ids = MessageIdGenerator::default();
        let drawn: Vec<u64> = (0..1000).map(|_| ids.next_id().unwrap()).collect();
        assert!(drawn.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn generator_continues_past_future_ids() {
        let far_future = u64::MAX / 2;
        let existing = vec![ChatMessage::user(far_future, "hi")];
        let mut ids = MessageIdGenerator::after(&existing);
        assert_eq!(ids.next_id(), Some(far_future + 1));
    }

    #[test]
    fn exhausted_id_space_yields_none() {
        let existing = vec![ChatMessage::user(u64::MAX, "hi")];
        let mut ids = MessageIdGenerator::after(&existing);
        assert_eq!(ids.next_id(), None);
        assert_eq!(ids.next_id(), None);
    }

    #[test]
    fn message_serializes_camel_case_without_empty_tags() {
        let msg = ChatMessage::user(7, "hello");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["role"], "user");
        assert!(value.get("emotion").is_none());
        assert!(value["timestamp"].as_str().unwrap().contains('T'));
    }
}
