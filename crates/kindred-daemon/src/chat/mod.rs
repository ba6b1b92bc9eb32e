pub mod emotion;
pub mod message;

pub use emotion::classify_emotion;
pub use message::{ChatMessage, Emotion, MessageIdGenerator, Mood, Role};
