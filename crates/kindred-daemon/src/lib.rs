pub mod bridge;
pub mod character;
pub mod chat;
pub mod config;
pub mod error;
pub mod llm;
pub mod session;
pub mod speech;
pub mod storage;
pub mod tts;
pub mod video;
