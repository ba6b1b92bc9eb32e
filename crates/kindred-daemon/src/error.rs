use thiserror::Error;

/// Failures surfaced by the session layer.
///
/// None of these are fatal to the daemon; each one ends a single operation.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("no active character; onboarding required")]
    NoActiveCharacter,

    #[error("a reply is already being generated for this session")]
    ReplyInFlight,

    #[error("session changed while the reply was being generated")]
    StaleSession,

    #[error("message {0} not found in this session")]
    UnknownMessage(u64),

    #[error("reply generation failed: {0}")]
    Generation(#[source] anyhow::Error),

    #[error("speech playback failed: {0}")]
    Speech(#[source] anyhow::Error),

    #[error("video session failed: {0}")]
    VideoSession(#[source] anyhow::Error),

    #[error("storage error: {0}")]
    Storage(#[source] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;
