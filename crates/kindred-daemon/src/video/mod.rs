//! Video-avatar calls: a hosted provider when configured, otherwise a
//! simulated connection.

mod hosted;

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub use hosted::HostedVideo;

use crate::{character::CharacterProfile, config::VideoConfig, error::SessionError};

pub type SharedVideo = Arc<dyn VideoProvider>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoSession {
    pub id: String,
    pub url: Option<String>,
    pub simulated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VideoState {
    #[default]
    Idle,
    Connecting,
    Connected {
        session: VideoSession,
    },
}

#[async_trait]
pub trait VideoProvider: Send + Sync {
    async fn start(&self, profile: &CharacterProfile) -> Result<VideoSession>;

    async fn end(&self, session: &VideoSession) -> Result<()>;
}

/// Pretends to connect after a fixed delay.
pub struct SimulatedVideo {
    connect_delay: Duration,
}

impl SimulatedVideo {
    pub fn new(connect_delay: Duration) -> Self {
        Self { connect_delay }
    }
}

#[async_trait]
impl VideoProvider for SimulatedVideo {
    async fn start(&self, _profile: &CharacterProfile) -> Result<VideoSession> {
        tokio::time::sleep(self.connect_delay).await;
        Ok(VideoSession {
            id: uuid::Uuid::new_v4().to_string(),
            url: None,
            simulated: true,
        })
    }

    async fn end(&self, _session: &VideoSession) -> Result<()> {
        Ok(())
    }
}

/// The call the user sees. Provider failures degrade to a simulated session.
pub struct VideoCall {
    provider: Option<SharedVideo>,
    fallback: SimulatedVideo,
    state: Mutex<VideoState>,
    /// Bumped by every `start` and `end`; a connect only lands if its
    /// attempt is still the latest.
    attempt: AtomicU64,
}

impl VideoCall {
    pub fn new(provider: Option<SharedVideo>, connect_delay: Duration) -> Self {
        Self {
            provider,
            fallback: SimulatedVideo::new(connect_delay),
            state: Mutex::new(VideoState::Idle),
            attempt: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &VideoConfig) -> Self {
        let provider: Option<SharedVideo> = match config.provider.as_str() {
            "hosted" => match HostedVideo::from_config(config) {
                Ok(hosted) => Some(Arc::new(hosted)),
                Err(err) => {
                    warn!(?err, "Hosted video is not configured; calls will be simulated");
                    None
                }
            },
            _ => None,
        };
        Self::new(provider, config.simulated_connect_delay())
    }

    pub fn state(&self) -> VideoState {
        self.state.lock().clone()
    }

    pub async fn start(&self, profile: &CharacterProfile) -> VideoState {
        let attempt = {
            let mut state = self.state.lock();
            if !matches!(*state, VideoState::Idle) {
                return state.clone();
            }
            *state = VideoState::Connecting;
            self.attempt.fetch_add(1, Ordering::AcqRel) + 1
        };

        let session = match self.try_provider(profile).await {
            Some(session) => session,
            None => self.simulated(profile).await,
        };

        let installed = {
            let mut state = self.state.lock();
            if self.attempt.load(Ordering::Acquire) == attempt {
                info!(session_id = %session.id, simulated = session.simulated, "Video call connected");
                let connected = VideoState::Connected { session };
                *state = connected.clone();
                Ok(connected)
            } else {
                Err(session)
            }
        };
        match installed {
            Ok(connected) => connected,
            Err(session) => {
                info!(session_id = %session.id, "Call ended while connecting; discarding session");
                self.end_remote(&session).await;
                self.state()
            }
        }
    }

    /// Local reset. Remote teardown is best effort.
    pub async fn end(&self) -> VideoState {
        let previous = {
            let mut state = self.state.lock();
            self.attempt.fetch_add(1, Ordering::AcqRel);
            std::mem::take(&mut *state)
        };
        if let VideoState::Connected { session } = previous {
            self.end_remote(&session).await;
        }
        VideoState::Idle
    }

    async fn end_remote(&self, session: &VideoSession) {
        let Some(provider) = &self.provider else {
            return;
        };
        if session.simulated {
            return;
        }
        if let Err(err) = provider.end(session).await {
            warn!(?err, session_id = %session.id, "Failed to end hosted video session");
        }
    }

    async fn try_provider(&self, profile: &CharacterProfile) -> Option<VideoSession> {
        let provider = self.provider.as_ref()?;
        match provider.start(profile).await {
            Ok(session) => Some(session),
            Err(err) => {
                let err = SessionError::VideoSession(err);
                warn!(error = %err, "Falling back to simulated call");
                None
            }
        }
    }

    async fn simulated(&self, profile: &CharacterProfile) -> VideoSession {
        match self.fallback.start(profile).await {
            Ok(session) => session,
            Err(err) => {
                warn!(?err, "Simulated video start failed");
                VideoSession {
                    id: uuid::Uuid::new_v4().to_string(),
                    url: None,
                    simulated: true,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::anyhow;

    use super::*;

    struct FlakyProvider {
        fail: bool,
        ended: AtomicUsize,
    }

    #[async_trait]
    impl VideoProvider for FlakyProvider {
        async fn start(&self, _profile: &CharacterProfile) -> Result<VideoSession> {
            if self.fail {
                return Err(anyhow!("provider returned 503"));
            }
            Ok(VideoSession {
                id: "conv-1".into(),
                url: Some("https://video.example/conv-1".into()),
                simulated: false,
            })
        }

        async fn end(&self, _session: &VideoSession) -> Result<()> {
            self.ended.fetch_add(1, Ordering::SeqCst);
            Err(anyhow!("already ended"))
        }
    }

    fn connected_session(state: &VideoState) -> &VideoSession {
        match state {
            VideoState::Connected { session } => session,
            other => panic!("expected connected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unconfigured_call_is_simulated() {
        let call = VideoCall::new(None, Duration::from_millis(1));
        let state = call.start(&CharacterProfile::demo()).await;
        assert!(connected_session(&state).simulated);
        assert_eq!(call.end().await, VideoState::Idle);
        assert_eq!(call.state(), VideoState::Idle);
    }

    #[tokio::test]
    async fn provider_failure_falls_back_to_simulation() {
        let provider = Arc::new(FlakyProvider {
            fail: true,
            ended: AtomicUsize::new(0),
        });
        let call = VideoCall::new(Some(provider.clone()), Duration::from_millis(1));

        let state = call.start(&CharacterProfile::demo()).await;
        assert!(connected_session(&state).simulated);

        call.end().await;
        assert_eq!(provider.ended.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn hosted_session_end_errors_are_swallowed() {
        let provider = Arc::new(FlakyProvider {
            fail: false,
            ended: AtomicUsize::new(0),
        });
        let call = VideoCall::new(Some(provider.clone()), Duration::from_millis(1));

        let state = call.start(&CharacterProfile::demo()).await;
        assert_eq!(connected_session(&state).id, "conv-1");
        assert_eq!(call.end().await, VideoState::Idle);
        assert_eq!(provider.ended.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn ending_while_connecting_stays_idle() {
        let call = Arc::new(VideoCall::new(None, Duration::from_millis(200)));
        let connecting = call.clone();
        let pending =
            tokio::spawn(async move { connecting.start(&CharacterProfile::demo()).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(call.state(), VideoState::Connecting);
        assert_eq!(call.end().await, VideoState::Idle);

        assert_eq!(pending.await.unwrap(), VideoState::Idle);
        assert_eq!(call.state(), VideoState::Idle);
    }

    #[tokio::test]
    async fn hosted_session_dropped_when_call_ended_during_connect() {
        let provider = Arc::new(SlowProvider {
            ended: AtomicUsize::new(0),
        });
        let call = Arc::new(VideoCall::new(Some(provider.clone()), Duration::from_millis(1)));
        let connecting = call.clone();
        let pending =
            tokio::spawn(async move { connecting.start(&CharacterProfile::demo()).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        call.end().await;

        assert_eq!(pending.await.unwrap(), VideoState::Idle);
        assert_eq!(provider.ended.load(Ordering::SeqCst), 1);
    }

    struct SlowProvider {
        ended: AtomicUsize,
    }

    #[async_trait]
    impl VideoProvider for SlowProvider {
        async fn start(&self, _profile: &CharacterProfile) -> Result<VideoSession> {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(VideoSession {
                id: "conv-slow".into(),
                url: None,
                simulated: false,
            })
        }

        async fn end(&self, _session: &VideoSession) -> Result<()> {
            self.ended.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn second_start_keeps_existing_session() {
        let call = VideoCall::new(None, Duration::from_millis(1));
        let first = call.start(&CharacterProfile::demo()).await;
        let second = call.start(&CharacterProfile::demo()).await;
        assert_eq!(first, second);
    }
}
