use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use kindred_daemon::{
    bridge::{Bridge, BridgeHandle, ClientMessage, DaemonMessage},
    character::CharacterProfile,
    config::{AppConfig, SessionConfig},
    error::SessionError,
    llm,
    session::{SessionEvent, SessionManager, SubmitOutcome},
    speech::{BridgeSpeechOutput, SpeechCoordinator},
    storage, tts,
    video::{VideoCall, VideoState},
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load()?;
    info!("Starting Kindred daemon");

    let repository = storage::connect(&config.storage).await?;
    let llm_client = llm::create_client(&config.llm)?;
    let synth = tts::create_synthesizer(&config.tts)?;

    let mut bridge = Bridge::bind(config.bridge.clone()).await?;
    let bridge_handle = bridge.handle();

    let speech = Arc::new(SpeechCoordinator::new(
        Arc::new(BridgeSpeechOutput::new(synth, bridge_handle.clone())),
        config.speech.settle_delay(),
    ));
    let sessions = Arc::new(SessionManager::new(
        repository,
        llm_client,
        config.llm.model.clone(),
        speech.clone(),
        config.session.clone(),
    ));
    let video = Arc::new(VideoCall::from_config(&config.video));

    forward_session_events(&sessions, &bridge_handle);
    forward_speech_events(&speech, &bridge_handle);

    open_initial_session(&sessions, &config.session, &bridge_handle).await;

    loop {
        tokio::select! {
            next = bridge.next_message() => {
                let Some(msg) = next else { break };
                if let Err(err) = handle_client_message(msg, &sessions, &video, &bridge_handle).await {
                    error!(?err, "Failed to handle client event");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    sessions.stop_speech().await;
    video.end().await;
    Ok(())
}

async fn open_initial_session(
    sessions: &SessionManager,
    config: &SessionConfig,
    bridge: &BridgeHandle,
) {
    let loaded = match sessions.load_session(None).await {
        Err(SessionError::NoActiveCharacter) => match &config.character_file {
            Some(path) => match CharacterProfile::from_file(path) {
                Ok(profile) => sessions.activate(profile).await,
                Err(err) => {
                    warn!(?err, "Could not import character card {:?}", path);
                    Err(SessionError::NoActiveCharacter)
                }
            },
            None => Err(SessionError::NoActiveCharacter),
        },
        other => other,
    };

    match loaded {
        Ok(snapshot) => {
            let _ = bridge.broadcast(DaemonMessage::SessionLoaded { snapshot });
        }
        Err(SessionError::NoActiveCharacter) => {
            info!("No active character yet; waiting for onboarding");
        }
        Err(err) => error!(?err, "Failed to open session"),
    }
}

async fn handle_client_message(
    message: ClientMessage,
    sessions: &Arc<SessionManager>,
    video: &Arc<VideoCall>,
    bridge: &BridgeHandle,
) -> Result<()> {
    match message {
        ClientMessage::Ping { nonce } => {
            log_event(bridge, "debug", format!("Ping received ({nonce:?})"));
        }
        ClientMessage::ActivateCharacter { profile } => {
            report_session(sessions.activate(profile).await, bridge)?;
        }
        ClientMessage::LoadSession { character_id } => {
            report_session(sessions.load_session(character_id.as_deref()).await, bridge)?;
        }
        ClientMessage::UserChat { text } => {
            let sessions = sessions.clone();
            let bridge = bridge.clone();
            tokio::spawn(async move {
                match sessions.submit_user_message(&text).await {
                    Ok(SubmitOutcome::Fallback { error, .. }) => {
                        warn!(%error, "Reply generation failed");
                        let _ = bridge.broadcast(DaemonMessage::notice(
                            "error",
                            "Couldn't reach the companion's mind just now. Try again in a moment.",
                        ));
                    }
                    Ok(_) => {}
                    Err(SessionError::ReplyInFlight) => {
                        let _ = bridge.broadcast(DaemonMessage::notice(
                            "info",
                            "Still thinking about your last message.",
                        ));
                    }
                    Err(err) => {
                        let _ = bridge.broadcast(DaemonMessage::notice("error", err.to_string()));
                    }
                }
            });
        }
        ClientMessage::SetMood { mood } => {
            if let Err(err) = sessions.set_mood(mood) {
                bridge.broadcast(DaemonMessage::notice("error", err.to_string()))?;
            }
        }
        ClientMessage::PlaySpeech { message_id } => {
            if let Err(err) = sessions.play_message(message_id).await {
                bridge.broadcast(DaemonMessage::notice("error", err.to_string()))?;
            }
        }
        ClientMessage::StopSpeech => sessions.stop_speech().await,
        ClientMessage::StartVideo => {
            let Some(profile) = sessions.profile() else {
                bridge.broadcast(DaemonMessage::notice(
                    "error",
                    SessionError::NoActiveCharacter.to_string(),
                ))?;
                return Ok(());
            };
            let video = video.clone();
            let bridge = bridge.clone();
            tokio::spawn(async move {
                let _ = bridge.broadcast(DaemonMessage::VideoState {
                    state: VideoState::Connecting,
                });
                let state = video.start(&profile).await;
                let _ = bridge.broadcast(DaemonMessage::VideoState { state });
            });
        }
        ClientMessage::EndVideo => {
            let state = video.end().await;
            bridge.broadcast(DaemonMessage::VideoState { state })?;
        }
    }
    Ok(())
}

fn report_session(
    result: kindred_daemon::error::Result<kindred_daemon::session::SessionSnapshot>,
    bridge: &BridgeHandle,
) -> Result<()> {
    match result {
        Ok(snapshot) => bridge.broadcast(DaemonMessage::SessionLoaded { snapshot }),
        Err(SessionError::NoActiveCharacter) => bridge.broadcast(DaemonMessage::notice(
            "onboarding",
            SessionError::NoActiveCharacter.to_string(),
        )),
        Err(err) => {
            warn!(?err, "Session could not be opened");
            bridge.broadcast(DaemonMessage::notice("error", err.to_string()))
        }
    }
}

fn forward_session_events(sessions: &SessionManager, bridge: &BridgeHandle) {
    let mut events = sessions.subscribe();
    let bridge = bridge.clone();
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Session event forwarder lagged");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            let message = match event {
                SessionEvent::MessageAppended(message) => DaemonMessage::Message { message },
                SessionEvent::Thinking(active) => DaemonMessage::Thinking { active },
                SessionEvent::Milestone(milestone) => {
                    DaemonMessage::notice("milestone", milestone)
                }
            };
            let _ = bridge.broadcast(message);
        }
    });
}

fn forward_speech_events(speech: &SpeechCoordinator, bridge: &BridgeHandle) {
    let mut events = speech.subscribe();
    let bridge = bridge.clone();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let _ = bridge.broadcast(DaemonMessage::SpeechState {
                        message_id: event.active_after(),
                    });
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Speech event forwarder lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

fn log_event(bridge: &BridgeHandle, level: &str, message: impl Into<String>) {
    let _ = bridge.broadcast(DaemonMessage::Log {
        level: level.to_string(),
        message: message.into(),
        timestamp: Utc::now().timestamp(),
    });
}
