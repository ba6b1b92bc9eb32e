//! Conversation state for the active companion.

mod prompt;

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

pub use prompt::{build_messages, persona_instruction};

use crate::{
    character::{CharacterProfile, greeting_for},
    chat::{ChatMessage, Emotion, MessageIdGenerator, Mood, classify_emotion},
    config::SessionConfig,
    error::{Result, SessionError},
    llm::SharedLlm,
    speech::{SpeechCoordinator, SpeechRequest},
    storage::SharedRepository,
};

pub const FALLBACK_REPLY: &str =
    "Sorry, I'm having trouble thinking right now. Could you say that again?";

const GREETING_MOOD: &str = "welcoming";
const EVENT_BUFFER: usize = 64;

/// Derived conversational signals for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub current_mood: Mood,
    pub relationship_level: u8,
    /// Recent user utterances, oldest first.
    pub conversation_context: VecDeque<String>,
}

impl SessionState {
    pub fn new(relationship_level: u8) -> Self {
        Self {
            current_mood: Mood::default(),
            relationship_level,
            conversation_context: VecDeque::new(),
        }
    }

    fn remember_topic(&mut self, text: &str, window: usize) {
        self.conversation_context.push_back(text.to_string());
        while self.conversation_context.len() > window {
            self.conversation_context.pop_front();
        }
    }
}

/// Everything the front-end needs to render the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub profile: CharacterProfile,
    pub messages: Vec<ChatMessage>,
    pub state: SessionState,
    pub active_speech_message_id: Option<u64>,
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    MessageAppended(ChatMessage),
    Thinking(bool),
    Milestone(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Blank input; nothing happened.
    Ignored,
    Replied {
        user: ChatMessage,
        reply: ChatMessage,
    },
    /// Generation failed and the canned reply was appended instead.
    Fallback {
        user: ChatMessage,
        reply: ChatMessage,
        error: String,
    },
}

struct ActiveSession {
    epoch: u64,
    profile: CharacterProfile,
    messages: Vec<ChatMessage>,
    state: SessionState,
    ids: MessageIdGenerator,
}

/// Clears the single-flight flag when the submission finishes, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SessionManager {
    repository: SharedRepository,
    llm: SharedLlm,
    model: String,
    speech: Arc<SpeechCoordinator>,
    config: SessionConfig,
    active: Mutex<Option<ActiveSession>>,
    /// Held while a session is opened and while a reply is applied, so the
    /// two never interleave.
    switching: tokio::sync::Mutex<()>,
    epoch: AtomicU64,
    in_flight: AtomicBool,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionManager {
    pub fn new(
        repository: SharedRepository,
        llm: SharedLlm,
        model: impl Into<String>,
        speech: Arc<SpeechCoordinator>,
        config: SessionConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            repository,
            llm,
            model: model.into(),
            speech,
            config,
            active: Mutex::new(None),
            switching: tokio::sync::Mutex::new(()),
            epoch: AtomicU64::new(0),
            in_flight: AtomicBool::new(false),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Store `profile` as the active companion and open its session.
    pub async fn activate(&self, profile: CharacterProfile) -> Result<SessionSnapshot> {
        let _switching = self.switching.lock().await;
        let mut profile = profile;
        profile.normalize();
        self.repository
            .save_character(&profile)
            .await
            .map_err(SessionError::Storage)?;
        info!(character_id = %profile.id, "Activated character");
        self.open_session(Some(&profile.id)).await
    }

    /// Open the session of the stored companion, greeting the user when the
    /// log is empty.
    pub async fn load_session(&self, character_id: Option<&str>) -> Result<SessionSnapshot> {
        let _switching = self.switching.lock().await;
        self.open_session(character_id).await
    }

    async fn open_session(&self, character_id: Option<&str>) -> Result<SessionSnapshot> {
        let profile = self
            .repository
            .current_character()
            .await
            .map_err(SessionError::Storage)?
            .ok_or(SessionError::NoActiveCharacter)?;
        if character_id.is_some_and(|id| id != profile.id) {
            return Err(SessionError::NoActiveCharacter);
        }

        let mut messages = self
            .repository
            .load_history(&profile.id)
            .await
            .map_err(SessionError::Storage)?
            .unwrap_or_default();
        let mut ids = MessageIdGenerator::after(&messages);

        let greeting = if messages.is_empty() {
            let greeting = ChatMessage::assistant(
                next_message_id(&mut ids)?,
                greeting_for(&profile),
                Emotion::Happy,
                GREETING_MOOD,
            );
            messages.push(greeting.clone());
            self.repository
                .save_history(&profile.id, &messages)
                .await
                .map_err(SessionError::Storage)?;
            Some(greeting)
        } else {
            None
        };

        self.speech.stop().await;

        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        let snapshot = {
            let mut active = self.active.lock();
            let session = active.insert(ActiveSession {
                epoch,
                state: SessionState::new(profile.relationship.level),
                profile,
                messages,
                ids,
            });
            SessionSnapshot {
                profile: session.profile.clone(),
                messages: session.messages.clone(),
                state: session.state.clone(),
                active_speech_message_id: None,
            }
        };
        info!(
            character_id = %snapshot.profile.id,
            messages = snapshot.messages.len(),
            epoch,
            "Session loaded"
        );

        if let Some(greeting) = greeting {
            let _ = self.events.send(SessionEvent::MessageAppended(greeting.clone()));
            self.speech
                .play(speech_request(&snapshot.profile, &greeting))
                .await;
        }

        Ok(snapshot)
    }

    /// Append the user's message, ask for a reply, and append that too.
    ///
    /// Generation failures do not escape: they produce a
    /// [`SubmitOutcome::Fallback`] with the canned reply in the log.
    pub async fn submit_user_message(&self, text: &str) -> Result<SubmitOutcome> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(SubmitOutcome::Ignored);
        }
        let _flight = InFlight::acquire(&self.in_flight).ok_or(SessionError::ReplyInFlight)?;

        let (epoch, character_id, prompt, user, log) = {
            let mut active = self.active.lock();
            let session = active.as_mut().ok_or(SessionError::NoActiveCharacter)?;
            let prompt = build_messages(
                &session.profile,
                &session.state,
                &session.messages,
                text,
                self.config.history_window,
            );
            let user = ChatMessage::user(next_message_id(&mut session.ids)?, text);
            session.messages.push(user.clone());
            (
                session.epoch,
                session.profile.id.clone(),
                prompt,
                user,
                session.messages.clone(),
            )
        };

        let _ = self.events.send(SessionEvent::MessageAppended(user.clone()));
        self.persist_history(&character_id, &log).await;

        let _ = self.events.send(SessionEvent::Thinking(true));
        let generated = self
            .llm
            .complete_chat(&self.model, prompt)
            .await
            .and_then(|reply| {
                let reply = reply.trim().to_string();
                if reply.is_empty() {
                    Err(anyhow::anyhow!("empty reply"))
                } else {
                    Ok(reply)
                }
            });
        let _ = self.events.send(SessionEvent::Thinking(false));

        // Everything from the stale check through playback runs under the
        // switching lock; a session opened meanwhile waits for it.
        let _switching = self.switching.lock().await;
        let (reply, profile, log, milestone) = {
            let mut active = self.active.lock();
            let session = match active.as_mut() {
                Some(session) if session.epoch == epoch => session,
                _ => {
                    warn!(epoch, "Discarding reply for a session that is no longer active");
                    return Err(SessionError::StaleSession);
                }
            };

            let content = match &generated {
                Ok(reply) => reply.as_str(),
                Err(_) => FALLBACK_REPLY,
            };
            let reply = ChatMessage::assistant(
                next_message_id(&mut session.ids)?,
                content,
                classify_emotion(content),
                session.state.current_mood.to_string(),
            );
            session.messages.push(reply.clone());

            let mut milestone = None;
            if generated.is_ok() {
                milestone = session.profile.record_interaction(Utc::now());
                session.state.relationship_level = session.profile.relationship.level;
                session
                    .state
                    .remember_topic(text, self.config.context_window);
            }

            (
                reply,
                session.profile.clone(),
                session.messages.clone(),
                milestone,
            )
        };

        let _ = self.events.send(SessionEvent::MessageAppended(reply.clone()));
        self.persist_history(&profile.id, &log).await;

        let outcome = match generated {
            Ok(_) => {
                if let Err(err) = self.repository.save_character(&profile).await {
                    warn!(?err, character_id = %profile.id, "Failed to persist profile");
                }
                if let Some(milestone) = milestone {
                    info!(character_id = %profile.id, %milestone, "Relationship milestone");
                    let _ = self.events.send(SessionEvent::Milestone(milestone));
                }
                debug!(
                    level = profile.relationship.level,
                    emotion = ?reply.emotion,
                    "Reply generated"
                );
                SubmitOutcome::Replied {
                    user,
                    reply: reply.clone(),
                }
            }
            Err(err) => {
                let err = SessionError::Generation(err);
                warn!(error = %err, "Reply generation failed; using fallback");
                SubmitOutcome::Fallback {
                    user,
                    reply: reply.clone(),
                    error: err.to_string(),
                }
            }
        };

        self.speech.play(speech_request(&profile, &reply)).await;
        Ok(outcome)
    }

    /// Only affects messages generated from now on.
    pub fn set_mood(&self, mood: Mood) -> Result<()> {
        let mut active = self.active.lock();
        let session = active.as_mut().ok_or(SessionError::NoActiveCharacter)?;
        session.state.current_mood = mood;
        debug!(%mood, "Mood set");
        Ok(())
    }

    /// Speak a message already in the log.
    pub async fn play_message(&self, message_id: u64) -> Result<()> {
        let request = {
            let active = self.active.lock();
            let session = active.as_ref().ok_or(SessionError::NoActiveCharacter)?;
            let message = session
                .messages
                .iter()
                .find(|m| m.id == message_id)
                .ok_or(SessionError::UnknownMessage(message_id))?;
            speech_request(&session.profile, message)
        };
        self.speech.play(request).await;
        Ok(())
    }

    pub async fn stop_speech(&self) {
        self.speech.stop().await;
    }

    pub fn snapshot(&self) -> Option<SessionSnapshot> {
        let active = self.active.lock();
        active.as_ref().map(|session| SessionSnapshot {
            profile: session.profile.clone(),
            messages: session.messages.clone(),
            state: session.state.clone(),
            active_speech_message_id: self.speech.active(),
        })
    }

    pub fn profile(&self) -> Option<CharacterProfile> {
        self.active
            .lock()
            .as_ref()
            .map(|session| session.profile.clone())
    }

    async fn persist_history(&self, character_id: &str, messages: &[ChatMessage]) {
        if let Err(err) = self.repository.save_history(character_id, messages).await {
            warn!(?err, %character_id, "Failed to persist message log");
        }
    }
}

fn next_message_id(ids: &mut MessageIdGenerator) -> Result<u64> {
    ids.next_id()
        .ok_or_else(|| SessionError::Storage(anyhow::anyhow!("message id space exhausted")))
}

fn speech_request(profile: &CharacterProfile, message: &ChatMessage) -> SpeechRequest {
    SpeechRequest {
        message_id: message.id,
        text: message.content.clone(),
        role: message.role,
        voice: profile.voice.clone(),
        gender: profile.gender,
    }
}
