//! Speech playback: at most one message is spoken at a time.

mod bridge_output;

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, info, warn};

pub use bridge_output::BridgeSpeechOutput;

use crate::{
    character::{Gender, VoiceParams},
    chat::Role,
    error::SessionError,
};

const EVENT_BUFFER: usize = 64;

pub type SharedSpeech = Arc<dyn SpeechOutput>;

#[derive(Debug, Clone)]
pub struct SpeechRequest {
    pub message_id: u64,
    pub text: String,
    pub role: Role,
    pub voice: VoiceParams,
    pub gender: Gender,
}

/// Speech collaborator: synthesizes and plays one utterance.
#[async_trait]
pub trait SpeechOutput: Send + Sync {
    /// Resolves once playback has finished.
    async fn speak(&self, request: SpeechRequest) -> Result<()>;

    /// Abort synthesis or playback of `message_id`.
    async fn cancel(&self, message_id: u64);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "message_id", rename_all = "snake_case")]
pub enum SpeechEvent {
    Started(u64),
    Finished(u64),
    Stopped(u64),
    Failed(u64),
}

impl SpeechEvent {
    /// Message id still speaking after this event, if any.
    pub fn active_after(&self) -> Option<u64> {
        match self {
            SpeechEvent::Started(id) => Some(*id),
            _ => None,
        }
    }
}

#[derive(Default)]
struct PlaybackSlot {
    active: Option<u64>,
    epoch: u64,
    task: Option<JoinHandle<()>>,
}

/// Serializes playback requests so utterances never overlap.
///
/// States are idle (`active() == None`) and speaking one message. Switching
/// messages always goes through stop, a short settle delay, then start.
pub struct SpeechCoordinator {
    output: SharedSpeech,
    settle_delay: Duration,
    slot: Arc<Mutex<PlaybackSlot>>,
    switch: tokio::sync::Mutex<()>,
    events: broadcast::Sender<SpeechEvent>,
}

impl SpeechCoordinator {
    pub fn new(output: SharedSpeech, settle_delay: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            output,
            settle_delay,
            slot: Arc::new(Mutex::new(PlaybackSlot::default())),
            switch: tokio::sync::Mutex::new(()),
            events,
        }
    }

    pub fn active(&self) -> Option<u64> {
        self.slot.lock().active
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SpeechEvent> {
        self.events.subscribe()
    }

    /// Start speaking `request`, stopping whatever is currently playing first.
    ///
    /// Returns as soon as playback has started; completion and failures are
    /// reported through [`SpeechCoordinator::subscribe`].
    pub async fn play(&self, request: SpeechRequest) {
        let _switching = self.switch.lock().await;

        if self.stop_current().await {
            tokio::time::sleep(self.settle_delay).await;
        }

        let message_id = request.message_id;
        let mut slot = self.slot.lock();
        slot.epoch += 1;
        let epoch = slot.epoch;
        slot.active = Some(message_id);
        let _ = self.events.send(SpeechEvent::Started(message_id));
        debug!(message_id, "Speech started");

        let output = self.output.clone();
        let shared = self.slot.clone();
        let events = self.events.clone();
        slot.task = Some(tokio::spawn(async move {
            let outcome = output.speak(request).await;

            let mut slot = shared.lock();
            if slot.epoch != epoch {
                return;
            }
            slot.active = None;
            slot.task = None;
            match outcome {
                Ok(()) => {
                    let _ = events.send(SpeechEvent::Finished(message_id));
                }
                Err(err) => {
                    let err = SessionError::Speech(err);
                    warn!(error = %err, message_id, "Speech playback failed");
                    let _ = events.send(SpeechEvent::Failed(message_id));
                }
            }
        }));
    }

    /// Cancel any active playback. Does nothing when idle.
    pub async fn stop(&self) {
        let _switching = self.switch.lock().await;
        self.stop_current().await;
    }

    async fn stop_current(&self) -> bool {
        let (previous, task) = {
            let mut slot = self.slot.lock();
            slot.epoch += 1;
            (slot.active.take(), slot.task.take())
        };

        if let Some(task) = task {
            task.abort();
        }
        let Some(message_id) = previous else {
            return false;
        };

        self.output.cancel(message_id).await;
        let _ = self.events.send(SpeechEvent::Stopped(message_id));
        info!(message_id, "Speech stopped");
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::anyhow;
    use tokio::time::timeout;

    use super::*;

    #[derive(Clone, Copy)]
    enum Behaviour {
        Hang,
        Finish,
        Fail,
    }

    struct FakeOutput {
        behaviour: Behaviour,
        speaking: AtomicUsize,
        max_speaking: AtomicUsize,
        cancelled: Mutex<Vec<u64>>,
    }

    impl FakeOutput {
        fn new(behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                behaviour,
                speaking: AtomicUsize::new(0),
                max_speaking: AtomicUsize::new(0),
                cancelled: Mutex::new(Vec::new()),
            })
        }
    }

    struct SpeakingGuard<'a>(&'a AtomicUsize);

    impl Drop for SpeakingGuard<'_> {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl SpeechOutput for FakeOutput {
        async fn speak(&self, _request: SpeechRequest) -> Result<()> {
            let now = self.speaking.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_speaking.fetch_max(now, Ordering::SeqCst);
            let _guard = SpeakingGuard(&self.speaking);
            match self.behaviour {
                Behaviour::Hang => std::future::pending().await,
                Behaviour::Finish => Ok(()),
                Behaviour::Fail => Err(anyhow!("synthesis quota exceeded")),
            }
        }

        async fn cancel(&self, message_id: u64) {
            self.cancelled.lock().push(message_id);
        }
    }

    fn request(message_id: u64) -> SpeechRequest {
        SpeechRequest {
            message_id,
            text: format!("message {message_id}"),
            role: Role::Assistant,
            voice: VoiceParams::default(),
            gender: Gender::Female,
        }
    }

    async fn next_event(rx: &mut broadcast::Receiver<SpeechEvent>) -> SpeechEvent {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for speech event")
            .unwrap()
    }

    #[tokio::test]
    async fn switching_stops_previous_before_starting_next() {
        let output = FakeOutput::new(Behaviour::Hang);
        let coordinator = SpeechCoordinator::new(output.clone(), Duration::from_millis(5));
        let mut rx = coordinator.subscribe();

        coordinator.play(request(1)).await;
        tokio::task::yield_now().await;
        coordinator.play(request(2)).await;
        tokio::task::yield_now().await;

        assert_eq!(next_event(&mut rx).await, SpeechEvent::Started(1));
        assert_eq!(next_event(&mut rx).await, SpeechEvent::Stopped(1));
        assert_eq!(next_event(&mut rx).await, SpeechEvent::Started(2));
        assert_eq!(coordinator.active(), Some(2));
        assert_eq!(*output.cancelled.lock(), vec![1]);
        assert_eq!(output.max_speaking.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn natural_completion_returns_to_idle() {
        let output = FakeOutput::new(Behaviour::Finish);
        let coordinator = SpeechCoordinator::new(output.clone(), Duration::from_millis(5));
        let mut rx = coordinator.subscribe();

        coordinator.play(request(7)).await;
        assert_eq!(next_event(&mut rx).await, SpeechEvent::Started(7));
        assert_eq!(next_event(&mut rx).await, SpeechEvent::Finished(7));
        assert_eq!(coordinator.active(), None);

        coordinator.stop().await;
        assert_eq!(coordinator.active(), None);
        assert!(output.cancelled.lock().is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn failure_is_swallowed_and_clears_state() {
        let output = FakeOutput::new(Behaviour::Fail);
        let coordinator = SpeechCoordinator::new(output, Duration::from_millis(5));
        let mut rx = coordinator.subscribe();

        coordinator.play(request(3)).await;
        assert_eq!(next_event(&mut rx).await, SpeechEvent::Started(3));
        assert_eq!(next_event(&mut rx).await, SpeechEvent::Failed(3));
        assert_eq!(coordinator.active(), None);
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let output = FakeOutput::new(Behaviour::Hang);
        let coordinator = SpeechCoordinator::new(output.clone(), Duration::from_millis(5));

        coordinator.stop().await;
        coordinator.play(request(4)).await;
        coordinator.stop().await;
        coordinator.stop().await;

        assert_eq!(coordinator.active(), None);
        assert_eq!(*output.cancelled.lock(), vec![4]);
    }

    #[test]
    fn event_serializes_with_message_id() {
        let value = serde_json::to_value(SpeechEvent::Started(9)).unwrap();
        assert_eq!(value, serde_json::json!({"event": "started", "message_id": 9}));
        assert_eq!(SpeechEvent::Stopped(9).active_after(), None);
    }
}
