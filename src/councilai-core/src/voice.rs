//! Collaborator contracts: the realtime voice channel and speech capture.
//!
//! Both collaborators report back through an [`EventSink`] handed to them when
//! a session starts. Every sink is stamped with the session it belongs to, so
//! events a torn-down session emits late can be told apart and dropped.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::TimeoutConfig;
use crate::error::CouncilError;
use crate::persona::Persona;

/// What a collaborator can report.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    /// Voice session speaking indicator changed.
    Speaking(bool),
    /// Text appended to the live transcript of the current turn.
    Transcript(String),
    /// Voice session dropped on its own.
    Closed(String),
    /// Final speech-recognition result.
    FinalResult(String),
    /// Speech recognition failed.
    CaptureError(String),
    /// Speech capture has no more input to offer.
    CaptureClosed,
}

/// Which session an event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Voice(u64),
    Capture(u64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub origin: Origin,
    pub event: SinkEvent,
}

/// Callback handle given to a collaborator for the lifetime of one session.
#[derive(Debug, Clone)]
pub struct EventSink {
    origin: Origin,
    tx: mpsc::UnboundedSender<Envelope>,
}

impl EventSink {
    pub fn new(origin: Origin, tx: mpsc::UnboundedSender<Envelope>) -> Self {
        Self { origin, tx }
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn speaking(&self, speaking: bool) {
        self.send(SinkEvent::Speaking(speaking));
    }

    pub fn transcript(&self, delta: impl Into<String>) {
        self.send(SinkEvent::Transcript(delta.into()));
    }

    pub fn closed(&self, reason: impl Into<String>) {
        self.send(SinkEvent::Closed(reason.into()));
    }

    pub fn final_result(&self, text: impl Into<String>) {
        self.send(SinkEvent::FinalResult(text.into()));
    }

    pub fn capture_error(&self, error: impl Into<String>) {
        self.send(SinkEvent::CaptureError(error.into()));
    }

    pub fn capture_closed(&self) {
        self.send(SinkEvent::CaptureClosed);
    }

    fn send(&self, event: SinkEvent) {
        let envelope = Envelope {
            origin: self.origin,
            event,
        };
        if self.tx.send(envelope).is_err() {
            tracing::debug!(origin = ?self.origin, "event loop gone; dropping event");
        }
    }
}

/// A realtime voice channel that hosts one persona session at a time.
#[async_trait]
pub trait VoiceChannel: Send {
    /// Open a session bound to `persona`. Returns once the session is connected.
    async fn connect(&mut self, persona: Persona, events: EventSink) -> Result<(), CouncilError>;

    /// Transmit one directed instruction over the open session.
    async fn send_text(&mut self, message: &str) -> Result<(), CouncilError>;

    /// Tear down the current session. Must be idempotent.
    async fn disconnect(&mut self);
}

/// Speech-to-text capture of the live participant.
#[async_trait]
pub trait SpeechCapture: Send {
    /// Begin one listening session. The final result goes to `events`.
    async fn start_listening(&mut self, events: EventSink) -> Result<(), CouncilError>;

    /// Stop the current listening session, if any.
    async fn stop_listening(&mut self);
}

#[derive(Debug, Clone, Copy)]
struct ActiveSession {
    persona: Persona,
    ticket: u64,
}

/// Owns the voice channel and the single session it may hold.
///
/// A session is acquired with [`SessionSlot::acquire`] and released with
/// [`SessionSlot::release`]; acquiring while a session is held fails with
/// [`CouncilError::SessionBusy`].
pub struct SessionSlot<V> {
    channel: V,
    active: Option<ActiveSession>,
    tickets: u64,
}

impl<V: VoiceChannel> SessionSlot<V> {
    pub fn new(channel: V) -> Self {
        Self {
            channel,
            active: None,
            tickets: 0,
        }
    }

    #[cfg(test)]
    fn active(&self) -> Option<Persona> {
        self.active.map(|a| a.persona)
    }

    /// Whether `ticket` identifies the session currently held.
    pub fn is_current(&self, ticket: u64) -> bool {
        self.active.is_some_and(|a| a.ticket == ticket)
    }

    /// Open a session for `persona`, bounded by the connect timeout and
    /// retried `connect_retries` times.
    pub async fn acquire(
        &mut self,
        persona: Persona,
        tx: &mpsc::UnboundedSender<Envelope>,
        timeouts: &TimeoutConfig,
    ) -> Result<(), CouncilError> {
        if let Some(active) = self.active {
            return Err(CouncilError::SessionBusy {
                active: active.persona,
                requested: persona,
            });
        }

        let attempts = timeouts.connect_retries + 1;
        let mut last_error = None;

        for attempt in 0..attempts {
            self.tickets += 1;
            let ticket = self.tickets;
            let sink = EventSink::new(Origin::Voice(ticket), tx.clone());

            match tokio::time::timeout(timeouts.connect(), self.channel.connect(persona, sink)).await
            {
                Ok(Ok(())) => {
                    tracing::info!(%persona, ticket, "voice session open");
                    self.active = Some(ActiveSession { persona, ticket });
                    return Ok(());
                }
                Ok(Err(e)) => {
                    tracing::warn!(%persona, attempt = attempt + 1, attempts, "connect failed: {}", e);
                    last_error = Some(e);
                }
                Err(_) => {
                    tracing::warn!(%persona, attempt = attempt + 1, attempts, "connect timed out");
                    last_error = Some(CouncilError::ConnectTimeout {
                        persona,
                        secs: timeouts.connect_secs,
                    });
                }
            }

            // Drop whatever the failed attempt left half-open.
            self.channel.disconnect().await;
        }

        Err(last_error.unwrap_or_else(|| CouncilError::ConnectFailed {
            persona,
            reason: "no connection attempt was made".to_string(),
        }))
    }

    /// Send a directed instruction over the held session.
    pub async fn send(&mut self, message: &str) -> Result<(), CouncilError> {
        if self.active.is_none() {
            return Err(CouncilError::SessionLost("no open voice session".to_string()));
        }
        self.channel.send_text(message).await
    }

    /// Close the held session. Safe to call when nothing is held.
    pub async fn release(&mut self) {
        if let Some(active) = self.active.take() {
            tracing::info!(persona = %active.persona, ticket = active.ticket, "voice session closed");
            self.channel.disconnect().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedVoice;

    fn timeouts(retries: u32) -> TimeoutConfig {
        TimeoutConfig {
            connect_retries: retries,
            ..TimeoutConfig::default()
        }
    }

    #[tokio::test]
    async fn test_acquire_rejects_second_session() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let voice = ScriptedVoice::new();
        let mut slot = SessionSlot::new(voice.clone());

        slot.acquire(Persona::Aya, &tx, &timeouts(0)).await.unwrap();
        let err = slot.acquire(Persona::Henri, &tx, &timeouts(0)).await.unwrap_err();
        assert!(matches!(
            err,
            CouncilError::SessionBusy { active: Persona::Aya, requested: Persona::Henri }
        ));
        assert_eq!(slot.active(), Some(Persona::Aya));
        assert_eq!(voice.max_open(), 1);
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let voice = ScriptedVoice::new();
        let mut slot = SessionSlot::new(voice.clone());

        slot.acquire(Persona::Nova, &tx, &timeouts(0)).await.unwrap();
        slot.release().await;
        slot.release().await;
        assert_eq!(slot.active(), None);
        assert_eq!(voice.calls("disconnect"), 1);
        assert!(slot.acquire(Persona::Henri, &tx, &timeouts(0)).await.is_ok());
    }

    #[tokio::test]
    async fn test_acquire_retries_failed_connects() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let voice = ScriptedVoice::new().failing_connects(1);
        let mut slot = SessionSlot::new(voice.clone());

        slot.acquire(Persona::Damien, &tx, &timeouts(1)).await.unwrap();
        assert_eq!(voice.calls("connect"), 2);
        assert!(slot.is_current(2));
        assert!(!slot.is_current(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_gives_up_after_timeouts() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let voice = ScriptedVoice::new().hanging_connects();
        let mut slot = SessionSlot::new(voice.clone());

        let err = slot.acquire(Persona::Adrien, &tx, &timeouts(1)).await.unwrap_err();
        assert!(matches!(err, CouncilError::ConnectTimeout { persona: Persona::Adrien, .. }));
        assert_eq!(voice.calls("connect"), 2);
        assert_eq!(slot.active(), None);
    }

    #[tokio::test]
    async fn test_send_without_session_fails() {
        let mut slot = SessionSlot::new(ScriptedVoice::new());
        assert!(matches!(
            slot.send("hello").await,
            Err(CouncilError::SessionLost(_))
        ));
    }
}
