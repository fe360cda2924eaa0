//! Council orchestration.
//!
//! Drives a [`TurnMachine`] against the real collaborators: applies its
//! effects, bounds every wait with the configured timeouts, and feeds the
//! collaborators' events back in. Events from sessions that have already been
//! torn down are dropped here and never reach the machine.

use std::collections::VecDeque;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::config::Config;
use crate::error::CouncilError;
use crate::machine::{Control, CouncilEvent, Effect, Input, Suspension, TurnMachine, Wait};
use crate::random::{RandomSource, SeededRandom};
use crate::turn_graph::CompletedDebate;
use crate::voice::{Envelope, EventSink, Origin, SessionSlot, SinkEvent, SpeechCapture, VoiceChannel};

/// Callback for council events.
pub type CouncilCallback = Box<dyn Fn(CouncilEvent) + Send + Sync>;

/// What woke the event loop.
enum Wake {
    Control(Option<Control>),
    Event(Option<Envelope>),
    Deadline(Wait),
}

pub struct CouncilOrchestrator<V, C> {
    config: Config,
    machine: TurnMachine,
    slot: SessionSlot<V>,
    capture: C,
    capture_tickets: u64,
    capture_ticket: Option<u64>,
    rng: Box<dyn RandomSource>,
    callback: Option<CouncilCallback>,
    tx: mpsc::UnboundedSender<Envelope>,
    rx: mpsc::UnboundedReceiver<Envelope>,
    wait_started: Option<(Wait, Instant)>,
    completed: Vec<CompletedDebate>,
}

impl<V: VoiceChannel, C: SpeechCapture> CouncilOrchestrator<V, C> {
    pub fn new(config: Config, voice: V, capture: C) -> Result<Self, CouncilError> {
        let machine = TurnMachine::new(&config)?;
        let (tx, rx) = mpsc::unbounded_channel();
        Ok(Self {
            config,
            machine,
            slot: SessionSlot::new(voice),
            capture,
            capture_tickets: 0,
            capture_ticket: None,
            rng: Box::new(SeededRandom::from_entropy()),
            callback: None,
            tx,
            rx,
            wait_started: None,
            completed: Vec::new(),
        })
    }

    /// Set a callback for council events.
    pub fn with_callback(mut self, callback: CouncilCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Replace the source of random decisions, e.g. with a seeded one.
    pub fn with_random(mut self, rng: Box<dyn RandomSource>) -> Self {
        self.rng = rng;
        self
    }

    /// Skip the onboarding name capture.
    pub fn with_user_name(mut self, name: impl Into<String>) -> Self {
        self.machine = self.machine.with_user_name(name);
        self
    }

    pub fn machine(&self) -> &TurnMachine {
        &self.machine
    }

    /// Run until `Control::Quit`, the control channel closing, or the speech
    /// capture running out of input. Returns every debate completed meanwhile.
    pub async fn run(
        &mut self,
        mut controls: mpsc::UnboundedReceiver<Control>,
    ) -> Vec<CompletedDebate> {
        loop {
            let deadline = self.deadline();
            let timer = async move {
                match deadline {
                    Some((wait, at)) => {
                        tokio::time::sleep_until(at).await;
                        wait
                    }
                    None => std::future::pending().await,
                }
            };

            let wake = tokio::select! {
                control = controls.recv() => Wake::Control(control),
                envelope = self.rx.recv() => Wake::Event(envelope),
                wait = timer => Wake::Deadline(wait),
            };

            let input = match wake {
                Wake::Control(Some(control)) => Input::Control(control),
                Wake::Control(None) => {
                    tracing::info!("control channel closed");
                    Input::Control(Control::Quit)
                }
                Wake::Event(Some(envelope)) => match self.accept(envelope) {
                    Some(input) => input,
                    None => continue,
                },
                Wake::Event(None) => Input::Control(Control::Quit),
                Wake::Deadline(wait) => self.expire(wait),
            };

            let quit = input == Input::Control(Control::Quit);
            self.dispatch(input).await;
            if quit {
                break;
            }
        }

        // The machine already asked for teardown; make sure nothing lingers.
        self.slot.release().await;
        if self.capture_ticket.take().is_some() {
            self.capture.stop_listening().await;
        }
        std::mem::take(&mut self.completed)
    }

    /// When the current wait expires, keyed on the wait's epoch so a new wait
    /// restarts the clock.
    fn deadline(&mut self) -> Option<(Wait, Instant)> {
        let Some(wait) = self.machine.wait() else {
            self.wait_started = None;
            return None;
        };
        let started = match self.wait_started {
            Some((current, started)) if current == wait => started,
            _ => {
                let now = Instant::now();
                self.wait_started = Some((wait, now));
                now
            }
        };
        let limit = match wait.point {
            Suspension::AwaitingSpeech => self.config.timeouts.response(),
            Suspension::AwaitingCapture => self.config.timeouts.listen(),
        };
        Some((wait, started + limit))
    }

    fn expire(&mut self, wait: Wait) -> Input {
        self.wait_started = None;
        match wait.point {
            Suspension::AwaitingSpeech => Input::ResponseTimedOut(self.config.timeouts.response_secs),
            Suspension::AwaitingCapture => Input::CaptureTimedOut(self.config.timeouts.listen_secs),
        }
    }

    /// Map a collaborator event to a machine input, dropping events from
    /// sessions that are no longer current.
    fn accept(&self, envelope: Envelope) -> Option<Input> {
        let current = match envelope.origin {
            Origin::Voice(ticket) => self.slot.is_current(ticket),
            Origin::Capture(ticket) => self.capture_ticket == Some(ticket),
        };
        if !current {
            tracing::debug!(origin = ?envelope.origin, event = ?envelope.event, "dropping stale event");
            return None;
        }

        match (envelope.origin, envelope.event) {
            (Origin::Voice(_), SinkEvent::Speaking(speaking)) => Some(Input::Speaking(speaking)),
            (Origin::Voice(_), SinkEvent::Transcript(delta)) => Some(Input::Transcript(delta)),
            (Origin::Voice(_), SinkEvent::Closed(reason)) => Some(Input::SessionLost(reason)),
            (Origin::Capture(_), SinkEvent::FinalResult(text)) => Some(Input::FinalResult(text)),
            (Origin::Capture(_), SinkEvent::CaptureError(e)) => Some(Input::CaptureError(e)),
            (Origin::Capture(_), SinkEvent::CaptureClosed) => {
                tracing::info!("speech capture has no more input");
                Some(Input::Control(Control::Quit))
            }
            (origin, event) => {
                tracing::debug!(?origin, ?event, "event does not belong to its origin");
                None
            }
        }
    }

    /// Feed one input and carry out the effects, including the inputs those
    /// effects produce, until the machine settles.
    async fn dispatch(&mut self, input: Input) {
        let mut pending = VecDeque::from([input]);
        while let Some(input) = pending.pop_front() {
            let effects = self.machine.handle(input, self.rng.as_mut());
            for effect in effects {
                if let Some(next) = self.apply(effect).await {
                    pending.push_back(next);
                }
            }
        }
    }

    async fn apply(&mut self, effect: Effect) -> Option<Input> {
        match effect {
            Effect::Connect(persona) => {
                tracing::debug!(%persona, "connect");
                tokio::time::sleep(self.config.timeouts.handoff()).await;
                match self.slot.acquire(persona, &self.tx, &self.config.timeouts).await {
                    Ok(()) => Some(Input::Connected),
                    Err(e) => Some(Input::ConnectFailed(e.to_string())),
                }
            }
            Effect::SendText(message) => {
                tracing::debug!(chars = message.chars().count(), "send directed text");
                match self.slot.send(&message).await {
                    Ok(()) => None,
                    Err(e) => Some(Input::SessionLost(e.to_string())),
                }
            }
            Effect::Disconnect => {
                tracing::debug!("disconnect");
                self.slot.release().await;
                None
            }
            Effect::StartListening => {
                self.capture_tickets += 1;
                let ticket = self.capture_tickets;
                self.capture_ticket = Some(ticket);
                tracing::debug!(ticket, "start listening");
                let sink = EventSink::new(Origin::Capture(ticket), self.tx.clone());
                match self.capture.start_listening(sink).await {
                    Ok(()) => None,
                    Err(e) => {
                        self.capture_ticket = None;
                        Some(Input::CaptureError(e.to_string()))
                    }
                }
            }
            Effect::StopListening => {
                tracing::debug!("stop listening");
                self.capture_ticket = None;
                self.capture.stop_listening().await;
                None
            }
            Effect::Notify(event) => {
                if let CouncilEvent::DebateCompleted(debate) = &event {
                    self.completed.push(debate.clone());
                }
                self.emit_event(event);
                None
            }
        }
    }

    /// Emit an event if a callback is registered.
    fn emit_event(&self, event: CouncilEvent) {
        if let Some(ref callback) = self.callback {
            callback(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::AppState;
    use crate::persona::Persona;
    use crate::random::FixedRandom;
    use crate::testing::{ScriptedCapture, ScriptedVoice};
    use crate::turn_graph::TurnKind;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<CouncilEvent>>>;

    /// Records every event and answers errors with `Retry`.
    fn recording_callback(log: Log, controls: mpsc::UnboundedSender<Control>) -> CouncilCallback {
        Box::new(move |event| {
            if matches!(event, CouncilEvent::Error(_)) {
                let _ = controls.send(Control::Retry);
            }
            log.lock().unwrap().push(event);
        })
    }

    fn errors(log: &Log) -> usize {
        log.lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, CouncilEvent::Error(_)))
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn test_onboarding_then_full_debate() {
        let voice = ScriptedVoice::new();
        let capture = ScriptedCapture::new(["Camille", "Quelle preuve avez-vous ?"]);
        let log: Log = Arc::default();
        let (controls_tx, controls_rx) = mpsc::unbounded_channel();

        let mut orchestrator =
            CouncilOrchestrator::new(Config::default(), voice.clone(), capture.clone())
                .unwrap()
                .with_random(Box::new(FixedRandom::never()))
                .with_callback(recording_callback(log.clone(), controls_tx.clone()));

        controls_tx.send(Control::Start).unwrap();
        let completed = orchestrator.run(controls_rx).await;

        assert_eq!(completed.len(), 1);
        let debate = &completed[0];
        assert_eq!(debate.question, "Quelle preuve avez-vous ?");
        let kinds: Vec<TurnKind> = debate.records.iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TurnKind::Main,
                TurnKind::Intervention,
                TurnKind::Intervention,
                TurnKind::Intervention,
                TurnKind::Closing,
            ]
        );
        assert_eq!(debate.records[0].text, "Adrien has spoken.");
        assert_eq!(debate.records[4].persona, Persona::Nova);

        // Intro, greeting and five debate turns, never overlapping.
        assert_eq!(voice.calls("connect"), 7);
        assert_eq!(voice.max_open(), 1);
        assert_eq!(voice.open(), 0);
        assert_eq!(errors(&log), 0);

        assert_eq!(orchestrator.machine().user_name(), None);
        assert_eq!(orchestrator.machine().state(), AppState::Welcome);

        let sends: Vec<String> = voice
            .log()
            .into_iter()
            .filter(|l| l.starts_with("send "))
            .collect();
        assert!(sends[1].contains("Camille, welcome!"));
        assert!(sends[2].starts_with("send Adrien: Camille asks you"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_response_timeout_then_retry() {
        let voice = ScriptedVoice::new().silent_sends(1);
        let capture = ScriptedCapture::new(["Quelle preuve ?"]);
        let log: Log = Arc::default();
        let (controls_tx, controls_rx) = mpsc::unbounded_channel();

        let mut orchestrator =
            CouncilOrchestrator::new(Config::default(), voice.clone(), capture)
                .unwrap()
                .with_user_name("Sam")
                .with_random(Box::new(FixedRandom::never()))
                .with_callback(recording_callback(log.clone(), controls_tx.clone()));

        controls_tx.send(Control::Start).unwrap();
        let completed = orchestrator.run(controls_rx).await;

        assert_eq!(errors(&log), 1);
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].records.len(), 5);
        assert_eq!(completed[0].records[0].text, "Adrien has spoken.");
        assert_eq!(voice.calls("connect Adrien"), 2);
        assert_eq!(voice.max_open(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failure_then_retry() {
        // Both attempts of the first acquire fail.
        let voice = ScriptedVoice::new().failing_connects(2);
        let capture = ScriptedCapture::new(["Quelle preuve ?"]);
        let log: Log = Arc::default();
        let (controls_tx, controls_rx) = mpsc::unbounded_channel();

        let mut orchestrator =
            CouncilOrchestrator::new(Config::default(), voice.clone(), capture)
                .unwrap()
                .with_user_name("Sam")
                .with_random(Box::new(FixedRandom::never()))
                .with_callback(recording_callback(log.clone(), controls_tx.clone()));

        controls_tx.send(Control::Start).unwrap();
        let completed = orchestrator.run(controls_rx).await;

        assert_eq!(errors(&log), 1);
        assert_eq!(voice.calls("connect Adrien"), 3);
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].records[0].persona, Persona::Adrien);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_timeout_stops_listening() {
        let voice = ScriptedVoice::new();
        let capture = ScriptedCapture::new(Vec::<String>::new()).hang_when_empty();
        let log: Log = Arc::default();
        let (controls_tx, controls_rx) = mpsc::unbounded_channel();

        let quit = controls_tx.clone();
        let events = log.clone();
        let callback: CouncilCallback = Box::new(move |event| {
            if matches!(event, CouncilEvent::Error(_)) {
                let _ = quit.send(Control::Quit);
            }
            events.lock().unwrap().push(event);
        });

        let mut orchestrator = CouncilOrchestrator::new(Config::default(), voice, capture.clone())
            .unwrap()
            .with_user_name("Sam")
            .with_callback(callback);

        controls_tx.send(Control::Start).unwrap();
        let completed = orchestrator.run(controls_rx).await;

        assert!(completed.is_empty());
        assert_eq!(errors(&log), 1);
        assert_eq!(capture.calls("listen"), 1);
        assert_eq!(capture.calls("stop"), 1);
        let timed_out = log.lock().unwrap().iter().any(|e| {
            matches!(e, CouncilEvent::Error(msg) if msg.contains("No speech captured within 300s"))
        });
        assert!(timed_out);
    }

    #[tokio::test]
    async fn test_stale_events_are_dropped() {
        let orchestrator =
            CouncilOrchestrator::new(Config::default(), ScriptedVoice::new(), ScriptedCapture::default())
                .unwrap();
        let stale = Envelope {
            origin: Origin::Voice(42),
            event: SinkEvent::Speaking(false),
        };
        assert_eq!(orchestrator.accept(stale), None);
        let stale_capture = Envelope {
            origin: Origin::Capture(7),
            event: SinkEvent::FinalResult("late".to_string()),
        };
        assert_eq!(orchestrator.accept(stale_capture), None);
    }
}
