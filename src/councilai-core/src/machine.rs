//! Turn execution state machine.
//!
//! `TurnMachine` is synchronous: every observation from the outside world is
//! fed in as an [`Input`] and the machine answers with the [`Effect`]s the
//! caller must carry out, in order. It never performs I/O itself, which keeps
//! the whole debate lifecycle reproducible under a fixed [`RandomSource`].
//!
//! ```text
//! Welcome -> IntroSpeaking -> ListeningName -> GreetingSpeaking
//!         -> ListeningQuestion -> Connecting <-> Responding -> ... -> ListeningQuestion
//! ```

use chrono::Utc;

use crate::config::Config;
use crate::error::CouncilError;
use crate::persona::Persona;
use crate::planner::InterventionPlanner;
use crate::random::{RandomSource, pick};
use crate::selector::PersonaSelector;
use crate::turn_graph::{
    CompletedDebate, LastExchange, PendingTurn, TurnGraphBuilder, TurnKind, TurnRecord,
};

/// Name used in directed texts when the participant never gave one.
const ANONYMOUS_PARTICIPANT: &str = "Someone in the audience";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    /// Nothing has happened yet, or a full reset was requested.
    Welcome,
    /// Host is welcoming the audience and asking for a name.
    IntroSpeaking,
    ListeningName,
    /// Host is greeting the participant by name.
    GreetingSpeaking,
    /// Idle between debates, waiting for the next question.
    ListeningQuestion,
    /// A debate turn's voice session is being opened.
    Connecting,
    /// A debate turn's persona has its directed text and is answering.
    Responding,
}

impl AppState {
    pub fn is_idle(&self) -> bool {
        matches!(self, AppState::Welcome | AppState::ListeningQuestion)
    }
}

/// Operator commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Begin the onboarding from `Welcome`.
    Start,
    /// Abandon the current debate and wait for a new question.
    NewQuestion,
    /// Abandon everything and return to `Welcome`.
    Reset,
    /// Retry a failed connection or a failed capture.
    Retry,
    /// Tear down and stop the event loop.
    Quit,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Control(Control),
    /// The voice session asked for by the last `Effect::Connect` is connected.
    Connected,
    /// The voice session asked for by the last `Effect::Connect` could not open.
    ConnectFailed(String),
    Speaking(bool),
    Transcript(String),
    /// The open voice session dropped on its own.
    SessionLost(String),
    FinalResult(String),
    CaptureError(String),
    /// No finished-speaking edge within the given number of seconds.
    ResponseTimedOut(u64),
    /// No final capture result within the given number of seconds.
    CaptureTimedOut(u64),
}

/// Work the caller must perform on the machine's behalf.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Connect(Persona),
    SendText(String),
    Disconnect,
    StartListening,
    StopListening,
    Notify(CouncilEvent),
}

/// Events reported to the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum CouncilEvent {
    StateChanged(AppState),
    /// A persona is about to speak. `kind` is `None` for onboarding turns.
    TurnStarted {
        persona: Persona,
        kind: Option<TurnKind>,
        index: usize,
        total: usize,
    },
    TurnFinished {
        persona: Persona,
        kind: Option<TurnKind>,
        text: String,
    },
    DebateCompleted(CompletedDebate),
    Error(String),
}

/// Where the machine is waiting on the outside world.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suspension {
    AwaitingSpeech,
    AwaitingCapture,
}

/// A suspension point plus an epoch that changes every time a new wait begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Wait {
    pub point: Suspension,
    pub epoch: u64,
}

/// Detects the end of a spoken turn.
///
/// A turn is finished on the first speaking `true -> false` edge. Reports of
/// `false` before any `true` never finish a turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpeechTracker {
    started: bool,
    speaking: bool,
    finished: bool,
}

impl SpeechTracker {
    /// Record one speaking observation; returns `true` exactly once, on the
    /// edge that finishes the turn.
    pub fn observe(&mut self, speaking: bool) -> bool {
        if self.finished {
            return false;
        }
        if speaking {
            self.started = true;
            self.speaking = true;
            return false;
        }
        let edge = self.started && self.speaking;
        self.speaking = false;
        self.finished = edge;
        edge
    }

    #[cfg(test)]
    fn has_started(&self) -> bool {
        self.started
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TurnPhase {
    Connecting,
    Responding,
}

/// The turn currently bound (or being bound) to the voice session.
#[derive(Debug, Clone)]
struct ActiveTurn {
    persona: Persona,
    message: String,
    phase: TurnPhase,
    tracker: SpeechTracker,
    transcript: String,
}

impl ActiveTurn {
    fn new(persona: Persona, message: String) -> Self {
        Self {
            persona,
            message,
            phase: TurnPhase::Connecting,
            tracker: SpeechTracker::default(),
            transcript: String::new(),
        }
    }

    fn rewind(&mut self) {
        self.phase = TurnPhase::Connecting;
        self.tracker = SpeechTracker::default();
        self.transcript.clear();
    }
}

#[derive(Debug, Clone)]
pub struct TurnMachine {
    selector: PersonaSelector,
    planner: InterventionPlanner,
    graph: TurnGraphBuilder,
    exclude_host: bool,

    state: AppState,
    user_name: Option<String>,
    question: String,
    sequence: Vec<PendingTurn>,
    records: Vec<TurnRecord>,
    turn_index: usize,
    active: Option<ActiveTurn>,
    session_held: bool,
    listening: bool,
    last_exchange: Option<LastExchange>,
    epoch: u64,
}

impl TurnMachine {
    pub fn new(config: &Config) -> Result<Self, CouncilError> {
        Ok(Self {
            selector: PersonaSelector::new(config.selection.clone())?,
            planner: InterventionPlanner::new(config.planner.clone()),
            graph: TurnGraphBuilder::new(&config.debate, config.budgets.clone()),
            exclude_host: config.debate.exclude_host_from_interventions,
            state: AppState::Welcome,
            user_name: None,
            question: String::new(),
            sequence: Vec::new(),
            records: Vec::new(),
            turn_index: 0,
            active: None,
            session_held: false,
            listening: false,
            last_exchange: None,
            epoch: 0,
        })
    }

    /// Skip the name capture: `Start` goes straight to listening for a question.
    pub fn with_user_name(mut self, name: impl Into<String>) -> Self {
        self.user_name = Some(name.into());
        self
    }

    pub fn state(&self) -> AppState {
        self.state
    }

    pub fn user_name(&self) -> Option<&str> {
        self.user_name.as_deref()
    }

    pub fn sequence(&self) -> &[PendingTurn] {
        &self.sequence
    }

    pub fn records(&self) -> &[TurnRecord] {
        &self.records
    }

    pub fn turn_index(&self) -> usize {
        self.turn_index
    }

    pub fn last_exchange(&self) -> Option<&LastExchange> {
        self.last_exchange.as_ref()
    }

    /// Persona of the turn currently bound to the voice session.
    pub fn active_persona(&self) -> Option<Persona> {
        self.active.as_ref().map(|a| a.persona)
    }

    /// Whether the machine currently owns an open (or opening) voice session.
    pub fn session_held(&self) -> bool {
        self.session_held
    }

    pub fn listening(&self) -> bool {
        self.listening
    }

    /// Current suspension point, if the machine is waiting on something that
    /// should be bounded by a timeout.
    pub fn wait(&self) -> Option<Wait> {
        match &self.active {
            Some(active) if active.phase == TurnPhase::Responding => Some(Wait {
                point: Suspension::AwaitingSpeech,
                epoch: self.epoch,
            }),
            _ if self.listening => Some(Wait {
                point: Suspension::AwaitingCapture,
                epoch: self.epoch,
            }),
            _ => None,
        }
    }

    /// Feed one observation and collect the resulting effects.
    pub fn handle(&mut self, input: Input, rng: &mut dyn RandomSource) -> Vec<Effect> {
        let mut fx = Vec::new();
        match input {
            Input::Control(control) => self.on_control(control, &mut fx),
            Input::Connected => self.on_connected(&mut fx),
            Input::ConnectFailed(reason) => self.on_connect_failed(reason, &mut fx),
            Input::Speaking(speaking) => self.on_speaking(speaking, rng, &mut fx),
            Input::Transcript(delta) => self.on_transcript(&delta),
            Input::SessionLost(reason) => {
                self.abort_turn(CouncilError::SessionLost(reason), &mut fx)
            }
            Input::FinalResult(text) => self.on_final_result(text, rng, &mut fx),
            Input::CaptureError(error) => {
                self.abort_capture(CouncilError::CaptureError(error), &mut fx)
            }
            Input::ResponseTimedOut(secs) => {
                if let Some(persona) = self.active_persona() {
                    self.abort_turn(CouncilError::ResponseTimeout { persona, secs }, &mut fx);
                }
            }
            Input::CaptureTimedOut(secs) => {
                self.abort_capture(CouncilError::CaptureTimeout(secs), &mut fx)
            }
        }
        fx
    }

    fn on_control(&mut self, control: Control, fx: &mut Vec<Effect>) {
        match control {
            Control::Start => {
                if self.state != AppState::Welcome {
                    tracing::debug!(state = ?self.state, "start ignored outside welcome");
                    return;
                }
                if self.user_name.is_some() {
                    self.set_state(AppState::ListeningQuestion, fx);
                    self.start_listening(fx);
                    return;
                }
                let host = self.graph.host();
                self.set_state(AppState::IntroSpeaking, fx);
                fx.push(Effect::Notify(CouncilEvent::TurnStarted {
                    persona: host,
                    kind: None,
                    index: 0,
                    total: 1,
                }));
                self.open_session(host, self.graph.intro_message(), fx);
            }
            Control::NewQuestion => {
                self.teardown(fx);
                self.clear_debate();
                self.set_state(AppState::ListeningQuestion, fx);
                self.start_listening(fx);
            }
            Control::Reset | Control::Quit => {
                self.teardown(fx);
                self.clear_debate();
                self.user_name = None;
                self.last_exchange = None;
                self.set_state(AppState::Welcome, fx);
            }
            Control::Retry => {
                if let Some(active) = &self.active {
                    if active.phase == TurnPhase::Connecting && !self.session_held {
                        let persona = active.persona;
                        tracing::info!(%persona, "retrying connection");
                        self.session_held = true;
                        self.epoch += 1;
                        fx.push(Effect::Connect(persona));
                    }
                    return;
                }
                if matches!(
                    self.state,
                    AppState::ListeningName | AppState::ListeningQuestion
                ) {
                    self.start_listening(fx);
                }
            }
        }
    }

    fn on_connected(&mut self, fx: &mut Vec<Effect>) {
        let Some(active) = self.active.as_mut() else {
            tracing::debug!("connected without an active turn");
            return;
        };
        if !self.session_held || active.phase != TurnPhase::Connecting {
            tracing::debug!(persona = %active.persona, "stale connected report");
            return;
        }
        active.phase = TurnPhase::Responding;
        active.tracker = SpeechTracker::default();
        active.transcript.clear();
        fx.push(Effect::SendText(active.message.clone()));
        self.epoch += 1;
        if self.state == AppState::Connecting {
            self.set_state(AppState::Responding, fx);
        }
    }

    fn on_connect_failed(&mut self, reason: String, fx: &mut Vec<Effect>) {
        let Some(active) = &self.active else { return };
        if !self.session_held || active.phase != TurnPhase::Connecting {
            return;
        }
        tracing::warn!(persona = %active.persona, "turn stays pending: {}", reason);
        self.session_held = false;
        fx.push(Effect::Notify(CouncilEvent::Error(reason)));
    }

    fn on_transcript(&mut self, delta: &str) {
        if let Some(active) = self.active.as_mut() {
            if active.phase == TurnPhase::Responding {
                active.transcript.push_str(delta);
            }
        }
    }

    fn on_speaking(&mut self, speaking: bool, rng: &mut dyn RandomSource, fx: &mut Vec<Effect>) {
        let finished = match self.active.as_mut() {
            Some(active) if active.phase == TurnPhase::Responding => {
                active.tracker.observe(speaking)
            }
            _ => false,
        };
        if !finished {
            return;
        }
        let Some(active) = self.active.take() else { return };
        self.release_session(fx);
        let text = active.transcript.trim().to_string();

        match self.state {
            AppState::IntroSpeaking => {
                self.notify_onboarding_finished(active.persona, text, fx);
                self.set_state(AppState::ListeningName, fx);
                self.start_listening(fx);
            }
            AppState::GreetingSpeaking => {
                self.notify_onboarding_finished(active.persona, text, fx);
                self.set_state(AppState::ListeningQuestion, fx);
                self.start_listening(fx);
            }
            AppState::Responding => self.finish_debate_turn(text, rng, fx),
            other => tracing::warn!(state = ?other, "turn finished in unexpected state"),
        }
    }

    fn on_final_result(&mut self, text: String, rng: &mut dyn RandomSource, fx: &mut Vec<Effect>) {
        if !self.listening {
            tracing::debug!("final result while not listening");
            return;
        }
        self.stop_listening(fx);
        let text = text.trim().to_string();

        match self.state {
            AppState::ListeningName | AppState::ListeningQuestion if text.is_empty() => {
                self.start_listening(fx);
            }
            AppState::ListeningName => {
                tracing::info!(name = %text, "participant introduced");
                self.user_name = Some(text.clone());
                let host = self.graph.host();
                self.set_state(AppState::GreetingSpeaking, fx);
                fx.push(Effect::Notify(CouncilEvent::TurnStarted {
                    persona: host,
                    kind: None,
                    index: 0,
                    total: 1,
                }));
                self.open_session(host, self.graph.greeting_message(&text), fx);
            }
            AppState::ListeningQuestion => self.begin_debate(text, rng, fx),
            other => tracing::debug!(state = ?other, "final result ignored"),
        }
    }

    fn begin_debate(&mut self, question: String, rng: &mut dyn RandomSource, fx: &mut Vec<Effect>) {
        let last = self.last_exchange.as_ref().map(|l| l.persona);
        let main = self.selector.select_main(&question, last, rng);
        let callout = self.selector.pick_callout(main, rng);
        let user = self.user_name.as_deref().unwrap_or(ANONYMOUS_PARTICIPANT);
        let turn = self
            .graph
            .main_turn(&question, user, main, callout, self.last_exchange.as_ref());
        tracing::info!(%main, %callout, "new debate");

        self.question = question;
        self.records.clear();
        self.sequence = vec![turn];
        self.open_debate_turn(0, fx);
    }

    fn finish_debate_turn(&mut self, text: String, rng: &mut dyn RandomSource, fx: &mut Vec<Effect>) {
        let Some(turn) = self.sequence.get(self.turn_index).cloned() else {
            tracing::warn!(index = self.turn_index, "finished turn is not in the sequence");
            self.clear_debate();
            self.set_state(AppState::ListeningQuestion, fx);
            self.start_listening(fx);
            return;
        };

        tracing::info!(persona = %turn.persona, kind = ?turn.kind, index = self.turn_index, "turn finished");
        self.records.push(TurnRecord {
            persona: turn.persona,
            kind: turn.kind,
            text: text.clone(),
        });
        fx.push(Effect::Notify(CouncilEvent::TurnFinished {
            persona: turn.persona,
            kind: Some(turn.kind),
            text: text.clone(),
        }));

        if turn.kind == TurnKind::Main {
            self.extend_after_main(&turn, rng);
        }

        let next = self.turn_index + 1;
        if next < self.sequence.len() {
            self.open_debate_turn(next, fx);
        } else if turn.kind != TurnKind::Closing {
            let closing = self.graph.closing_turn(&self.question, &self.records, rng);
            self.sequence.push(closing);
            self.open_debate_turn(self.sequence.len() - 1, fx);
        } else {
            self.complete_debate(turn.persona, text, fx);
        }
    }

    /// Queue the callout rebuttal and the planned interventions.
    fn extend_after_main(&mut self, turn: &PendingTurn, rng: &mut dyn RandomSource) {
        let main = turn.persona;
        let callout = match turn.callout_target {
            Some(target) if target != main => target,
            _ => pick(rng, &main.others()).unwrap_or(main.others()[0]),
        };

        let mut excluded = vec![callout];
        let host = self.graph.host();
        if self.exclude_host && host != main && host != callout {
            excluded.push(host);
        }
        let plan = self.planner.plan(main, &excluded, rng);
        tracing::debug!(?plan, "intervention plan");

        let Some(main_record) = self.records.last().cloned() else { return };
        let callout_turn = self.graph.callout_turn(&self.question, &main_record, callout);
        let interventions =
            self.graph
                .intervention_turns(&self.question, &main_record, callout, &plan, rng);
        self.sequence.push(callout_turn);
        self.sequence.extend(interventions);
    }

    fn complete_debate(&mut self, closer: Persona, answer: String, fx: &mut Vec<Effect>) {
        let question = std::mem::take(&mut self.question);
        let debate = CompletedDebate {
            question: question.clone(),
            records: std::mem::take(&mut self.records),
            timestamp: Utc::now(),
        };
        tracing::info!(turns = debate.records.len(), "debate completed");
        self.last_exchange = Some(LastExchange {
            question,
            persona: closer,
            answer,
        });
        self.clear_debate();
        fx.push(Effect::Notify(CouncilEvent::DebateCompleted(debate)));
        self.set_state(AppState::ListeningQuestion, fx);
        self.start_listening(fx);
    }

    fn open_debate_turn(&mut self, index: usize, fx: &mut Vec<Effect>) {
        let Some(turn) = self.sequence.get(index) else { return };
        let (persona, kind, message) = (turn.persona, turn.kind, turn.message.clone());
        self.turn_index = index;
        self.set_state(AppState::Connecting, fx);
        fx.push(Effect::Notify(CouncilEvent::TurnStarted {
            persona,
            kind: Some(kind),
            index,
            total: self.sequence.len(),
        }));
        self.open_session(persona, message, fx);
    }

    /// The only place a voice session is requested.
    fn open_session(&mut self, persona: Persona, message: String, fx: &mut Vec<Effect>) {
        if self.session_held {
            let active = self.active_persona().unwrap_or(persona);
            tracing::error!(%active, requested = %persona, "refusing to open a second session");
            fx.push(Effect::Notify(CouncilEvent::Error(
                CouncilError::SessionBusy {
                    active,
                    requested: persona,
                }
                .to_string(),
            )));
            return;
        }
        self.active = Some(ActiveTurn::new(persona, message));
        self.session_held = true;
        self.epoch += 1;
        fx.push(Effect::Connect(persona));
    }

    /// Recoverable failure while a persona was answering: close the session
    /// and rewind the same turn to its connecting phase.
    fn abort_turn(&mut self, error: CouncilError, fx: &mut Vec<Effect>) {
        let Some(active) = self.active.as_mut() else { return };
        if !self.session_held || active.phase != TurnPhase::Responding {
            return;
        }
        tracing::warn!(persona = %active.persona, "turn aborted: {}", error);
        active.rewind();
        self.release_session(fx);
        if self.state == AppState::Responding {
            self.set_state(AppState::Connecting, fx);
        }
        fx.push(Effect::Notify(CouncilEvent::Error(error.to_string())));
    }

    fn abort_capture(&mut self, error: CouncilError, fx: &mut Vec<Effect>) {
        if !self.listening {
            return;
        }
        tracing::warn!("capture stopped: {}", error);
        self.stop_listening(fx);
        fx.push(Effect::Notify(CouncilEvent::Error(error.to_string())));
    }

    fn notify_onboarding_finished(&self, persona: Persona, text: String, fx: &mut Vec<Effect>) {
        fx.push(Effect::Notify(CouncilEvent::TurnFinished {
            persona,
            kind: None,
            text,
        }));
    }

    fn teardown(&mut self, fx: &mut Vec<Effect>) {
        self.stop_listening(fx);
        self.release_session(fx);
        self.active = None;
    }

    fn clear_debate(&mut self) {
        self.question.clear();
        self.sequence.clear();
        self.records.clear();
        self.turn_index = 0;
    }

    fn release_session(&mut self, fx: &mut Vec<Effect>) {
        if self.session_held {
            self.session_held = false;
            fx.push(Effect::Disconnect);
        }
    }

    fn start_listening(&mut self, fx: &mut Vec<Effect>) {
        if !self.listening {
            self.listening = true;
            self.epoch += 1;
            fx.push(Effect::StartListening);
        }
    }

    fn stop_listening(&mut self, fx: &mut Vec<Effect>) {
        if self.listening {
            self.listening = false;
            fx.push(Effect::StopListening);
        }
    }

    fn set_state(&mut self, state: AppState, fx: &mut Vec<Effect>) {
        if self.state != state {
            tracing::info!(from = ?self.state, to = ?state, "state change");
            self.state = state;
            fx.push(Effect::Notify(CouncilEvent::StateChanged(state)));
        }
    }
}
