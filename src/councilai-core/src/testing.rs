//! In-memory collaborators for tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::error::CouncilError;
use crate::persona::Persona;
use crate::voice::{EventSink, SpeechCapture, VoiceChannel};

#[derive(Default)]
struct VoiceState {
    log: Vec<String>,
    session: Option<(Persona, EventSink)>,
    open: usize,
    max_open: usize,
    failing_connects: usize,
    hanging: bool,
    silent_sends: usize,
}

/// Voice channel whose persona answers every directed text with
/// "<Persona> has spoken." framed by speaking edges.
#[derive(Clone, Default)]
pub(crate) struct ScriptedVoice {
    state: Arc<Mutex<VoiceState>>,
}

impl ScriptedVoice {
    pub fn new() -> Self {
        Self::default()
    }

    /// The first `n` connect attempts fail.
    pub fn failing_connects(self, n: usize) -> Self {
        self.state.lock().unwrap().failing_connects = n;
        self
    }

    /// Every connect attempt hangs forever.
    pub fn hanging_connects(self) -> Self {
        self.state.lock().unwrap().hanging = true;
        self
    }

    /// The first `n` directed texts get no spoken answer.
    pub fn silent_sends(self, n: usize) -> Self {
        self.state.lock().unwrap().silent_sends = n;
        self
    }

    pub fn calls(&self, prefix: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.log.iter().filter(|l| l.starts_with(prefix)).count()
    }

    pub fn log(&self) -> Vec<String> {
        self.state.lock().unwrap().log.clone()
    }

    pub fn max_open(&self) -> usize {
        self.state.lock().unwrap().max_open
    }

    pub fn open(&self) -> usize {
        self.state.lock().unwrap().open
    }
}

#[async_trait]
impl VoiceChannel for ScriptedVoice {
    async fn connect(&mut self, persona: Persona, events: EventSink) -> Result<(), CouncilError> {
        let hanging = {
            let mut state = self.state.lock().unwrap();
            state.log.push(format!("connect {}", persona));
            if state.failing_connects > 0 {
                state.failing_connects -= 1;
                return Err(CouncilError::ConnectFailed {
                    persona,
                    reason: "scripted failure".to_string(),
                });
            }
            state.hanging
        };
        if hanging {
            std::future::pending::<()>().await;
        }

        let mut state = self.state.lock().unwrap();
        state.session = Some((persona, events));
        state.open += 1;
        state.max_open = state.max_open.max(state.open);
        Ok(())
    }

    async fn send_text(&mut self, message: &str) -> Result<(), CouncilError> {
        let mut state = self.state.lock().unwrap();
        let Some((persona, sink)) = state.session.clone() else {
            return Err(CouncilError::SessionLost("not connected".to_string()));
        };
        state.log.push(format!("send {}: {}", persona, message));
        if state.silent_sends > 0 {
            state.silent_sends -= 1;
            return Ok(());
        }
        sink.speaking(false);
        sink.speaking(true);
        sink.transcript(format!("{} has ", persona));
        sink.transcript("spoken.");
        sink.speaking(false);
        Ok(())
    }

    async fn disconnect(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.log.push("disconnect".to_string());
        if state.session.take().is_some() {
            state.open -= 1;
        }
    }
}

#[derive(Default)]
struct CaptureState {
    utterances: VecDeque<String>,
    log: Vec<String>,
    hang_when_empty: bool,
}

/// Capture that answers each listening session with the next queued
/// utterance, then reports end of input.
#[derive(Clone, Default)]
pub(crate) struct ScriptedCapture {
    state: Arc<Mutex<CaptureState>>,
}

impl ScriptedCapture {
    pub fn new<I, S>(utterances: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let capture = Self::default();
        capture.state.lock().unwrap().utterances = utterances.into_iter().map(Into::into).collect();
        capture
    }

    /// Keep listening silently instead of closing once utterances run out.
    pub fn hang_when_empty(self) -> Self {
        self.state.lock().unwrap().hang_when_empty = true;
        self
    }

    pub fn calls(&self, prefix: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.log.iter().filter(|l| l.starts_with(prefix)).count()
    }
}

#[async_trait]
impl SpeechCapture for ScriptedCapture {
    async fn start_listening(&mut self, events: EventSink) -> Result<(), CouncilError> {
        let mut state = self.state.lock().unwrap();
        state.log.push("listen".to_string());
        match state.utterances.pop_front() {
            Some(text) => events.final_result(text),
            None if state.hang_when_empty => {}
            None => events.capture_closed(),
        }
        Ok(())
    }

    async fn stop_listening(&mut self) {
        self.state.lock().unwrap().log.push("stop".to_string());
    }
}
