//! Speech capture over typed console lines.
//!
//! A reader task splits stdin into operator commands (lines starting with `/`)
//! and utterances. Each listening session consumes the next utterance typed
//! after it started as its final recognition result.

use async_trait::async_trait;
use councilai_core::voice::{EventSink, SpeechCapture};
use councilai_core::{Control, CouncilError};
use std::io::BufRead;
use std::sync::Arc;
use std::thread;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

pub const COMMANDS: &str = "/start /new /reset /retry /quit";

/// Parse an operator command line.
pub fn parse_command(line: &str) -> Option<Control> {
    match line.trim().to_lowercase().as_str() {
        "/start" => Some(Control::Start),
        "/new" => Some(Control::NewQuestion),
        "/reset" => Some(Control::Reset),
        "/retry" => Some(Control::Retry),
        "/quit" | "/exit" => Some(Control::Quit),
        _ => None,
    }
}

/// Forward lines from `reader` until end of input or until a receiver is
/// gone. Commands go to `controls`, everything else to `utterances`.
pub fn forward_lines<R: BufRead>(
    reader: R,
    controls: &mpsc::UnboundedSender<Control>,
    utterances: &mpsc::UnboundedSender<String>,
) {
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("stdin read failed: {}", e);
                break;
            }
        };
        let sent = if line.trim_start().starts_with('/') {
            match parse_command(&line) {
                Some(control) => {
                    if control == Control::Reset {
                        println!("Council reset. Type /start to begin again.");
                    }
                    controls.send(control).is_ok()
                }
                None => {
                    eprintln!("Unknown command: {} (use {})", line.trim(), COMMANDS);
                    true
                }
            }
        } else {
            utterances.send(line).is_ok()
        };
        if !sent {
            break;
        }
    }
    tracing::debug!("stdin closed");
}

/// Read stdin on a detached thread. A blocking read cannot be cancelled, so
/// the thread is never joined and does not hold the runtime open on exit.
pub fn spawn_stdin_reader(
    controls: mpsc::UnboundedSender<Control>,
    utterances: mpsc::UnboundedSender<String>,
) {
    thread::spawn(move || forward_lines(std::io::stdin().lock(), &controls, &utterances));
}

pub struct StdinCapture {
    utterances: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    listener: Option<JoinHandle<()>>,
}

impl StdinCapture {
    pub fn new(utterances: mpsc::UnboundedReceiver<String>) -> Self {
        Self {
            utterances: Arc::new(Mutex::new(utterances)),
            listener: None,
        }
    }
}

#[async_trait]
impl SpeechCapture for StdinCapture {
    async fn start_listening(&mut self, events: EventSink) -> Result<(), CouncilError> {
        self.stop_listening().await;
        let utterances = Arc::clone(&self.utterances);
        {
            // Lines typed while nothing was listening are not answers.
            let mut pending = utterances.lock().await;
            let mut dropped = 0;
            while pending.try_recv().is_ok() {
                dropped += 1;
            }
            if dropped > 0 {
                tracing::debug!(dropped, "discarded input typed outside a listening session");
            }
        }
        self.listener = Some(tokio::spawn(async move {
            let next = utterances.lock().await.recv().await;
            match next {
                Some(line) => events.final_result(line),
                None => events.capture_closed(),
            }
        }));
        Ok(())
    }

    async fn stop_listening(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}
