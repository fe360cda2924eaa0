//! Error types for the council system.

use thiserror::Error;

use crate::persona::Persona;

#[derive(Error, Debug)]
pub enum CouncilError {
    #[error("OpenAI API error: {0}")]
    OpenAIError(#[from] async_openai::error::OpenAIError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Unknown persona: {0}")]
    UnknownPersona(String),

    #[error("A voice session for {active} is still open; cannot open one for {requested}")]
    SessionBusy { active: Persona, requested: Persona },

    #[error("Connection to {persona} failed: {reason}")]
    ConnectFailed { persona: Persona, reason: String },

    #[error("Connection to {persona} timed out after {secs}s")]
    ConnectTimeout { persona: Persona, secs: u64 },

    #[error("{persona} did not finish speaking within {secs}s")]
    ResponseTimeout { persona: Persona, secs: u64 },

    #[error("Voice session lost: {0}")]
    SessionLost(String),

    #[error("Speech capture error: {0}")]
    CaptureError(String),

    #[error("No speech captured within {0}s")]
    CaptureTimeout(u64),

    #[error("TTS error: {0}")]
    TtsError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
