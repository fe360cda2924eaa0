//! CouncilAI Core Library
//!
//! Turn orchestration for the Council of Five: persona selection,
//! intervention planning, turn graph construction and the turn execution
//! state machine, plus the voice collaborators that run it.

pub mod chat_voice;
pub mod config;
pub mod error;
pub mod machine;
pub mod orchestrator;
pub mod persona;
pub mod planner;
pub mod random;
pub mod selector;
pub mod transcript;
pub mod tts;
pub mod turn_graph;
pub mod voice;

#[cfg(test)]
mod testing;

pub use chat_voice::{ChatVoiceChannel, ChatVoiceConfig};
pub use config::Config;
pub use error::CouncilError;
pub use machine::{AppState, Control, CouncilEvent, TurnMachine};
pub use orchestrator::{CouncilCallback, CouncilOrchestrator};
pub use persona::Persona;
pub use planner::{InterventionPlanItem, InterventionPlanner, Stance};
pub use random::{RandomSource, SeededRandom};
pub use selector::PersonaSelector;
pub use turn_graph::{CompletedDebate, TurnKind, TurnRecord};
pub use voice::{EventSink, SpeechCapture, VoiceChannel};
