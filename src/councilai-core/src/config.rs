//! Configuration module for loading TOML config files.

use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::CouncilError;
use crate::persona::Persona;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub debate: DebateSettings,
    pub selection: SelectionConfig,
    pub planner: PlannerConfig,
    pub budgets: BudgetConfig,
    pub timeouts: TimeoutConfig,
    pub voices: VoicesConfig,
}

/// General debate settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DebateSettings {
    /// Spoken language every persona is asked to use.
    pub language: String,
    /// Host persona: delivers the onboarding and every closing turn.
    pub host: Persona,
    /// Keep the host out of the intervention plan so it only speaks to close.
    pub exclude_host_from_interventions: bool,
    /// Chat model used by the chat voice channel.
    pub model: String,
    /// Response length hint per turn.
    pub max_tokens: u32,
}

impl Default for DebateSettings {
    fn default() -> Self {
        Self {
            language: "French".to_string(),
            host: Persona::Nova,
            exclude_host_from_interventions: false,
            model: "gpt-4o-mini".to_string(),
            max_tokens: 400,
        }
    }
}

/// Probabilities used when picking the main speaker and the callout target.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    /// Single keyword match: chance of handing the turn to someone else.
    pub diversify: f64,
    /// Single match equal to the previous speaker: chance of picking another.
    pub single_repeat_avoid: f64,
    /// While diversifying: chance of also excluding the previous speaker.
    pub diversify_repeat_avoid: f64,
    /// Zero or several matches: chance of excluding the previous speaker.
    pub pool_repeat_avoid: f64,
    /// Chance that the callout goes to one of the leading challengers.
    pub callout_challenger: f64,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            diversify: 0.30,
            single_repeat_avoid: 0.55,
            diversify_repeat_avoid: 0.80,
            pool_repeat_avoid: 0.85,
            callout_challenger: 0.80,
        }
    }
}

/// Probabilities used by the intervention planner.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub swap: f64,
    pub wildcard: f64,
    pub second_wildcard: f64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            swap: 0.50,
            wildcard: 0.75,
            second_wildcard: 0.40,
        }
    }
}

/// Character budgets for transcripts quoted inside directed texts.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub context: usize,
    pub callout_quote: usize,
    pub intervention_quote: usize,
    pub closing_quote: usize,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            context: 200,
            callout_quote: 250,
            intervention_quote: 200,
            closing_quote: 300,
        }
    }
}

/// Bounds on every suspension point of the orchestrator.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub connect_secs: u64,
    /// Extra connect attempts after the first one fails.
    pub connect_retries: u32,
    pub response_secs: u64,
    pub listen_secs: u64,
    /// Pause before opening each voice session.
    pub handoff_ms: u64,
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn response(&self) -> Duration {
        Duration::from_secs(self.response_secs)
    }

    pub fn listen(&self) -> Duration {
        Duration::from_secs(self.listen_secs)
    }

    pub fn handoff(&self) -> Duration {
        Duration::from_millis(self.handoff_ms)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 15,
            connect_retries: 1,
            response_secs: 90,
            listen_secs: 300,
            handoff_ms: 300,
        }
    }
}

/// Voice configuration for TTS.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VoicesConfig {
    pub adrien: String,
    pub nova: String,
    pub henri: String,
    pub aya: String,
    pub damien: String,
    /// Playback rate applied to rendered audio (1.0 = unchanged).
    pub speech_rate: f32,
}

impl VoicesConfig {
    /// Get the voice ID for a persona.
    pub fn voice_for(&self, persona: Persona) -> &str {
        match persona {
            Persona::Adrien => &self.adrien,
            Persona::Nova => &self.nova,
            Persona::Henri => &self.henri,
            Persona::Aya => &self.aya,
            Persona::Damien => &self.damien,
        }
    }
}

impl Default for VoicesConfig {
    fn default() -> Self {
        Self {
            adrien: "am_adam".to_string(),
            nova: "af_sky".to_string(),
            henri: "bm_george".to_string(),
            aya: "af_bella".to_string(),
            damien: "am_michael".to_string(),
            speech_rate: 1.0,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CouncilError> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| CouncilError::ConfigError(format!("Failed to read config: {}", e)))?;

        Self::parse(&content)
    }

    /// Load configuration from string content.
    pub fn parse(content: &str) -> Result<Self, CouncilError> {
        let config: Config = toml::from_str(content)
            .map_err(|e| CouncilError::ConfigError(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), CouncilError> {
        let probabilities = [
            ("selection.diversify", self.selection.diversify),
            ("selection.single_repeat_avoid", self.selection.single_repeat_avoid),
            ("selection.diversify_repeat_avoid", self.selection.diversify_repeat_avoid),
            ("selection.pool_repeat_avoid", self.selection.pool_repeat_avoid),
            ("selection.callout_challenger", self.selection.callout_challenger),
            ("planner.swap", self.planner.swap),
            ("planner.wildcard", self.planner.wildcard),
            ("planner.second_wildcard", self.planner.second_wildcard),
        ];
        for (key, value) in probabilities {
            if !(0.0..=1.0).contains(&value) {
                return Err(CouncilError::ConfigError(format!(
                    "{} must be between 0 and 1, got {}",
                    key, value
                )));
            }
        }
        if self.voices.speech_rate <= 0.0 {
            return Err(CouncilError::ConfigError(
                "voices.speech_rate must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.debate.host, Persona::Nova);
        assert_eq!(config.debate.language, "French");
        assert_eq!(config.budgets.callout_quote, 250);
        assert_eq!(config.timeouts.connect_retries, 1);
    }

    #[test]
    fn test_partial_sections_keep_remaining_defaults() {
        let config = Config::parse(
            r#"
[debate]
language = "English"
host = "Henri"

[planner]
second_wildcard = 0.0
"#,
        )
        .unwrap();
        assert_eq!(config.debate.language, "English");
        assert_eq!(config.debate.host, Persona::Henri);
        assert_eq!(config.debate.max_tokens, 400);
        assert_eq!(config.planner.second_wildcard, 0.0);
        assert_eq!(config.planner.wildcard, 0.75);
    }

    #[test]
    fn test_rejects_out_of_range_probability() {
        let err = Config::parse("[selection]\ndiversify = 1.5\n").unwrap_err();
        assert!(err.to_string().contains("selection.diversify"));
    }

    #[test]
    fn test_rejects_unknown_host() {
        assert!(Config::parse("[debate]\nhost = \"Socrates\"\n").is_err());
    }

    #[test]
    fn test_voice_for_persona() {
        let voices = VoicesConfig::default();
        assert_eq!(voices.voice_for(Persona::Henri), "bm_george");
    }
}
