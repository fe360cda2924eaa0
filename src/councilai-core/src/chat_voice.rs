//! Voice channel backed by an OpenAI-compatible chat-completions endpoint.
//!
//! One session holds one persona's system instructions. Each directed text is
//! answered by a completion, sanitized, and reported through the session's
//! [`EventSink`] as a complete spoken turn: speaking on, transcript, speaking off.

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
    ChatCompletionRequestUserMessage, CreateChatCompletionRequest,
    CreateChatCompletionRequestArgs,
};
use async_trait::async_trait;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::config::DebateSettings;
use crate::error::CouncilError;
use crate::persona::Persona;
use crate::voice::{EventSink, VoiceChannel};

/// Replies shorter than this are treated as empty and requested again.
const MIN_REPLY_CHARS: usize = 10;
const MAX_EMPTY_RETRIES: usize = 3;
const MAX_API_RETRIES: u32 = 3;

/// Connection settings for the chat endpoint.
#[derive(Debug, Clone)]
pub struct ChatVoiceConfig {
    /// OpenAI-compatible API base URL.
    pub api_base: String,
    /// API key for authentication.
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    /// Spoken language written into every persona's instructions.
    pub language: String,
}

impl ChatVoiceConfig {
    pub fn new(
        api_base: impl Into<String>,
        api_key: impl Into<String>,
        settings: &DebateSettings,
    ) -> Self {
        Self {
            api_base: api_base.into(),
            api_key: api_key.into(),
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
            language: settings.language.clone(),
        }
    }
}

struct ChatSession {
    persona: Persona,
    instructions: String,
    events: EventSink,
}

pub struct ChatVoiceChannel {
    client: Client<OpenAIConfig>,
    config: ChatVoiceConfig,
    session: Option<ChatSession>,
    reply: Option<JoinHandle<()>>,
}

impl ChatVoiceChannel {
    pub fn new(config: ChatVoiceConfig) -> Result<Self, CouncilError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| CouncilError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        let openai = OpenAIConfig::new()
            .with_api_key(&config.api_key)
            .with_api_base(&config.api_base);

        Ok(Self {
            client: Client::with_config(openai).with_http_client(http_client),
            config,
            session: None,
            reply: None,
        })
    }

    #[cfg(test)]
    fn persona(&self) -> Option<Persona> {
        self.session.as_ref().map(|s| s.persona)
    }

    fn build_request(
        &self,
        instructions: &str,
        message: &str,
    ) -> Result<CreateChatCompletionRequest, CouncilError> {
        let messages = vec![
            ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
                content: instructions.to_string().into(),
                name: None,
            }),
            ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                content: message.to_string().into(),
                name: None,
            }),
        ];

        Ok(CreateChatCompletionRequestArgs::default()
            .model(&self.config.model)
            .max_completion_tokens(self.config.max_tokens)
            .messages(messages)
            .build()?)
    }

    fn abort_reply(&mut self) {
        if let Some(handle) = self.reply.take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl VoiceChannel for ChatVoiceChannel {
    async fn connect(&mut self, persona: Persona, events: EventSink) -> Result<(), CouncilError> {
        if let Some(session) = &self.session {
            return Err(CouncilError::SessionBusy {
                active: session.persona,
                requested: persona,
            });
        }
        tracing::debug!(%persona, model = %self.config.model, "chat session open");
        self.session = Some(ChatSession {
            persona,
            instructions: persona.instructions(&self.config.language),
            events,
        });
        Ok(())
    }

    async fn send_text(&mut self, message: &str) -> Result<(), CouncilError> {
        let Some(session) = &self.session else {
            return Err(CouncilError::SessionLost("no open chat session".to_string()));
        };
        let request = self.build_request(&session.instructions, message)?;
        let persona = session.persona;
        let events = session.events.clone();
        let client = self.client.clone();

        self.abort_reply();
        self.reply = Some(tokio::spawn(async move {
            match complete_with_retries(&client, request, persona).await {
                Ok(reply) => {
                    events.speaking(true);
                    events.transcript(reply);
                    events.speaking(false);
                }
                Err(e) => {
                    tracing::warn!(%persona, "chat completion failed: {}", e);
                    events.closed(e.to_string());
                }
            }
        }));
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.abort_reply();
        if let Some(session) = self.session.take() {
            tracing::debug!(persona = %session.persona, "chat session closed");
        }
    }
}

/// Request a reply, asking again when the sanitized answer comes back empty.
async fn complete_with_retries(
    client: &Client<OpenAIConfig>,
    request: CreateChatCompletionRequest,
    persona: Persona,
) -> Result<String, CouncilError> {
    for attempt in 0..MAX_EMPTY_RETRIES {
        let response = get_completion(client, &request).await?;
        let sanitized = sanitize_response(&response);
        if sanitized.chars().count() > MIN_REPLY_CHARS {
            return Ok(sanitized);
        }
        if attempt < MAX_EMPTY_RETRIES - 1 {
            tracing::warn!(
                %persona,
                "[Retry {}/{}] empty response, retrying",
                attempt + 1,
                MAX_EMPTY_RETRIES
            );
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
    }

    Err(CouncilError::SessionLost(format!(
        "{} returned an empty response after {} attempts",
        persona, MAX_EMPTY_RETRIES
    )))
}

/// One completion call, retried with exponential backoff (1s, 2s).
async fn get_completion(
    client: &Client<OpenAIConfig>,
    request: &CreateChatCompletionRequest,
) -> Result<String, CouncilError> {
    let mut last_error = None;

    for attempt in 0..MAX_API_RETRIES {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_secs(1 << (attempt - 1))).await;
        }

        match client.chat().create(request.clone()).await {
            Ok(response) => {
                return Ok(response
                    .choices
                    .first()
                    .and_then(|c| c.message.content.clone())
                    .unwrap_or_default());
            }
            Err(e) => {
                tracing::debug!(attempt = attempt + 1, "completion request failed: {}", e);
                last_error = Some(e);
            }
        }
    }

    Err(last_error.map(CouncilError::from).unwrap_or_else(|| {
        CouncilError::ConfigError("Unknown API error after retries".to_string())
    }))
}

/// Strip reasoning blocks, stray tags, markdown emphasis and extra whitespace
/// so the reply reads as plain speech.
pub fn sanitize_response(response: &str) -> String {
    let tags_to_strip = [
        "thinking",
        "think",
        "reflection",
        "reflect",
        "internal",
        "reasoning",
        "thought",
        "scratch",
        "scratchpad",
        "plan",
        "analysis",
        "analyze",
        "consider",
        "pondering",
        "deliberation",
    ];

    let mut result = response.to_string();

    for tag in &tags_to_strip {
        let pattern = format!(r"(?is)<{tag}[^>]*>.*?</{tag}>", tag = tag);
        if let Ok(re) = regex::Regex::new(&pattern) {
            result = re.replace_all(&result, "").to_string();
        }
    }

    if let Ok(orphan_re) = regex::Regex::new(r"</?[\w]+[^>]*>") {
        result = orphan_re.replace_all(&result, "").to_string();
    }

    result = result.replace('*', "");

    if let Ok(ws_re) = regex::Regex::new(r"\s+") {
        result = ws_re.replace_all(&result, " ").to_string();
    }

    result.trim().to_string()
}
